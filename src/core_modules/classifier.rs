// THEORY:
// The Fault Classifier turns warm rectangles into the vocabulary a maintenance
// engineer uses: loose joints, point overloads and wire overloads, each with a
// severity. It is purely geometric plus one brightness statistic; it never looks at
// hue again.
//
// Key architectural principles:
// 1.  **Geometry First**: every region is reduced to three numbers (area fraction,
//     aspect ratio, fraction overlapping the central third) before any rule runs, so
//     all rules read the same measurements.
// 2.  **Two Verdicts**: the overall fault is decided on the pre-merge region list,
//     the per-region fault on the post-merge list. They can disagree; each answers a
//     different question.
// 3.  **Order Independence**: the overall verdict is an any/max reduction, so it
//     does not depend on the order regions arrive in.
// 4.  **Severity Floor**: a reported region is never exactly zero severity.

use image::RgbImage;
use serde::Serialize;
use std::fmt;

use crate::core_modules::mask::Mask;
use crate::core_modules::pixel::Pixel;
use crate::core_modules::region::Region;
use crate::core_modules::smart_pixel::SmartPixel;
use crate::params::DetectionParameters;

/// Start and end of the central third, as fractions of each axis.
const CENTER_START: f64 = 0.33;
const CENTER_END: f64 = 0.67;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FaultType {
    #[serde(rename = "none")]
    None,
    #[serde(rename = "loose joint")]
    LooseJoint,
    #[serde(rename = "point overload")]
    PointOverload,
    #[serde(rename = "wire overload")]
    WireOverload,
}

impl FaultType {
    pub fn as_str(self) -> &'static str {
        match self {
            FaultType::None => "none",
            FaultType::LooseJoint => "loose joint",
            FaultType::PointOverload => "point overload",
            FaultType::WireOverload => "wire overload",
        }
    }
}

impl fmt::Display for FaultType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SeverityLabel {
    Low,
    Moderate,
    High,
    Critical,
}

impl SeverityLabel {
    pub fn from_score(score: f64) -> Self {
        if score >= 0.80 {
            SeverityLabel::Critical
        } else if score >= 0.50 {
            SeverityLabel::High
        } else if score >= 0.20 {
            SeverityLabel::Moderate
        } else {
            SeverityLabel::Low
        }
    }
}

/// The shape measurements every classification rule reads.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegionGeometry {
    pub region: Region,
    /// Region area over image area.
    pub area_frac: f64,
    /// Long side over short side.
    pub aspect: f64,
    /// Fraction of the region inside the image's central third.
    pub overlap_center_frac: f64,
}

/// The image's central third, `[int(0.33 W), int(0.67 W))` on each axis.
pub fn central_rect(width: u32, height: u32) -> Region {
    let x0 = (width as f64 * CENTER_START) as u32;
    let y0 = (height as f64 * CENTER_START) as u32;
    let x1 = (width as f64 * CENTER_END) as u32;
    let y1 = (height as f64 * CENTER_END) as u32;
    Region::new(x0, y0, x1.saturating_sub(x0), y1.saturating_sub(y0))
}

pub fn measure_geometry(region: &Region, width: u32, height: u32) -> RegionGeometry {
    let total_area = width as f64 * height as f64;
    let area_frac = if total_area > 0.0 {
        region.area() as f64 / total_area
    } else {
        0.0
    };
    RegionGeometry {
        region: *region,
        area_frac,
        aspect: region.aspect_ratio(),
        overlap_center_frac: region.fraction_inside(&central_rect(width, height)),
    }
}

/// Coarse annotation label, used for overlay captions.
pub fn annotation_label(geometry: &RegionGeometry, params: &DetectionParameters) -> &'static str {
    if geometry.area_frac >= params.loose_area_threshold {
        "Loose joint"
    } else if geometry.aspect >= params.rectangular_aspect_threshold {
        "Wire overload"
    } else {
        "Point overload"
    }
}

/// Per-region fault.
pub fn classify_region(geometry: &RegionGeometry, params: &DetectionParameters) -> FaultType {
    let central_or_large = geometry.overlap_center_frac >= params.center_overlap_threshold
        || geometry.area_frac >= params.large_area_threshold;
    if geometry.area_frac >= params.loose_area_threshold && central_or_large {
        FaultType::LooseJoint
    } else if geometry.aspect >= params.rectangular_aspect_threshold {
        FaultType::WireOverload
    } else {
        FaultType::PointOverload
    }
}

/// Whole-image fault, evaluated in priority order over all regions.
pub fn classify_overall(
    regions: &[Region],
    width: u32,
    height: u32,
    params: &DetectionParameters,
) -> FaultType {
    if regions.is_empty() {
        return FaultType::None;
    }

    let geometries: Vec<RegionGeometry> = regions
        .iter()
        .map(|region| measure_geometry(region, width, height))
        .collect();

    let has_large_central = geometries.iter().any(|g| {
        g.area_frac >= params.large_area_threshold
            && g.overlap_center_frac >= params.center_overlap_threshold
    });
    let max_area_frac = geometries.iter().map(|g| g.area_frac).fold(0.0, f64::max);
    let has_rectangular = geometries
        .iter()
        .any(|g| g.aspect >= params.rectangular_aspect_threshold);

    if has_large_central {
        FaultType::LooseJoint
    } else if max_area_frac < params.large_area_threshold {
        FaultType::PointOverload
    } else if has_rectangular {
        FaultType::WireOverload
    } else {
        FaultType::None
    }
}

/// Linear ramp from `severity_lower_delta` (0) to `severity_upper_delta` (1).
pub fn delta_to_severity(delta: f64, params: &DetectionParameters) -> f64 {
    let (lo, hi) = (params.severity_lower_delta, params.severity_upper_delta);
    if delta <= lo {
        0.0
    } else if delta >= hi {
        1.0
    } else {
        (delta - lo) / (hi - lo)
    }
}

/// Severity of a region's brightness delta with its label. The label is taken
/// from the ramp value, the reported severity is floored at `severity_floor`.
pub fn severity_of(delta: f64, params: &DetectionParameters) -> (f64, SeverityLabel) {
    let raw = delta_to_severity(delta, params);
    (raw.max(params.severity_floor), SeverityLabel::from_score(raw))
}

/// Mean and max of the non-negative brightness increase over a region.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeltaStats {
    pub mean: f64,
    pub max: f64,
    pub pixel_count: usize,
}

/// Brightness-increase statistics over the valid pixels of `region`. `None` when
/// the region holds no valid pixel.
pub fn region_delta_stats(
    region: &Region,
    baseline: &RgbImage,
    candidate: &RgbImage,
    validity: Option<&Mask>,
) -> Option<DeltaStats> {
    let x_end = region.right().min(candidate.width());
    let y_end = region.bottom().min(candidate.height());

    let mut sum = 0.0;
    let mut max = 0.0f64;
    let mut pixel_count = 0usize;
    for y in region.y..y_end {
        for x in region.x..x_end {
            if validity.is_some_and(|mask| !mask.get(x, y)) {
                continue;
            }
            let base = SmartPixel::new(Pixel::from(baseline.get_pixel(x, y)));
            let cand = SmartPixel::new(Pixel::from(candidate.get_pixel(x, y)));
            let delta = cand.brightness_increase(&base);
            sum += delta;
            max = max.max(delta);
            pixel_count += 1;
        }
    }

    (pixel_count > 0).then(|| DeltaStats {
        mean: sum / pixel_count as f64,
        max,
        pixel_count,
    })
}

/// A surviving region with its geometry, fault and severity.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionInfo {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
    pub area_frac: f64,
    pub aspect: f64,
    pub overlap_center_frac: f64,
    /// Coarse annotation caption.
    pub label: String,
    pub box_fault: FaultType,
    pub severity: f64,
    pub severity_label: SeverityLabel,
    pub avg_delta_v: f64,
    pub max_delta_v: f64,
}

/// Classifies and scores each region. Regions without valid pixels are dropped.
pub fn describe_regions(
    regions: &[Region],
    baseline: &RgbImage,
    candidate: &RgbImage,
    validity: Option<&Mask>,
    params: &DetectionParameters,
) -> Vec<RegionInfo> {
    let (width, height) = candidate.dimensions();
    regions
        .iter()
        .filter_map(|region| {
            let stats = region_delta_stats(region, baseline, candidate, validity)?;
            let geometry = measure_geometry(region, width, height);
            let (severity, severity_label) = severity_of(stats.mean, params);
            Some(RegionInfo {
                x: region.x,
                y: region.y,
                w: region.width,
                h: region.height,
                area_frac: geometry.area_frac,
                aspect: geometry.aspect,
                overlap_center_frac: geometry.overlap_center_frac,
                label: annotation_label(&geometry, params).to_string(),
                box_fault: classify_region(&geometry, params),
                severity,
                severity_label,
                avg_delta_v: stats.mean,
                max_delta_v: stats.max,
            })
        })
        .collect()
}
