// THEORY:
// The Parameter Tuner closes the loop between detection and the human reviewer.
// When a reviewer draws a box the detector missed, or deletes one it should not
// have reported, the tuner measures that box on the candidate image and nudges the
// detection thresholds toward agreeing with the reviewer next time.
//
// Key architectural principles:
// 1.  **Same Color Model**: boxes are measured with `to_hsv`, the exact conversion
//     the Comparison Engine uses, so a threshold moved here means the same thing
//     there.
// 2.  **Small, Bounded Steps**: every adjustment is clamped to a narrow band; one
//     review session can shift a threshold only a little.
// 3.  **Sequential Working Copy**: deltas are applied to a working copy of the
//     parameters as they are computed, so each later box sees the thresholds the
//     earlier boxes already moved.
// 4.  **Deltas, not Values**: the output is a map of additive deltas; the host
//     applies and clamps them (see `DetectionParameters::apply_updates`).

use image::RgbImage;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::f64::consts::TAU;
use tracing::debug;

use crate::core_modules::pixel::{ColorSample, Pixel};
use crate::core_modules::smart_pixel::is_warm_hue;
use crate::params::{DetectionParameters, ParameterKey};

pub const SATURATION_MARGIN: f64 = 0.01;
pub const VALUE_MARGIN: f64 = 0.01;
pub const CONTRAST_MARGIN: f64 = 0.01;
pub const HUE_STEP: f64 = 0.01;
pub const AREA_RATIO_STEP: f64 = 0.0005;
/// Coordinate tolerance used when matching reviewer boxes against detector boxes.
pub const BOX_TOLERANCE: f64 = 0.5;
/// Deltas smaller than this are dropped from the output.
const NEGLIGIBLE_DELTA: f64 = 1e-6;

/// A box as `[x, y, width, height]`, possibly fractional.
pub type FeedbackBox = [f64; 4];

/// Reviewer feedback for one candidate image.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackPayload {
    #[serde(default)]
    pub parameters: DetectionParameters,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub added_boxes: Vec<FeedbackBox>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub removed_boxes: Vec<FeedbackBox>,
    /// Boxes the detector reported, before review.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub previous_boxes: Vec<FeedbackBox>,
    /// Boxes the reviewer kept or drew.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub final_boxes: Vec<FeedbackBox>,
    #[serde(default)]
    pub box_tolerance: Option<f64>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<FeedbackBox>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<FeedbackBox>>::deserialize(deserializer)?.unwrap_or_default())
}

impl FeedbackPayload {
    /// Added and removed boxes. When neither list was sent, they are derived from
    /// `previousBoxes` and `finalBoxes`.
    pub fn resolved_boxes(&self) -> (Vec<FeedbackBox>, Vec<FeedbackBox>) {
        if self.added_boxes.is_empty() && self.removed_boxes.is_empty() {
            let tolerance = self.box_tolerance.unwrap_or(BOX_TOLERANCE);
            return (
                diff_boxes(&self.final_boxes, &self.previous_boxes, tolerance),
                diff_boxes(&self.previous_boxes, &self.final_boxes, tolerance),
            );
        }
        (self.added_boxes.clone(), self.removed_boxes.clone())
    }
}

/// Boxes of `primary` with no counterpart in `reference` whose four coordinates
/// all lie within `tolerance`.
pub fn diff_boxes(
    primary: &[FeedbackBox],
    reference: &[FeedbackBox],
    tolerance: f64,
) -> Vec<FeedbackBox> {
    primary
        .iter()
        .filter(|candidate| {
            !reference.iter().any(|other| {
                candidate
                    .iter()
                    .zip(other.iter())
                    .all(|(a, b)| (a - b).abs() <= tolerance)
            })
        })
        .copied()
        .collect()
}

/// The candidate image converted to HSV once, for repeated box measurement.
#[derive(Debug, Clone)]
pub struct HsvFrame {
    width: u32,
    height: u32,
    samples: Vec<ColorSample>,
}

impl HsvFrame {
    pub fn from_rgb(image: &RgbImage) -> Self {
        Self {
            width: image.width(),
            height: image.height(),
            samples: image.pixels().map(|p| Pixel::from(p).hsv()).collect(),
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    #[inline]
    pub fn sample(&self, x: u32, y: u32) -> ColorSample {
        self.samples[y as usize * self.width as usize + x as usize]
    }

    /// Mean HSV value over the whole frame.
    pub fn mean_value(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().map(|s| s.value).sum::<f64>() / self.samples.len() as f64
    }
}

/// What a single feedback box looks like on the candidate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoxMetrics {
    pub pixel_count: f64,
    pub area_ratio: f64,
    pub mean_saturation: f64,
    pub mean_value: f64,
    /// Mean value inside the box minus the mean value of the whole frame.
    pub mean_delta_value: f64,
    /// Share of pixels with a warm hue.
    pub warm_fraction: f64,
    /// Circular mean hue in [0, 1).
    pub mean_hue: f64,
    pub max_value: f64,
}

/// Measures `bbox` on `frame`. The box is expanded outward to whole pixels and
/// clipped to the frame; `None` when nothing remains.
pub fn measure_box(
    bbox: &FeedbackBox,
    frame: &HsvFrame,
    frame_mean_value: f64,
    warm_hue_low: f64,
    warm_hue_high: f64,
) -> Option<BoxMetrics> {
    let [x, y, w, h] = *bbox;
    if ![x, y, w, h].iter().all(|v| v.is_finite()) {
        return None;
    }
    let (width, height) = frame.dimensions();
    let x0 = x.floor().max(0.0);
    let y0 = y.floor().max(0.0);
    let x1 = (x + w).ceil().min(width as f64);
    let y1 = (y + h).ceil().min(height as f64);
    if x1 <= x0 || y1 <= y0 {
        return None;
    }
    let (x0, y0, x1, y1) = (x0 as u32, y0 as u32, x1 as u32, y1 as u32);

    let mut sum_saturation = 0.0;
    let mut sum_value = 0.0;
    let mut max_value = 0.0f64;
    let mut warm = 0usize;
    let mut sum_sin = 0.0;
    let mut sum_cos = 0.0;
    for py in y0..y1 {
        for px in x0..x1 {
            let sample = frame.sample(px, py);
            sum_saturation += sample.saturation;
            sum_value += sample.value;
            max_value = max_value.max(sample.value);
            if is_warm_hue(sample.hue, warm_hue_low, warm_hue_high) {
                warm += 1;
            }
            let angle = sample.hue * TAU;
            sum_sin += angle.sin();
            sum_cos += angle.cos();
        }
    }

    let pixel_count = ((x1 - x0) as u64 * (y1 - y0) as u64) as f64;
    let total_pixels = width as f64 * height as f64;
    let mean_value = sum_value / pixel_count;

    let mut mean_hue = sum_sin.atan2(sum_cos) / TAU;
    if mean_hue < 0.0 {
        mean_hue += 1.0;
    }

    Some(BoxMetrics {
        pixel_count,
        area_ratio: pixel_count / total_pixels,
        mean_saturation: sum_saturation / pixel_count,
        mean_value,
        mean_delta_value: mean_value - frame_mean_value,
        warm_fraction: warm as f64 / pixel_count,
        mean_hue,
        max_value,
    })
}

/// Running state of one adjustment pass: the working parameter values and the
/// accumulated deltas.
struct Adjuster {
    working: BTreeMap<&'static str, f64>,
    updates: BTreeMap<&'static str, f64>,
}

impl Adjuster {
    fn new(params: &DetectionParameters) -> Self {
        Self {
            working: ParameterKey::ALL
                .iter()
                .map(|key| (key.name(), key.get(params)))
                .collect(),
            updates: BTreeMap::new(),
        }
    }

    fn current(&self, key: ParameterKey) -> f64 {
        self.working.get(key.name()).copied().unwrap_or(0.0)
    }

    fn apply(&mut self, key: ParameterKey, delta: f64) {
        if delta == 0.0 {
            return;
        }
        *self.updates.entry(key.name()).or_insert(0.0) += delta;
        *self.working.entry(key.name()).or_insert(0.0) += delta;
    }

    /// A missed hot spot: loosen whatever kept it from being detected.
    fn adjust_added(&mut self, m: &BoxMetrics) {
        use ParameterKey::*;

        let sat_diff = self.current(WarmSatThreshold) - m.mean_saturation;
        if sat_diff > SATURATION_MARGIN {
            self.apply(WarmSatThreshold, -(sat_diff * 0.5).clamp(0.005, 0.05));
        }

        let val_diff = self.current(WarmValThreshold) - m.mean_value;
        if val_diff > VALUE_MARGIN {
            self.apply(WarmValThreshold, -(val_diff * 0.5).clamp(0.005, 0.05));
        }

        let contrast_diff = self.current(ContrastThreshold) - m.mean_delta_value;
        if contrast_diff > CONTRAST_MARGIN {
            self.apply(ContrastThreshold, -(contrast_diff * 0.5).clamp(0.003, 0.05));
        }

        let pixel_diff = self.current(MinAreaPixels) - m.pixel_count;
        if pixel_diff > 1.0 {
            self.apply(MinAreaPixels, -(pixel_diff * 0.25).clamp(5.0, 50.0));
        }

        let ratio_diff = self.current(MinAreaRatio) - m.area_ratio;
        if ratio_diff > 0.0 {
            self.apply(MinAreaRatio, -(ratio_diff * 0.5).clamp(AREA_RATIO_STEP, 0.005));
        }

        if m.warm_fraction >= 0.5 {
            let hue = m.mean_hue;
            let warm_low = self.current(WarmHueLow);
            let warm_high = self.current(WarmHueHigh);
            if hue < 0.5 && hue > warm_low {
                self.apply(WarmHueLow, HUE_STEP.min((hue - warm_low) * 0.5));
            } else if hue >= 0.5 && hue < warm_high {
                self.apply(WarmHueHigh, -HUE_STEP.min((warm_high - hue) * 0.5));
            }
        }
    }

    /// A false alarm: tighten the thresholds it only barely passed.
    fn adjust_removed(&mut self, m: &BoxMetrics) {
        use ParameterKey::*;

        let sat_diff = m.mean_saturation - self.current(WarmSatThreshold);
        if sat_diff < -SATURATION_MARGIN {
            self.apply(WarmSatThreshold, (-sat_diff * 0.5).clamp(0.005, 0.05));
        }

        let val_diff = m.mean_value - self.current(WarmValThreshold);
        if val_diff < -VALUE_MARGIN {
            self.apply(WarmValThreshold, (-val_diff * 0.5).clamp(0.005, 0.05));
        }

        let contrast_diff = m.mean_delta_value - self.current(ContrastThreshold);
        if contrast_diff < -CONTRAST_MARGIN {
            self.apply(ContrastThreshold, (-contrast_diff * 0.5).clamp(0.003, 0.05));
        }

        let min_pixels = self.current(MinAreaPixels);
        if m.pixel_count < min_pixels * 1.2 {
            self.apply(MinAreaPixels, ((min_pixels - m.pixel_count) * 0.2).clamp(5.0, 50.0));
        }

        if m.area_ratio < self.current(MinAreaRatio) * 1.2 {
            self.apply(MinAreaRatio, AREA_RATIO_STEP);
        }

        if m.warm_fraction >= 0.5 {
            let hue = m.mean_hue;
            let warm_low = self.current(WarmHueLow);
            let warm_high = self.current(WarmHueHigh);
            if hue < warm_low {
                self.apply(WarmHueLow, -HUE_STEP.min((warm_low - hue) * 0.5));
            } else if hue > warm_high {
                self.apply(WarmHueHigh, HUE_STEP.min((hue - warm_high) * 0.5));
            }
        }
    }

    fn into_updates(self) -> BTreeMap<String, f64> {
        self.updates
            .into_iter()
            .filter(|(_, delta)| delta.abs() >= NEGLIGIBLE_DELTA)
            .map(|(name, delta)| (name.to_string(), delta))
            .collect()
    }
}

/// Threshold deltas implied by the measured feedback boxes. Added boxes are
/// processed first, then removed boxes, each in input order.
pub fn adjustments_for_feedback(
    added: &[BoxMetrics],
    removed: &[BoxMetrics],
    params: &DetectionParameters,
) -> BTreeMap<String, f64> {
    let mut adjuster = Adjuster::new(params);
    for metrics in added {
        adjuster.adjust_added(metrics);
    }
    for metrics in removed {
        adjuster.adjust_removed(metrics);
    }
    adjuster.into_updates()
}

/// One-line human summary of the feedback, e.g. `added=1 removed=0 add_sat=0.120 ...`.
pub fn summarize(added: &[BoxMetrics], removed: &[BoxMetrics]) -> String {
    fn mean(metrics: &[BoxMetrics], field: fn(&BoxMetrics) -> f64) -> String {
        let value = metrics.iter().map(field).sum::<f64>() / metrics.len() as f64;
        if value.is_finite() {
            format!("{value:.3}")
        } else {
            "nan".to_string()
        }
    }

    let mut notes = vec![
        format!("added={}", added.len()),
        format!("removed={}", removed.len()),
    ];
    if !added.is_empty() {
        notes.push(format!("add_sat={}", mean(added, |m| m.mean_saturation)));
        notes.push(format!("add_val={}", mean(added, |m| m.mean_value)));
        notes.push(format!("add_area={}", mean(added, |m| m.area_ratio)));
    }
    if !removed.is_empty() {
        notes.push(format!("rem_sat={}", mean(removed, |m| m.mean_saturation)));
        notes.push(format!("rem_val={}", mean(removed, |m| m.mean_value)));
        notes.push(format!("rem_area={}", mean(removed, |m| m.area_ratio)));
    }
    notes.join(" ")
}

/// The tuner's JSON output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TuningReport {
    pub parameter_updates: BTreeMap<String, f64>,
    pub notes: String,
    #[serde(rename = "addedCount")]
    pub added_count: usize,
    #[serde(rename = "removedCount")]
    pub removed_count: usize,
}

/// Measures every feedback box on `candidate` and derives threshold deltas.
pub fn tune(candidate: &RgbImage, payload: &FeedbackPayload) -> TuningReport {
    let params = &payload.parameters;
    let frame = HsvFrame::from_rgb(candidate);
    let frame_mean_value = frame.mean_value();
    let (added_boxes, removed_boxes) = payload.resolved_boxes();

    let measure = |boxes: &[FeedbackBox]| -> Vec<BoxMetrics> {
        boxes
            .iter()
            .filter_map(|bbox| {
                measure_box(
                    bbox,
                    &frame,
                    frame_mean_value,
                    params.warm_hue_low,
                    params.warm_hue_high,
                )
            })
            .collect()
    };
    let added = measure(&added_boxes);
    let removed = measure(&removed_boxes);

    let parameter_updates = adjustments_for_feedback(&added, &removed, params);
    debug!(
        added = added.len(),
        removed = removed.len(),
        updates = parameter_updates.len(),
        "feedback measured"
    );

    TuningReport {
        notes: summarize(&added, &removed),
        parameter_updates,
        added_count: added.len(),
        removed_count: removed.len(),
    }
}
