// THEORY:
// The `pipeline` module is the top-level API for the inspection engine. It wires
// the core modules into one call: give it a baseline and a candidate, get back a
// report that the host can serialize straight to JSON.
//
// Stages, in order:
// 1.  **Alignment**: frame both images and register the baseline onto the
//     candidate (degrading to no alignment when registration is impossible).
// 2.  **Comparison**: global statistics, Warm Mask and warm regions.
// 3.  **Overall Fault**: classified on the pre-merge regions.
// 4.  **Region Detail**: geometry, fault and severity for each merged region.
//
// The inspector holds only read-only configuration, so one instance can inspect
// any number of pairs, and independent instances can run side by side.

use image::RgbImage;
use serde::Serialize;
use std::path::Path;
use tracing::{debug, info};

use crate::core_modules::alignment::{self, FeatureAligner, OrbAligner};
use crate::core_modules::classifier;
use crate::core_modules::comparison;
use crate::error::{Result, VisionError};
use crate::params::DetectionParameters;

// Re-export key data structures for the public API.
pub use crate::core_modules::classifier::{FaultType, RegionInfo, SeverityLabel};
pub use crate::core_modules::region::Region;

/// The detection result for one (baseline, candidate) pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InspectionReport {
    /// Anomaly probability, `logistic(score)`.
    pub prob: f64,
    pub hist_distance: f64,
    pub dv95: f64,
    pub warm_fraction: f64,
    /// Width of the compared (cropped) frame; region coordinates refer to it.
    pub image_width: u32,
    pub image_height: u32,
    /// Merged regions as `[x, y, width, height]`.
    pub boxes: Vec<Region>,
    pub box_info: Vec<RegionInfo>,
    /// Overall fault, decided on the regions before merging.
    pub fault_type: FaultType,
    pub overall_severity: f64,
    pub overall_severity_label: SeverityLabel,
    /// Reserved for an overlay image; detection leaves it empty.
    pub annotated: String,
}

/// Compares baseline/candidate pairs under a fixed parameter set.
pub struct ThermalInspector {
    params: DetectionParameters,
    aligner: Box<dyn FeatureAligner>,
}

impl ThermalInspector {
    /// An inspector with the default ORB-style aligner.
    pub fn new(params: DetectionParameters) -> Result<Self> {
        Self::with_aligner(params, Box::new(OrbAligner::default()))
    }

    pub fn with_aligner(
        params: DetectionParameters,
        aligner: Box<dyn FeatureAligner>,
    ) -> Result<Self> {
        params.validate()?;
        Ok(Self { params, aligner })
    }

    pub fn params(&self) -> &DetectionParameters {
        &self.params
    }

    pub fn inspect(&self, baseline: &RgbImage, candidate: &RgbImage) -> Result<InspectionReport> {
        if baseline.width() == 0 || baseline.height() == 0 {
            return Err(VisionError::EmptyImage);
        }
        if candidate.width() == 0 || candidate.height() == 0 {
            return Err(VisionError::EmptyImage);
        }
        let params = &self.params;

        // Stage 1: Alignment
        let aligned = alignment::align(
            self.aligner.as_ref(),
            baseline,
            candidate,
            params.crop_margin_pct,
        );
        let validity = aligned.validity.as_ref();
        let (width, height) = aligned.dimensions();

        // Stage 2: Comparison
        let stats = comparison::compare(&aligned.baseline, &aligned.candidate, validity, params)?;

        // Stage 3: Overall fault from the pre-merge regions
        let fault_type = classifier::classify_overall(&stats.raw_regions, width, height, params);

        // Stage 4: Per-region detail from the merged regions
        let box_info = classifier::describe_regions(
            &stats.regions,
            &aligned.baseline,
            &aligned.candidate,
            validity,
            params,
        );
        // The floor applies to regions only; a quiet image reports zero.
        let overall_severity = classifier::delta_to_severity(stats.dv95, params);
        let overall_severity_label = SeverityLabel::from_score(overall_severity);

        debug!(
            aligned = aligned.is_aligned(),
            raw_regions = stats.raw_regions.len(),
            regions = stats.regions.len(),
            %fault_type,
            "inspection stages complete"
        );

        Ok(InspectionReport {
            prob: stats.prob,
            hist_distance: stats.hist_distance,
            dv95: stats.dv95,
            warm_fraction: stats.warm_fraction,
            image_width: width,
            image_height: height,
            boxes: stats.regions,
            box_info,
            fault_type,
            overall_severity,
            overall_severity_label,
            annotated: String::new(),
        })
    }

    /// Loads both images from disk and inspects them.
    pub fn inspect_files(&self, baseline: &Path, candidate: &Path) -> Result<InspectionReport> {
        let baseline_image = load_rgb(baseline)?;
        let candidate_image = load_rgb(candidate)?;
        let report = self.inspect(&baseline_image, &candidate_image)?;
        info!(
            baseline = %baseline.display(),
            candidate = %candidate.display(),
            prob = report.prob,
            boxes = report.boxes.len(),
            fault = %report.fault_type,
            "inspection finished"
        );
        Ok(report)
    }
}

/// Decodes any supported image file into 8-bit RGB.
pub fn load_rgb(path: &Path) -> Result<RgbImage> {
    let image = image::open(path).map_err(|source| VisionError::ImageLoad {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(image.to_rgb8())
}
