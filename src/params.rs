// THEORY:
// `DetectionParameters` is the process-wide configuration shared by detection and
// tuning. It is deliberately a plain value: the Comparison Engine and the Parameter
// Tuner both receive it by reference, and neither ever mutates shared state. The
// external host persists it and applies the tuner's deltas between runs; the
// `apply_updates` helper mirrors that host-side read-modify-write so both sides
// agree on clamping and integer rounding.
//
// Every key carries a default, a clamp range and an integer flag. With defaults,
// all detection formulas reproduce the stock thresholds exactly.

use crate::error::{Result, VisionError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Thresholds and scales read by the Comparison Engine, the Fault Classifier and the
/// Parameter Tuner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, f64>")]
pub struct DetectionParameters {
    /// Number of hue bins in the comparison histogram.
    pub h_bins: u32,
    /// Number of saturation bins in the comparison histogram.
    pub s_bins: u32,
    /// Raster stride for brightness-increase sampling (1 in N pixels).
    pub sample_every: u32,
    /// Hues at or below this are warm (reds, oranges, yellows).
    pub warm_hue_low: f64,
    /// Hues at or above this are warm (magenta side of red).
    pub warm_hue_high: f64,
    pub warm_sat_threshold: f64,
    pub warm_val_threshold: f64,
    /// Minimum candidate-minus-baseline brightness increase for a warm pixel.
    pub contrast_threshold: f64,
    /// Minimum region size as a fraction of valid pixels.
    pub min_area_ratio: f64,
    /// Minimum region size in pixels.
    pub min_area_pixels: u32,
    pub hist_distance_scale: f64,
    pub warm_fraction_scale: f64,
    pub dv95_scale: f64,
    pub dv95_percentile: f64,
    pub loose_area_threshold: f64,
    pub large_area_threshold: f64,
    pub center_overlap_threshold: f64,
    pub rectangular_aspect_threshold: f64,
    /// Mean brightness delta where severity starts to rise above zero.
    pub severity_lower_delta: f64,
    /// Mean brightness delta at which severity saturates at one.
    pub severity_upper_delta: f64,
    pub severity_floor: f64,
    /// Fraction of width cropped from each of the left and right edges before alignment.
    pub crop_margin_pct: f64,
}

impl Default for DetectionParameters {
    fn default() -> Self {
        Self {
            h_bins: 30,
            s_bins: 32,
            sample_every: 10,
            warm_hue_low: 0.17,
            warm_hue_high: 0.95,
            warm_sat_threshold: 0.30,
            warm_val_threshold: 0.40,
            contrast_threshold: 0.15,
            min_area_ratio: 0.001,
            min_area_pixels: 32,
            hist_distance_scale: 0.5,
            warm_fraction_scale: 2.0,
            dv95_scale: 1.0,
            dv95_percentile: 0.95,
            loose_area_threshold: 0.10,
            large_area_threshold: 0.30,
            center_overlap_threshold: 0.40,
            rectangular_aspect_threshold: 2.0,
            severity_lower_delta: 0.15,
            severity_upper_delta: 0.50,
            severity_floor: 0.05,
            crop_margin_pct: 0.05,
        }
    }
}

// Hosts send every value as a JSON number, integers included ("h_bins": 30.0), so
// parameters are read through a name-to-number map rather than field by field.
impl From<BTreeMap<String, f64>> for DetectionParameters {
    fn from(map: BTreeMap<String, f64>) -> Self {
        let mut params = Self::default();
        for (name, value) in &map {
            if let Some(key) = ParameterKey::from_name(name) {
                key.set(&mut params, *value);
            }
        }
        params
    }
}

impl DetectionParameters {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let params: Self = serde_json::from_str(json)?;
        params.validate()?;
        Ok(params)
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|source| VisionError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    /// Checks the internal consistency the detection formulas rely on.
    pub fn validate(&self) -> Result<()> {
        // These three size allocations and loop strides.
        for key in [ParameterKey::HBins, ParameterKey::SBins, ParameterKey::SampleEvery] {
            let (min, max) = key.bounds();
            let value = key.get(self);
            if !(min..=max).contains(&value) {
                return Err(VisionError::InvalidParameters(format!(
                    "{} must lie in [{min}, {max}], got {value}",
                    key.name()
                )));
            }
        }
        if self.warm_hue_low >= self.warm_hue_high {
            return Err(VisionError::InvalidParameters(format!(
                "warm_hue_low ({}) must be below warm_hue_high ({})",
                self.warm_hue_low, self.warm_hue_high
            )));
        }
        if self.severity_lower_delta >= self.severity_upper_delta {
            return Err(VisionError::InvalidParameters(format!(
                "severity_lower_delta ({}) must be below severity_upper_delta ({})",
                self.severity_lower_delta, self.severity_upper_delta
            )));
        }
        if self.hist_distance_scale <= 0.0 {
            return Err(VisionError::InvalidParameters(
                "hist_distance_scale must be positive".to_string(),
            ));
        }

        let unit_interval = [
            ParameterKey::WarmHueLow,
            ParameterKey::WarmHueHigh,
            ParameterKey::WarmSatThreshold,
            ParameterKey::WarmValThreshold,
            ParameterKey::ContrastThreshold,
            ParameterKey::MinAreaRatio,
            ParameterKey::Dv95Percentile,
            ParameterKey::LooseAreaThreshold,
            ParameterKey::LargeAreaThreshold,
            ParameterKey::CenterOverlapThreshold,
            ParameterKey::SeverityFloor,
            ParameterKey::CropMarginPct,
        ];
        for key in unit_interval {
            let value = key.get(self);
            if !(0.0..=1.0).contains(&value) {
                return Err(VisionError::InvalidParameters(format!(
                    "{} must lie in [0, 1], got {}",
                    key.name(),
                    value
                )));
            }
        }
        // A crop of half the width from each side leaves nothing to compare.
        if self.crop_margin_pct >= 0.5 {
            return Err(VisionError::InvalidParameters(
                "crop_margin_pct must be below 0.5".to_string(),
            ));
        }
        Ok(())
    }

    /// Applies additive deltas keyed by parameter name, clamping each result to the
    /// key's range. Unknown names and non-finite deltas are skipped.
    pub fn apply_updates(&mut self, updates: &BTreeMap<String, f64>) {
        for (name, delta) in updates {
            let Some(key) = ParameterKey::from_name(name) else {
                tracing::debug!(parameter = %name, "ignoring update for unknown parameter");
                continue;
            };
            if !delta.is_finite() || *delta == 0.0 {
                continue;
            }
            let updated = key.clamp(key.get(self) + delta);
            key.set(self, updated);
        }
    }

    /// Flattens the parameters into the name-to-value map used on the wire.
    pub fn to_map(&self) -> BTreeMap<String, f64> {
        ParameterKey::ALL
            .iter()
            .map(|key| (key.name().to_string(), key.get(self)))
            .collect()
    }
}

/// Registry of every tunable parameter: wire name, default, clamp range and type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParameterKey {
    HBins,
    SBins,
    SampleEvery,
    WarmHueLow,
    WarmHueHigh,
    WarmSatThreshold,
    WarmValThreshold,
    ContrastThreshold,
    MinAreaRatio,
    MinAreaPixels,
    HistDistanceScale,
    WarmFractionScale,
    Dv95Scale,
    Dv95Percentile,
    LooseAreaThreshold,
    LargeAreaThreshold,
    CenterOverlapThreshold,
    RectangularAspectThreshold,
    SeverityLowerDelta,
    SeverityUpperDelta,
    SeverityFloor,
    CropMarginPct,
}

impl ParameterKey {
    pub const ALL: [ParameterKey; 22] = [
        ParameterKey::HBins,
        ParameterKey::SBins,
        ParameterKey::SampleEvery,
        ParameterKey::WarmHueLow,
        ParameterKey::WarmHueHigh,
        ParameterKey::WarmSatThreshold,
        ParameterKey::WarmValThreshold,
        ParameterKey::ContrastThreshold,
        ParameterKey::MinAreaRatio,
        ParameterKey::MinAreaPixels,
        ParameterKey::HistDistanceScale,
        ParameterKey::WarmFractionScale,
        ParameterKey::Dv95Scale,
        ParameterKey::Dv95Percentile,
        ParameterKey::LooseAreaThreshold,
        ParameterKey::LargeAreaThreshold,
        ParameterKey::CenterOverlapThreshold,
        ParameterKey::RectangularAspectThreshold,
        ParameterKey::SeverityLowerDelta,
        ParameterKey::SeverityUpperDelta,
        ParameterKey::SeverityFloor,
        ParameterKey::CropMarginPct,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ParameterKey::HBins => "h_bins",
            ParameterKey::SBins => "s_bins",
            ParameterKey::SampleEvery => "sample_every",
            ParameterKey::WarmHueLow => "warm_hue_low",
            ParameterKey::WarmHueHigh => "warm_hue_high",
            ParameterKey::WarmSatThreshold => "warm_sat_threshold",
            ParameterKey::WarmValThreshold => "warm_val_threshold",
            ParameterKey::ContrastThreshold => "contrast_threshold",
            ParameterKey::MinAreaRatio => "min_area_ratio",
            ParameterKey::MinAreaPixels => "min_area_pixels",
            ParameterKey::HistDistanceScale => "hist_distance_scale",
            ParameterKey::WarmFractionScale => "warm_fraction_scale",
            ParameterKey::Dv95Scale => "dv95_scale",
            ParameterKey::Dv95Percentile => "dv95_percentile",
            ParameterKey::LooseAreaThreshold => "loose_area_threshold",
            ParameterKey::LargeAreaThreshold => "large_area_threshold",
            ParameterKey::CenterOverlapThreshold => "center_overlap_threshold",
            ParameterKey::RectangularAspectThreshold => "rectangular_aspect_threshold",
            ParameterKey::SeverityLowerDelta => "severity_lower_delta",
            ParameterKey::SeverityUpperDelta => "severity_upper_delta",
            ParameterKey::SeverityFloor => "severity_floor",
            ParameterKey::CropMarginPct => "crop_margin_pct",
        }
    }

    /// Case-insensitive lookup by wire name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|key| key.name().eq_ignore_ascii_case(name))
    }

    pub fn default_value(self) -> f64 {
        self.get(&DetectionParameters::default())
    }

    /// (min, max) clamp range.
    pub fn bounds(self) -> (f64, f64) {
        match self {
            ParameterKey::HBins | ParameterKey::SBins => (6.0, 120.0),
            ParameterKey::SampleEvery => (1.0, 50.0),
            ParameterKey::WarmHueLow => (0.0, 0.5),
            ParameterKey::WarmHueHigh => (0.5, 1.0),
            ParameterKey::WarmSatThreshold | ParameterKey::WarmValThreshold => (0.05, 1.0),
            ParameterKey::ContrastThreshold => (0.01, 1.0),
            ParameterKey::MinAreaRatio => (0.0, 0.05),
            ParameterKey::MinAreaPixels => (4.0, 6400.0),
            ParameterKey::HistDistanceScale => (0.05, 10.0),
            ParameterKey::WarmFractionScale | ParameterKey::Dv95Scale => (0.1, 10.0),
            ParameterKey::Dv95Percentile => (0.5, 0.999),
            ParameterKey::LooseAreaThreshold => (0.01, 0.6),
            ParameterKey::LargeAreaThreshold => (0.05, 0.9),
            ParameterKey::CenterOverlapThreshold => (0.05, 1.0),
            ParameterKey::RectangularAspectThreshold => (1.1, 6.0),
            ParameterKey::SeverityLowerDelta => (0.0, 1.0),
            ParameterKey::SeverityUpperDelta => (0.05, 2.0),
            ParameterKey::SeverityFloor => (0.0, 0.5),
            ParameterKey::CropMarginPct => (0.0, 0.2),
        }
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self,
            ParameterKey::HBins
                | ParameterKey::SBins
                | ParameterKey::SampleEvery
                | ParameterKey::MinAreaPixels
        )
    }

    pub fn clamp(self, value: f64) -> f64 {
        let (min, max) = self.bounds();
        let clamped = value.clamp(min, max);
        if self.is_integer() {
            clamped.round()
        } else {
            clamped
        }
    }

    pub fn get(self, params: &DetectionParameters) -> f64 {
        match self {
            ParameterKey::HBins => params.h_bins as f64,
            ParameterKey::SBins => params.s_bins as f64,
            ParameterKey::SampleEvery => params.sample_every as f64,
            ParameterKey::WarmHueLow => params.warm_hue_low,
            ParameterKey::WarmHueHigh => params.warm_hue_high,
            ParameterKey::WarmSatThreshold => params.warm_sat_threshold,
            ParameterKey::WarmValThreshold => params.warm_val_threshold,
            ParameterKey::ContrastThreshold => params.contrast_threshold,
            ParameterKey::MinAreaRatio => params.min_area_ratio,
            ParameterKey::MinAreaPixels => params.min_area_pixels as f64,
            ParameterKey::HistDistanceScale => params.hist_distance_scale,
            ParameterKey::WarmFractionScale => params.warm_fraction_scale,
            ParameterKey::Dv95Scale => params.dv95_scale,
            ParameterKey::Dv95Percentile => params.dv95_percentile,
            ParameterKey::LooseAreaThreshold => params.loose_area_threshold,
            ParameterKey::LargeAreaThreshold => params.large_area_threshold,
            ParameterKey::CenterOverlapThreshold => params.center_overlap_threshold,
            ParameterKey::RectangularAspectThreshold => params.rectangular_aspect_threshold,
            ParameterKey::SeverityLowerDelta => params.severity_lower_delta,
            ParameterKey::SeverityUpperDelta => params.severity_upper_delta,
            ParameterKey::SeverityFloor => params.severity_floor,
            ParameterKey::CropMarginPct => params.crop_margin_pct,
        }
    }

    /// Writes `value` into `params`. Integer keys are rounded and floored at zero.
    pub fn set(self, params: &mut DetectionParameters, value: f64) {
        let as_count = || value.round().max(0.0) as u32;
        match self {
            ParameterKey::HBins => params.h_bins = as_count(),
            ParameterKey::SBins => params.s_bins = as_count(),
            ParameterKey::SampleEvery => params.sample_every = as_count(),
            ParameterKey::WarmHueLow => params.warm_hue_low = value,
            ParameterKey::WarmHueHigh => params.warm_hue_high = value,
            ParameterKey::WarmSatThreshold => params.warm_sat_threshold = value,
            ParameterKey::WarmValThreshold => params.warm_val_threshold = value,
            ParameterKey::ContrastThreshold => params.contrast_threshold = value,
            ParameterKey::MinAreaRatio => params.min_area_ratio = value,
            ParameterKey::MinAreaPixels => params.min_area_pixels = as_count(),
            ParameterKey::HistDistanceScale => params.hist_distance_scale = value,
            ParameterKey::WarmFractionScale => params.warm_fraction_scale = value,
            ParameterKey::Dv95Scale => params.dv95_scale = value,
            ParameterKey::Dv95Percentile => params.dv95_percentile = value,
            ParameterKey::LooseAreaThreshold => params.loose_area_threshold = value,
            ParameterKey::LargeAreaThreshold => params.large_area_threshold = value,
            ParameterKey::CenterOverlapThreshold => params.center_overlap_threshold = value,
            ParameterKey::RectangularAspectThreshold => {
                params.rectangular_aspect_threshold = value
            }
            ParameterKey::SeverityLowerDelta => params.severity_lower_delta = value,
            ParameterKey::SeverityUpperDelta => params.severity_upper_delta = value,
            ParameterKey::SeverityFloor => params.severity_floor = value,
            ParameterKey::CropMarginPct => params.crop_margin_pct = value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid_and_within_bounds() {
        let params = DetectionParameters::default();
        params.validate().expect("defaults must validate");
        for key in ParameterKey::ALL {
            let (min, max) = key.bounds();
            let value = key.get(&params);
            assert!(value >= min && value <= max, "{} out of bounds", key.name());
            assert_eq!(key.clamp(value), value);
        }
    }

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        let params = DetectionParameters::from_json_str(r#"{"warm_sat_threshold": 0.42}"#)
            .expect("partial parameters parse");
        assert_eq!(params.warm_sat_threshold, 0.42);
        assert_eq!(params.h_bins, 30);
        assert_eq!(params.contrast_threshold, 0.15);
    }

    #[test]
    fn integer_keys_accept_float_json() {
        let params = DetectionParameters::from_json_str(r#"{"h_bins": 24.0, "unknown": 1.0}"#)
            .expect("float-valued integer key parses");
        assert_eq!(params.h_bins, 24);
    }

    #[test]
    fn inverted_hue_bounds_are_rejected() {
        let result =
            DetectionParameters::from_json_str(r#"{"warm_hue_low": 0.6, "warm_hue_high": 0.5}"#);
        assert!(matches!(result, Err(VisionError::InvalidParameters(_))));
    }

    #[test]
    fn oversized_histogram_is_rejected() {
        let result = DetectionParameters::from_json_str(r#"{"h_bins": 1e9}"#);
        assert!(matches!(result, Err(VisionError::InvalidParameters(_))));
        let result = DetectionParameters::from_json_str(r#"{"s_bins": 0}"#);
        assert!(matches!(result, Err(VisionError::InvalidParameters(_))));
        let result = DetectionParameters::from_json_str(r#"{"sample_every": 0}"#);
        assert!(matches!(result, Err(VisionError::InvalidParameters(_))));
        DetectionParameters::from_json_str(r#"{"h_bins": 120, "s_bins": 6}"#)
            .expect("bin counts at the range ends are accepted");
    }

    #[test]
    fn out_of_range_threshold_is_rejected() {
        let params = DetectionParameters {
            warm_val_threshold: 1.5,
            ..DetectionParameters::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn apply_updates_clamps_and_rounds() {
        let mut params = DetectionParameters::default();
        let updates = BTreeMap::from([
            ("warm_sat_threshold".to_string(), -1.0),
            ("MIN_AREA_PIXELS".to_string(), 7.6),
            ("contrast_threshold".to_string(), 0.02),
            ("not_a_parameter".to_string(), 3.0),
        ]);
        params.apply_updates(&updates);

        assert_eq!(params.warm_sat_threshold, 0.05);
        assert_eq!(params.min_area_pixels, 40);
        assert!((params.contrast_threshold - 0.17).abs() < 1e-12);
    }

    #[test]
    fn map_round_trip_covers_every_key() {
        let map = DetectionParameters::default().to_map();
        assert_eq!(map.len(), ParameterKey::ALL.len());
        assert_eq!(map["warm_hue_high"], 0.95);
        assert_eq!(ParameterKey::from_name("dv95_scale"), Some(ParameterKey::Dv95Scale));
        assert_eq!(ParameterKey::WarmValThreshold.default_value(), 0.40);
    }
}
