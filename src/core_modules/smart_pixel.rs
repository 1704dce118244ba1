// THEORY:
// The `SmartPixel` module provides the pairwise analysis on top of the "dumb" `Pixel`.
// A candidate pixel on its own says nothing about a fault; its value is in how it
// relates to the baseline pixel at the same (aligned) location.
//
// Key architectural principles:
// 1.  **Comparative Analysis**: `brightness_increase` and `is_warm_against` both take
//     the baseline as input.
// 2.  **Caching**: the HSV sample is computed once in the constructor, because the
//     Comparison Engine consults it for the histogram, the dv sample and the warm
//     predicate in the same pass.
// 3.  **Shared thresholds**: the warm predicate reads `DetectionParameters`, the same
//     struct the Parameter Tuner adjusts, so detection and feedback never disagree.

use crate::core_modules::pixel::{ColorSample, Pixel};
use crate::params::DetectionParameters;

pub type BrightnessDelta = f64;

/// An analytical wrapper around a `Pixel` with its HSV sample cached.
#[derive(Debug, Clone, Copy)]
pub struct SmartPixel {
    /// The raw `Pixel` data this `SmartPixel` is analyzing.
    pub pixel: Pixel,
    /// The pre-calculated HSV representation.
    pub sample: ColorSample,
}

impl SmartPixel {
    pub fn new(pixel: Pixel) -> Self {
        Self {
            sample: pixel.hsv(),
            pixel,
        }
    }

    /// Non-negative increase in HSV value from `baseline` to `self`.
    pub fn brightness_increase(&self, baseline: &SmartPixel) -> BrightnessDelta {
        (self.sample.value - baseline.sample.value).max(0.0)
    }

    /// Hue falls in the warm arc: at or below `warm_hue_low`, or at or above
    /// `warm_hue_high` (the circle wraps through red).
    pub fn has_warm_hue(&self, params: &DetectionParameters) -> bool {
        is_warm_hue(self.sample.hue, params.warm_hue_low, params.warm_hue_high)
    }

    /// The full warm-mask predicate for a candidate pixel against its baseline.
    pub fn is_warm_against(&self, baseline: &SmartPixel, params: &DetectionParameters) -> bool {
        self.has_warm_hue(params)
            && self.sample.saturation >= params.warm_sat_threshold
            && self.sample.value >= params.warm_val_threshold
            && (self.sample.value - baseline.sample.value) >= params.contrast_threshold
    }
}

pub fn is_warm_hue(hue: f64, warm_low: f64, warm_high: f64) -> bool {
    hue <= warm_low || hue >= warm_high
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::pixel::Pixel;
    use crate::params::DetectionParameters;

    fn smart(r: u8, g: u8, b: u8) -> SmartPixel {
        SmartPixel::new(Pixel::new(r, g, b))
    }

    #[test]
    fn bright_red_over_dark_gray_is_warm() {
        let params = DetectionParameters::default();
        let baseline = smart(51, 51, 51);
        let candidate = smart(255, 0, 0);
        assert!(candidate.is_warm_against(&baseline, &params));
        assert!((candidate.brightness_increase(&baseline) - 0.8).abs() < 1e-9);
    }

    #[test]
    fn blue_is_never_warm() {
        let params = DetectionParameters::default();
        let baseline = smart(0, 0, 0);
        let candidate = smart(0, 0, 255);
        assert!(!candidate.has_warm_hue(&params));
        assert!(!candidate.is_warm_against(&baseline, &params));
    }

    #[test]
    fn unchanged_pixel_fails_the_contrast_test() {
        let params = DetectionParameters::default();
        let pixel = smart(255, 40, 0);
        assert!(pixel.has_warm_hue(&params));
        assert!(!pixel.is_warm_against(&pixel, &params));
        assert_eq!(pixel.brightness_increase(&pixel), 0.0);
    }

    #[test]
    fn cooling_is_floored_at_zero() {
        let baseline = smart(255, 255, 255);
        let candidate = smart(10, 10, 10);
        assert_eq!(candidate.brightness_increase(&baseline), 0.0);
    }

    #[test]
    fn warm_hue_arc_wraps() {
        assert!(is_warm_hue(0.0, 0.17, 0.95));
        assert!(is_warm_hue(0.17, 0.17, 0.95));
        assert!(is_warm_hue(0.97, 0.17, 0.95));
        assert!(!is_warm_hue(0.5, 0.17, 0.95));
    }
}
