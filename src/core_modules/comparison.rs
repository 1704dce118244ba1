// THEORY:
// The Comparison Engine is where the baseline and candidate finally meet. It makes a
// single raster pass over the aligned pair and produces every statistic the report
// needs, then hands the Warm Mask to the blob detector for spatial grouping.
//
// Key architectural principles:
// 1.  **One Pass, Many Signals**: each valid pixel pair is converted to HSV exactly
//     once (`SmartPixel`) and feeds three accumulators at the same time: the two
//     hue x saturation histograms, the strided brightness-increase sample list, and
//     the Warm Mask.
// 2.  **Validity First**: pixels outside the Validity Mask are skipped entirely; they
//     contribute to no histogram, no sample and no region.
// 3.  **Global + Local**: `hist_distance` and `dv95` describe the whole image, the
//     regions describe where the warming is. Both views are returned together so the
//     classifier can work from either.

use image::RgbImage;
use tracing::debug;

use crate::core_modules::blob_detector;
use crate::core_modules::histogram::{HueSatHistogram, percentile};
use crate::core_modules::mask::Mask;
use crate::core_modules::pixel::Pixel;
use crate::core_modules::region::Region;
use crate::core_modules::smart_pixel::SmartPixel;
use crate::error::{Result, VisionError};
use crate::params::DetectionParameters;

/// Everything the Comparison Engine learns about one aligned image pair.
#[derive(Debug, Clone)]
pub struct ComparisonStats {
    /// L2 distance between the normalized hue x saturation histograms.
    pub hist_distance: f64,
    /// Percentile of the sampled, non-negative brightness increases.
    pub dv95: f64,
    /// Warm pixels over valid pixels.
    pub warm_fraction: f64,
    pub warm_mask: Mask,
    /// Number of pixels that took part in the comparison.
    pub valid_count: usize,
    /// Pixel-count threshold regions had to meet.
    pub min_region_area: f64,
    /// Regions straight out of connected-component labeling.
    pub raw_regions: Vec<Region>,
    /// `raw_regions` after the nesting merge.
    pub regions: Vec<Region>,
    /// Composite anomaly score before logistic squashing.
    pub score: f64,
    /// `logistic(score)`, in (0, 1).
    pub prob: f64,
}

/// Logistic squashing of an unbounded score into (0, 1).
pub fn logistic(score: f64) -> f64 {
    1.0 / (1.0 + (-score).exp())
}

/// Compares an aligned baseline against the candidate.
///
/// Both images must share dimensions, as must `validity` when present. A missing
/// Validity Mask means every pixel is valid.
pub fn compare(
    baseline: &RgbImage,
    candidate: &RgbImage,
    validity: Option<&Mask>,
    params: &DetectionParameters,
) -> Result<ComparisonStats> {
    let (width, height) = candidate.dimensions();
    if width == 0 || height == 0 {
        return Err(VisionError::EmptyImage);
    }
    if baseline.dimensions() != (width, height) {
        return Err(VisionError::DimensionMismatch {
            baseline: baseline.dimensions(),
            candidate: (width, height),
        });
    }
    if let Some(mask) = validity {
        if mask.dimensions() != (width, height) {
            return Err(VisionError::DimensionMismatch {
                baseline: mask.dimensions(),
                candidate: (width, height),
            });
        }
    }

    let mut baseline_hist = HueSatHistogram::new(params.h_bins as usize, params.s_bins as usize);
    let mut candidate_hist = HueSatHistogram::new(params.h_bins as usize, params.s_bins as usize);
    let mut dv_samples: Vec<f64> = Vec::new();
    let mut warm_mask = Mask::new(width, height);
    let mut warm_count = 0usize;
    let mut valid_count = 0usize;
    let sample_every = params.sample_every.max(1) as u64;

    // --- 1. Per-pixel pass ---
    for y in 0..height {
        for x in 0..width {
            if validity.is_some_and(|mask| !mask.get(x, y)) {
                continue;
            }
            valid_count += 1;

            let base = SmartPixel::new(Pixel::from(baseline.get_pixel(x, y)));
            let cand = SmartPixel::new(Pixel::from(candidate.get_pixel(x, y)));

            baseline_hist.add(&base.sample);
            candidate_hist.add(&cand.sample);

            let raster_index = x as u64 + y as u64 * width as u64;
            if raster_index % sample_every == 0 {
                dv_samples.push(cand.brightness_increase(&base));
            }

            if cand.is_warm_against(&base, params) {
                warm_mask.set(x, y, true);
                warm_count += 1;
            }
        }
    }

    // --- 2. Global statistics ---
    baseline_hist.normalize();
    candidate_hist.normalize();
    let hist_distance = baseline_hist.l2_distance(&candidate_hist);
    let dv95 = percentile(&mut dv_samples, params.dv95_percentile);

    let denominator = if validity.is_some() {
        valid_count
    } else {
        width as usize * height as usize
    };
    let warm_fraction = if denominator > 0 {
        warm_count as f64 / denominator as f64
    } else {
        0.0
    };

    // --- 3. Spatial grouping ---
    let min_region_area = (params.min_area_pixels as f64)
        .max((params.min_area_ratio * valid_count as f64).floor());
    let raw_regions = blob_detector::find_regions(&warm_mask, min_region_area);
    let regions = blob_detector::merge_nested(&raw_regions);

    let score = hist_distance / params.hist_distance_scale
        + dv95 * params.dv95_scale
        + warm_fraction * params.warm_fraction_scale;
    let prob = logistic(score);

    debug!(
        valid_count,
        warm_count,
        hist_distance,
        dv95,
        raw_regions = raw_regions.len(),
        regions = regions.len(),
        prob,
        "comparison complete"
    );

    Ok(ComparisonStats {
        hist_distance,
        dv95,
        warm_fraction,
        warm_mask,
        valid_count,
        min_region_area,
        raw_regions,
        regions,
        score,
        prob,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    const GRAY: Rgb<u8> = Rgb([51, 51, 51]);
    const HOT: Rgb<u8> = Rgb([255, 0, 0]);

    fn with_square(base: Rgb<u8>, fill: Rgb<u8>, x0: u32, y0: u32, side: u32) -> RgbImage {
        RgbImage::from_fn(200, 150, |x, y| {
            if (x0..x0 + side).contains(&x) && (y0..y0 + side).contains(&y) {
                fill
            } else {
                base
            }
        })
    }

    #[test]
    fn identical_images_are_neutral() {
        let image = RgbImage::from_pixel(64, 48, GRAY);
        let stats = compare(&image, &image, None, &DetectionParameters::default())
            .expect("compare");
        assert_eq!(stats.hist_distance, 0.0);
        assert_eq!(stats.dv95, 0.0);
        assert_eq!(stats.warm_fraction, 0.0);
        assert!(stats.regions.is_empty());
        assert_eq!(stats.prob, 0.5);
    }

    #[test]
    fn hot_square_becomes_one_region() {
        let baseline = RgbImage::from_pixel(200, 150, GRAY);
        let candidate = with_square(GRAY, HOT, 40, 30, 20);
        let stats = compare(&baseline, &candidate, None, &DetectionParameters::default())
            .expect("compare");
        assert_eq!(stats.regions, vec![Region::new(40, 30, 20, 20)]);
        assert_eq!(stats.warm_mask.count(), 400);
        assert!((stats.warm_fraction - 400.0 / 30000.0).abs() < 1e-12);
        assert!(stats.hist_distance > 0.0);
        assert!(stats.prob > 0.5);
    }

    #[test]
    fn invalid_pixels_are_ignored() {
        let baseline = RgbImage::from_pixel(200, 150, GRAY);
        let candidate = with_square(GRAY, HOT, 40, 30, 20);
        let mut validity = Mask::filled(200, 150, true);
        for y in 0..150 {
            for x in 0..100 {
                validity.set(x, y, false);
            }
        }
        let stats = compare(
            &baseline,
            &candidate,
            Some(&validity),
            &DetectionParameters::default(),
        )
        .expect("compare");
        assert_eq!(stats.valid_count, 15000);
        assert_eq!(stats.warm_fraction, 0.0);
        assert!(stats.regions.is_empty());
        assert_eq!(stats.hist_distance, 0.0);
    }

    #[test]
    fn small_warm_spots_are_filtered() {
        let baseline = RgbImage::from_pixel(200, 150, GRAY);
        let candidate = with_square(GRAY, HOT, 10, 10, 5);
        let stats = compare(&baseline, &candidate, None, &DetectionParameters::default())
            .expect("compare");
        assert_eq!(stats.warm_mask.count(), 25);
        assert!(stats.regions.is_empty());
        assert_eq!(stats.min_region_area, 32.0);
    }

    #[test]
    fn min_area_scales_with_valid_pixels() {
        let image = RgbImage::from_pixel(400, 300, GRAY);
        let stats = compare(&image, &image, None, &DetectionParameters::default())
            .expect("compare");
        assert_eq!(stats.min_region_area, 120.0);
    }

    #[test]
    fn mismatched_dimensions_are_rejected() {
        let a = RgbImage::new(10, 10);
        let b = RgbImage::new(10, 11);
        let err = compare(&a, &b, None, &DetectionParameters::default()).expect_err("mismatch");
        assert!(matches!(err, VisionError::DimensionMismatch { .. }));
    }

    #[test]
    fn empty_image_is_rejected() {
        let a = RgbImage::new(0, 0);
        let err = compare(&a, &a, None, &DetectionParameters::default()).expect_err("empty");
        assert!(matches!(err, VisionError::EmptyImage));
    }

    #[test]
    fn cooling_does_not_raise_dv95() {
        let baseline = RgbImage::from_pixel(50, 50, Rgb([200, 200, 200]));
        let candidate = RgbImage::from_pixel(50, 50, Rgb([20, 20, 20]));
        let stats = compare(&baseline, &candidate, None, &DetectionParameters::default())
            .expect("compare");
        assert_eq!(stats.dv95, 0.0);
    }
}
