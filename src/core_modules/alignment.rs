// THEORY:
// The Alignment Engine compensates for the camera moving between the baseline and
// candidate captures. It registers the baseline onto the candidate so the Comparison
// Engine can compare pixels that show the same piece of equipment.
//
// Key architectural principles:
// 1.  **Pluggable Capability**: keypoint matching, homography estimation and warping
//     sit behind the `FeatureAligner` trait. `OrbAligner` is the default backend
//     (oriented FAST-9 features over a scale pyramid + steered binary descriptors +
//     RANSAC); `NoAlignment` always skips.
// 2.  **Graceful Degradation**: every way alignment can fail (too few keypoints,
//     ambiguous matches, a degenerate transform) is an `AlignmentSkip`, never an
//     error. The engine then hands back the cropped baseline unchanged and no
//     Validity Mask, and the run carries on.
// 3.  **Shared Framing**: both images are first center-cropped to a common size and
//     then trimmed by a margin on the left and right, so every later stage sees
//     identically sized frames.
// 4.  **Honest Coverage**: a warped pixel is valid only where bilinear resampling had
//     all four baseline neighbors. Anything else holds fill color, not data.

use glam::DVec2;
use image::imageops::{self, crop_imm};
use image::{GrayImage, Luma, Rgb, RgbImage};
use imageproc::geometric_transformations::{Interpolation, Projection, warp_into};
use thiserror::Error;
use tracing::debug;

use crate::core_modules::features::{Feature, OrbConfig, OrbExtractor};
use crate::core_modules::homography::{Homography, RansacConfig, ransac_homography};
use crate::core_modules::mask::Mask;

/// Fewest correspondences a homography can be fitted from.
pub const MIN_MATCHES: usize = 4;

/// Reasons alignment was skipped. None of these abort a run.
#[derive(Debug, Error)]
pub enum AlignmentSkip {
    #[error("alignment disabled")]
    Disabled,
    #[error("too few keypoints (baseline {baseline}, candidate {candidate})")]
    TooFewKeypoints { baseline: usize, candidate: usize },
    #[error("only {found} unambiguous matches")]
    TooFewMatches { found: usize },
    #[error("homography estimation failed")]
    Homography,
    #[error("homography cannot be used as a projection")]
    Projection,
}

/// Paired keypoint positions: `baseline[i]` corresponds to `candidate[i]`.
#[derive(Debug, Clone, Default)]
pub struct MatchedPoints {
    pub baseline: Vec<DVec2>,
    pub candidate: Vec<DVec2>,
}

impl MatchedPoints {
    pub fn len(&self) -> usize {
        self.baseline.len()
    }

    pub fn is_empty(&self) -> bool {
        self.baseline.is_empty()
    }

    fn push(&mut self, baseline: DVec2, candidate: DVec2) {
        self.baseline.push(baseline);
        self.candidate.push(candidate);
    }
}

/// The three stages of feature-based registration.
pub trait FeatureAligner {
    /// Short backend name for diagnostics.
    fn name(&self) -> &'static str;

    /// Finds unambiguous correspondences between two grayscale frames.
    fn detect_and_match(
        &self,
        baseline: &GrayImage,
        candidate: &GrayImage,
    ) -> Result<MatchedPoints, AlignmentSkip>;

    /// Fits a baseline-to-candidate homography to the correspondences.
    fn estimate_homography(&self, matches: &MatchedPoints) -> Result<Homography, AlignmentSkip>;

    /// Resamples `baseline` into a `width` x `height` candidate frame. Returns the
    /// warped image and the mask of pixels with real coverage.
    fn warp(
        &self,
        baseline: &RgbImage,
        homography: &Homography,
        width: u32,
        height: u32,
    ) -> Result<(RgbImage, Mask), AlignmentSkip>;
}

/// Output of the Alignment Engine. `validity` is `None` when alignment was skipped,
/// which downstream stages treat as fully valid.
#[derive(Debug, Clone)]
pub struct AlignmentResult {
    pub baseline: RgbImage,
    pub candidate: RgbImage,
    pub validity: Option<Mask>,
    pub homography: Option<Homography>,
}

impl AlignmentResult {
    pub fn is_aligned(&self) -> bool {
        self.homography.is_some()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.candidate.dimensions()
    }
}

/// Frames both images, then registers the baseline onto the candidate with
/// `aligner`. Falls back to the framed baseline on any alignment failure.
pub fn align(
    aligner: &dyn FeatureAligner,
    baseline: &RgbImage,
    candidate: &RgbImage,
    crop_margin_pct: f64,
) -> AlignmentResult {
    let (baseline, candidate) = center_crop_to_common(baseline, candidate);
    let baseline = crop_horizontal_margin(&baseline, crop_margin_pct);
    let candidate = crop_horizontal_margin(&candidate, crop_margin_pct);

    match register(aligner, &baseline, &candidate) {
        Ok((warped, validity, homography)) => {
            debug!(
                aligner = aligner.name(),
                valid_pixels = validity.count(),
                "baseline registered onto candidate"
            );
            AlignmentResult {
                baseline: warped,
                candidate,
                validity: Some(validity),
                homography: Some(homography),
            }
        }
        Err(reason) => {
            debug!(aligner = aligner.name(), %reason, "alignment skipped, comparing unaligned");
            AlignmentResult {
                baseline,
                candidate,
                validity: None,
                homography: None,
            }
        }
    }
}

fn register(
    aligner: &dyn FeatureAligner,
    baseline: &RgbImage,
    candidate: &RgbImage,
) -> Result<(RgbImage, Mask, Homography), AlignmentSkip> {
    let baseline_gray = imageops::grayscale(baseline);
    let candidate_gray = imageops::grayscale(candidate);

    let matches = aligner.detect_and_match(&baseline_gray, &candidate_gray)?;
    if matches.len() < MIN_MATCHES {
        return Err(AlignmentSkip::TooFewMatches {
            found: matches.len(),
        });
    }
    let homography = aligner.estimate_homography(&matches)?;
    let (width, height) = candidate.dimensions();
    let (warped, validity) = aligner.warp(baseline, &homography, width, height)?;
    Ok((warped, validity, homography))
}

/// Center-crops both images to their common width and height.
pub fn center_crop_to_common(baseline: &RgbImage, candidate: &RgbImage) -> (RgbImage, RgbImage) {
    let width = baseline.width().min(candidate.width());
    let height = baseline.height().min(candidate.height());
    (
        center_crop(baseline, width, height),
        center_crop(candidate, width, height),
    )
}

fn center_crop(image: &RgbImage, width: u32, height: u32) -> RgbImage {
    if image.dimensions() == (width, height) {
        return image.clone();
    }
    let left = (image.width() - width) / 2;
    let top = (image.height() - height) / 2;
    crop_imm(image, left, top, width, height).to_image()
}

/// Removes `floor(width * pct)` columns from both the left and right edges.
pub fn crop_horizontal_margin(image: &RgbImage, pct: f64) -> RgbImage {
    let (width, height) = image.dimensions();
    let margin = (width as f64 * pct).floor().max(0.0) as u32;
    if margin == 0 || 2 * margin >= width {
        return image.clone();
    }
    crop_imm(image, margin, 0, width - 2 * margin, height).to_image()
}

/// Oriented FAST features over a scale pyramid, described with steered 256-bit
/// binary tests, matched by brute-force Hamming distance with a
/// nearest/second-nearest ratio test and fitted with RANSAC.
#[derive(Debug, Clone)]
pub struct OrbAligner {
    extractor: OrbExtractor,
    /// Best distance must be below this fraction of the second best.
    pub ratio: f64,
    pub ransac: RansacConfig,
}

impl Default for OrbAligner {
    fn default() -> Self {
        Self::new(OrbConfig::default())
    }
}

impl OrbAligner {
    pub fn new(config: OrbConfig) -> Self {
        Self {
            extractor: OrbExtractor::new(config),
            ratio: 0.75,
            ransac: RansacConfig::default(),
        }
    }

    /// Pairs every baseline feature with its nearest candidate feature when the
    /// nearest is clearly better than the runner-up.
    fn ratio_matches(&self, baseline: &[Feature], candidate: &[Feature]) -> MatchedPoints {
        let mut matches = MatchedPoints::default();
        for query in baseline {
            let mut best = u32::MAX;
            let mut second = u32::MAX;
            let mut best_index = 0;
            for (index, train) in candidate.iter().enumerate() {
                let distance = query.descriptor.hamming_distance(&train.descriptor);
                if distance < best {
                    second = best;
                    best = distance;
                    best_index = index;
                } else if distance < second {
                    second = distance;
                }
            }
            if second == u32::MAX {
                continue;
            }
            if (best as f64) < self.ratio * second as f64 {
                matches.push(
                    query.keypoint.position,
                    candidate[best_index].keypoint.position,
                );
            }
        }
        matches
    }
}

impl FeatureAligner for OrbAligner {
    fn name(&self) -> &'static str {
        "orb"
    }

    fn detect_and_match(
        &self,
        baseline: &GrayImage,
        candidate: &GrayImage,
    ) -> Result<MatchedPoints, AlignmentSkip> {
        // --- 1. Oriented features ---
        let baseline_features = self.extractor.extract(baseline);
        let candidate_features = self.extractor.extract(candidate);
        debug!(
            baseline = baseline_features.len(),
            candidate = candidate_features.len(),
            "oriented features"
        );
        if baseline_features.len() < MIN_MATCHES || candidate_features.len() < 2 {
            return Err(AlignmentSkip::TooFewKeypoints {
                baseline: baseline_features.len(),
                candidate: candidate_features.len(),
            });
        }

        // --- 2. Ratio-test matching ---
        let matches = self.ratio_matches(&baseline_features, &candidate_features);
        debug!(matches = matches.len(), "ratio-test matches");

        if matches.len() < MIN_MATCHES {
            return Err(AlignmentSkip::TooFewMatches {
                found: matches.len(),
            });
        }
        Ok(matches)
    }

    fn estimate_homography(&self, matches: &MatchedPoints) -> Result<Homography, AlignmentSkip> {
        let fit = ransac_homography(&matches.baseline, &matches.candidate, &self.ransac)
            .ok_or(AlignmentSkip::Homography)?;
        debug!(
            inliers = fit.inliers.len(),
            matches = matches.len(),
            "RANSAC homography"
        );
        Ok(fit.homography)
    }

    fn warp(
        &self,
        baseline: &RgbImage,
        homography: &Homography,
        width: u32,
        height: u32,
    ) -> Result<(RgbImage, Mask), AlignmentSkip> {
        let projection = Projection::from_matrix(homography.to_row_major().map(|v| v as f32))
            .ok_or(AlignmentSkip::Projection)?;

        let mut warped = RgbImage::new(width, height);
        warp_into(
            baseline,
            &projection,
            Interpolation::Bilinear,
            Rgb([0, 0, 0]),
            &mut warped,
        );

        // Bilinear sampling falls back to the fill color within half a pixel of the
        // baseline edge, where nearest sampling still finds a pixel. Warping the same
        // full-coverage image both ways and keeping the overlap marks exactly the
        // pixels that were resampled from data. Blending truncates, so any non-zero
        // bilinear coverage counts.
        let full_coverage = GrayImage::from_pixel(baseline.width(), baseline.height(), Luma([255]));
        let mut nearest = GrayImage::new(width, height);
        warp_into(
            &full_coverage,
            &projection,
            Interpolation::Nearest,
            Luma([0]),
            &mut nearest,
        );
        let mut bilinear = GrayImage::new(width, height);
        warp_into(
            &full_coverage,
            &projection,
            Interpolation::Bilinear,
            Luma([0]),
            &mut bilinear,
        );

        let mut validity = Mask::from_coverage(&nearest);
        validity.intersect(&Mask::from_coverage(&bilinear));
        Ok((warped, validity))
    }
}

/// Backend that never aligns; the comparison runs on the framed images as-is.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAlignment;

impl FeatureAligner for NoAlignment {
    fn name(&self) -> &'static str {
        "none"
    }

    fn detect_and_match(
        &self,
        _baseline: &GrayImage,
        _candidate: &GrayImage,
    ) -> Result<MatchedPoints, AlignmentSkip> {
        Err(AlignmentSkip::Disabled)
    }

    fn estimate_homography(&self, _matches: &MatchedPoints) -> Result<Homography, AlignmentSkip> {
        Err(AlignmentSkip::Disabled)
    }

    fn warp(
        &self,
        _baseline: &RgbImage,
        _homography: &Homography,
        _width: u32,
        _height: u32,
    ) -> Result<(RgbImage, Mask), AlignmentSkip> {
        Err(AlignmentSkip::Disabled)
    }
}
