// THEORY:
// Oriented binary features for registering two captures of the same equipment. The
// camera is hand-held or re-mounted between captures, so the features must survive
// roll and a moderate change of distance, not just a shift.
//
// Key architectural principles:
// 1.  **Scale Pyramid**: level k is the frame shrunk by `scale_factor^k`. FAST-9
//     corners are found on every level, and each level gets a share of the feature
//     budget proportional to its size. Positions are reported in level-0 pixels.
// 2.  **Intensity Centroid**: a keypoint's angle points from the patch center to the
//     patch's brightness centroid. The centroid turns with the image, so it gives
//     every keypoint a repeatable frame.
// 3.  **Steered Tests**: the descriptor is 256 brightness comparisons between point
//     pairs on a smoothed level, with every pair rotated into the keypoint's frame
//     before sampling.
// 4.  **Deterministic Pattern**: the point pairs are drawn once from a seeded RNG, so
//     both images of a pair, and every run, use the same tests.

use glam::DVec2;
use image::GrayImage;
use image::imageops::{self, FilterType};
use imageproc::corners::{Corner, corners_fast9};
use imageproc::filter::gaussian_blur_f32;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::core_modules::mask::Mask;

/// Radius of the circular patch used for orientation.
pub const PATCH_RADIUS: u32 = 15;
/// Test points are drawn inside this radius so they stay in the patch when rotated.
const PATTERN_RADIUS: f64 = 13.0;
/// Closest two points of one test may be, in pixels.
const MIN_TEST_SEPARATION: f64 = 2.0;
pub const DESCRIPTOR_BITS: usize = 256;
const DESCRIPTOR_WORDS: usize = DESCRIPTOR_BITS / 64;

#[derive(Debug, Clone, PartialEq)]
pub struct OrbConfig {
    /// FAST intensity threshold.
    pub fast_threshold: u8,
    /// Feature budget across all pyramid levels.
    pub max_features: usize,
    pub levels: usize,
    /// Size ratio between consecutive pyramid levels.
    pub scale_factor: f64,
    /// Corners closer than this to a level's edge are dropped. Never below
    /// `PATCH_RADIUS + 1`.
    pub edge_threshold: u32,
    /// Chebyshev radius of the non-maximum suppression between corners.
    pub suppression_radius: u32,
    /// Smoothing applied before the brightness tests.
    pub blur_sigma: f32,
    pub pattern_seed: u64,
}

impl Default for OrbConfig {
    fn default() -> Self {
        Self {
            fast_threshold: 20,
            max_features: 500,
            levels: 5,
            scale_factor: 1.2,
            edge_threshold: 20,
            suppression_radius: 3,
            blur_sigma: 2.0,
            pattern_seed: 0x0b5e_ed01,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    /// Position in level-0 pixels.
    pub position: DVec2,
    /// Orientation in radians, image axes (y down).
    pub angle: f64,
    pub level: usize,
    pub score: f32,
}

/// 256 packed test results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Descriptor([u64; DESCRIPTOR_WORDS]);

impl Descriptor {
    pub fn hamming_distance(&self, other: &Descriptor) -> u32 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a ^ b).count_ones())
            .sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Feature {
    pub keypoint: Keypoint,
    pub descriptor: Descriptor,
}

/// Detects and describes oriented features over a scale pyramid.
#[derive(Debug, Clone)]
pub struct OrbExtractor {
    config: OrbConfig,
    /// Point pairs relative to the keypoint, in the keypoint's own frame.
    pattern: Vec<(DVec2, DVec2)>,
}

impl Default for OrbExtractor {
    fn default() -> Self {
        Self::new(OrbConfig::default())
    }
}

impl OrbExtractor {
    pub fn new(config: OrbConfig) -> Self {
        let pattern = test_pattern(config.pattern_seed);
        Self { config, pattern }
    }

    pub fn extract(&self, image: &GrayImage) -> Vec<Feature> {
        let levels = self.pyramid(image);
        let quotas = level_quotas(self.config.max_features, levels.len(), self.config.scale_factor);

        let mut features = Vec::new();
        for (level, (frame, quota)) in levels.iter().zip(quotas).enumerate() {
            let scale_x = image.width() as f64 / frame.width() as f64;
            let scale_y = image.height() as f64 / frame.height() as f64;
            let smoothed = gaussian_blur_f32(frame, self.config.blur_sigma);

            for corner in self.strongest_corners(frame, quota) {
                let angle = intensity_centroid_angle(frame, corner.x, corner.y);
                let descriptor = self.describe(&smoothed, corner.x, corner.y, angle);
                // Pixel centers, not corners, line up across levels.
                let position = DVec2::new(
                    (corner.x as f64 + 0.5) * scale_x - 0.5,
                    (corner.y as f64 + 0.5) * scale_y - 0.5,
                );
                features.push(Feature {
                    keypoint: Keypoint {
                        position,
                        angle,
                        level,
                        score: corner.score,
                    },
                    descriptor,
                });
            }
        }
        features
    }

    fn pyramid(&self, image: &GrayImage) -> Vec<GrayImage> {
        let min_side = 2 * self.edge() + 1;
        let mut levels = vec![image.clone()];
        for level in 1..self.config.levels.max(1) {
            let scale = self.config.scale_factor.powi(level as i32);
            let width = (image.width() as f64 / scale).round() as u32;
            let height = (image.height() as f64 / scale).round() as u32;
            if width < min_side || height < min_side {
                break;
            }
            levels.push(imageops::resize(image, width, height, FilterType::Triangle));
        }
        levels
    }

    fn edge(&self) -> u32 {
        self.config.edge_threshold.max(PATCH_RADIUS + 1)
    }

    /// FAST corners away from the edge, strongest first, with weaker corners next to
    /// a stronger one suppressed.
    fn strongest_corners(&self, frame: &GrayImage, quota: usize) -> Vec<Corner> {
        let (width, height) = frame.dimensions();
        let edge = self.edge();
        if width <= 2 * edge || height <= 2 * edge || quota == 0 {
            return Vec::new();
        }

        let mut corners: Vec<Corner> = corners_fast9(frame, self.config.fast_threshold)
            .into_iter()
            .filter(|c| c.x >= edge && c.y >= edge && c.x + edge < width && c.y + edge < height)
            .collect();
        corners.sort_by(|a, b| b.score.total_cmp(&a.score).then((a.y, a.x).cmp(&(b.y, b.x))));

        let radius = self.config.suppression_radius;
        let mut taken = Mask::new(width, height);
        let mut kept = Vec::with_capacity(quota.min(corners.len()));
        for corner in corners {
            if taken.get(corner.x, corner.y) {
                continue;
            }
            let (x0, x1) = (corner.x.saturating_sub(radius), (corner.x + radius).min(width - 1));
            let (y0, y1) = (corner.y.saturating_sub(radius), (corner.y + radius).min(height - 1));
            for y in y0..=y1 {
                for x in x0..=x1 {
                    taken.set(x, y, true);
                }
            }
            kept.push(corner);
            if kept.len() == quota {
                break;
            }
        }
        kept
    }

    fn describe(&self, smoothed: &GrayImage, x: u32, y: u32, angle: f64) -> Descriptor {
        let (sin, cos) = angle.sin_cos();
        let steer = |offset: DVec2| {
            let dx = (cos * offset.x - sin * offset.y).round() as i64;
            let dy = (sin * offset.x + cos * offset.y).round() as i64;
            smoothed.get_pixel((x as i64 + dx) as u32, (y as i64 + dy) as u32)[0]
        };

        let mut words = [0u64; DESCRIPTOR_WORDS];
        for (bit, (p, q)) in self.pattern.iter().enumerate() {
            if steer(*p) < steer(*q) {
                words[bit / 64] |= 1 << (bit % 64);
            }
        }
        Descriptor(words)
    }
}

/// Angle from the patch center to the brightness centroid of the disc of radius
/// `PATCH_RADIUS` around (x, y). The caller keeps the disc inside the frame.
pub fn intensity_centroid_angle(frame: &GrayImage, x: u32, y: u32) -> f64 {
    let radius = PATCH_RADIUS as i64;
    let (mut m10, mut m01) = (0.0, 0.0);
    for dy in -radius..=radius {
        let span = ((radius * radius - dy * dy) as f64).sqrt() as i64;
        let row = (y as i64 + dy) as u32;
        for dx in -span..=span {
            let value = frame.get_pixel((x as i64 + dx) as u32, row)[0] as f64;
            m10 += dx as f64 * value;
            m01 += dy as f64 * value;
        }
    }
    m01.atan2(m10)
}

/// Splits `total` features over the levels, geometrically decreasing by
/// `1 / scale_factor` per level.
fn level_quotas(total: usize, levels: usize, scale_factor: f64) -> Vec<usize> {
    let factor = 1.0 / scale_factor;
    let weights: Vec<f64> = (0..levels).map(|level| factor.powi(level as i32)).collect();
    let sum: f64 = weights.iter().sum();
    weights
        .iter()
        .map(|weight| (total as f64 * weight / sum).round() as usize)
        .collect()
}

fn test_pattern(seed: u64) -> Vec<(DVec2, DVec2)> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut pairs = Vec::with_capacity(DESCRIPTOR_BITS);
    while pairs.len() < DESCRIPTOR_BITS {
        let p = point_in_disc(&mut rng);
        let q = point_in_disc(&mut rng);
        if p.distance(q) >= MIN_TEST_SEPARATION {
            pairs.push((p, q));
        }
    }
    pairs
}

fn point_in_disc(rng: &mut ChaCha8Rng) -> DVec2 {
    loop {
        let point = DVec2::new(
            rng.random_range(-PATTERN_RADIUS..=PATTERN_RADIUS),
            rng.random_range(-PATTERN_RADIUS..=PATTERN_RADIUS),
        );
        if point.length_squared() <= PATTERN_RADIUS * PATTERN_RADIUS {
            return point;
        }
    }
}
