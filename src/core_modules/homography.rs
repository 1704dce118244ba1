// THEORY:
// The `homography` module is the geometric heart of the Alignment Engine. Given point
// correspondences between the baseline and the candidate, it finds the planar
// projective transform that maps one onto the other, tolerating a large share of
// wrong matches.
//
// Key architectural principles:
// 1.  **Normalized DLT**: every estimate centers and scales both point sets (mean
//     distance sqrt 2 from the origin) before building the 2n x 9 design matrix, then
//     solves for the null vector with an SVD of the full matrix rather than A^T A.
// 2.  **Robust Fit**: RANSAC samples minimal 4-point sets, scores each candidate model
//     by how many correspondences reproject within the tolerance, and refines the
//     winner on all of its inliers.
// 3.  **Determinism**: the sampler is a seeded `ChaCha8Rng`, so the same image pair
//     always aligns the same way.

use glam::DVec2;
use nalgebra::{DMatrix, Matrix3, SVD, Vector3};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// A 3x3 projective transform acting on homogeneous 2D points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Homography {
    matrix: Matrix3<f64>,
}

impl Homography {
    pub fn identity() -> Self {
        Self {
            matrix: Matrix3::identity(),
        }
    }

    pub fn from_row_major(values: [f64; 9]) -> Self {
        Self {
            matrix: Matrix3::from_row_slice(&values),
        }
    }

    pub fn to_row_major(&self) -> [f64; 9] {
        let m = &self.matrix;
        [
            m[(0, 0)], m[(0, 1)], m[(0, 2)],
            m[(1, 0)], m[(1, 1)], m[(1, 2)],
            m[(2, 0)], m[(2, 1)], m[(2, 2)],
        ]
    }

    pub fn matrix(&self) -> &Matrix3<f64> {
        &self.matrix
    }

    /// Maps `point` through the transform. Returns `None` for points sent to infinity.
    pub fn project(&self, point: DVec2) -> Option<DVec2> {
        let v = self.matrix * Vector3::new(point.x, point.y, 1.0);
        if v.z.abs() < 1e-12 {
            return None;
        }
        Some(DVec2::new(v.x / v.z, v.y / v.z))
    }

    /// Squared distance between `project(source)` and `target`.
    pub fn transfer_error_sq(&self, source: DVec2, target: DVec2) -> f64 {
        match self.project(source) {
            Some(projected) => projected.distance_squared(target),
            None => f64::INFINITY,
        }
    }

    /// Finite entries and a non-singular matrix.
    pub fn is_valid(&self) -> bool {
        self.matrix.iter().all(|v| v.is_finite()) && self.matrix.determinant().abs() > 1e-12
    }
}

impl Default for Homography {
    fn default() -> Self {
        Self::identity()
    }
}

/// Direct linear transform over at least four correspondences. `None` when the
/// points are degenerate or too few.
pub fn estimate_homography(source: &[DVec2], target: &[DVec2]) -> Option<Homography> {
    if source.len() < 4 || source.len() != target.len() {
        return None;
    }

    let (src_norm, src_t) = normalize_points(source);
    let (dst_norm, dst_t) = normalize_points(target);

    // Two rows per correspondence:
    // [-x -y -1  0  0  0  x*x'  y*x'  x']
    // [ 0  0  0 -x -y -1  x*y'  y*y'  y']
    let n = src_norm.len();
    let mut rows = Vec::with_capacity(2 * n * 9);
    for (s, d) in src_norm.iter().zip(dst_norm.iter()) {
        rows.extend_from_slice(&[-s.x, -s.y, -1.0, 0.0, 0.0, 0.0, s.x * d.x, s.y * d.x, d.x]);
        rows.extend_from_slice(&[0.0, 0.0, 0.0, -s.x, -s.y, -1.0, s.x * d.y, s.y * d.y, d.y]);
    }
    let design = DMatrix::from_row_slice(2 * n, 9, &rows);
    let h_norm = solve_homogeneous_svd(design)?;

    // H = T_target^-1 * H_norm * T_source
    let dst_t_inv = dst_t.try_inverse()?;
    let mut h = dst_t_inv * h_norm * src_t;

    let scale = h[(2, 2)];
    if scale.abs() < 1e-10 {
        return None;
    }
    h /= scale;

    let homography = Homography { matrix: h };
    homography.is_valid().then_some(homography)
}

/// Translates points to their centroid and scales them to a mean distance of sqrt 2.
/// Returns the normalized points and the matrix that performs the normalization.
pub(crate) fn normalize_points(points: &[DVec2]) -> (Vec<DVec2>, Matrix3<f64>) {
    if points.is_empty() {
        return (Vec::new(), Matrix3::identity());
    }

    let centroid = points.iter().copied().sum::<DVec2>() / points.len() as f64;
    let mean_distance =
        points.iter().map(|p| (*p - centroid).length()).sum::<f64>() / points.len() as f64;

    if mean_distance < 1e-10 {
        return (points.to_vec(), Matrix3::identity());
    }

    let scale = std::f64::consts::SQRT_2 / mean_distance;
    let normalized = points.iter().map(|p| (*p - centroid) * scale).collect();
    let transform = Matrix3::new(
        scale, 0.0, -centroid.x * scale,
        0.0, scale, -centroid.y * scale,
        0.0, 0.0, 1.0,
    );
    (normalized, transform)
}

/// Null vector of `design` (right singular vector of the smallest singular value).
fn solve_homogeneous_svd(design: DMatrix<f64>) -> Option<Matrix3<f64>> {
    let (rows, cols) = design.shape();

    // The thin SVD drops the null vector when rows < 9; zero rows leave it unchanged.
    let design = if rows < cols {
        let mut padded = DMatrix::zeros(cols, cols);
        padded.view_mut((0, 0), (rows, cols)).copy_from(&design);
        padded
    } else {
        design
    };

    let svd = SVD::new(design, false, true);
    let v_t = svd.v_t?;
    let last = v_t.row(v_t.nrows() - 1);
    let values: Vec<f64> = last.iter().copied().collect();
    Some(Matrix3::from_row_slice(&values))
}

/// True when any three of the points are (nearly) collinear.
fn is_degenerate_sample(points: &[DVec2]) -> bool {
    for i in 0..points.len() {
        for j in (i + 1)..points.len() {
            for k in (j + 1)..points.len() {
                let twice_area = (points[j] - points[i]).perp_dot(points[k] - points[i]);
                if twice_area.abs() < 1e-6 {
                    return true;
                }
            }
        }
    }
    false
}

/// Configuration for the robust homography fit.
#[derive(Debug, Clone)]
pub struct RansacConfig {
    /// Upper bound on sampling rounds.
    pub max_iterations: usize,
    /// Reprojection tolerance in pixels.
    pub inlier_threshold: f64,
    /// Desired probability of drawing at least one all-inlier sample.
    pub confidence: f64,
    /// Seed for the sampler.
    pub seed: u64,
}

impl Default for RansacConfig {
    fn default() -> Self {
        Self {
            max_iterations: 2000,
            inlier_threshold: 5.0,
            confidence: 0.995,
            seed: 0x7e57_ab1e,
        }
    }
}

/// Winning model and the indices of the correspondences it explains.
#[derive(Debug, Clone)]
pub struct RansacFit {
    pub homography: Homography,
    pub inliers: Vec<usize>,
}

const SAMPLE_SIZE: usize = 4;

/// Robustly fits a homography mapping `source[i]` to `target[i]`.
pub fn ransac_homography(
    source: &[DVec2],
    target: &[DVec2],
    config: &RansacConfig,
) -> Option<RansacFit> {
    let n = source.len();
    if n < SAMPLE_SIZE || n != target.len() {
        return None;
    }

    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let threshold_sq = config.inlier_threshold * config.inlier_threshold;

    let mut sample = Vec::with_capacity(SAMPLE_SIZE);
    let mut sample_src = Vec::with_capacity(SAMPLE_SIZE);
    let mut sample_dst = Vec::with_capacity(SAMPLE_SIZE);
    let mut best: Option<RansacFit> = None;
    let mut iteration_budget = config.max_iterations;
    let mut iteration = 0;

    while iteration < iteration_budget {
        iteration += 1;

        random_sample_into(&mut rng, n, SAMPLE_SIZE, &mut sample);
        sample_src.clear();
        sample_dst.clear();
        sample_src.extend(sample.iter().map(|&i| source[i]));
        sample_dst.extend(sample.iter().map(|&i| target[i]));

        if is_degenerate_sample(&sample_src) || is_degenerate_sample(&sample_dst) {
            continue;
        }
        let Some(model) = estimate_homography(&sample_src, &sample_dst) else {
            continue;
        };

        let inliers = count_inliers(source, target, &model, threshold_sq);
        let best_count = best.as_ref().map_or(0, |fit| fit.inliers.len());
        if inliers.len() > best_count {
            let ratio = inliers.len() as f64 / n as f64;
            iteration_budget = iteration_budget
                .min(adaptive_iterations(ratio, SAMPLE_SIZE, config.confidence).max(iteration));
            best = Some(RansacFit {
                homography: model,
                inliers,
            });
        }
    }

    let mut fit = best?;
    if fit.inliers.len() < SAMPLE_SIZE {
        return None;
    }

    // --- Refinement on the full inlier set ---
    let inlier_src: Vec<DVec2> = fit.inliers.iter().map(|&i| source[i]).collect();
    let inlier_dst: Vec<DVec2> = fit.inliers.iter().map(|&i| target[i]).collect();
    if let Some(refined) = estimate_homography(&inlier_src, &inlier_dst) {
        let refined_inliers = count_inliers(source, target, &refined, threshold_sq);
        if refined_inliers.len() >= fit.inliers.len() {
            fit = RansacFit {
                homography: refined,
                inliers: refined_inliers,
            };
        }
    }

    Some(fit)
}

fn count_inliers(
    source: &[DVec2],
    target: &[DVec2],
    model: &Homography,
    threshold_sq: f64,
) -> Vec<usize> {
    source
        .iter()
        .zip(target.iter())
        .enumerate()
        .filter(|(_, (s, t))| model.transfer_error_sq(**s, **t) <= threshold_sq)
        .map(|(i, _)| i)
        .collect()
}

/// Rounds needed to draw an all-inlier sample with the given confidence.
pub(crate) fn adaptive_iterations(inlier_ratio: f64, sample_size: usize, confidence: f64) -> usize {
    if inlier_ratio <= 0.0 || inlier_ratio >= 1.0 {
        return 1;
    }

    let w_n = inlier_ratio.powi(sample_size as i32);
    let log_outlier = (1.0 - w_n).ln();
    if log_outlier >= 0.0 {
        return usize::MAX;
    }

    ((1.0 - confidence).ln() / log_outlier).ceil() as usize
}

/// Fills `buffer` with `k` distinct indices from `0..n`.
fn random_sample_into<R: Rng>(rng: &mut R, n: usize, k: usize, buffer: &mut Vec<usize>) {
    debug_assert!(k <= n, "cannot sample {k} indices from {n}");
    buffer.clear();

    if k <= n / 2 {
        // Floyd's algorithm
        for j in (n - k)..n {
            let t = rng.random_range(0..=j);
            if buffer.contains(&t) {
                buffer.push(j);
            } else {
                buffer.push(t);
            }
        }
    } else {
        buffer.extend(0..n);
        buffer.shuffle(rng);
        buffer.truncate(k);
    }
}
