//! Synthetic keypoints for tests and benchmarks.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::keypoint::Keypoint;
use crate::matches::FeatureMatch;
use crate::types::TAU;

/// `rows x cols` keypoints spaced `stride` apart, starting at `(stride,
/// stride)`, each a circle of radius `radius` with orientation 0.
pub fn grid_kpts(rows: usize, cols: usize, stride: f64, radius: f64) -> Vec<Keypoint> {
    (0..rows)
        .flat_map(|r| {
            (0..cols).map(move |c| {
                Keypoint::new(
                    stride * (c + 1) as f64,
                    stride * (r + 1) as f64,
                    radius,
                    0.0,
                    radius,
                    0.0,
                )
            })
        })
        .collect()
}

/// A 7x7 grid with every parameter jittered.
///
/// Larger `damping` means smaller perturbations. The same seed always
/// produces the same keypoints.
pub fn perturbed_grid_kpts(seed: u64, damping: f64) -> Vec<Keypoint> {
    let stride = 20.0;
    let radius = 5.0;
    let mut rng = StdRng::seed_from_u64(seed);
    let amount = 1.0 / damping.max(1.0);
    grid_kpts(7, 7, stride, radius)
        .into_iter()
        .map(|kp| {
            let mut jitter = |scale: f64| rng.gen_range(-1.0..1.0) * scale * amount;
            let x = kp.x + jitter(stride / 2.0);
            let y = kp.y + jitter(stride / 2.0);
            let a11 = kp.a11 * (1.0 + jitter(0.5));
            let a21 = jitter(radius / 2.0);
            let a22 = kp.a22 * (1.0 + jitter(0.5));
            let ori = (jitter(TAU)).rem_euclid(TAU);
            Keypoint::new(x, y, a11, a21, a22, ori)
        })
        .collect()
}

/// `(i, i)` for `i in 0..n`.
pub fn identity_matches(n: usize) -> Vec<FeatureMatch> {
    (0..n).map(|i| FeatureMatch::new(i, i)).collect()
}

/// Random correspondences between `n1` and `n2` keypoints.
pub fn random_matches(seed: u64, n1: usize, n2: usize, count: usize) -> Vec<FeatureMatch> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| FeatureMatch::new(rng.gen_range(0..n1), rng.gen_range(0..n2)))
        .collect()
}
