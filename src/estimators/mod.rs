//! Estimators for the transforms used during verification.
//!
//! - [`AffineEstimator`]: the local affine map implied by one correspondence,
//!   and a least-squares affine fit over many.
//! - [`HomographyEstimator`]: normalized DLT over four or more correspondences.

pub mod affine;
pub mod homography;

pub use affine::AffineEstimator;
pub use homography::HomographyEstimator;

use crate::types::{Mat3, Pt2};

/// Hartley normalization: translate the centroid to the origin and scale so
/// the mean distance from it is `sqrt(2)`.
///
/// Returns the normalized points together with the normalizing transform and
/// its inverse. `None` when all points coincide.
pub(crate) fn normalize_points(points: &[Pt2]) -> Option<(Vec<Pt2>, Mat3, Mat3)> {
    if points.is_empty() {
        return None;
    }
    let n = points.len() as f64;
    let cx = points.iter().map(|p| p.x).sum::<f64>() / n;
    let cy = points.iter().map(|p| p.y).sum::<f64>() / n;
    let mean_dist = points
        .iter()
        .map(|p| ((p.x - cx).powi(2) + (p.y - cy).powi(2)).sqrt())
        .sum::<f64>()
        / n;
    if !mean_dist.is_finite() || mean_dist <= f64::EPSILON {
        return None;
    }
    let s = std::f64::consts::SQRT_2 / mean_dist;
    let t = Mat3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0);
    let t_inv = Mat3::new(1.0 / s, 0.0, cx, 0.0, 1.0 / s, cy, 0.0, 0.0, 1.0);
    let normalized = points
        .iter()
        .map(|p| Pt2::new(s * (p.x - cx), s * (p.y - cy)))
        .collect();
    Some((normalized, t, t_inv))
}

/// Square roots of the per-sample weights, so that weighted least squares can
/// be solved by scaling rows.
pub(crate) fn row_weights(sample: &[usize], weights: Option<&[f64]>) -> Vec<f64> {
    match weights {
        Some(w) => sample.iter().map(|&i| w[i].max(0.0).sqrt()).collect(),
        None => vec![1.0; sample.len()],
    }
}

/// Ratio below which a singular value counts as zero relative to the largest.
pub(crate) const RANK_TOLERANCE: f64 = 1e-10;
