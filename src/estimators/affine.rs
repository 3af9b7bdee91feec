//! Local affine hypotheses.
//!
//! A single correspondence `(kp1, kp2)` fixes the affine map that carries
//! keypoint 1's frame onto keypoint 2's frame exactly:
//! `A = invVR2 * inv(invVR1)`. Unit patch coordinates go through `invVR1`
//! into image 1, and `A` then maps them to where `invVR2` puts them in
//! image 2.

use nalgebra::{DMatrix, DVector};

use super::{normalize_points, row_weights, RANK_TOLERANCE};
use crate::core::Estimator;
use crate::matches::MatchData;
use crate::models::AffineHypothesis;
use crate::types::{Mat3, Pt2};

/// Frames with `|det| / |M|_F^2` below this are treated as degenerate.
///
/// The ratio is scale free and at most `1/2` (reached by a similarity), so
/// tiny but well-shaped frames pass while near-flat ellipses do not.
pub const MIN_FRAME_CONDITION: f64 = 1e-12;

/// Affine estimator: one correspondence for a hypothesis, three or more for a
/// least-squares fit of the centres.
#[derive(Debug, Clone, Copy, Default)]
pub struct AffineEstimator;

impl AffineEstimator {
    pub fn new() -> Self {
        Self
    }

    /// Affine map taking the frame `inv_vr1` onto `inv_vr2`.
    pub fn from_frames(inv_vr1: &Mat3, inv_vr2: &Mat3) -> Option<AffineHypothesis> {
        let lin1 = inv_vr1.fixed_view::<2, 2>(0, 0);
        let det1 = lin1.determinant();
        let norm_sqrd = lin1.norm_squared();
        if !det1.is_finite() || !(norm_sqrd > 0.0) || det1.abs() < MIN_FRAME_CONDITION * norm_sqrd
        {
            return None;
        }
        let v1 = inv_vr1.try_inverse()?;
        let a = inv_vr2 * v1;
        a.iter()
            .all(|v| v.is_finite())
            .then(|| AffineHypothesis::new(a))
    }

    /// Weighted least-squares affine fit of `pts1 -> pts2`.
    pub fn fit_points(pts1: &[Pt2], pts2: &[Pt2], weights: &[f64]) -> Option<AffineHypothesis> {
        let n = pts1.len();
        if n < 3 || pts2.len() != n || weights.len() != n {
            return None;
        }
        let (n1, t1, _) = normalize_points(pts1)?;
        let (n2, _, t2_inv) = normalize_points(pts2)?;

        // Unknowns: [a b c d e f] with x' = a x + b y + c, y' = d x + e y + f.
        let mut a = DMatrix::<f64>::zeros(2 * n, 6);
        let mut b = DVector::<f64>::zeros(2 * n);
        for (i, ((p, q), w)) in n1.iter().zip(&n2).zip(weights).enumerate() {
            let (r0, r1) = (2 * i, 2 * i + 1);
            a[(r0, 0)] = w * p.x;
            a[(r0, 1)] = w * p.y;
            a[(r0, 2)] = *w;
            a[(r1, 3)] = w * p.x;
            a[(r1, 4)] = w * p.y;
            a[(r1, 5)] = *w;
            b[r0] = w * q.x;
            b[r1] = w * q.y;
        }

        let svd = a.svd(true, true);
        let max_sv = svd.singular_values.max();
        let min_sv = svd.singular_values.min();
        if !(max_sv > 0.0) || min_sv <= RANK_TOLERANCE * max_sv {
            return None;
        }
        let x = svd.solve(&b, RANK_TOLERANCE * max_sv).ok()?;

        let an = Mat3::new(x[0], x[1], x[2], x[3], x[4], x[5], 0.0, 0.0, 1.0);
        let full = t2_inv * an * t1;
        full.iter()
            .all(|v| v.is_finite())
            .then(|| AffineHypothesis::new(full))
    }
}

impl Estimator for AffineEstimator {
    type Model = AffineHypothesis;

    fn sample_size(&self) -> usize {
        1
    }

    fn estimate_model(&self, data: &MatchData<'_>, sample: &[usize]) -> Option<AffineHypothesis> {
        match sample {
            [k] => {
                let (kp1, kp2) = data.pair(*k);
                Self::from_frames(&kp1.inv_vr3(), &kp2.inv_vr3())
            }
            _ => self.estimate_model_nonminimal(data, sample, None),
        }
    }

    fn estimate_model_nonminimal(
        &self,
        data: &MatchData<'_>,
        sample: &[usize],
        weights: Option<&[f64]>,
    ) -> Option<AffineHypothesis> {
        let pts1: Vec<Pt2> = sample.iter().map(|&i| data.pair(i).0.xy()).collect();
        let pts2: Vec<Pt2> = sample.iter().map(|&i| data.pair(i).1.xy()).collect();
        Self::fit_points(&pts1, &pts2, &row_weights(sample, weights))
    }
}
