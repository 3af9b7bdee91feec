use nalgebra::{DMatrix, SVD};

use super::{normalize_points, row_weights, RANK_TOLERANCE};
use crate::core::Estimator;
use crate::matches::MatchData;
use crate::models::Homography;
use crate::types::{Mat3, Pt2};

/// Homography estimator using the normalized Direct Linear Transform.
#[derive(Debug, Clone, Copy, Default)]
pub struct HomographyEstimator;

impl HomographyEstimator {
    pub fn new() -> Self {
        Self
    }

    /// Weighted DLT fit of `pts1 -> pts2`.
    ///
    /// Both point sets are Hartley-normalized first; each pair contributes two
    /// rows scaled by `weights[i]` (already square-rooted). `None` when the
    /// system does not pin down a unique solution, e.g. collinear points.
    pub fn fit_points(pts1: &[Pt2], pts2: &[Pt2], weights: &[f64]) -> Option<Homography> {
        let n = pts1.len();
        if n < 4 || pts2.len() != n || weights.len() != n {
            return None;
        }
        let (n1, t1, _) = normalize_points(pts1)?;
        let (n2, _, t2_inv) = normalize_points(pts2)?;

        // At least 9 rows so the SVD yields a full 9x9 V^T.
        let rows = (2 * n).max(9);
        let mut a = DMatrix::<f64>::zeros(rows, 9);
        for (i, ((p, q), &w)) in n1.iter().zip(&n2).zip(weights).enumerate() {
            let (x1, y1, x2, y2) = (p.x, p.y, q.x, q.y);

            a[(2 * i, 0)] = -x1 * w;
            a[(2 * i, 1)] = -y1 * w;
            a[(2 * i, 2)] = -w;
            a[(2 * i, 6)] = x2 * x1 * w;
            a[(2 * i, 7)] = x2 * y1 * w;
            a[(2 * i, 8)] = x2 * w;

            a[(2 * i + 1, 3)] = -x1 * w;
            a[(2 * i + 1, 4)] = -y1 * w;
            a[(2 * i + 1, 5)] = -w;
            a[(2 * i + 1, 6)] = y2 * x1 * w;
            a[(2 * i + 1, 7)] = y2 * y1 * w;
            a[(2 * i + 1, 8)] = y2 * w;
        }

        let svd = SVD::new(a, false, true);
        let vt = svd.v_t?;
        let sv = &svd.singular_values;

        let mut order: Vec<usize> = (0..sv.len()).collect();
        order.sort_by(|&i, &j| sv[i].total_cmp(&sv[j]));
        let max_sv = sv[order[order.len() - 1]];
        if !(max_sv > 0.0) || sv[order[1]] <= RANK_TOLERANCE * max_sv {
            return None;
        }

        let null = vt.row(order[0]);
        let hn = Mat3::from_fn(|r, c| null[3 * r + c]);
        let h = t2_inv * hn * t1;
        if h[(2, 2)].abs() <= f64::EPSILON * h.norm() || h.iter().any(|v| !v.is_finite()) {
            return None;
        }
        Some(Homography::new(h).normalized())
    }
}

impl Estimator for HomographyEstimator {
    type Model = Homography;

    fn sample_size(&self) -> usize {
        4
    }

    fn estimate_model(&self, data: &MatchData<'_>, sample: &[usize]) -> Option<Homography> {
        self.estimate_model_nonminimal(data, sample, None)
    }

    fn estimate_model_nonminimal(
        &self,
        data: &MatchData<'_>,
        sample: &[usize],
        weights: Option<&[f64]>,
    ) -> Option<Homography> {
        let pts1: Vec<Pt2> = sample.iter().map(|&i| data.pair(i).0.xy()).collect();
        let pts2: Vec<Pt2> = sample.iter().map(|&i| data.pair(i).1.xy()).collect();
        Self::fit_points(&pts1, &pts2, &row_weights(sample, weights))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn square() -> Vec<Pt2> {
        vec![
            Pt2::new(0.0, 0.0),
            Pt2::new(1.0, 0.0),
            Pt2::new(0.0, 1.0),
            Pt2::new(1.0, 1.0),
        ]
    }

    #[test]
    fn homography_estimator_recovers_simple_translation() {
        let (tx, ty) = (1.0, 2.0);
        let pts1 = square();
        let pts2: Vec<Pt2> = pts1.iter().map(|p| Pt2::new(p.x + tx, p.y + ty)).collect();

        let h = HomographyEstimator::fit_points(&pts1, &pts2, &[1.0; 4]).unwrap();
        let expected = Mat3::new(1.0, 0.0, tx, 0.0, 1.0, ty, 0.0, 0.0, 1.0);
        assert_abs_diff_eq!((h.h - expected).norm(), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn recovers_projective_map_from_many_points() {
        let truth = Mat3::new(1.1, 0.05, 12.0, -0.08, 0.95, -4.0, 1e-4, -2e-4, 1.0);
        let pts1: Vec<Pt2> = (0..5)
            .flat_map(|i| (0..4).map(move |j| Pt2::new(40.0 * i as f64, 30.0 * j as f64)))
            .collect();
        let truth_h = Homography::new(truth);
        let pts2: Vec<Pt2> = pts1.iter().map(|p| truth_h.project(p).unwrap()).collect();

        let h = HomographyEstimator::fit_points(&pts1, &pts2, &vec![1.0; pts1.len()]).unwrap();
        for (p, q) in pts1.iter().zip(&pts2) {
            let r = h.project(p).unwrap();
            assert_abs_diff_eq!((r - q).norm(), 0.0, epsilon = 1e-6);
        }
        assert_abs_diff_eq!(h.h[(2, 2)], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn zero_weight_ignores_outlier() {
        let mut pts1 = square();
        pts1.push(Pt2::new(0.5, 0.5));
        let mut pts2 = pts1.clone();
        pts2[4] = Pt2::new(9.0, -3.0);
        let weights = [1.0, 1.0, 1.0, 1.0, 0.0];

        let h = HomographyEstimator::fit_points(&pts1, &pts2, &weights).unwrap();
        assert_abs_diff_eq!((h.h - Mat3::identity()).norm(), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn collinear_points_are_degenerate() {
        let pts: Vec<Pt2> = (0..5).map(|i| Pt2::new(i as f64, 2.0 * i as f64)).collect();
        assert!(HomographyEstimator::fit_points(&pts, &pts, &[1.0; 5]).is_none());
    }

    #[test]
    fn too_few_points_are_rejected() {
        let pts = &square()[..3];
        assert!(HomographyEstimator::fit_points(pts, pts, &[1.0; 3]).is_none());
    }
}
