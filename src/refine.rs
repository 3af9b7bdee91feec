//! Refinement of the best affine hypothesis into a global transform.
//!
//! The affine inliers are refit with [`HomographyEstimator`] (four or more
//! points) or [`AffineEstimator`] (three or more), then every correspondence
//! is re-scored on position alone. With `iterations > 1` the fit is repeated
//! on its own inliers until the set stops changing.

use tracing::{debug, trace};

use crate::core::{Estimator, LocalOptimizer, Scoring};
use crate::estimators::{AffineEstimator, HomographyEstimator};
use crate::error::SverError;
use crate::matches::{validate_weights, MatchData};
use crate::models::{AffineHypothesis, Homography};
use crate::scoring::PositionalScoring;
use crate::settings::RefineMethod;
use crate::types::Mat3;

/// Fewest points a least-squares affine fit is attempted on.
const MIN_AFFINE_FIT: usize = 3;

/// Which model produced a [`RefinedTransform`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformKind {
    Homography,
    Affine,
    /// Refinement was degenerate; the best affine hypothesis is reported.
    AffineFallback,
}

/// Parameters of [`refine_homography`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RefineParams {
    pub xy_thresh_sqrd: f64,
    pub min_inliers: usize,
    pub method: RefineMethod,
    pub iterations: usize,
}

impl RefineParams {
    pub fn new(xy_thresh_sqrd: f64) -> Self {
        Self {
            xy_thresh_sqrd,
            min_inliers: 3,
            method: RefineMethod::Homography,
            iterations: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RefinedTransform {
    /// Correspondence indices, ascending.
    pub inliers: Vec<usize>,
    /// Squared reprojection error of each inlier, aligned with `inliers`.
    pub errors: Vec<f64>,
    pub h: Mat3,
    pub kind: TransformKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Refinement {
    Refined(RefinedTransform),
    /// Too few inliers or a rank-deficient fit.
    Degenerate { fallback: Mat3 },
}

impl Refinement {
    pub fn refined(&self) -> Option<&RefinedTransform> {
        match self {
            Refinement::Refined(r) => Some(r),
            Refinement::Degenerate { .. } => None,
        }
    }

    pub fn is_degenerate(&self) -> bool {
        matches!(self, Refinement::Degenerate { .. })
    }
}

/// Refit-and-rescore loop over a homography or affine estimator.
#[derive(Debug, Clone)]
pub struct IteratedRefit {
    pub method: RefineMethod,
    pub min_inliers: usize,
    pub max_iterations: usize,
    pub scoring: PositionalScoring,
}

impl IteratedRefit {
    pub fn new(params: &RefineParams) -> Self {
        Self {
            method: params.method,
            min_inliers: params.min_inliers,
            max_iterations: params.iterations.max(1),
            scoring: PositionalScoring::new(params.xy_thresh_sqrd),
        }
    }

    /// Kind of model a fit over `n` points produces, if any.
    fn kind_for(&self, n: usize) -> Option<TransformKind> {
        if n < self.min_inliers || n < MIN_AFFINE_FIT {
            return None;
        }
        match self.method {
            RefineMethod::Homography if n >= HomographyEstimator.sample_size() => {
                Some(TransformKind::Homography)
            }
            _ => Some(TransformKind::Affine),
        }
    }

    fn fit(
        &self,
        data: &MatchData<'_>,
        sample: &[usize],
        weights: Option<&[f64]>,
    ) -> Option<(Homography, TransformKind)> {
        let kind = self.kind_for(sample.len())?;
        let model = match kind {
            TransformKind::Homography => {
                HomographyEstimator.estimate_model_nonminimal(data, sample, weights)?
            }
            _ => AffineEstimator
                .estimate_model_nonminimal(data, sample, weights)
                .map(Homography::from)?,
        };
        Some((model, kind))
    }

    fn run_with_kind(
        &self,
        data: &MatchData<'_>,
        inliers: &[usize],
        weights: Option<&[f64]>,
    ) -> Option<(Homography, TransformKind, Vec<usize>)> {
        if weights.is_some_and(|w| validate_weights(w, data.len()).is_err())
            || inliers.iter().any(|&i| i >= data.len())
        {
            return None;
        }
        let (mut model, mut kind) = self.fit(data, inliers, weights)?;
        let (_, mut current) = self.scoring.score_all(data, &model);

        for iteration in 1..self.max_iterations {
            let Some((next, next_kind)) = self.fit(data, &current, weights) else {
                break;
            };
            let (_, next_inliers) = self.scoring.score_all(data, &next);
            trace!(iteration, inliers = next_inliers.len(), "refit");
            let converged = next_inliers == current;
            model = next;
            kind = next_kind;
            current = next_inliers;
            if converged {
                break;
            }
        }
        Some((model, kind, current))
    }
}

impl LocalOptimizer<Homography> for IteratedRefit {
    fn run(
        &self,
        data: &MatchData<'_>,
        inliers: &[usize],
        weights: Option<&[f64]>,
    ) -> Option<(Homography, Vec<usize>)> {
        self.run_with_kind(data, inliers, weights)
            .map(|(model, _, inl)| (model, inl))
    }
}

/// Fit a global transform to `inliers` and re-score every correspondence
/// against it with the positional threshold only.
///
/// `fallback` is the best affine hypothesis, returned inside
/// [`Refinement::Degenerate`] when no fit is possible. The fit is unweighted;
/// match weights only take part in choosing the hypothesis.
///
/// Fails with [`SverError::InlierOutOfBounds`] when an inlier index does not
/// name a correspondence of `data`.
pub fn refine_homography(
    data: &MatchData<'_>,
    inliers: &[usize],
    fallback: &AffineHypothesis,
    params: &RefineParams,
) -> Result<Refinement, SverError> {
    if let Some(&index) = inliers.iter().find(|&&i| i >= data.len()) {
        return Err(SverError::InlierOutOfBounds {
            index,
            len: data.len(),
        });
    }
    let refit = IteratedRefit::new(params);
    let Some((model, kind, homog_inliers)) = refit.run_with_kind(data, inliers, None) else {
        debug!(
            inliers = inliers.len(),
            min_inliers = params.min_inliers,
            "refinement is degenerate"
        );
        return Ok(Refinement::Degenerate {
            fallback: fallback.a,
        });
    };

    let errors = homog_inliers
        .iter()
        .map(|&i| refit.scoring.residual(data, &model, i))
        .collect();
    Ok(Refinement::Refined(RefinedTransform {
        inliers: homog_inliers,
        errors,
        h: model.h,
        kind,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keypoint::{transform_keypoints, Keypoint};
    use crate::matches::FeatureMatch;
    use approx::assert_abs_diff_eq;

    fn grid(n: usize, step: f64) -> Vec<Keypoint> {
        (0..n * n)
            .map(|i| {
                let (r, c) = ((i / n) as f64, (i % n) as f64);
                Keypoint::new(10.0 + c * step, 10.0 + r * step, 3.0, 0.0, 3.0, 0.0)
            })
            .collect()
    }

    fn identity_matches(n: usize) -> Vec<FeatureMatch> {
        (0..n).map(|i| FeatureMatch::new(i, i)).collect()
    }

    fn refine(data: &MatchData<'_>, inliers: &[usize], params: &RefineParams) -> Refinement {
        let fallback = AffineHypothesis::new(Mat3::identity());
        refine_homography(data, inliers, &fallback, params).unwrap()
    }

    #[test]
    fn recovers_exact_homography() {
        let truth = Mat3::new(0.9, 0.1, 20.0, -0.05, 1.1, 5.0, 2e-4, 1e-4, 1.0);
        let kpts1 = grid(4, 20.0);
        let kpts2 = transform_keypoints(&kpts1, &truth);
        let fm = identity_matches(kpts1.len());
        let data = MatchData::new(&kpts1, &kpts2, &fm).unwrap();
        let all: Vec<usize> = (0..fm.len()).collect();

        let out = refine(&data, &all, &RefineParams::new(1.0));
        let r = out.refined().unwrap();
        assert_eq!(r.kind, TransformKind::Homography);
        assert_eq!(r.inliers, all);
        assert_eq!(r.errors.len(), r.inliers.len());
        assert_abs_diff_eq!((r.h - truth).norm(), 0.0, epsilon = 1e-6);
    }

    #[test]
    fn rescoring_can_add_and_drop_correspondences() {
        let kpts1 = grid(3, 10.0);
        let mut kpts2 = kpts1.clone();
        kpts2[8].x += 50.0;
        let fm = identity_matches(kpts1.len());
        let data = MatchData::new(&kpts1, &kpts2, &fm).unwrap();

        // Fit on a subset; the others join, the corrupt one stays out.
        let out = refine(&data, &[0, 1, 3, 5, 7], &RefineParams::new(1.0));
        let r = out.refined().unwrap();
        assert_eq!(r.inliers, vec![0, 1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn three_inliers_use_affine_fit() {
        let kpts1 = grid(2, 10.0);
        let kpts2 = kpts1.clone();
        let fm = identity_matches(3);
        let data = MatchData::new(&kpts1, &kpts2, &fm).unwrap();
        let out = refine(&data, &[0, 1, 2], &RefineParams::new(1.0));
        let r = out.refined().unwrap();
        assert_eq!(r.kind, TransformKind::Affine);
        assert_abs_diff_eq!((r.h - Mat3::identity()).norm(), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn too_few_inliers_fall_back_to_affine() {
        let kpts1 = grid(2, 10.0);
        let fm = identity_matches(4);
        let data = MatchData::new(&kpts1, &kpts1, &fm).unwrap();
        let aff = Mat3::new(1.0, 0.0, 2.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0);
        let params = RefineParams::new(1.0);
        let out = refine_homography(&data, &[0, 1], &AffineHypothesis::new(aff), &params).unwrap();
        assert_eq!(out, Refinement::Degenerate { fallback: aff });
    }

    #[test]
    fn collinear_inliers_are_degenerate() {
        let kpts1: Vec<Keypoint> = (0..5)
            .map(|i| Keypoint::new(i as f64 * 5.0, 0.0, 1.0, 0.0, 1.0, 0.0))
            .collect();
        let fm = identity_matches(5);
        let data = MatchData::new(&kpts1, &kpts1, &fm).unwrap();
        let out = refine(&data, &[0, 1, 2, 3, 4], &RefineParams::new(1.0));
        assert!(out.is_degenerate());
    }

    #[test]
    fn iterations_converge_on_a_stable_set() {
        let kpts1 = grid(3, 10.0);
        let mut kpts2 = kpts1.clone();
        kpts2[4].y += 0.5;
        let fm = identity_matches(kpts1.len());
        let data = MatchData::new(&kpts1, &kpts2, &fm).unwrap();
        let all: Vec<usize> = (0..9).collect();

        let params = RefineParams {
            iterations: 5,
            ..RefineParams::new(0.1)
        };
        let out = refine(&data, &all, &params);
        let r = out.refined().unwrap();
        assert_eq!(r.inliers, vec![0, 1, 2, 3, 5, 6, 7, 8]);
        assert_abs_diff_eq!((r.h - Mat3::identity()).norm(), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn out_of_range_inlier_is_an_error() {
        let kpts1 = grid(2, 10.0);
        let fm = identity_matches(4);
        let data = MatchData::new(&kpts1, &kpts1, &fm).unwrap();
        let fallback = AffineHypothesis::new(Mat3::identity());
        let out = refine_homography(&data, &[0, 1, 2, 9], &fallback, &RefineParams::new(1.0));
        assert!(matches!(
            out,
            Err(SverError::InlierOutOfBounds { index: 9, len: 4 })
        ));
    }

    #[test]
    fn refit_rejects_short_weights() {
        let kpts1 = grid(2, 10.0);
        let fm = identity_matches(4);
        let data = MatchData::new(&kpts1, &kpts1, &fm).unwrap();
        let refit = IteratedRefit::new(&RefineParams::new(1.0));
        assert!(refit.run(&data, &[0, 1, 2, 3], Some(&[1.0, 1.0][..])).is_none());
        assert!(refit.run(&data, &[0, 1, 2, 3], Some(&[1.0; 4][..])).is_some());
    }
}
