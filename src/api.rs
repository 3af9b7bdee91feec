//! Entry points for spatial verification.
//!
//! [`spatially_verify`] runs the whole chain: one affine hypothesis per
//! correspondence, conjunctive error thresholds, best-hypothesis selection and
//! refinement into a homography. [`affine_hypothesis_errors`] exposes the
//! hypothesis stage on its own.

use tracing::{debug, warn};

use crate::core::HypothesisSearch;
use crate::error::SverError;
use crate::estimators::AffineEstimator;
use crate::keypoint::Keypoint;
use crate::matches::{validate_weights, FeatureMatch, MatchData};
use crate::models::AffineHypothesis;
use crate::refine::{refine_homography, RefineParams, Refinement, TransformKind};
use crate::scoring::{select_best_hypothesis, AffineErrorScoring, ErrorTriple};
use crate::settings::SverSettings;
use crate::types::Mat3;

/// Every affine hypothesis with its errors and inlier mask.
///
/// Hypothesis `k` comes from correspondence `k`; row `k` of `errors` and
/// `inlier_masks` holds one entry per correspondence.
#[derive(Debug, Clone)]
pub struct AffineHypotheses {
    pub inlier_masks: Vec<Vec<bool>>,
    pub errors: Vec<Vec<ErrorTriple>>,
    /// `None` for correspondences whose frame is numerically singular.
    pub hypotheses: Vec<Option<Mat3>>,
}

impl AffineHypotheses {
    pub fn len(&self) -> usize {
        self.hypotheses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hypotheses.is_empty()
    }

    pub fn inlier_counts(&self) -> Vec<usize> {
        self.inlier_masks
            .iter()
            .map(|m| m.iter().filter(|&&f| f).count())
            .collect()
    }
}

/// Outcome of a successful verification.
#[derive(Debug, Clone)]
pub struct VerificationResult {
    /// Correspondence indices consistent with `h`, ascending.
    pub homog_inliers: Vec<usize>,
    /// Squared reprojection error of each entry of `homog_inliers`.
    pub homog_errors: Vec<f64>,
    pub h: Mat3,
    pub kind: TransformKind,
    /// Correspondence that generated the winning affine hypothesis.
    pub best_index: usize,
    pub aff_inliers: Vec<usize>,
    /// Errors of each entry of `aff_inliers` under the winning hypothesis.
    pub aff_errors: Vec<ErrorTriple>,
    pub aff: Mat3,
}

impl VerificationResult {
    pub fn num_inliers(&self) -> usize {
        self.homog_inliers.len()
    }
}

/// Score every single-correspondence affine hypothesis against every
/// correspondence.
pub fn affine_hypothesis_errors(
    kpts1: &[Keypoint],
    kpts2: &[Keypoint],
    matches: &[FeatureMatch],
    xy_thresh_sqrd: f64,
    scale_thresh_sqrd: f64,
    ori_thresh: f64,
) -> Result<AffineHypotheses, SverError> {
    let data = MatchData::new(kpts1, kpts2, matches)?;
    let scoring = AffineErrorScoring::new(xy_thresh_sqrd, scale_thresh_sqrd, ori_thresh);
    Ok(score_hypotheses(&data, &scoring, None))
}

/// [`affine_hypothesis_errors`] over validated data, with an explicit
/// orientation policy and an optional cap on the number of hypotheses.
pub fn score_hypotheses(
    data: &MatchData<'_>,
    scoring: &AffineErrorScoring,
    max_hypotheses: Option<usize>,
) -> AffineHypotheses {
    let search = HypothesisSearch::new(AffineEstimator::new(), *scoring)
        .with_max_hypotheses(max_hypotheses);
    let scored = search.run(data);

    let mut out = AffineHypotheses {
        inlier_masks: Vec::with_capacity(scored.len()),
        errors: Vec::with_capacity(scored.len()),
        hypotheses: Vec::with_capacity(scored.len()),
    };
    for hyp in scored {
        out.hypotheses.push(hyp.model.map(|m| m.a));
        out.errors.push(hyp.residuals);
        out.inlier_masks.push(hyp.inlier_mask);
    }
    out
}

/// Verify `matches` between two keypoint sets.
///
/// `dlen_sqrd2` is the squared diagonal extent of image 2 (see
/// [`diag_extent_sqrd`](crate::keypoint::diag_extent_sqrd)); the positional
/// threshold is `settings.xy_thresh * dlen_sqrd2`.
///
/// Returns `Ok(None)` when there is nothing to verify: no correspondences, or
/// no hypothesis with an inlier. Malformed input is an error.
pub fn spatially_verify(
    kpts1: &[Keypoint],
    kpts2: &[Keypoint],
    matches: &[FeatureMatch],
    dlen_sqrd2: f64,
    weights: Option<&[f64]>,
    settings: &SverSettings,
) -> Result<Option<VerificationResult>, SverError> {
    settings.validate()?;
    if !dlen_sqrd2.is_finite() || dlen_sqrd2 < 0.0 {
        return Err(SverError::InvalidThreshold {
            name: "dlen_sqrd2",
            value: dlen_sqrd2,
        });
    }
    let data = MatchData::new(kpts1, kpts2, matches)?;
    if let Some(w) = weights {
        validate_weights(w, data.len())?;
    }
    if data.is_empty() {
        debug!("no correspondences to verify");
        return Ok(None);
    }

    let xy_thresh_sqrd = settings.xy_thresh_sqrd(dlen_sqrd2);
    let scoring = AffineErrorScoring::new(
        xy_thresh_sqrd,
        settings.scale_thresh_sqrd(),
        settings.ori_thresh,
    )
    .with_policy(settings.orientation_policy);

    let hyps = score_hypotheses(&data, &scoring, settings.max_hypotheses);
    let best = match select_best_hypothesis(&hyps.inlier_masks, weights) {
        Ok(best) => best,
        Err(SverError::NoInliers) => {
            debug!(hypotheses = hyps.len(), "no hypothesis has an inlier");
            return Ok(None);
        }
        Err(e) => return Err(e),
    };
    // A hypothesis with inliers always has a model.
    let Some(aff) = hyps.hypotheses[best.index] else {
        return Ok(None);
    };
    let aff_errors: Vec<ErrorTriple> = best
        .inliers
        .iter()
        .map(|&i| hyps.errors[best.index][i])
        .collect();
    debug!(
        matches = data.len(),
        hypotheses = hyps.len(),
        best = best.index,
        aff_inliers = best.inliers.len(),
        "selected affine hypothesis"
    );

    let params = RefineParams {
        xy_thresh_sqrd,
        min_inliers: settings.min_inliers,
        method: settings.refine_method,
        iterations: settings.refine_iterations,
    };
    let fallback = AffineHypothesis::new(aff);
    let result = match refine_homography(&data, &best.inliers, &fallback, &params)? {
        Refinement::Refined(r) => {
            debug!(homog_inliers = r.inliers.len(), kind = ?r.kind, "refined transform");
            VerificationResult {
                homog_inliers: r.inliers,
                homog_errors: r.errors,
                h: r.h,
                kind: r.kind,
                best_index: best.index,
                aff_inliers: best.inliers,
                aff_errors,
                aff,
            }
        }
        Refinement::Degenerate { fallback } => {
            warn!(
                aff_inliers = best.inliers.len(),
                min_inliers = settings.min_inliers,
                "refinement degenerate, keeping the affine hypothesis"
            );
            VerificationResult {
                homog_inliers: best.inliers.clone(),
                homog_errors: aff_errors.iter().map(|e| e.xy).collect(),
                h: fallback,
                kind: TransformKind::AffineFallback,
                best_index: best.index,
                aff_inliers: best.inliers,
                aff_errors,
                aff,
            }
        }
    };
    Ok(Some(result))
}
