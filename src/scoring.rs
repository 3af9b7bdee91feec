//! Error measures and inlier decisions for verification.
//!
//! Two scoring strategies plug into the generic [`Scoring`] trait:
//! - [`AffineErrorScoring`] compares a transformed keypoint with its match on
//!   position, scale and orientation, and requires all three to pass.
//! - [`PositionalScoring`] only compares centres; it is used after refinement
//!   where a projective map has no single scale or orientation.

use serde::{Deserialize, Serialize};

use crate::core::Scoring;
use crate::error::SverError;
use crate::keypoint::{invvr_ori, Keypoint};
use crate::matches::MatchData;
use crate::models::{AffineHypothesis, Homography};
use crate::types::{PI, TAU};

/// How orientation differences are folded before thresholding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrientationPolicy {
    /// Orientations are directed angles; the error lies in `[0, pi]`.
    #[default]
    Oriented,
    /// Ellipses without chirality: `theta` and `theta + pi` are the same
    /// orientation, so the error lies in `[0, pi / 2]`.
    HalfTurnSymmetric,
}

/// Smallest angle between two orientations under `policy`.
pub fn ori_distance(ori1: f64, ori2: f64, policy: OrientationPolicy) -> f64 {
    if !ori1.is_finite() || !ori2.is_finite() {
        return f64::INFINITY;
    }
    let d = (ori1 - ori2).abs().rem_euclid(TAU);
    let d = d.min(TAU - d);
    match policy {
        OrientationPolicy::Oriented => d,
        OrientationPolicy::HalfTurnSymmetric => d.min(PI - d),
    }
}

/// Symmetric ratio of two squared scales, always `>= 1` for valid input.
pub fn det_distance(det1: f64, det2: f64) -> f64 {
    if !(det1 > 0.0 && det2 > 0.0) {
        return f64::INFINITY;
    }
    let r = det1 / det2;
    let d = r.max(1.0 / r);
    if d.is_finite() {
        d
    } else {
        f64::INFINITY
    }
}

/// Position, scale and orientation error of one correspondence under one
/// affine hypothesis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ErrorTriple {
    /// Squared distance between the mapped centre and the target centre.
    pub xy: f64,
    /// Ratio of squared scales, see [`det_distance`].
    pub scale: f64,
    /// Angular difference in radians, see [`ori_distance`].
    pub ori: f64,
}

impl ErrorTriple {
    /// Recorded for every correspondence of a degenerate hypothesis.
    pub const DEGENERATE: ErrorTriple = ErrorTriple {
        xy: f64::INFINITY,
        scale: f64::INFINITY,
        ori: f64::INFINITY,
    };

    pub fn as_array(&self) -> [f64; 3] {
        [self.xy, self.scale, self.ori]
    }
}

/// Conjunctive threshold test on [`ErrorTriple`]s.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineErrorScoring {
    pub xy_thresh_sqrd: f64,
    pub scale_thresh_sqrd: f64,
    pub ori_thresh: f64,
    pub policy: OrientationPolicy,
}

impl AffineErrorScoring {
    pub fn new(xy_thresh_sqrd: f64, scale_thresh_sqrd: f64, ori_thresh: f64) -> Self {
        Self {
            xy_thresh_sqrd,
            scale_thresh_sqrd,
            ori_thresh,
            policy: OrientationPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: OrientationPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Map `kp1` through `hyp` and measure it against `kp2`.
    pub fn errors(&self, hyp: &AffineHypothesis, kp1: &Keypoint, kp2: &Keypoint) -> ErrorTriple {
        let mapped = hyp.a * kp1.inv_vr3();
        if mapped.iter().any(|v| !v.is_finite()) {
            return ErrorTriple::DEGENERATE;
        }
        let lin = mapped.fixed_view::<2, 2>(0, 0).into_owned();

        let dx = mapped[(0, 2)] - kp2.x;
        let dy = mapped[(1, 2)] - kp2.y;
        ErrorTriple {
            xy: dx * dx + dy * dy,
            scale: det_distance(lin.determinant(), kp2.sqrd_scale()),
            ori: ori_distance(invvr_ori(&lin), kp2.ori, self.policy),
        }
    }

    pub fn accepts(&self, err: &ErrorTriple) -> bool {
        err.xy < self.xy_thresh_sqrd
            && err.scale < self.scale_thresh_sqrd
            && err.ori < self.ori_thresh
    }
}

impl Scoring<AffineHypothesis> for AffineErrorScoring {
    type Residual = ErrorTriple;

    fn residual(&self, data: &MatchData<'_>, model: &AffineHypothesis, index: usize) -> ErrorTriple {
        let (kp1, kp2) = data.pair(index);
        self.errors(model, kp1, kp2)
    }

    fn is_inlier(&self, residual: &ErrorTriple) -> bool {
        self.accepts(residual)
    }

    fn degenerate_residual(&self) -> ErrorTriple {
        ErrorTriple::DEGENERATE
    }
}

/// Squared reprojection distance of keypoint centres under a homography.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionalScoring {
    pub xy_thresh_sqrd: f64,
}

impl PositionalScoring {
    pub fn new(xy_thresh_sqrd: f64) -> Self {
        Self { xy_thresh_sqrd }
    }
}

impl Scoring<Homography> for PositionalScoring {
    type Residual = f64;

    fn residual(&self, data: &MatchData<'_>, model: &Homography, index: usize) -> f64 {
        let (kp1, kp2) = data.pair(index);
        match model.project(&kp1.xy()) {
            Some(p) => (p - kp2.xy()).norm_squared(),
            None => f64::INFINITY,
        }
    }

    fn is_inlier(&self, residual: &f64) -> bool {
        *residual < self.xy_thresh_sqrd
    }

    fn degenerate_residual(&self) -> f64 {
        f64::INFINITY
    }
}

/// Winner of [`select_best_hypothesis`].
#[derive(Debug, Clone, PartialEq)]
pub struct BestHypothesis {
    pub index: usize,
    /// Inlier correspondence indices of the winner, ascending.
    pub inliers: Vec<usize>,
    /// Inlier count, or summed inlier weight when weights were given.
    pub score: f64,
}

/// Pick the hypothesis with the most inliers.
///
/// With `weights`, the summed weight of the inliers is maximized instead.
/// Ties go to the lowest index. Hypotheses without inliers are never chosen.
pub fn select_best_hypothesis(
    inlier_masks: &[Vec<bool>],
    weights: Option<&[f64]>,
) -> Result<BestHypothesis, SverError> {
    if inlier_masks.is_empty() {
        return Err(SverError::NoHypotheses);
    }
    if let Some(w) = weights {
        for mask in inlier_masks {
            if mask.len() != w.len() {
                return Err(SverError::LengthMismatch {
                    what: "match weights",
                    expected: mask.len(),
                    got: w.len(),
                });
            }
        }
    }

    let mut best: Option<(usize, f64)> = None;
    for (index, mask) in inlier_masks.iter().enumerate() {
        if !mask.iter().any(|&f| f) {
            continue;
        }
        let score = match weights {
            Some(w) => mask.iter().zip(w).filter(|(&f, _)| f).map(|(_, w)| *w).sum(),
            None => mask.iter().filter(|&&f| f).count() as f64,
        };
        // Strict comparison keeps the earliest of equal scores.
        if best.map_or(true, |(_, s)| score > s) {
            best = Some((index, score));
        }
    }

    let (index, score) = best.ok_or(SverError::NoInliers)?;
    Ok(BestHypothesis {
        index,
        inliers: crate::core::mask_to_indices(&inlier_masks[index]),
        score,
    })
}
