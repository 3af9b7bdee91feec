//! Configuration for verification and matching.
//!
//! Both settings structs deserialize with `#[serde(default)]`, so a partial
//! document only overrides the fields it names. Thresholds are given in
//! user units and converted to the squared units the scorers compare against
//! by [`SverSettings::xy_thresh_sqrd`] and [`SverSettings::scale_thresh_sqrd`].

use serde::{Deserialize, Serialize};

use crate::error::SverError;
use crate::scoring::OrientationPolicy;
use crate::types::TAU;

/// Transform fitted to the affine inliers during refinement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefineMethod {
    /// Normalized DLT homography; three inliers fall back to an affine fit.
    #[default]
    Homography,
    /// Least-squares affine fit.
    Affine,
}

/// Which neighbour serves as the ratio-test denominator during spatially
/// constrained matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalizerMode {
    /// The first later neighbour outside the spatial window.
    #[default]
    Far,
    /// The first later neighbour inside the spatial window.
    Nearby,
    /// The next neighbour, wherever it is.
    Plus,
}

impl NormalizerMode {
    /// Inclusive bounds on the normalized reprojection error of the
    /// normalizer column.
    pub fn bounds(&self, match_xy_thresh: f64) -> (f64, f64) {
        match self {
            NormalizerMode::Far => (match_xy_thresh, f64::INFINITY),
            NormalizerMode::Nearby => (0.0, match_xy_thresh),
            NormalizerMode::Plus => (0.0, f64::INFINITY),
        }
    }
}

/// Nearest neighbour backend named in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexKind {
    #[default]
    BruteForce,
    /// Requires the `usearch` feature.
    Usearch,
}

/// Spatial verification thresholds and refinement options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SverSettings {
    /// Positional threshold as a fraction of the squared diagonal extent.
    pub xy_thresh: f64,
    /// Maximum ratio of scales between a mapped keypoint and its match.
    pub scale_thresh: f64,
    /// Maximum orientation difference in radians.
    pub ori_thresh: f64,
    /// Fewest affine inliers a refit is attempted on.
    pub min_inliers: usize,
    pub orientation_policy: OrientationPolicy,
    pub refine_method: RefineMethod,
    /// Number of refit-and-rescore rounds; at least one.
    pub refine_iterations: usize,
    /// Only the first N correspondences seed hypotheses when set.
    pub max_hypotheses: Option<usize>,
}

impl Default for SverSettings {
    fn default() -> Self {
        Self {
            xy_thresh: 0.01,
            scale_thresh: 2.0,
            ori_thresh: TAU / 4.0,
            min_inliers: 3,
            orientation_policy: OrientationPolicy::Oriented,
            refine_method: RefineMethod::Homography,
            refine_iterations: 1,
            max_hypotheses: None,
        }
    }
}

impl SverSettings {
    pub fn xy_thresh_sqrd(&self, dlen_sqrd2: f64) -> f64 {
        self.xy_thresh * dlen_sqrd2
    }

    pub fn scale_thresh_sqrd(&self) -> f64 {
        self.scale_thresh * self.scale_thresh
    }

    pub fn validate(&self) -> Result<(), SverError> {
        positive("xy_thresh", self.xy_thresh)?;
        positive("scale_thresh", self.scale_thresh)?;
        positive("ori_thresh", self.ori_thresh)?;
        if self.min_inliers == 0 {
            return Err(SverError::InvalidThreshold {
                name: "min_inliers",
                value: 0.0,
            });
        }
        if self.refine_iterations == 0 {
            return Err(SverError::InvalidThreshold {
                name: "refine_iterations",
                value: 0.0,
            });
        }
        if self.max_hypotheses == Some(0) {
            return Err(SverError::InvalidThreshold {
                name: "max_hypotheses",
                value: 0.0,
            });
        }
        Ok(())
    }
}

/// Two-pass matching configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingSettings {
    /// Ratio-test threshold of the first pass.
    pub ratio_thresh: f64,
    /// Verification `xy_thresh` of the first pass.
    pub sver_xy_thresh: f64,
    /// Neighbours retrieved per query in the constrained pass.
    pub search_k: usize,
    /// Ratio-test threshold of the constrained pass.
    pub ratio_thresh2: f64,
    /// Verification `xy_thresh` of the constrained pass.
    pub sver_xy_thresh2: f64,
    pub normalizer_mode: NormalizerMode,
    /// Spatial window of the constrained pass, as a fraction of the
    /// diagonal extent of image 2.
    pub match_xy_thresh: f64,
    /// Squared descriptor distance used to normalize raw distances.
    pub pseudo_max_dist_sqrd: f64,
    pub index: IndexKind,
    /// Capacity of the per-matcher index cache.
    pub index_cache_size: usize,
    pub sver: SverSettings,
}

impl Default for MatchingSettings {
    fn default() -> Self {
        Self {
            ratio_thresh: 0.625,
            sver_xy_thresh: 0.01,
            search_k: 7,
            ratio_thresh2: 0.8,
            sver_xy_thresh2: 0.01,
            normalizer_mode: NormalizerMode::Far,
            match_xy_thresh: 0.1,
            // SIFT descriptors are 128 bytes with unit norm scaled to 512.
            pseudo_max_dist_sqrd: 2.0 * 512.0 * 512.0,
            index: IndexKind::BruteForce,
            index_cache_size: 4,
            sver: SverSettings::default(),
        }
    }
}

impl MatchingSettings {
    pub fn validate(&self) -> Result<(), SverError> {
        positive("ratio_thresh", self.ratio_thresh)?;
        positive("sver_xy_thresh", self.sver_xy_thresh)?;
        positive("ratio_thresh2", self.ratio_thresh2)?;
        positive("sver_xy_thresh2", self.sver_xy_thresh2)?;
        positive("match_xy_thresh", self.match_xy_thresh)?;
        positive("pseudo_max_dist_sqrd", self.pseudo_max_dist_sqrd)?;
        if self.search_k < 2 {
            return Err(SverError::InvalidThreshold {
                name: "search_k",
                value: self.search_k as f64,
            });
        }
        self.sver.validate()
    }

    /// Verification settings of the first pass.
    pub fn first_pass_sver(&self) -> SverSettings {
        SverSettings {
            xy_thresh: self.sver_xy_thresh,
            ..self.sver.clone()
        }
    }

    /// Verification settings of the constrained pass.
    pub fn second_pass_sver(&self) -> SverSettings {
        SverSettings {
            xy_thresh: self.sver_xy_thresh2,
            ..self.sver.clone()
        }
    }
}

fn positive(name: &'static str, value: f64) -> Result<(), SverError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(SverError::InvalidThreshold { name, value })
    }
}
