//! One-vs-one descriptor matching with spatial verification.
//!
//! Descriptors of image 2 query an index over image 1, so neighbour tables
//! are indexed by `fx2` and hold `fx1` candidates. Each stage of the matcher
//! produces a [`MatchStage`]:
//! - baseline: nearest neighbours (ORIG), ratio test (RAT), verification (SV);
//! - constrained: candidates reprojected through the baseline homography
//!   (SC), ratio test (SCR), verification (SCRSV).

use tracing::debug;

use crate::api::spatially_verify;
use crate::error::{Side, SverError};
use crate::keypoint::{project_point, Keypoint};
use crate::matches::FeatureMatch;
use crate::neighbors::{
    normalized_nearest_neighbors, Descriptors, IndexCache, IndexChoice, NeighborIndex, Neighbors,
};
use crate::settings::{MatchingSettings, SverSettings};
use crate::types::Mat3;

/// A match column and a normalizer column chosen for each kept `fx2`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Assignment {
    pub fm: Vec<FeatureMatch>,
    /// Image-1 feature whose distance normalizes the match distance.
    pub fx1_norm: Vec<usize>,
    pub match_dist: Vec<f64>,
    pub norm_dist: Vec<f64>,
}

impl Assignment {
    pub fn len(&self) -> usize {
        self.fm.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fm.is_empty()
    }

    /// `1 - match_dist / norm_dist` for every assignment.
    pub fn ratio_scores(&self) -> Vec<f64> {
        self.match_dist
            .iter()
            .zip(&self.norm_dist)
            .map(|(m, n)| 1.0 - m / n)
            .collect()
    }
}

/// Survivors of the ratio test.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RatioMatches {
    pub fm: Vec<FeatureMatch>,
    /// `1 - ratio`, in `(1 - ratio_thresh, 1]`.
    pub fs: Vec<f64>,
    /// `(fx1_norm, fx2)` of each kept match.
    pub fm_norm: Vec<FeatureMatch>,
}

/// Matches and scores of one pipeline stage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchStage {
    pub fm: Vec<FeatureMatch>,
    pub fs: Vec<f64>,
    /// Normalizer of each match, when the stage has one.
    pub fm_norm: Option<Vec<FeatureMatch>>,
}

impl MatchStage {
    pub fn len(&self) -> usize {
        self.fm.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fm.is_empty()
    }
}

impl From<RatioMatches> for MatchStage {
    fn from(r: RatioMatches) -> Self {
        Self {
            fm: r.fm,
            fs: r.fs,
            fm_norm: Some(r.fm_norm),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BaselineMatches {
    pub orig: MatchStage,
    pub rat: MatchStage,
    pub sv: MatchStage,
    /// Homography of the SV stage; identity when verification failed.
    pub h: Mat3,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConstrainedMatches {
    pub sc: MatchStage,
    pub scr: MatchStage,
    pub scrsv: MatchStage,
    /// Homography of the SCRSV stage; identity when verification failed.
    pub h: Mat3,
}

fn check_k(neighbors: &Neighbors, required: usize) -> Result<(), SverError> {
    let got = neighbors.k();
    if !neighbors.is_empty() && got < required {
        return Err(SverError::NotEnoughNeighbors { required, got });
    }
    Ok(())
}

/// Match each `fx2` to its nearest neighbour, normalized by neighbour
/// `norm_col`.
pub fn assign_unconstrained_matches(
    fx2_to_fx1: &Neighbors,
    norm_col: usize,
) -> Result<Assignment, SverError> {
    check_k(fx2_to_fx1, norm_col + 1)?;
    let mut out = Assignment::default();
    for (fx2, (fx1s, dists)) in fx2_to_fx1.indices.iter().zip(&fx2_to_fx1.dists).enumerate() {
        out.fm.push(FeatureMatch::new(fx1s[0], fx2));
        out.fx1_norm.push(fx1s[norm_col]);
        out.match_dist.push(dists[0]);
        out.norm_dist.push(dists[norm_col]);
    }
    Ok(out)
}

/// Keep assignments whose distance ratio is below `ratio_thresh`.
pub fn ratio_test(assign: &Assignment, ratio_thresh: f64) -> RatioMatches {
    let mut out = RatioMatches::default();
    for i in 0..assign.len() {
        let ratio = assign.match_dist[i] / assign.norm_dist[i];
        if ratio < ratio_thresh {
            out.fm.push(assign.fm[i]);
            out.fs.push(1.0 - ratio);
            out.fm_norm
                .push(FeatureMatch::new(assign.fx1_norm[i], assign.fm[i].fx2));
        }
    }
    out
}

/// Reassign matches using a homography from image 1 to image 2.
///
/// For each `fx2` the candidate `fx1`s are reprojected through `h`; the error
/// is the reprojection distance divided by `sqrt(dlen_sqrd2)`. The match is
/// the first candidate with error in `[0, match_xy_thresh]` and the
/// normalizer the first later candidate with error inside `norm_bounds`
/// (both inclusive). Features without both are dropped.
pub fn assign_spatially_constrained_matches(
    dlen_sqrd2: f64,
    kpts1: &[Keypoint],
    kpts2: &[Keypoint],
    h: &Mat3,
    fx2_to_fx1: &Neighbors,
    match_xy_thresh: f64,
    norm_bounds: (f64, f64),
) -> Result<Assignment, SverError> {
    if fx2_to_fx1.len() != kpts2.len() {
        return Err(SverError::LengthMismatch {
            what: "neighbour rows",
            expected: kpts2.len(),
            got: fx2_to_fx1.len(),
        });
    }
    let dlen = dlen_sqrd2.sqrt();
    let within = |e: f64, (lo, hi): (f64, f64)| e.is_finite() && e >= lo && e <= hi;

    let mut out = Assignment::default();
    for (fx2, (fx1s, dists)) in fx2_to_fx1.indices.iter().zip(&fx2_to_fx1.dists).enumerate() {
        let target = kpts2[fx2].xy();
        let mut errors = Vec::with_capacity(fx1s.len());
        for (match_index, &fx1) in fx1s.iter().enumerate() {
            let kp1 = kpts1.get(fx1).ok_or(SverError::MatchOutOfBounds {
                match_index,
                keypoint: fx1,
                side: Side::Query,
                len: kpts1.len(),
            })?;
            let err = match project_point(h, &kp1.xy()) {
                Some(p) => (p - target).norm() / dlen,
                None => f64::INFINITY,
            };
            errors.push(err);
        }

        let Some(match_col) = errors.iter().position(|&e| within(e, (0.0, match_xy_thresh)))
        else {
            continue;
        };
        let Some(norm_col) = (match_col + 1..errors.len()).find(|&c| within(errors[c], norm_bounds))
        else {
            continue;
        };
        out.fm.push(FeatureMatch::new(fx1s[match_col], fx2));
        out.fx1_norm.push(fx1s[norm_col]);
        out.match_dist.push(dists[match_col]);
        out.norm_dist.push(dists[norm_col]);
    }
    Ok(out)
}

/// Two-nearest-neighbour ratio matching.
pub fn unconstrained_ratio_match(
    index: &dyn NeighborIndex,
    vecs2: &Descriptors,
    ratio_thresh: f64,
    pseudo_max_dist_sqrd: f64,
) -> Result<RatioMatches, SverError> {
    let nn = normalized_nearest_neighbors(index, vecs2, 2, pseudo_max_dist_sqrd)?;
    let assign = assign_unconstrained_matches(&nn, 1)?;
    Ok(ratio_test(&assign, ratio_thresh))
}

/// Spatially constrained ratio matching under `h`.
pub fn spatially_constrained_ratio_match(
    index: &dyn NeighborIndex,
    vecs2: &Descriptors,
    kpts1: &[Keypoint],
    kpts2: &[Keypoint],
    h: &Mat3,
    dlen_sqrd2: f64,
    settings: &MatchingSettings,
) -> Result<RatioMatches, SverError> {
    let k = settings.search_k.min(index.len());
    let nn = normalized_nearest_neighbors(index, vecs2, k, settings.pseudo_max_dist_sqrd)?;
    let assign = assign_spatially_constrained_matches(
        dlen_sqrd2,
        kpts1,
        kpts2,
        h,
        &nn,
        settings.match_xy_thresh,
        settings.normalizer_mode.bounds(settings.match_xy_thresh),
    )?;
    Ok(ratio_test(&assign, settings.ratio_thresh2))
}

/// Matcher for one pair of annotations: baseline ratio matching followed by
/// an optional spatially constrained second pass.
#[derive(Debug)]
pub struct VsOneMatcher {
    settings: MatchingSettings,
    index: IndexChoice,
    cache: IndexCache,
}

impl VsOneMatcher {
    /// Matcher with the backend named in `settings`.
    pub fn new(settings: MatchingSettings) -> Result<Self, SverError> {
        let index = IndexChoice::from_kind(settings.index)?;
        Self::with_index(settings, index)
    }

    pub fn with_index(settings: MatchingSettings, index: IndexChoice) -> Result<Self, SverError> {
        settings.validate()?;
        let cache = IndexCache::new(settings.index_cache_size);
        Ok(Self {
            settings,
            index,
            cache,
        })
    }

    pub fn settings(&self) -> &MatchingSettings {
        &self.settings
    }

    pub fn cache(&self) -> &IndexCache {
        &self.cache
    }

    fn check_lengths(kpts: &[Keypoint], vecs: &Descriptors, side: Side) -> Result<(), SverError> {
        if kpts.len() != vecs.len() {
            return Err(SverError::LengthMismatch {
                what: match side {
                    Side::Query => "descriptors of image 1",
                    Side::Database => "descriptors of image 2",
                },
                expected: kpts.len(),
                got: vecs.len(),
            });
        }
        Ok(())
    }

    /// ORIG, RAT and SV stages.
    pub fn baseline(
        &mut self,
        kpts1: &[Keypoint],
        vecs1: &Descriptors,
        kpts2: &[Keypoint],
        vecs2: &Descriptors,
        dlen_sqrd2: f64,
    ) -> Result<BaselineMatches, SverError> {
        Self::check_lengths(kpts1, vecs1, Side::Query)?;
        Self::check_lengths(kpts2, vecs2, Side::Database)?;
        let index = self.cache.get_or_build(vecs1, &self.index)?;

        let nn = normalized_nearest_neighbors(
            index.as_ref(),
            vecs2,
            2,
            self.settings.pseudo_max_dist_sqrd,
        )?;
        let assign = assign_unconstrained_matches(&nn, 1)?;
        let orig = MatchStage {
            fs: assign.ratio_scores(),
            fm: assign.fm.clone(),
            fm_norm: None,
        };
        let rat = ratio_test(&assign, self.settings.ratio_thresh);
        let (sv, h) = verify_stage(kpts1, kpts2, &rat, dlen_sqrd2, &self.settings.first_pass_sver())?;
        debug!(
            orig = orig.len(),
            rat = rat.fm.len(),
            sv = sv.len(),
            "baseline matching"
        );
        Ok(BaselineMatches {
            orig,
            rat: rat.into(),
            sv,
            h,
        })
    }

    /// SC, SCR and SCRSV stages, constrained by `h` from the baseline.
    pub fn constrained(
        &mut self,
        kpts1: &[Keypoint],
        vecs1: &Descriptors,
        kpts2: &[Keypoint],
        vecs2: &Descriptors,
        dlen_sqrd2: f64,
        h: &Mat3,
    ) -> Result<ConstrainedMatches, SverError> {
        Self::check_lengths(kpts1, vecs1, Side::Query)?;
        Self::check_lengths(kpts2, vecs2, Side::Database)?;
        let index = self.cache.get_or_build(vecs1, &self.index)?;

        let k = self.settings.search_k.min(index.len());
        let nn = normalized_nearest_neighbors(
            index.as_ref(),
            vecs2,
            k,
            self.settings.pseudo_max_dist_sqrd,
        )?;
        let assign = assign_spatially_constrained_matches(
            dlen_sqrd2,
            kpts1,
            kpts2,
            h,
            &nn,
            self.settings.match_xy_thresh,
            self.settings
                .normalizer_mode
                .bounds(self.settings.match_xy_thresh),
        )?;
        let sc = MatchStage {
            fs: assign.ratio_scores(),
            fm: assign.fm.clone(),
            fm_norm: Some(
                assign
                    .fm
                    .iter()
                    .zip(&assign.fx1_norm)
                    .map(|(fm, &fx1)| FeatureMatch::new(fx1, fm.fx2))
                    .collect(),
            ),
        };
        let scr = ratio_test(&assign, self.settings.ratio_thresh2);
        let (scrsv, h) =
            verify_stage(kpts1, kpts2, &scr, dlen_sqrd2, &self.settings.second_pass_sver())?;
        debug!(
            sc = sc.len(),
            scr = scr.fm.len(),
            scrsv = scrsv.len(),
            mode = ?self.settings.normalizer_mode,
            "constrained matching"
        );
        Ok(ConstrainedMatches {
            sc,
            scr: scr.into(),
            scrsv,
            h,
        })
    }

    /// Baseline pass followed by the constrained pass under its homography.
    pub fn run(
        &mut self,
        kpts1: &[Keypoint],
        vecs1: &Descriptors,
        kpts2: &[Keypoint],
        vecs2: &Descriptors,
        dlen_sqrd2: f64,
    ) -> Result<(BaselineMatches, ConstrainedMatches), SverError> {
        let base = self.baseline(kpts1, vecs1, kpts2, vecs2, dlen_sqrd2)?;
        let next = self.constrained(kpts1, vecs1, kpts2, vecs2, dlen_sqrd2, &base.h)?;
        Ok((base, next))
    }
}

/// Verify ratio-test survivors with unit weights; identity and an empty
/// stage when verification finds nothing.
fn verify_stage(
    kpts1: &[Keypoint],
    kpts2: &[Keypoint],
    rat: &RatioMatches,
    dlen_sqrd2: f64,
    sver: &SverSettings,
) -> Result<(MatchStage, Mat3), SverError> {
    let weights = vec![1.0; rat.fm.len()];
    match spatially_verify(kpts1, kpts2, &rat.fm, dlen_sqrd2, Some(&weights), sver)? {
        Some(res) => {
            let take_fm = |v: &[FeatureMatch]| -> Vec<FeatureMatch> {
                res.homog_inliers.iter().map(|&i| v[i]).collect()
            };
            let stage = MatchStage {
                fm: take_fm(&rat.fm),
                fs: res.homog_inliers.iter().map(|&i| rat.fs[i]).collect(),
                fm_norm: Some(take_fm(&rat.fm_norm)),
            };
            Ok((stage, res.h))
        }
        None => Ok((
            MatchStage {
                fm_norm: Some(Vec::new()),
                ..MatchStage::default()
            },
            Mat3::identity(),
        )),
    }
}
