//! Correspondences between two keypoint sets.

use crate::error::{Side, SverError};
use crate::keypoint::{validate_keypoints, Keypoint};

/// A tentative correspondence: `fx1` indexes image 1, `fx2` indexes image 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FeatureMatch {
    pub fx1: usize,
    pub fx2: usize,
}

impl FeatureMatch {
    pub fn new(fx1: usize, fx2: usize) -> Self {
        Self { fx1, fx2 }
    }
}

impl From<(usize, usize)> for FeatureMatch {
    fn from((fx1, fx2): (usize, usize)) -> Self {
        Self::new(fx1, fx2)
    }
}

/// Validated view over two keypoint sets and the correspondences between them.
///
/// Construction checks that every match index is in range and that every
/// referenced keypoint has a positive shape diagonal, so downstream code can
/// index freely.
#[derive(Debug, Clone, Copy)]
pub struct MatchData<'a> {
    kpts1: &'a [Keypoint],
    kpts2: &'a [Keypoint],
    matches: &'a [FeatureMatch],
}

impl<'a> MatchData<'a> {
    pub fn new(
        kpts1: &'a [Keypoint],
        kpts2: &'a [Keypoint],
        matches: &'a [FeatureMatch],
    ) -> Result<Self, SverError> {
        for (match_index, fm) in matches.iter().enumerate() {
            if fm.fx1 >= kpts1.len() {
                return Err(SverError::MatchOutOfBounds {
                    match_index,
                    keypoint: fm.fx1,
                    side: Side::Query,
                    len: kpts1.len(),
                });
            }
            if fm.fx2 >= kpts2.len() {
                return Err(SverError::MatchOutOfBounds {
                    match_index,
                    keypoint: fm.fx2,
                    side: Side::Database,
                    len: kpts2.len(),
                });
            }
        }
        validate_keypoints(kpts1, Side::Query)?;
        validate_keypoints(kpts2, Side::Database)?;
        Ok(Self {
            kpts1,
            kpts2,
            matches,
        })
    }

    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    pub fn matches(&self) -> &'a [FeatureMatch] {
        self.matches
    }

    pub fn kpts1(&self) -> &'a [Keypoint] {
        self.kpts1
    }

    pub fn kpts2(&self) -> &'a [Keypoint] {
        self.kpts2
    }

    /// Keypoint pair of correspondence `i`.
    pub fn pair(&self, i: usize) -> (&'a Keypoint, &'a Keypoint) {
        let fm = self.matches[i];
        (&self.kpts1[fm.fx1], &self.kpts2[fm.fx2])
    }

    /// Image-2 keypoints referenced by the matches, in match order.
    pub fn matched_kpts2(&self) -> Vec<Keypoint> {
        self.matches.iter().map(|fm| self.kpts2[fm.fx2]).collect()
    }
}

/// Check optional per-match weights against the correspondence count.
pub fn validate_weights(weights: &[f64], expected: usize) -> Result<(), SverError> {
    if weights.len() != expected {
        return Err(SverError::LengthMismatch {
            what: "match weights",
            expected,
            got: weights.len(),
        });
    }
    match weights.iter().position(|w| !w.is_finite() || *w < 0.0) {
        Some(index) => Err(SverError::InvalidWeight {
            index,
            value: weights[index],
        }),
        None => Ok(()),
    }
}
