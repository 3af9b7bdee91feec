//! Geometric models produced by verification.

use crate::keypoint::project_point;
use crate::types::{Mat2, Mat3, Pt2};

/// Local affine map implied by a single correspondence.
///
/// Stored as a homogeneous 3x3 matrix whose bottom row is `[0, 0, 1]`.
#[derive(Clone, Debug, PartialEq)]
pub struct AffineHypothesis {
    pub a: Mat3,
}

impl AffineHypothesis {
    pub fn new(a: Mat3) -> Self {
        Self { a }
    }

    pub fn linear(&self) -> Mat2 {
        self.a.fixed_view::<2, 2>(0, 0).into_owned()
    }

    pub fn apply(&self, p: &Pt2) -> Pt2 {
        let l = self.linear();
        Pt2::from(l * p.coords + self.a.fixed_view::<2, 1>(0, 2))
    }
}

/// Planar projective transformation represented by a 3x3 matrix.
#[derive(Clone, Debug, PartialEq)]
pub struct Homography {
    pub h: Mat3,
}

impl Homography {
    pub fn new(h: Mat3) -> Self {
        Self { h }
    }

    /// Rescale so that `h[(2, 2)] == 1` when that entry is usable.
    pub fn normalized(mut self) -> Self {
        let s = self.h[(2, 2)];
        if s.abs() > f64::EPSILON {
            self.h /= s;
        }
        self
    }

    pub fn project(&self, p: &Pt2) -> Option<Pt2> {
        project_point(&self.h, p)
    }
}

impl From<AffineHypothesis> for Homography {
    fn from(aff: AffineHypothesis) -> Self {
        Self::new(aff.a)
    }
}
