//! Error type shared by every fallible operation in the crate.
//!
//! Only input-contract violations surface here. Conditions where verification
//! simply has nothing to report (no correspondences, too few inliers for a
//! refit) are returned as `None` or as a degenerate result instead.

use thiserror::Error;

/// Which side of a correspondence an index refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Query,
    Database,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Query => f.write_str("image 1"),
            Side::Database => f.write_str("image 2"),
        }
    }
}

#[derive(Debug, Error)]
pub enum SverError {
    #[error("match {match_index} refers to keypoint {keypoint} but {side} has only {len} keypoints")]
    MatchOutOfBounds {
        match_index: usize,
        keypoint: usize,
        side: Side,
        len: usize,
    },
    #[error("keypoint {index} of {side} has an invalid shape (a11={a11}, a22={a22})")]
    InvalidKeypoint {
        index: usize,
        side: Side,
        a11: f64,
        a22: f64,
    },
    #[error("inlier index {index} is out of range for {len} correspondences")]
    InlierOutOfBounds { index: usize, len: usize },
    #[error("{what}: expected length {expected}, got {got}")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("match weight {index} is not a finite non-negative number ({value})")]
    InvalidWeight { index: usize, value: f64 },
    #[error("threshold `{name}` must be finite and positive, got {value}")]
    InvalidThreshold { name: &'static str, value: f64 },
    #[error("no hypotheses: the correspondence list is empty")]
    NoHypotheses,
    #[error("no hypothesis has a single inlier")]
    NoInliers,
    #[error("need at least {required} neighbours per query, index returned {got}")]
    NotEnoughNeighbors { required: usize, got: usize },
    #[error("descriptor dimension mismatch: index has {expected}, query has {got}")]
    DescriptorDimension { expected: usize, got: usize },
    #[error("nearest neighbour backend failed: {0}")]
    IndexBackend(String),
}
