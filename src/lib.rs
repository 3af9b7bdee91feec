//! # sver - Spatial verification of keypoint matches
//!
//! `sver` checks tentative correspondences between the keypoints of two
//! images against a geometric transform. Every correspondence carries an
//! elliptical keypoint frame on each side, which is enough to fix a local
//! affine map on its own; so instead of sampling, each correspondence seeds
//! one hypothesis. All hypotheses are scored against all correspondences,
//! the one with the most inliers wins, and its inliers are refit into a
//! homography.
//!
//! ## Quick Start
//!
//! ```rust
//! use sver::{spatially_verify, FeatureMatch, Keypoint, SverSettings};
//! use sver::keypoint::diag_extent_sqrd;
//!
//! let kpts1: Vec<Keypoint> = (0..4)
//!     .map(|i| Keypoint::new(10.0 * i as f64, 5.0 * (i % 2) as f64, 3.0, 0.0, 3.0, 0.0))
//!     .collect();
//! let kpts2 = kpts1.clone();
//! let matches: Vec<FeatureMatch> = (0..4).map(|i| FeatureMatch::new(i, i)).collect();
//!
//! let dlen_sqrd2 = diag_extent_sqrd(&kpts2);
//! let result = spatially_verify(&kpts1, &kpts2, &matches, dlen_sqrd2, None, &SverSettings::default())
//!     .unwrap()
//!     .expect("identical keypoints verify");
//! assert_eq!(result.homog_inliers, vec![0, 1, 2, 3]);
//! ```
//!
//! ## Extending the Library
//!
//! The pipeline is built around a few traits:
//!
//! - **[`Estimator`](core::Estimator)**: turns a sample of correspondences into a model
//! - **[`Scoring<M>`](core::Scoring)**: measures one correspondence against a model
//! - **[`LocalOptimizer<M>`](core::LocalOptimizer)**: refits a model on its inliers
//! - **[`NeighborIndex`](neighbors::NeighborIndex)** / **[`IndexBuilder`](neighbors::IndexBuilder)**:
//!   nearest neighbour backends for descriptor matching
//!
//! ## Modules
//!
//! - **[`keypoint`]**: keypoint frames, orientation extraction, keypoint transforms
//! - **[`api`]**: `affine_hypothesis_errors` and `spatially_verify`
//! - **[`core`]**: core traits and the exhaustive hypothesis search
//! - **[`estimators`]**: affine and homography estimators
//! - **[`scoring`]**: error measures and best-hypothesis selection
//! - **[`refine`]**: homography refinement of the affine inliers
//! - **[`matching`]**: ratio-test and spatially constrained matching
//! - **[`neighbors`]**: nearest neighbour backends and the index cache
//! - **[`settings`]**: configuration types
//! - **[`demodata`]**: synthetic keypoints

pub mod api;
pub mod core;
pub mod demodata;
pub mod error;
pub mod estimators;
pub mod keypoint;
pub mod matches;
pub mod matching;
pub mod models;
pub mod neighbors;
pub mod refine;
pub mod scoring;
pub mod settings;
pub mod types;

pub use api::{affine_hypothesis_errors, spatially_verify, AffineHypotheses, VerificationResult};
pub use core::{Estimator, LocalOptimizer, Scoring};
pub use error::SverError;
pub use keypoint::{transform_keypoints, Keypoint};
pub use matches::{FeatureMatch, MatchData};
pub use matching::{BaselineMatches, ConstrainedMatches, VsOneMatcher};
pub use models::{AffineHypothesis, Homography};
pub use refine::{refine_homography, Refinement, TransformKind};
pub use scoring::{select_best_hypothesis, ErrorTriple, OrientationPolicy};
pub use settings::{MatchingSettings, SverSettings};
