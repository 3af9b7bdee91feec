//! Shared numeric aliases.
//!
//! Keypoint frames and transforms are small fixed-size `nalgebra` matrices;
//! everything in the crate speaks in these aliases.

use nalgebra::{Matrix2, Matrix3, Point2, Vector2};

/// 2x2 linear part of a keypoint frame or transform.
pub type Mat2 = Matrix2<f64>;

/// 3x3 homogeneous transform (affine or projective).
pub type Mat3 = Matrix3<f64>;

/// Image-plane point.
pub type Pt2 = Point2<f64>;

/// Image-plane displacement.
pub type Vec2 = Vector2<f64>;

/// One full turn in radians.
pub const TAU: f64 = std::f64::consts::TAU;

/// Half a turn in radians.
pub const PI: f64 = std::f64::consts::PI;
