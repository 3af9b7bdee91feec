//! Elliptical keypoint frames and the transforms between them.
//!
//! A keypoint is stored as `(x, y, a11, a21, a22, ori)`. The lower-triangular
//! matrix `invV = [[a11, 0], [a21, a22]]` maps the unit circle onto the
//! keypoint ellipse, and `ori` rotates that frame. The combined frame
//! `invVR = invV * R(ori)` (with the centre as translation) is the local
//! affine map from the normalized patch into image coordinates; every
//! geometric comparison in the crate goes through it.

use crate::error::{Side, SverError};
use crate::types::{Mat2, Mat3, Pt2, Vec2, TAU};

/// Elliptical affine-invariant keypoint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    pub x: f64,
    pub y: f64,
    pub a11: f64,
    pub a21: f64,
    pub a22: f64,
    /// Rotation of the frame in radians, nominally in `[0, TAU)`.
    pub ori: f64,
}

impl Keypoint {
    pub fn new(x: f64, y: f64, a11: f64, a21: f64, a22: f64, ori: f64) -> Self {
        Self {
            x,
            y,
            a11,
            a21,
            a22,
            ori,
        }
    }

    /// Build from a packed `[x, y, a11, a21, a22, ori]` row.
    pub fn from_row(row: [f64; 6]) -> Self {
        Self::new(row[0], row[1], row[2], row[3], row[4], row[5])
    }

    pub fn to_row(&self) -> [f64; 6] {
        [self.x, self.y, self.a11, self.a21, self.a22, self.ori]
    }

    /// Build a keypoint from its centre and combined shape+rotation matrix.
    ///
    /// The rotation is peeled off the first row (`invV` is lower triangular so
    /// its first row carries only `a11`), leaving the lower-triangular shape.
    pub fn from_frame(center: Pt2, inv_vr: &Mat2) -> Self {
        let ori = invvr_ori(inv_vr);
        let inv_v = inv_vr * rotation_mat2(ori).transpose();
        Self::new(
            center.x,
            center.y,
            inv_v[(0, 0)],
            inv_v[(1, 0)],
            inv_v[(1, 1)],
            ori,
        )
    }

    pub fn xy(&self) -> Pt2 {
        Pt2::new(self.x, self.y)
    }

    /// Finite parameters and a positive shape diagonal.
    pub fn is_valid(&self) -> bool {
        self.to_row().iter().all(|v| v.is_finite()) && self.a11 > 0.0 && self.a22 > 0.0
    }

    pub fn inv_v(&self) -> Mat2 {
        Mat2::new(self.a11, 0.0, self.a21, self.a22)
    }

    /// Shape matrix composed with the keypoint rotation.
    pub fn inv_vr(&self) -> Mat2 {
        self.inv_v() * rotation_mat2(self.ori)
    }

    /// Homogeneous local frame: unit patch coordinates to image coordinates.
    pub fn inv_vr3(&self) -> Mat3 {
        let m = self.inv_vr();
        Mat3::new(
            m[(0, 0)],
            m[(0, 1)],
            self.x,
            m[(1, 0)],
            m[(1, 1)],
            self.y,
            0.0,
            0.0,
            1.0,
        )
    }

    /// Squared scale, i.e. the area factor `det(invV) = a11 * a22`.
    pub fn sqrd_scale(&self) -> f64 {
        self.a11 * self.a22
    }

    pub fn scale(&self) -> f64 {
        self.sqrd_scale().sqrt()
    }
}

/// Counter-clockwise rotation `[[cos, -sin], [sin, cos]]`.
pub fn rotation_mat2(theta: f64) -> Mat2 {
    let (s, c) = theta.sin_cos();
    Mat2::new(c, -s, s, c)
}

/// Two-argument arctangent remapped into `[0, TAU)`.
///
/// Negative results of the standard `atan2` get `TAU` added. When the negative
/// angle is so small that the sum rounds up to exactly `TAU`, the result wraps
/// to zero so the half-open range holds.
pub fn atan2_tau(y: f64, x: f64) -> f64 {
    let theta = y.atan2(x);
    if theta < 0.0 {
        let wrapped = theta + TAU;
        if wrapped >= TAU {
            0.0
        } else {
            wrapped
        }
    } else {
        theta
    }
}

/// Orientation encoded in a combined shape+rotation matrix.
pub fn invvr_ori(inv_vr: &Mat2) -> f64 {
    atan2_tau(-inv_vr[(0, 1)], inv_vr[(0, 0)])
}

/// Orientations of a batch of shape+rotation matrices.
pub fn get_invvr_mats_oris(mats: &[Mat2]) -> Vec<f64> {
    mats.iter().map(invvr_ori).collect()
}

/// Squared scales (`a11 * a22`) of a batch of keypoints.
pub fn get_sqrd_scales(kpts: &[Keypoint]) -> Vec<f64> {
    kpts.iter().map(Keypoint::sqrd_scale).collect()
}

/// Apply a homogeneous transform to a point. `None` when the point maps to
/// (or numerically near) the line at infinity.
pub fn project_point(m: &Mat3, p: &Pt2) -> Option<Pt2> {
    let h = m * p.to_homogeneous();
    if h.z.abs() <= f64::EPSILON * (h.x.abs() + h.y.abs()).max(1.0) {
        return None;
    }
    let out = Pt2::new(h.x / h.z, h.y / h.z);
    (out.x.is_finite() && out.y.is_finite()).then_some(out)
}

/// Jacobian of the transform at `p`. For an affine `m` this is its linear part.
pub fn local_jacobian(m: &Mat3, p: &Pt2) -> Option<Mat2> {
    let h = m * p.to_homogeneous();
    if h.z.abs() <= f64::EPSILON {
        return None;
    }
    let u = h.x / h.z;
    let v = h.y / h.z;
    let jac = Mat2::new(
        m[(0, 0)] - u * m[(2, 0)],
        m[(0, 1)] - u * m[(2, 1)],
        m[(1, 0)] - v * m[(2, 0)],
        m[(1, 1)] - v * m[(2, 1)],
    ) / h.z;
    jac.iter().all(|v| v.is_finite()).then_some(jac)
}

/// Map keypoints through `m`, carrying their shape along.
///
/// Centres are mapped projectively; the shape+rotation frame is multiplied by
/// the local Jacobian of `m` (its linear part when `m` is affine) and then
/// re-split into a lower-triangular shape and an orientation. Keypoints sent
/// to infinity come back with non-finite parameters. A reflecting `m` yields
/// a negative `a22`, which verification rejects as an invalid keypoint.
pub fn transform_keypoints(kpts: &[Keypoint], m: &Mat3) -> Vec<Keypoint> {
    kpts.iter()
        .map(|kp| {
            let center = kp.xy();
            match (project_point(m, &center), local_jacobian(m, &center)) {
                (Some(c), Some(jac)) => Keypoint::from_frame(c, &(jac * kp.inv_vr())),
                _ => Keypoint::new(f64::NAN, f64::NAN, f64::NAN, f64::NAN, f64::NAN, f64::NAN),
            }
        })
        .collect()
}

/// Map only the keypoint centres through `m`.
pub fn transform_xys(kpts: &[Keypoint], m: &Mat3) -> Vec<Option<Pt2>> {
    kpts.iter().map(|kp| project_point(m, &kp.xy())).collect()
}

/// Squared diagonal of the bounding box of the keypoint centres.
///
/// Spatial thresholds are expressed as a fraction of this value so that they
/// do not depend on the image resolution. Zero for fewer than two keypoints.
pub fn diag_extent_sqrd(kpts: &[Keypoint]) -> f64 {
    let mut it = kpts.iter();
    let Some(first) = it.next() else {
        return 0.0;
    };
    let (mut min, mut max) = (first.xy(), first.xy());
    for kp in it {
        min.x = min.x.min(kp.x);
        min.y = min.y.min(kp.y);
        max.x = max.x.max(kp.x);
        max.y = max.y.max(kp.y);
    }
    let extent: Vec2 = max - min;
    extent.norm_squared()
}

/// Fail fast on keypoints with non-positive extent or non-finite parameters.
pub fn validate_keypoints(kpts: &[Keypoint], side: Side) -> Result<(), SverError> {
    match kpts.iter().position(|kp| !kp.is_valid()) {
        Some(index) => Err(SverError::InvalidKeypoint {
            index,
            side,
            a11: kpts[index].a11,
            a22: kpts[index].a22,
        }),
        None => Ok(()),
    }
}
