use glam::{Affine3A, Mat3A, Quat, Vec3A};

use crate::Scalar;

pub type Vec3 = Vec3A;
pub type Mat3 = Mat3A;

/// Rigid world transform (rotation + translation), the 3x4 shape queries run in.
pub type Transform = Affine3A;

#[inline] pub fn vec3(x: Scalar, y: Scalar, z: Scalar) -> Vec3 { Vec3::new(x, y, z) }

#[inline]
pub fn rigid(position: Vec3, orientation: Quat) -> Transform {
    Affine3A::from_rotation_translation(orientation, position.into())
}

#[inline]
pub fn rigid_inverse(transform: &Transform) -> Transform { transform.inverse() }
