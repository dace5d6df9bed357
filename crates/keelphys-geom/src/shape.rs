use keelphys_core::types::{Mat3, Transform, Vec3};

use crate::aabb::Aabb;

#[derive(Copy, Clone, Debug)]
pub enum Shape {
    Ball { radius: f32 },
    Box { half_extents: Vec3 },
}

/// World-space bounds of a shape under a rigid transform.
pub fn bounds(shape: &Shape, xf: &Transform) -> Aabb {
    match *shape {
        Shape::Ball { radius } => {
            Aabb::from_center_half_extents(xf.translation, Vec3::splat(radius))
        }
        Shape::Box { half_extents } => {
            // abs-rotation fold, equivalent to taking the 8 transformed corners
            let m = xf.matrix3;
            let world_he = Mat3::from_cols(m.x_axis.abs(), m.y_axis.abs(), m.z_axis.abs())
                * half_extents;
            Aabb::from_center_half_extents(xf.translation, world_he)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use glam::Quat;
    use keelphys_core::{rigid, vec3};

    #[test]
    fn ball_bounds_follow_translation() {
        let xf = rigid(vec3(1.0, 2.0, 3.0), Quat::IDENTITY);
        let b = bounds(&Shape::Ball { radius: 0.5 }, &xf);
        assert_eq!(b.min, vec3(0.5, 1.5, 2.5));
        assert_eq!(b.max, vec3(1.5, 2.5, 3.5));
    }

    #[test]
    fn rotated_box_bounds_enclose_corners() {
        let rot = Quat::from_rotation_z(std::f32::consts::FRAC_PI_4);
        let xf = rigid(vec3(0.0, 0.0, 0.0), rot);
        let b = bounds(&Shape::Box { half_extents: vec3(1.0, 1.0, 1.0) }, &xf);
        let s = std::f32::consts::SQRT_2;
        assert_relative_eq!(b.max.x, s, epsilon = 1e-5);
        assert_relative_eq!(b.max.y, s, epsilon = 1e-5);
        assert_relative_eq!(b.max.z, 1.0, epsilon = 1e-5);
    }
}
