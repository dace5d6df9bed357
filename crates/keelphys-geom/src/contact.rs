use keelphys_core::types::{Transform, Vec3};

use crate::shape::Shape;

/// Contact without a representative point (particle queries, static side).
#[derive(Copy, Clone, Debug)]
pub struct PointContact {
    /// Unit normal pointing from the second object toward the first.
    pub normal: Vec3,
    /// Negative while penetrating.
    pub separation: f32,
}

/// Contact with a representative world-space point, for rigid-body solves.
#[derive(Copy, Clone, Debug)]
pub struct SurfaceContact {
    pub normal: Vec3,
    pub separation: f32,
    pub position: Vec3,
}

pub fn particle_particle_contact(p0: Vec3, r0: f32, p1: Vec3, r1: f32) -> Option<PointContact> {
    let displacement = p0 - p1;
    let distance2 = displacement.length_squared();
    let contact_distance = r0 + r1;
    if distance2 >= contact_distance * contact_distance {
        return None;
    }
    if distance2 == 0.0 {
        // coincident centers, arbitrary axis
        return Some(PointContact { normal: Vec3::X, separation: -contact_distance });
    }
    let distance = distance2.sqrt();
    Some(PointContact {
        normal: displacement / distance,
        separation: distance - contact_distance,
    })
}

fn particle_ball_contact(p: Vec3, r: f32, center: Vec3, ball_radius: f32) -> Option<PointContact> {
    let displacement = p - center;
    let distance2 = displacement.length_squared();
    let contact_distance = r + ball_radius;
    if distance2 > contact_distance * contact_distance {
        return None;
    }
    if distance2 == 0.0 {
        return Some(PointContact { normal: Vec3::X, separation: -contact_distance });
    }
    let distance = distance2.sqrt();
    Some(PointContact {
        normal: displacement / distance,
        separation: distance - contact_distance,
    })
}

fn particle_box_contact(
    p: Vec3,
    r: f32,
    half_extents: Vec3,
    xf: &Transform,
    xf_inv: &Transform,
) -> Option<PointContact> {
    let local = xf_inv.transform_point3a(p);
    let clamped = local.clamp(-half_extents, half_extents);
    let displacement = local - clamped;
    let distance2 = displacement.length_squared();
    if distance2 == 0.0 {
        // center strictly inside, exit through the nearest face
        let m = xf.matrix3;
        let face_distances = [
            clamped.x + half_extents.x,
            half_extents.x - clamped.x,
            clamped.y + half_extents.y,
            half_extents.y - clamped.y,
            clamped.z + half_extents.z,
            half_extents.z - clamped.z,
        ];
        let face_normals = [-m.x_axis, m.x_axis, -m.y_axis, m.y_axis, -m.z_axis, m.z_axis];
        let mut face = 0;
        for i in 1..6 {
            if face_distances[i] < face_distances[face] {
                face = i;
            }
        }
        Some(PointContact {
            normal: face_normals[face],
            separation: -face_distances[face] - r,
        })
    } else if distance2 <= r * r {
        let distance = distance2.sqrt();
        Some(PointContact {
            // rotation preserves length, so dividing by the local distance normalizes
            normal: xf.transform_vector3a(displacement) / distance,
            separation: distance - r,
        })
    } else {
        None
    }
}

/// Particle against a shape under a rigid transform, positionless.
pub fn particle_shape_contact(
    p: Vec3,
    r: f32,
    shape: &Shape,
    xf: &Transform,
    xf_inv: &Transform,
) -> Option<PointContact> {
    match *shape {
        Shape::Ball { radius } => particle_ball_contact(p, r, xf.translation, radius),
        Shape::Box { half_extents } => particle_box_contact(p, r, half_extents, xf, xf_inv),
    }
}

/// Particle against a shape with the representative point on the shape
/// surface, `p - n * (r + separation)`.
pub fn particle_shape_surface_contact(
    p: Vec3,
    r: f32,
    shape: &Shape,
    xf: &Transform,
    xf_inv: &Transform,
) -> Option<SurfaceContact> {
    particle_shape_contact(p, r, shape, xf, xf_inv).map(|c| SurfaceContact {
        normal: c.normal,
        separation: c.separation,
        position: p - c.normal * (r + c.separation),
    })
}

fn ball_ball_contact(c0: Vec3, r0: f32, c1: Vec3, r1: f32) -> Option<SurfaceContact> {
    let displacement = c0 - c1;
    let distance2 = displacement.length_squared();
    let contact_distance = r0 + r1;
    if distance2 > contact_distance * contact_distance {
        return None;
    }
    if distance2 == 0.0 {
        return Some(SurfaceContact { normal: Vec3::X, separation: -contact_distance, position: c0 });
    }
    let distance = distance2.sqrt();
    let normal = displacement / distance;
    let on_first = c0 - normal * r0;
    let on_second = c1 + normal * r1;
    Some(SurfaceContact {
        normal,
        separation: distance - contact_distance,
        position: 0.5 * (on_first + on_second),
    })
}

fn ball_box_contact(
    center: Vec3,
    radius: f32,
    half_extents: Vec3,
    xf: &Transform,
    xf_inv: &Transform,
) -> Option<SurfaceContact> {
    particle_box_contact(center, radius, half_extents, xf, xf_inv).map(|c| SurfaceContact {
        normal: c.normal,
        separation: c.separation,
        position: center - c.normal * (radius + c.separation),
    })
}

fn box_corners(center: Vec3, axes: &[Vec3; 3], he: Vec3) -> [Vec3; 8] {
    let (ex, ey, ez) = (axes[0] * he.x, axes[1] * he.y, axes[2] * he.z);
    [
        center - ex - ey - ez,
        center - ex - ey + ez,
        center - ex + ey - ez,
        center - ex + ey + ez,
        center + ex - ey - ez,
        center + ex - ey + ez,
        center + ex + ey - ez,
        center + ex + ey + ez,
    ]
}

fn point_in_box(p: Vec3, xf_inv: &Transform, he: Vec3) -> bool {
    let local = xf_inv.transform_point3a(p);
    local.abs().cmple(he + Vec3::splat(1.0e-4)).all()
}

fn support_point(center: Vec3, axes: &[Vec3; 3], he: Vec3, dir: Vec3) -> Vec3 {
    let he = he.to_array();
    let mut p = center;
    for (axis, extent) in axes.iter().zip(he) {
        p += *axis * if axis.dot(dir) >= 0.0 { extent } else { -extent };
    }
    p
}

fn box_box_contact(
    ha: Vec3,
    xa: &Transform,
    xa_inv: &Transform,
    hb: Vec3,
    xb: &Transform,
    xb_inv: &Transform,
) -> Option<SurfaceContact> {
    let ca = xa.translation;
    let cb = xb.translation;
    let a_axes = [xa.matrix3.x_axis, xa.matrix3.y_axis, xa.matrix3.z_axis];
    let b_axes = [xb.matrix3.x_axis, xb.matrix3.y_axis, xb.matrix3.z_axis];
    let d = ca - cb;

    let mut candidates = [Vec3::ZERO; 15];
    candidates[..3].copy_from_slice(&a_axes);
    candidates[3..6].copy_from_slice(&b_axes);
    for i in 0..3 {
        for j in 0..3 {
            candidates[6 + i * 3 + j] = a_axes[i].cross(b_axes[j]);
        }
    }

    let mut best_overlap = f32::INFINITY;
    let mut best_axis = Vec3::X;
    for axis in candidates {
        let len2 = axis.length_squared();
        if len2 < 1.0e-10 {
            // near-parallel edge cross, no information
            continue;
        }
        let axis = axis / len2.sqrt();
        let ra = ha.x * a_axes[0].dot(axis).abs()
            + ha.y * a_axes[1].dot(axis).abs()
            + ha.z * a_axes[2].dot(axis).abs();
        let rb = hb.x * b_axes[0].dot(axis).abs()
            + hb.y * b_axes[1].dot(axis).abs()
            + hb.z * b_axes[2].dot(axis).abs();
        let dist = d.dot(axis);
        let overlap = ra + rb - dist.abs();
        if overlap < 0.0 {
            return None;
        }
        if overlap < best_overlap {
            best_overlap = overlap;
            best_axis = if dist >= 0.0 { axis } else { -axis };
        }
    }

    // Deepest feature: centroid of every corner of either box inside the
    // other; midpoint of the opposing support points when none penetrates.
    let normal = best_axis;
    let mut sum = Vec3::ZERO;
    let mut count = 0u32;
    for corner in box_corners(ca, &a_axes, ha) {
        if point_in_box(corner, xb_inv, hb) {
            sum += corner;
            count += 1;
        }
    }
    for corner in box_corners(cb, &b_axes, hb) {
        if point_in_box(corner, xa_inv, ha) {
            sum += corner;
            count += 1;
        }
    }
    let position = if count > 0 {
        sum / count as f32
    } else {
        0.5 * (support_point(ca, &a_axes, ha, -normal) + support_point(cb, &b_axes, hb, normal))
    };
    Some(SurfaceContact { normal, separation: -best_overlap, position })
}

/// Shape against shape, positionful. The normal points from the second shape
/// toward the first.
pub fn shape_shape_contact(
    a: &Shape,
    xa: &Transform,
    xa_inv: &Transform,
    b: &Shape,
    xb: &Transform,
    xb_inv: &Transform,
) -> Option<SurfaceContact> {
    match (*a, *b) {
        (Shape::Ball { radius: ra }, Shape::Ball { radius: rb }) => {
            ball_ball_contact(xa.translation, ra, xb.translation, rb)
        }
        (Shape::Ball { radius }, Shape::Box { half_extents }) => {
            ball_box_contact(xa.translation, radius, half_extents, xb, xb_inv)
        }
        (Shape::Box { half_extents }, Shape::Ball { radius }) => {
            ball_box_contact(xb.translation, radius, half_extents, xa, xa_inv)
                .map(|c| SurfaceContact { normal: -c.normal, ..c })
        }
        (Shape::Box { half_extents: ha }, Shape::Box { half_extents: hb }) => {
            box_box_contact(ha, xa, xa_inv, hb, xb, xb_inv)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use glam::Quat;
    use keelphys_core::{rigid, rigid_inverse, vec3};

    fn xf(pos: Vec3, rot: Quat) -> (Transform, Transform) {
        let t = rigid(pos, rot);
        let inv = rigid_inverse(&t);
        (t, inv)
    }

    #[test]
    fn coincident_particles_pick_unit_x() {
        let c = particle_particle_contact(Vec3::ZERO, 0.5, Vec3::ZERO, 0.5).unwrap();
        assert_eq!(c.normal, Vec3::X);
        assert_relative_eq!(c.normal.length(), 1.0);
        assert_relative_eq!(c.separation, -1.0);
    }

    #[test]
    fn separated_particles_have_no_contact() {
        assert!(particle_particle_contact(vec3(2.0, 0.0, 0.0), 0.5, Vec3::ZERO, 0.5).is_none());
    }

    #[test]
    fn particle_above_box_face() {
        let (t, inv) = xf(Vec3::ZERO, Quat::IDENTITY);
        let shape = Shape::Box { half_extents: vec3(1.0, 1.0, 1.0) };
        let c = particle_shape_contact(vec3(0.0, 1.05, 0.0), 0.1, &shape, &t, &inv).unwrap();
        assert_relative_eq!(c.normal.y, 1.0, epsilon = 1e-6);
        assert_relative_eq!(c.separation, -0.05, epsilon = 1e-6);
    }

    #[test]
    fn particle_inside_box_exits_nearest_face() {
        let (t, inv) = xf(Vec3::ZERO, Quat::IDENTITY);
        let shape = Shape::Box { half_extents: vec3(1.0, 1.0, 1.0) };
        let c = particle_shape_contact(vec3(0.2, 0.9, -0.1), 0.1, &shape, &t, &inv).unwrap();
        assert_relative_eq!(c.normal.y, 1.0, epsilon = 1e-6);
        assert_relative_eq!(c.separation, -(0.1 + 0.1), epsilon = 1e-6);
    }

    #[test]
    fn particle_near_box_corner_points_outward() {
        let (t, inv) = xf(Vec3::ZERO, Quat::IDENTITY);
        let shape = Shape::Box { half_extents: vec3(1.0, 1.0, 1.0) };
        let c = particle_shape_contact(vec3(1.05, 1.05, 1.05), 0.2, &shape, &t, &inv).unwrap();
        let expected = vec3(1.0, 1.0, 1.0).normalize();
        assert_relative_eq!(c.normal.dot(expected), 1.0, epsilon = 1e-5);
        assert!(c.separation < 0.0);
    }

    #[test]
    fn surface_contact_point_sits_on_box_surface() {
        let (t, inv) = xf(Vec3::ZERO, Quat::IDENTITY);
        let shape = Shape::Box { half_extents: vec3(1.0, 1.0, 1.0) };
        let c = particle_shape_surface_contact(vec3(0.0, 1.05, 0.0), 0.1, &shape, &t, &inv)
            .unwrap();
        assert_relative_eq!(c.position.y, 1.0, epsilon = 1e-5);
        assert_relative_eq!(c.position.x, 0.0, epsilon = 1e-5);
    }

    #[test]
    fn ball_ball_normal_points_toward_first() {
        let (ta, ia) = xf(vec3(0.9, 0.0, 0.0), Quat::IDENTITY);
        let (tb, ib) = xf(Vec3::ZERO, Quat::IDENTITY);
        let a = Shape::Ball { radius: 0.5 };
        let b = Shape::Ball { radius: 0.5 };
        let c = shape_shape_contact(&a, &ta, &ia, &b, &tb, &ib).unwrap();
        assert_relative_eq!(c.normal.x, 1.0, epsilon = 1e-6);
        assert_relative_eq!(c.separation, -0.1, epsilon = 1e-6);
        assert_relative_eq!(c.position.x, 0.45, epsilon = 1e-5);
    }

    #[test]
    fn ball_box_contact_is_order_symmetric() {
        let (tball, iball) = xf(vec3(0.0, 1.4, 0.0), Quat::IDENTITY);
        let (tbox, ibox) = xf(Vec3::ZERO, Quat::IDENTITY);
        let ball = Shape::Ball { radius: 0.5 };
        let cube = Shape::Box { half_extents: vec3(1.0, 1.0, 1.0) };
        let ab = shape_shape_contact(&ball, &tball, &iball, &cube, &tbox, &ibox).unwrap();
        let ba = shape_shape_contact(&cube, &tbox, &ibox, &ball, &tball, &iball).unwrap();
        assert_relative_eq!(ab.normal.y, 1.0, epsilon = 1e-6);
        assert_relative_eq!(ba.normal.y, -1.0, epsilon = 1e-6);
        assert_relative_eq!(ab.separation, ba.separation, epsilon = 1e-6);
        assert_relative_eq!(ab.position.y, ba.position.y, epsilon = 1e-5);
    }

    #[test]
    fn resting_box_contact_is_centered() {
        // unit cube resting 1e-3 deep on a large platform
        let (ta, ia) = xf(vec3(0.0, 1.999, 0.0), Quat::IDENTITY);
        let (tb, ib) = xf(Vec3::ZERO, Quat::IDENTITY);
        let cube = Shape::Box { half_extents: vec3(1.0, 1.0, 1.0) };
        let platform = Shape::Box { half_extents: vec3(10.0, 1.0, 10.0) };
        let c = shape_shape_contact(&cube, &ta, &ia, &platform, &tb, &ib).unwrap();
        assert_relative_eq!(c.normal.y, 1.0, epsilon = 1e-6);
        assert_relative_eq!(c.separation, -1.0e-3, epsilon = 1e-5);
        // the four penetrating corners average out directly under the center
        assert_relative_eq!(c.position.x, 0.0, epsilon = 1e-5);
        assert_relative_eq!(c.position.z, 0.0, epsilon = 1e-5);
    }

    #[test]
    fn separated_boxes_have_no_contact() {
        let (ta, ia) = xf(vec3(0.0, 3.0, 0.0), Quat::IDENTITY);
        let (tb, ib) = xf(Vec3::ZERO, Quat::IDENTITY);
        let cube = Shape::Box { half_extents: vec3(1.0, 1.0, 1.0) };
        assert!(shape_shape_contact(&cube, &ta, &ia, &cube, &tb, &ib).is_none());
    }

    #[test]
    fn rotated_box_separates_on_edge_axis() {
        // 45-degree box whose corner reaches sqrt(2); just out of reach
        let rot = Quat::from_rotation_z(std::f32::consts::FRAC_PI_4);
        let (ta, ia) = xf(vec3(0.0, 2.42, 0.0), rot);
        let (tb, ib) = xf(Vec3::ZERO, Quat::IDENTITY);
        let cube = Shape::Box { half_extents: vec3(1.0, 1.0, 1.0) };
        assert!(shape_shape_contact(&cube, &ta, &ia, &cube, &tb, &ib).is_none());
        // and in reach it reports a downward-facing witness on the corner
        let (tc, ic) = xf(vec3(0.0, 2.40, 0.0), rot);
        let c = shape_shape_contact(&cube, &tc, &ic, &cube, &tb, &ib).unwrap();
        assert!(c.normal.y > 0.9);
        assert!(c.separation < 0.0);
    }
}
