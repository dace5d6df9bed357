use keelphys_core::types::{Mat3, Vec3};

/// Mass and body-space inertia for the built-in shapes.
#[derive(Copy, Clone, Debug)]
pub struct MassProps {
    pub mass: f32,
    pub inertia: Mat3,
}

impl MassProps {
    pub fn from_ball(radius: f32, mass: f32) -> Self {
        let i = 0.4 * mass * radius * radius;
        Self { mass, inertia: Mat3::from_diagonal(Vec3::splat(i).into()) }
    }

    pub fn from_box(half_extents: Vec3, mass: f32) -> Self {
        let d = half_extents * 2.0;
        let (x2, y2, z2) = (d.x * d.x, d.y * d.y, d.z * d.z);
        let ix = (1.0 / 12.0) * mass * (y2 + z2);
        let iy = (1.0 / 12.0) * mass * (x2 + z2);
        let iz = (1.0 / 12.0) * mass * (x2 + y2);
        Self { mass, inertia: Mat3::from_diagonal(Vec3::new(ix, iy, iz).into()) }
    }
}
