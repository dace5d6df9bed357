/// Surface response coefficients. Pair values are the arithmetic mean of the
/// two sides.
#[derive(Copy, Clone, Debug)]
pub struct Material {
    pub static_friction: f32,
    pub dynamic_friction: f32,
    pub restitution: f32,
}

impl Default for Material {
    fn default() -> Self {
        Self { static_friction: 0.5, dynamic_friction: 0.4, restitution: 0.0 }
    }
}

impl Material {
    #[inline]
    pub fn combine(a: &Material, b: &Material) -> Material {
        Material {
            static_friction: 0.5 * (a.static_friction + b.static_friction),
            dynamic_friction: 0.5 * (a.dynamic_friction + b.dynamic_friction),
            restitution: 0.5 * (a.restitution + b.restitution),
        }
    }
}
