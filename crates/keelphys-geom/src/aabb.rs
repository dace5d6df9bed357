use keelphys_core::types::Vec3;

#[derive(Copy, Clone, Debug, Default)]
pub struct Aabb { pub min: Vec3, pub max: Vec3 }

impl Aabb {
    #[inline] pub fn new(min: Vec3, max: Vec3) -> Self { Self { min, max } }
    #[inline] pub fn from_center_half_extents(c: Vec3, he: Vec3) -> Self {
        Self { min: c - he, max: c + he }
    }
    #[inline] pub fn center(&self) -> Vec3 { (self.min + self.max) * 0.5 }
    #[inline] pub fn overlaps(&self, other: &Aabb) -> bool {
        !(self.max.x < other.min.x || self.min.x > other.max.x ||
            self.max.y < other.min.y || self.min.y > other.max.y ||
            self.max.z < other.min.z || self.min.z > other.max.z)
    }
    #[inline] pub fn merge(&self, other: &Aabb) -> Aabb {
        Aabb { min: self.min.min(other.min), max: self.max.max(other.max) }
    }
    #[inline] pub fn expanded(&self, r: f32) -> Aabb {
        let e = Vec3::splat(r);
        Aabb { min: self.min - e, max: self.max + e }
    }
    #[inline] pub fn contains_point(&self, p: Vec3) -> bool {
        p.cmpge(self.min).all() && p.cmple(self.max).all()
    }
}
