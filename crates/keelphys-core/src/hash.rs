use blake3::Hasher;
use glam::Quat;

use crate::types::Vec3;

/// Incremental digest over simulation state, for determinism checks.
pub struct StateHasher(Hasher);

impl StateHasher {
    pub fn new() -> Self { StateHasher(Hasher::new()) }

    #[inline] pub fn write_bytes(&mut self, bytes: &[u8]) { self.0.update(bytes); }
    #[inline] pub fn write_u32(&mut self, value: u32) { self.write_bytes(&value.to_le_bytes()); }
    #[inline] pub fn write_f32(&mut self, value: f32) { self.write_bytes(&value.to_le_bytes()); }

    #[inline]
    pub fn write_vec3(&mut self, v: Vec3) {
        for c in v.to_array() { self.write_f32(c); }
    }

    #[inline]
    pub fn write_quat(&mut self, q: Quat) {
        for c in q.to_array() { self.write_f32(c); }
    }

    pub fn finish(self) -> [u8; 32] { *self.0.finalize().as_bytes() }
}

impl Default for StateHasher {
    fn default() -> Self { Self::new() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vec3;

    #[test]
    fn digest_is_order_sensitive() {
        let mut a = StateHasher::new();
        a.write_vec3(vec3(1.0, 2.0, 3.0));
        let mut b = StateHasher::new();
        b.write_vec3(vec3(3.0, 2.0, 1.0));
        assert_ne!(a.finish(), b.finish());
    }

    #[test]
    fn digest_is_reproducible() {
        let run = || {
            let mut h = StateHasher::new();
            h.write_u32(7);
            h.write_quat(Quat::IDENTITY);
            h.finish()
        };
        assert_eq!(run(), run());
    }
}
