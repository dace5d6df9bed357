use core::fmt;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct ParticleId(pub u32);
impl fmt::Display for ParticleId { fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "ParticleId({})", self.0) } }

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct RigidBodyId(pub u32);
impl fmt::Display for RigidBodyId { fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "RigidBodyId({})", self.0) } }

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct StaticBodyId(pub u32);
impl fmt::Display for StaticBodyId { fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "StaticBodyId({})", self.0) } }
