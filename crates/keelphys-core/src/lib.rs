pub mod scalar;
pub mod ids;
pub mod types;
pub mod error;
pub mod arena;
pub mod bits;
pub mod queue;
pub mod hash;
pub mod rng;
pub mod time;

pub use scalar::Scalar;
pub use ids::{ParticleId, RigidBodyId, StaticBodyId};
pub use types::{rigid, rigid_inverse, vec3, Mat3, Transform, Vec3};
pub use error::{Error, Result};
pub use arena::Arena;
pub use bits::BitSet;
pub use queue::FixedQueue;
pub use hash::StateHasher;
pub use rng::SplitMix64;
pub use time::StepStats;
pub use glam::Quat;
