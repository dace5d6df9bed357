use keelphys_core::types::{Mat3, Transform, Vec3};
use keelphys_core::{ParticleId, Quat, RigidBodyId};
use keelphys_geom::{Material, Shape};

use crate::World;

/// Fired once per live particle after every `simulate`, on the driver thread.
/// The world may be queried but not mutated.
pub trait ParticleMotionListener {
    fn on_particle_motion(&self, world: &World, particle: ParticleId);
}

/// Rigid-body counterpart of [`ParticleMotionListener`].
pub trait RigidBodyMotionListener {
    fn on_rigid_body_motion(&self, world: &World, rigid_body: RigidBodyId);
}

pub struct ParticleCreateInfo {
    pub mass: f32,
    pub radius: f32,
    pub position: Vec3,
    pub velocity: Vec3,
    pub material: Material,
    pub motion_callback: Option<Box<dyn ParticleMotionListener>>,
}

impl Default for ParticleCreateInfo {
    fn default() -> Self {
        Self {
            mass: 1.0,
            radius: 0.1,
            position: Vec3::ZERO,
            velocity: Vec3::ZERO,
            material: Material::default(),
            motion_callback: None,
        }
    }
}

pub struct RigidBodyCreateInfo {
    pub shape: Shape,
    pub mass: f32,
    /// Body-space inertia tensor; inverted at creation.
    pub inertia_tensor: Mat3,
    pub position: Vec3,
    pub velocity: Vec3,
    pub orientation: Quat,
    pub angular_velocity: Vec3,
    pub material: Material,
    pub motion_callback: Option<Box<dyn RigidBodyMotionListener>>,
}

impl Default for RigidBodyCreateInfo {
    fn default() -> Self {
        Self {
            shape: Shape::Ball { radius: 0.5 },
            mass: 1.0,
            inertia_tensor: Mat3::IDENTITY,
            position: Vec3::ZERO,
            velocity: Vec3::ZERO,
            orientation: Quat::IDENTITY,
            angular_velocity: Vec3::ZERO,
            material: Material::default(),
            motion_callback: None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct StaticBodyCreateInfo {
    pub shape: Shape,
    pub position: Vec3,
    pub orientation: Quat,
    pub material: Material,
}

impl Default for StaticBodyCreateInfo {
    fn default() -> Self {
        Self {
            shape: Shape::Box { half_extents: Vec3::ONE },
            position: Vec3::ZERO,
            orientation: Quat::IDENTITY,
            material: Material::default(),
        }
    }
}

pub(crate) struct ParticleData {
    pub leaf: u32,
    pub pairs_begin: u32,
    pub pair_count: u16,
    pub marked: bool,
    pub awake: bool,
    pub radius: f32,
    pub inverse_mass: f32,
    pub material: Material,
    pub previous_position: Vec3,
    pub position: Vec3,
    pub velocity: Vec3,
    pub waking_motion: f32,
    pub motion_callback: Option<Box<dyn ParticleMotionListener>>,
}

pub(crate) struct RigidBodyData {
    pub leaf: u32,
    pub pairs_begin: u32,
    pub pair_count: u16,
    pub marked: bool,
    pub awake: bool,
    pub shape: Shape,
    pub inverse_mass: f32,
    /// Body-space inverse inertia tensor.
    pub inverse_inertia: Mat3,
    pub material: Material,
    pub previous_position: Vec3,
    pub position: Vec3,
    pub velocity: Vec3,
    pub previous_orientation: Quat,
    pub orientation: Quat,
    pub angular_velocity: Vec3,
    pub waking_motion: f32,
    pub motion_callback: Option<Box<dyn RigidBodyMotionListener>>,
}

pub(crate) struct StaticBodyData {
    pub leaf: u32,
    pub shape: Shape,
    pub material: Material,
    pub transform: Transform,
    pub inverse_transform: Transform,
}
