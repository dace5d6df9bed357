//! Simulation world.
//!
//! One `simulate` call refreshes leaf bounds, rebuilds the AABB tree,
//! enumerates overlap pairs, back-links them into the dynamic objects, floods
//! connected components, decides wake/sleep per component, colors each awake
//! component, stages per-color solve chunks, then runs the substep loop:
//! integrate, position solve, derive velocities, velocity solve. Motion
//! callbacks fire once at the end.

pub mod body;
mod graph;
mod solver;

use std::cell::{Cell, UnsafeCell};

use keelphys_collision::AabbTree;
use keelphys_core::types::Vec3;
use keelphys_core::{rigid, Arena, BitSet, FixedQueue, Quat, StateHasher};
use keelphys_geom::{bounds, Aabb};
use keelphys_jobs::{Latch, TaskRef};

use body::{ParticleData, RigidBodyData, StaticBodyData};
use graph::{
    ColorGroups, DynamicRef, NeighborGroups, NeighborPair, PairKind, COLOR_MARKED,
    COLOR_UNMARKED, MAX_COLORS,
};
use solver::{ContactRec, SolveChunk, SolvePhase, SolveShared, SolveTask, MAX_SOLVE_CHUNK};

pub use body::{
    ParticleCreateInfo, ParticleMotionListener, RigidBodyCreateInfo, RigidBodyMotionListener,
    StaticBodyCreateInfo,
};
pub use keelphys_core::{
    Error, ParticleId, Result, RigidBodyId, StaticBodyId, StepStats,
};
pub use keelphys_geom::{MassProps, Material, Shape};
pub use keelphys_jobs::{Executor, InlineExecutor, ThreadPool};

const VELOCITY_DAMPING: f32 = 0.99;
const WAKING_MOTION_EPSILON: f32 = 1.0 / 256.0;
const WAKING_MOTION_INITIALIZER: f32 = 2.0 * WAKING_MOTION_EPSILON;
const WAKING_MOTION_LIMIT: f32 = 8.0 * WAKING_MOTION_EPSILON;
const WAKING_MOTION_SMOOTHING: f32 = 7.0 / 8.0;

/// Capacity ceilings; all working storage is sized here, `simulate` never
/// allocates.
#[derive(Copy, Clone, Debug)]
pub struct WorldCreateInfo {
    pub max_particles: usize,
    pub max_rigid_bodies: usize,
    pub max_static_bodies: usize,
    pub max_aabb_tree_leaves: usize,
    pub max_aabb_tree_internal_nodes: usize,
    pub max_neighbor_pairs: usize,
    pub max_neighbor_groups: usize,
    pub max_coloring_fringe: usize,
    pub max_color_group_pairs: usize,
    pub gravitational_acceleration: Vec3,
}

impl Default for WorldCreateInfo {
    fn default() -> Self {
        Self {
            max_particles: 16384,
            max_rigid_bodies: 16384,
            max_static_bodies: 16384,
            max_aabb_tree_leaves: 49152,
            max_aabb_tree_internal_nodes: 49152,
            max_neighbor_pairs: 65536,
            max_neighbor_groups: 32768,
            max_coloring_fringe: 65536,
            max_color_group_pairs: 65536,
            gravitational_acceleration: Vec3::new(0.0, -9.81, 0.0),
        }
    }
}

#[derive(Copy, Clone)]
pub struct SimulateInfo<'a> {
    pub delta_time: f32,
    pub substep_count: u32,
    pub executor: &'a dyn Executor,
}

#[derive(Copy, Clone, Debug)]
enum ObjectRef {
    Particle(u32),
    RigidBody(u32),
    StaticBody(u32),
}

/// Driver-thread diagnostics, printed every `print_every` frames.
#[derive(Copy, Clone, Debug, Default)]
pub struct DebugSettings {
    pub print_every: u32,
    pub show_bodies: bool,
    pub max_lines: usize,
}

pub struct World {
    gravity: Vec3,
    particles: Arena<ParticleData>,
    rigid_bodies: Arena<RigidBodyData>,
    static_bodies: Arena<StaticBodyData>,
    tree: AabbTree<ObjectRef>,
    pairs: Vec<NeighborPair>,
    max_neighbor_pairs: usize,
    pair_refs: Vec<u32>,
    groups: NeighborGroups,
    awake_groups: Vec<u32>,
    coloring_bits: BitSet,
    coloring_fringe: FixedQueue<u32>,
    color_groups: ColorGroups,
    contact_store: Box<[UnsafeCell<ContactRec>]>,
    position_tasks: Vec<SolveTask>,
    velocity_tasks: Vec<SolveTask>,
    solve_shared: Box<SolveShared>,
    debug: DebugSettings,
    tick: u64,
}

impl World {
    pub fn new(info: &WorldCreateInfo) -> Self {
        Self {
            gravity: info.gravitational_acceleration,
            particles: Arena::new(info.max_particles, "particles"),
            rigid_bodies: Arena::new(info.max_rigid_bodies, "rigid bodies"),
            static_bodies: Arena::new(info.max_static_bodies, "static bodies"),
            tree: AabbTree::with_capacity(
                info.max_aabb_tree_leaves,
                info.max_aabb_tree_internal_nodes,
            ),
            pairs: Vec::with_capacity(info.max_neighbor_pairs),
            max_neighbor_pairs: info.max_neighbor_pairs,
            pair_refs: Vec::with_capacity(2 * info.max_neighbor_pairs),
            groups: NeighborGroups::new(
                info.max_particles + info.max_rigid_bodies,
                info.max_neighbor_pairs,
                info.max_neighbor_groups,
            ),
            awake_groups: Vec::with_capacity(info.max_neighbor_groups),
            coloring_bits: BitSet::new(MAX_COLORS),
            coloring_fringe: FixedQueue::new(info.max_coloring_fringe, "coloring fringe"),
            color_groups: ColorGroups::new(info.max_color_group_pairs),
            contact_store: (0..info.max_color_group_pairs)
                .map(|_| UnsafeCell::new(ContactRec::default()))
                .collect::<Vec<_>>()
                .into_boxed_slice(),
            position_tasks: Vec::with_capacity(info.max_color_group_pairs),
            velocity_tasks: Vec::with_capacity(info.max_color_group_pairs),
            solve_shared: Box::new(SolveShared::unbound()),
            debug: DebugSettings::default(),
            tick: 0,
        }
    }

    pub fn set_debug(&mut self, settings: DebugSettings) {
        self.debug = settings;
    }

    #[inline] pub fn gravity(&self) -> Vec3 { self.gravity }
    pub fn set_gravity(&mut self, gravity: Vec3) { self.gravity = gravity; }

    /* ---------- create / destroy ---------- */

    pub fn create_particle(&mut self, info: ParticleCreateInfo) -> Result<ParticleId> {
        if !info.mass.is_finite() || info.mass <= 0.0 {
            return Err(Error::InvalidArgument("particle mass must be positive and finite"));
        }
        if !info.radius.is_finite() || info.radius <= 0.0 {
            return Err(Error::InvalidArgument("particle radius must be positive and finite"));
        }
        let leaf_bounds =
            Aabb::from_center_half_extents(info.position, Vec3::splat(info.radius));
        let leaf = self.tree.create_leaf(leaf_bounds, ObjectRef::Particle(0))?;
        let data = ParticleData {
            leaf,
            pairs_begin: 0,
            pair_count: 0,
            marked: false,
            awake: true,
            radius: info.radius,
            inverse_mass: 1.0 / info.mass,
            material: info.material,
            previous_position: info.position,
            position: info.position,
            velocity: info.velocity,
            waking_motion: WAKING_MOTION_INITIALIZER,
            motion_callback: info.motion_callback,
        };
        let index = match self.particles.insert(data) {
            Ok(index) => index,
            Err(err) => {
                self.tree.destroy_leaf(leaf);
                return Err(err);
            }
        };
        *self.tree.leaf_payload_mut(leaf) = ObjectRef::Particle(index);
        Ok(ParticleId(index))
    }

    pub fn destroy_particle(&mut self, particle: ParticleId) {
        // leaf first, then the slot
        let leaf = self.particles.get(particle.0).leaf;
        self.tree.destroy_leaf(leaf);
        self.particles.remove(particle.0);
    }

    pub fn create_rigid_body(&mut self, info: RigidBodyCreateInfo) -> Result<RigidBodyId> {
        if !info.mass.is_finite() || info.mass <= 0.0 {
            return Err(Error::InvalidArgument("rigid body mass must be positive and finite"));
        }
        if (info.orientation.length() - 1.0).abs() > 1.0e-3 {
            return Err(Error::InvalidArgument("rigid body orientation must be unit length"));
        }
        let det = info.inertia_tensor.determinant();
        if !det.is_finite() || det == 0.0 {
            return Err(Error::InvalidArgument("rigid body inertia tensor must be invertible"));
        }
        let inverse_inertia = info.inertia_tensor.inverse();
        let orientation = info.orientation.normalize();
        let xf = rigid(info.position, orientation);
        let leaf = self.tree.create_leaf(bounds(&info.shape, &xf), ObjectRef::RigidBody(0))?;
        let data = RigidBodyData {
            leaf,
            pairs_begin: 0,
            pair_count: 0,
            marked: false,
            awake: true,
            shape: info.shape,
            inverse_mass: 1.0 / info.mass,
            inverse_inertia,
            material: info.material,
            previous_position: info.position,
            position: info.position,
            velocity: info.velocity,
            previous_orientation: orientation,
            orientation,
            angular_velocity: info.angular_velocity,
            waking_motion: WAKING_MOTION_INITIALIZER,
            motion_callback: info.motion_callback,
        };
        let index = match self.rigid_bodies.insert(data) {
            Ok(index) => index,
            Err(err) => {
                self.tree.destroy_leaf(leaf);
                return Err(err);
            }
        };
        *self.tree.leaf_payload_mut(leaf) = ObjectRef::RigidBody(index);
        Ok(RigidBodyId(index))
    }

    pub fn destroy_rigid_body(&mut self, rigid_body: RigidBodyId) {
        let leaf = self.rigid_bodies.get(rigid_body.0).leaf;
        self.tree.destroy_leaf(leaf);
        self.rigid_bodies.remove(rigid_body.0);
    }

    pub fn create_static_body(&mut self, info: StaticBodyCreateInfo) -> Result<StaticBodyId> {
        if (info.orientation.length() - 1.0).abs() > 1.0e-3 {
            return Err(Error::InvalidArgument("static body orientation must be unit length"));
        }
        let transform = rigid(info.position, info.orientation.normalize());
        let inverse_transform = transform.inverse();
        let leaf = self
            .tree
            .create_leaf(bounds(&info.shape, &transform), ObjectRef::StaticBody(0))?;
        let data = StaticBodyData {
            leaf,
            shape: info.shape,
            material: info.material,
            transform,
            inverse_transform,
        };
        let index = match self.static_bodies.insert(data) {
            Ok(index) => index,
            Err(err) => {
                self.tree.destroy_leaf(leaf);
                return Err(err);
            }
        };
        *self.tree.leaf_payload_mut(leaf) = ObjectRef::StaticBody(index);
        Ok(StaticBodyId(index))
    }

    pub fn destroy_static_body(&mut self, static_body: StaticBodyId) {
        let leaf = self.static_bodies.get(static_body.0).leaf;
        self.tree.destroy_leaf(leaf);
        self.static_bodies.remove(static_body.0);
    }

    /* ---------- queries ---------- */

    pub fn particle_is_awake(&self, particle: ParticleId) -> bool {
        self.particles.get(particle.0).awake
    }
    pub fn particle_waking_motion(&self, particle: ParticleId) -> f32 {
        self.particles.get(particle.0).waking_motion
    }
    pub fn particle_position(&self, particle: ParticleId) -> Vec3 {
        self.particles.get(particle.0).position
    }
    pub fn particle_velocity(&self, particle: ParticleId) -> Vec3 {
        self.particles.get(particle.0).velocity
    }

    pub fn rigid_body_is_awake(&self, rigid_body: RigidBodyId) -> bool {
        self.rigid_bodies.get(rigid_body.0).awake
    }
    pub fn rigid_body_waking_motion(&self, rigid_body: RigidBodyId) -> f32 {
        self.rigid_bodies.get(rigid_body.0).waking_motion
    }
    pub fn rigid_body_position(&self, rigid_body: RigidBodyId) -> Vec3 {
        self.rigid_bodies.get(rigid_body.0).position
    }
    pub fn rigid_body_orientation(&self, rigid_body: RigidBodyId) -> Quat {
        self.rigid_bodies.get(rigid_body.0).orientation
    }
    pub fn rigid_body_velocity(&self, rigid_body: RigidBodyId) -> Vec3 {
        self.rigid_bodies.get(rigid_body.0).velocity
    }
    pub fn rigid_body_angular_velocity(&self, rigid_body: RigidBodyId) -> Vec3 {
        self.rigid_bodies.get(rigid_body.0).angular_velocity
    }

    /// Digest of all dynamic state, for determinism checks.
    pub fn state_hash(&self) -> [u8; 32] {
        let mut hasher = StateHasher::new();
        hasher.write_u32(self.particles.len() as u32);
        self.particles.for_each(|index, data| {
            hasher.write_u32(index);
            hasher.write_vec3(data.position);
            hasher.write_vec3(data.velocity);
            hasher.write_f32(data.waking_motion);
            hasher.write_bytes(&[data.awake as u8]);
        });
        hasher.write_u32(self.rigid_bodies.len() as u32);
        self.rigid_bodies.for_each(|index, data| {
            hasher.write_u32(index);
            hasher.write_vec3(data.position);
            hasher.write_quat(data.orientation);
            hasher.write_vec3(data.velocity);
            hasher.write_vec3(data.angular_velocity);
            hasher.write_f32(data.waking_motion);
            hasher.write_bytes(&[data.awake as u8]);
        });
        hasher.finish()
    }

    /* ---------- simulate ---------- */

    pub fn simulate(&mut self, info: SimulateInfo<'_>) -> Result<StepStats> {
        if info.substep_count == 0 {
            return Err(Error::InvalidArgument("substep_count must be at least 1"));
        }
        if !info.delta_time.is_finite() || info.delta_time < 0.0 {
            return Err(Error::InvalidArgument("delta_time must be finite and non-negative"));
        }
        self.tick = self.tick.wrapping_add(1);
        if info.delta_time == 0.0 {
            self.fire_motion_callbacks();
            return Ok(StepStats::default());
        }

        self.refit_leaves(info.delta_time);
        self.tree.build()?;
        self.clear_neighbor_state();
        self.find_neighbor_pairs()?;
        self.assign_neighbor_pairs();
        self.find_neighbor_groups()?;

        self.awake_groups.clear();
        self.color_groups.clear();
        for group_index in 0..self.groups.group_count() {
            if self.update_group_awake_state(group_index) {
                self.awake_groups.push(group_index as u32);
                self.color_neighbor_group(group_index)?;
            }
        }
        self.assign_color_groups()?;

        let h = info.delta_time / info.substep_count as f32;
        let h_inv = 1.0 / h;
        self.stage_solve_chunks(h, h_inv);
        let damping = VELOCITY_DAMPING.powf(h);
        let smoothing = 1.0 - (1.0 - WAKING_MOTION_SMOOTHING).powf(h);
        for _ in 0..info.substep_count {
            self.integrate(h, damping, smoothing);
            self.dispatch_solve(info.executor, SolvePhase::Position);
            self.derive_velocities(h_inv);
            self.dispatch_solve(info.executor, SolvePhase::Velocity);
        }
        self.fire_motion_callbacks();

        let stats = StepStats {
            neighbor_pairs: self.pairs.len() as u32,
            awake_groups: self.awake_groups.len() as u32,
            solve_chunks: self.position_tasks.len() as u32,
        };
        if self.debug.print_every != 0 && self.tick % self.debug.print_every as u64 == 0 {
            self.print_debug_block(&stats);
        }
        Ok(stats)
    }

    /* ---------- broadphase ---------- */

    fn refit_leaves(&mut self, delta_time: f32) {
        let gravity_term = 2.0 * self.gravity.length() * delta_time * delta_time;
        let tree = &mut self.tree;
        self.particles.for_each(|_, data| {
            let margin = 2.0 * data.velocity.length() * delta_time + gravity_term;
            *tree.leaf_bounds_mut(data.leaf) = Aabb::from_center_half_extents(
                data.position,
                Vec3::splat(data.radius + margin),
            );
        });
        self.rigid_bodies.for_each(|_, data| {
            let margin = 2.0 * data.velocity.length() * delta_time + gravity_term;
            let xf = rigid(data.position, data.orientation);
            *tree.leaf_bounds_mut(data.leaf) = bounds(&data.shape, &xf).expanded(margin);
        });
    }

    fn clear_neighbor_state(&mut self) {
        self.particles.for_each_mut(|_, data| data.pair_count = 0);
        self.rigid_bodies.for_each_mut(|_, data| data.pair_count = 0);
        self.pairs.clear();
        self.pair_refs.clear();
        self.groups.clear();
    }

    fn find_neighbor_pairs(&mut self) -> Result<()> {
        let pairs = &mut self.pairs;
        let particles = &mut self.particles;
        let rigid_bodies = &mut self.rigid_bodies;
        let max_pairs = self.max_neighbor_pairs;
        self.tree.for_each_overlapping_leaf_pair(&mut |a: ObjectRef, b: ObjectRef| {
            if let (ObjectRef::StaticBody(_), ObjectRef::StaticBody(_)) = (a, b) {
                return Ok(());
            }
            if pairs.len() == max_pairs {
                return Err(Error::CapacityExceeded("neighbor pairs"));
            }
            let pair = match (a, b) {
                (ObjectRef::Particle(i), ObjectRef::Particle(j)) => {
                    particles.get_mut(i).pair_count += 1;
                    particles.get_mut(j).pair_count += 1;
                    NeighborPair::new([i, j], PairKind::ParticleParticle)
                }
                (ObjectRef::Particle(i), ObjectRef::RigidBody(j))
                | (ObjectRef::RigidBody(j), ObjectRef::Particle(i)) => {
                    particles.get_mut(i).pair_count += 1;
                    rigid_bodies.get_mut(j).pair_count += 1;
                    NeighborPair::new([i, j], PairKind::ParticleRigidBody)
                }
                (ObjectRef::Particle(i), ObjectRef::StaticBody(j))
                | (ObjectRef::StaticBody(j), ObjectRef::Particle(i)) => {
                    particles.get_mut(i).pair_count += 1;
                    NeighborPair::new([i, j], PairKind::ParticleStaticBody)
                }
                (ObjectRef::RigidBody(i), ObjectRef::RigidBody(j)) => {
                    rigid_bodies.get_mut(i).pair_count += 1;
                    rigid_bodies.get_mut(j).pair_count += 1;
                    NeighborPair::new([i, j], PairKind::RigidBodyRigidBody)
                }
                (ObjectRef::RigidBody(i), ObjectRef::StaticBody(j))
                | (ObjectRef::StaticBody(j), ObjectRef::RigidBody(i)) => {
                    rigid_bodies.get_mut(i).pair_count += 1;
                    NeighborPair::new([i, j], PairKind::RigidBodyStaticBody)
                }
                (ObjectRef::StaticBody(_), ObjectRef::StaticBody(_)) => return Ok(()),
            };
            pairs.push(pair);
            Ok(())
        })
    }

    fn assign_neighbor_pairs(&mut self) {
        let mut cursor = 0u32;
        self.particles.for_each_mut(|_, data| {
            data.pairs_begin = cursor;
            cursor += data.pair_count as u32;
            data.pair_count = 0;
        });
        self.rigid_bodies.for_each_mut(|_, data| {
            data.pairs_begin = cursor;
            cursor += data.pair_count as u32;
            data.pair_count = 0;
        });
        self.pair_refs.clear();
        self.pair_refs.resize(cursor as usize, 0);
        for index in 0..self.pairs.len() {
            let pair = self.pairs[index];
            let pair_index = index as u32;
            match pair.kind {
                PairKind::ParticleParticle => {
                    self.push_particle_ref(pair.objects[0], pair_index);
                    self.push_particle_ref(pair.objects[1], pair_index);
                }
                PairKind::ParticleRigidBody => {
                    self.push_particle_ref(pair.objects[0], pair_index);
                    self.push_rigid_ref(pair.objects[1], pair_index);
                }
                PairKind::ParticleStaticBody => {
                    self.push_particle_ref(pair.objects[0], pair_index);
                }
                PairKind::RigidBodyRigidBody => {
                    self.push_rigid_ref(pair.objects[0], pair_index);
                    self.push_rigid_ref(pair.objects[1], pair_index);
                }
                PairKind::RigidBodyStaticBody => {
                    self.push_rigid_ref(pair.objects[0], pair_index);
                }
            }
        }
    }

    fn push_particle_ref(&mut self, object: u32, pair_index: u32) {
        let data = self.particles.get_mut(object);
        self.pair_refs[(data.pairs_begin + data.pair_count as u32) as usize] = pair_index;
        data.pair_count += 1;
    }

    fn push_rigid_ref(&mut self, object: u32, pair_index: u32) {
        let data = self.rigid_bodies.get_mut(object);
        self.pair_refs[(data.pairs_begin + data.pair_count as u32) as usize] = pair_index;
        data.pair_count += 1;
    }

    /* ---------- components ---------- */

    fn find_neighbor_groups(&mut self) -> Result<()> {
        self.particles.for_each_mut(|_, data| data.marked = false);
        self.rigid_bodies.for_each_mut(|_, data| data.marked = false);
        let mut fringe_index = 0usize;
        for index in 0..self.particles.capacity() as u32 {
            if !self.particles.contains(index) || self.particles.get(index).marked {
                continue;
            }
            self.particles.get_mut(index).marked = true;
            self.groups.begin_group()?;
            self.groups.push_object(DynamicRef::Particle(index))?;
            while fringe_index != self.groups.object_count() {
                let object = self.groups.object(fringe_index);
                self.visit_group_object(object)?;
                fringe_index += 1;
            }
        }
        for index in 0..self.rigid_bodies.capacity() as u32 {
            if !self.rigid_bodies.contains(index) || self.rigid_bodies.get(index).marked {
                continue;
            }
            self.rigid_bodies.get_mut(index).marked = true;
            self.groups.begin_group()?;
            self.groups.push_object(DynamicRef::RigidBody(index))?;
            while fringe_index != self.groups.object_count() {
                let object = self.groups.object(fringe_index);
                self.visit_group_object(object)?;
                fringe_index += 1;
            }
        }
        Ok(())
    }

    fn visit_group_object(&mut self, object: DynamicRef) -> Result<()> {
        match object {
            DynamicRef::Particle(index) => {
                let (begin, count) = {
                    let data = self.particles.get(index);
                    (data.pairs_begin, data.pair_count)
                };
                for k in 0..count as u32 {
                    let pair_index = self.pair_refs[(begin + k) as usize];
                    let pair = self.pairs[pair_index as usize];
                    match pair.kind {
                        PairKind::ParticleParticle => {
                            let neighbor = pair.objects[(pair.objects[0] == index) as usize];
                            if !self.particles.get(neighbor).marked {
                                self.particles.get_mut(neighbor).marked = true;
                                self.groups.push_object(DynamicRef::Particle(neighbor))?;
                            }
                            self.attach_pair(pair_index)?;
                        }
                        PairKind::ParticleRigidBody => {
                            let neighbor = pair.objects[1];
                            if !self.rigid_bodies.get(neighbor).marked {
                                self.rigid_bodies.get_mut(neighbor).marked = true;
                                self.groups.push_object(DynamicRef::RigidBody(neighbor))?;
                            }
                            self.attach_pair(pair_index)?;
                        }
                        PairKind::ParticleStaticBody => {
                            self.groups.push_pair(pair_index)?;
                        }
                        _ => {}
                    }
                }
            }
            DynamicRef::RigidBody(index) => {
                let (begin, count) = {
                    let data = self.rigid_bodies.get(index);
                    (data.pairs_begin, data.pair_count)
                };
                for k in 0..count as u32 {
                    let pair_index = self.pair_refs[(begin + k) as usize];
                    let pair = self.pairs[pair_index as usize];
                    match pair.kind {
                        PairKind::ParticleRigidBody => {
                            let neighbor = pair.objects[0];
                            if !self.particles.get(neighbor).marked {
                                self.particles.get_mut(neighbor).marked = true;
                                self.groups.push_object(DynamicRef::Particle(neighbor))?;
                            }
                            self.attach_pair(pair_index)?;
                        }
                        PairKind::RigidBodyRigidBody => {
                            let neighbor = pair.objects[(pair.objects[0] == index) as usize];
                            if !self.rigid_bodies.get(neighbor).marked {
                                self.rigid_bodies.get_mut(neighbor).marked = true;
                                self.groups.push_object(DynamicRef::RigidBody(neighbor))?;
                            }
                            self.attach_pair(pair_index)?;
                        }
                        PairKind::RigidBodyStaticBody => {
                            self.groups.push_pair(pair_index)?;
                        }
                        _ => {}
                    }
                }
            }
        }
        Ok(())
    }

    fn attach_pair(&mut self, pair_index: u32) -> Result<()> {
        let pair = &mut self.pairs[pair_index as usize];
        if pair.color == COLOR_UNMARKED {
            pair.color = COLOR_MARKED;
            self.groups.push_pair(pair_index)?;
        }
        Ok(())
    }

    /* ---------- wake / sleep ---------- */

    fn update_group_awake_state(&mut self, group_index: usize) -> bool {
        let group = self.groups.group(group_index);
        let mut contains_awake = false;
        let mut contains_sleeping = false;
        let mut sleepable = true;
        for i in group.objects_begin..group.objects_end {
            if !(sleepable || !contains_awake || !contains_sleeping) {
                break;
            }
            let (awake, waking_motion) = match self.groups.object(i as usize) {
                DynamicRef::Particle(p) => {
                    let data = self.particles.get(p);
                    (data.awake, data.waking_motion)
                }
                DynamicRef::RigidBody(r) => {
                    let data = self.rigid_bodies.get(r);
                    (data.awake, data.waking_motion)
                }
            };
            if awake {
                contains_awake = true;
                if waking_motion > WAKING_MOTION_EPSILON {
                    sleepable = false;
                }
            } else {
                contains_sleeping = true;
            }
        }
        if !contains_awake {
            return false;
        }
        if sleepable {
            for i in group.objects_begin..group.objects_end {
                match self.groups.object(i as usize) {
                    DynamicRef::Particle(p) => {
                        let data = self.particles.get_mut(p);
                        if data.awake {
                            data.velocity = Vec3::ZERO;
                            data.awake = false;
                        }
                    }
                    DynamicRef::RigidBody(r) => {
                        let data = self.rigid_bodies.get_mut(r);
                        if data.awake {
                            data.velocity = Vec3::ZERO;
                            data.angular_velocity = Vec3::ZERO;
                            data.awake = false;
                        }
                    }
                }
            }
            return false;
        }
        if contains_sleeping {
            for i in group.objects_begin..group.objects_end {
                match self.groups.object(i as usize) {
                    DynamicRef::Particle(p) => {
                        let data = self.particles.get_mut(p);
                        if !data.awake {
                            data.waking_motion = WAKING_MOTION_INITIALIZER;
                            data.awake = true;
                        }
                    }
                    DynamicRef::RigidBody(r) => {
                        let data = self.rigid_bodies.get_mut(r);
                        if !data.awake {
                            data.waking_motion = WAKING_MOTION_INITIALIZER;
                            data.awake = true;
                        }
                    }
                }
            }
        }
        true
    }

    /* ---------- coloring ---------- */

    fn pair_endpoint_slices(&self, pair: &NeighborPair) -> [(u32, u16); 2] {
        let particle = |i: u32| {
            let data = self.particles.get(i);
            (data.pairs_begin, data.pair_count)
        };
        let rigid_body = |i: u32| {
            let data = self.rigid_bodies.get(i);
            (data.pairs_begin, data.pair_count)
        };
        match pair.kind {
            PairKind::ParticleParticle => [particle(pair.objects[0]), particle(pair.objects[1])],
            PairKind::ParticleRigidBody => [particle(pair.objects[0]), rigid_body(pair.objects[1])],
            PairKind::ParticleStaticBody => [particle(pair.objects[0]), (0, 0)],
            PairKind::RigidBodyRigidBody => {
                [rigid_body(pair.objects[0]), rigid_body(pair.objects[1])]
            }
            PairKind::RigidBodyStaticBody => [rigid_body(pair.objects[0]), (0, 0)],
        }
    }

    fn color_neighbor_group(&mut self, group_index: usize) -> Result<()> {
        let group = self.groups.group(group_index);
        if group.pairs_begin == group.pairs_end {
            return Ok(());
        }
        for j in group.pairs_begin..group.pairs_end {
            let pair_index = self.groups.pair(j as usize);
            self.pairs[pair_index as usize].color = COLOR_UNMARKED;
        }
        let seed = self.groups.pair(group.pairs_begin as usize);
        self.pairs[seed as usize].color = COLOR_MARKED;
        self.coloring_fringe.push_back(seed)?;
        while let Some(pair_index) = self.coloring_fringe.pop_front() {
            self.coloring_bits.reset();
            let pair = self.pairs[pair_index as usize];
            for (begin, count) in self.pair_endpoint_slices(&pair) {
                for k in 0..count as u32 {
                    let neighbor_index = self.pair_refs[(begin + k) as usize];
                    let color = self.pairs[neighbor_index as usize].color;
                    if color == COLOR_UNMARKED {
                        self.pairs[neighbor_index as usize].color = COLOR_MARKED;
                        self.coloring_fringe.push_back(neighbor_index)?;
                    } else if color != COLOR_MARKED {
                        self.coloring_bits.set(color as usize);
                    }
                }
            }
            let color = self
                .coloring_bits
                .first_zero(MAX_COLORS)
                .ok_or(Error::ColoringExhausted)?;
            self.pairs[pair_index as usize].color = color as u16;
            self.color_groups.count(color as u16);
        }
        Ok(())
    }

    fn assign_color_groups(&mut self) -> Result<()> {
        self.color_groups.reserve()?;
        for k in 0..self.awake_groups.len() {
            let group = self.groups.group(self.awake_groups[k] as usize);
            for j in group.pairs_begin..group.pairs_end {
                let pair_index = self.groups.pair(j as usize);
                let color = self.pairs[pair_index as usize].color;
                self.color_groups.push(pair_index, color);
            }
        }
        Ok(())
    }

    /* ---------- substeps ---------- */

    fn integrate(&mut self, h: f32, damping: f32, smoothing: f32) {
        let gravity = self.gravity;
        for k in 0..self.awake_groups.len() {
            let group = self.groups.group(self.awake_groups[k] as usize);
            for i in group.objects_begin..group.objects_end {
                match self.groups.object(i as usize) {
                    DynamicRef::Particle(p) => {
                        let data = self.particles.get_mut(p);
                        data.previous_position = data.position;
                        data.velocity += h * gravity;
                        data.velocity *= damping;
                        data.position += h * data.velocity;
                        data.waking_motion = ((1.0 - smoothing) * data.waking_motion
                            + smoothing * data.velocity.length_squared())
                        .min(WAKING_MOTION_LIMIT);
                    }
                    DynamicRef::RigidBody(r) => {
                        let data = self.rigid_bodies.get_mut(r);
                        data.previous_position = data.position;
                        data.previous_orientation = data.orientation;
                        data.velocity += h * gravity;
                        data.velocity *= damping;
                        data.position += h * data.velocity;
                        data.angular_velocity *= damping;
                        let w = data.angular_velocity;
                        let dq = Quat::from_xyzw(w.x, w.y, w.z, 0.0) * data.orientation * (0.5 * h);
                        data.orientation = (data.orientation + dq).normalize();
                        data.waking_motion = ((1.0 - smoothing) * data.waking_motion
                            + smoothing
                                * (data.velocity.length_squared()
                                    + data.angular_velocity.length_squared()))
                        .min(WAKING_MOTION_LIMIT);
                    }
                }
            }
        }
    }

    fn derive_velocities(&mut self, h_inv: f32) {
        for k in 0..self.awake_groups.len() {
            let group = self.groups.group(self.awake_groups[k] as usize);
            for i in group.objects_begin..group.objects_end {
                match self.groups.object(i as usize) {
                    DynamicRef::Particle(p) => {
                        let data = self.particles.get_mut(p);
                        data.velocity = (data.position - data.previous_position) * h_inv;
                    }
                    DynamicRef::RigidBody(r) => {
                        let data = self.rigid_bodies.get_mut(r);
                        data.velocity = (data.position - data.previous_position) * h_inv;
                        let dq = data.orientation * data.previous_orientation.conjugate();
                        let mut angular = Vec3::from(dq.xyz()) * (2.0 * h_inv);
                        // short arc
                        if dq.w < 0.0 {
                            angular = -angular;
                        }
                        data.angular_velocity = angular;
                    }
                }
            }
        }
    }

    fn stage_solve_chunks(&mut self, h: f32, h_inv: f32) {
        self.position_tasks.clear();
        self.velocity_tasks.clear();
        *self.solve_shared = SolveShared {
            particles: self.particles.data_ptr(),
            rigid_bodies: self.rigid_bodies.data_ptr(),
            static_bodies: self.static_bodies.data_ptr(),
            pairs: self.pairs.as_ptr(),
            color_pairs: self.color_groups.pairs_ptr(),
            contacts: self.contact_store.as_ptr() as *mut ContactRec,
            inv_dt: h_inv,
            restitution_threshold: 2.0 * self.gravity.length() * h,
            latch: Cell::new(std::ptr::null()),
        };
        let shared: *const SolveShared = &*self.solve_shared;
        let mut contacts_cursor = 0u32;
        for color in 0..MAX_COLORS {
            let (begin, end) = self.color_groups.range(color as u16);
            if begin == end {
                break;
            }
            let mut j = begin;
            while j < end {
                let len = (end - j).min(MAX_SOLVE_CHUNK as u32);
                let chunk = SolveChunk { pairs_begin: j, contacts_begin: contacts_cursor, len };
                contacts_cursor += len;
                self.position_tasks.push(SolveTask {
                    shared,
                    chunk,
                    phase: SolvePhase::Position,
                });
                self.velocity_tasks.push(SolveTask {
                    shared,
                    chunk,
                    phase: SolvePhase::Velocity,
                });
                j += len;
            }
        }
    }

    fn dispatch_solve(&self, executor: &dyn Executor, phase: SolvePhase) {
        let tasks = match phase {
            SolvePhase::Position => &self.position_tasks,
            SolvePhase::Velocity => &self.velocity_tasks,
        };
        let mut cursor = 0usize;
        for color in 0..MAX_COLORS {
            let (begin, end) = self.color_groups.range(color as u16);
            if begin == end {
                break;
            }
            let chunk_count = ((end - begin) as usize).div_ceil(MAX_SOLVE_CHUNK);
            let latch = Latch::new(chunk_count as u32);
            self.solve_shared.latch.set(&latch as *const Latch);
            for k in 0..chunk_count {
                // tasks stay alive and unmoved until the latch clears
                executor.push(unsafe { TaskRef::new(&tasks[cursor + k]) });
            }
            latch.wait();
            cursor += chunk_count;
        }
    }

    /* ---------- callbacks / debug ---------- */

    fn fire_motion_callbacks(&self) {
        self.particles.for_each(|index, data| {
            if let Some(callback) = &data.motion_callback {
                callback.on_particle_motion(self, ParticleId(index));
            }
        });
        self.rigid_bodies.for_each(|index, data| {
            if let Some(callback) = &data.motion_callback {
                callback.on_rigid_body_motion(self, RigidBodyId(index));
            }
        });
    }

    fn print_debug_block(&self, stats: &StepStats) {
        println!("--- keelphys @ tick {} ---", self.tick);
        println!(
            "pairs={}  awake_groups={}  chunks={}",
            stats.neighbor_pairs, stats.awake_groups, stats.solve_chunks
        );
        let mut kinetic = 0.0f32;
        self.particles.for_each(|_, data| {
            kinetic += 0.5 / data.inverse_mass * data.velocity.length_squared();
        });
        self.rigid_bodies.for_each(|_, data| {
            kinetic += 0.5 / data.inverse_mass * data.velocity.length_squared();
        });
        println!("energy: KE_linear = {kinetic:.6}");
        if self.debug.show_bodies {
            let mut lines = 0usize;
            self.rigid_bodies.for_each(|index, data| {
                if lines < self.debug.max_lines {
                    let p = data.position;
                    let v = data.velocity;
                    println!(
                        "body {index:3}  pos=({:+.3},{:+.3},{:+.3})  vel=({:+.3},{:+.3},{:+.3})  awake={}",
                        p.x, p.y, p.z, v.x, v.y, v.z, data.awake
                    );
                    lines += 1;
                }
            });
        }
    }
}
