//! Position and velocity solve kernels.
//!
//! Kernels run on chunks of at most [`MAX_SOLVE_CHUNK`] pairs pulled from one
//! color bucket. Within a color no two pairs share an object, so chunks may
//! mutate body state concurrently through [`SolveShared`] without locks; the
//! kernels never touch motion callbacks.

use std::cell::Cell;

use keelphys_core::types::{Mat3, Vec3};
use keelphys_core::{rigid, Quat};
use keelphys_jobs::{Latch, Task};
use keelphys_geom::{
    particle_particle_contact, particle_shape_contact, particle_shape_surface_contact,
    shape_shape_contact, Material,
};

use crate::body::{ParticleData, RigidBodyData, StaticBodyData};
use crate::graph::{NeighborPair, PairKind};

pub(crate) const MAX_SOLVE_CHUNK: usize = 16;

/// Contact record written by the position kernel and consumed by the
/// velocity kernel within the same substep. A zero normal means no contact.
#[derive(Copy, Clone, Default)]
pub(crate) struct ContactRec {
    pub normal: Vec3,
    pub relative_positions: [Vec3; 2],
    pub separating_velocity: f32,
    pub lambda_n: f32,
}

#[derive(Copy, Clone)]
pub(crate) struct SolveChunk {
    pub pairs_begin: u32,
    pub contacts_begin: u32,
    pub len: u32,
}

#[derive(Copy, Clone)]
pub(crate) enum SolvePhase {
    Position,
    Velocity,
}

/// Raw view of everything the kernels touch. The latch cell is rewritten by
/// the driver between colors, never while tasks are in flight.
pub(crate) struct SolveShared {
    pub particles: *mut ParticleData,
    pub rigid_bodies: *mut RigidBodyData,
    pub static_bodies: *const StaticBodyData,
    pub pairs: *const NeighborPair,
    pub color_pairs: *const u32,
    pub contacts: *mut ContactRec,
    pub inv_dt: f32,
    pub restitution_threshold: f32,
    pub latch: Cell<*const Latch>,
}

// Same-color chunks touch disjoint objects and disjoint contact slots; the
// driver waits on the latch before reusing any of this storage.
unsafe impl Sync for SolveShared {}

impl SolveShared {
    pub fn unbound() -> Self {
        Self {
            particles: std::ptr::null_mut(),
            rigid_bodies: std::ptr::null_mut(),
            static_bodies: std::ptr::null(),
            pairs: std::ptr::null(),
            color_pairs: std::ptr::null(),
            contacts: std::ptr::null_mut(),
            inv_dt: 0.0,
            restitution_threshold: 0.0,
            latch: Cell::new(std::ptr::null()),
        }
    }

    #[inline]
    #[allow(clippy::mut_from_ref)]
    unsafe fn particle(&self, index: u32) -> &mut ParticleData {
        unsafe { &mut *self.particles.add(index as usize) }
    }

    #[inline]
    #[allow(clippy::mut_from_ref)]
    unsafe fn rigid(&self, index: u32) -> &mut RigidBodyData {
        unsafe { &mut *self.rigid_bodies.add(index as usize) }
    }

    #[inline]
    unsafe fn static_body(&self, index: u32) -> &StaticBodyData {
        unsafe { &*self.static_bodies.add(index as usize) }
    }
}

pub(crate) struct SolveTask {
    pub shared: *const SolveShared,
    pub chunk: SolveChunk,
    pub phase: SolvePhase,
}

// The shared block outlives every dispatch (boxed in the world) and the
// chunk indices are fixed at staging time.
unsafe impl Sync for SolveTask {}

impl Task for SolveTask {
    fn run(&self, _worker: u32) {
        let shared = unsafe { &*self.shared };
        match self.phase {
            SolvePhase::Position => unsafe { position_solve_chunk(shared, &self.chunk) },
            SolvePhase::Velocity => unsafe { velocity_solve_chunk(shared, &self.chunk) },
        }
        unsafe { &*shared.latch.get() }.count_down();
    }
}

struct PositionalProblem {
    direction: Vec3,
    distance: f32,
    relative_position: [Vec3; 2],
    inverse_mass: [f32; 2],
    inverse_inertia: [Mat3; 2],
}

struct PositionalSolution {
    delta_position: [Vec3; 2],
    delta_orientation: [Vec3; 2],
    delta_lambda: f32,
}

fn solve_positional_constraint(problem: &PositionalProblem) -> PositionalSolution {
    let n = problem.direction;
    let r1_cross_n = problem.relative_position[0].cross(n);
    let r2_cross_n = problem.relative_position[1].cross(n);
    let w1 = problem.inverse_mass[0] + r1_cross_n.dot(problem.inverse_inertia[0] * r1_cross_n);
    let w2 = problem.inverse_mass[1] + r2_cross_n.dot(problem.inverse_inertia[1] * r2_cross_n);
    let delta_lambda = problem.distance / (w1 + w2);
    let impulse = delta_lambda * n;
    PositionalSolution {
        delta_position: [impulse * problem.inverse_mass[0], -impulse * problem.inverse_mass[1]],
        delta_orientation: [
            problem.inverse_inertia[0] * problem.relative_position[0].cross(impulse),
            problem.inverse_inertia[1] * problem.relative_position[1].cross(-impulse),
        ],
        delta_lambda,
    }
}

#[inline]
fn world_inverse_inertia(body: &RigidBodyData) -> Mat3 {
    let rotation = Mat3::from_quat(body.orientation);
    rotation * body.inverse_inertia * rotation.transpose()
}

#[inline]
fn tangential(v: Vec3, n: Vec3) -> Vec3 {
    v - n * v.dot(n)
}

#[inline]
fn apply_orientation_delta(orientation: &mut Quat, delta: Vec3) {
    let dq = Quat::from_xyzw(delta.x, delta.y, delta.z, 0.0) * *orientation * 0.5;
    *orientation = (*orientation + dq).normalize();
}

/// Substep displacement of the body-fixed point at current offset `r`.
#[inline]
fn rigid_point_movement(body: &RigidBodyData, r: Vec3) -> Vec3 {
    let body_space = body.orientation.conjugate() * r;
    (body.position + r) - (body.previous_position + body.previous_orientation * body_space)
}

pub(crate) unsafe fn position_solve_chunk(shared: &SolveShared, chunk: &SolveChunk) {
    for k in 0..chunk.len {
        let pair_index = unsafe { *shared.color_pairs.add((chunk.pairs_begin + k) as usize) };
        let pair = unsafe { &*shared.pairs.add(pair_index as usize) };
        let contact = unsafe { &mut *shared.contacts.add((chunk.contacts_begin + k) as usize) };
        *contact = ContactRec::default();
        unsafe {
            match pair.kind {
                PairKind::ParticleParticle => solve_pp_position(shared, pair, contact),
                PairKind::ParticleRigidBody => solve_pr_position(shared, pair, contact),
                PairKind::ParticleStaticBody => solve_ps_position(shared, pair, contact),
                PairKind::RigidBodyRigidBody => solve_rr_position(shared, pair, contact),
                PairKind::RigidBodyStaticBody => solve_rs_position(shared, pair, contact),
            }
        }
    }
}

unsafe fn solve_pp_position(shared: &SolveShared, pair: &NeighborPair, contact: &mut ContactRec) {
    let (a, b) = unsafe { (shared.particle(pair.objects[0]), shared.particle(pair.objects[1])) };
    let Some(geom) = particle_particle_contact(a.position, a.radius, b.position, b.radius) else {
        return;
    };
    contact.normal = geom.normal;
    contact.separating_velocity = (a.velocity - b.velocity).dot(geom.normal);
    let lambda = -geom.separation / (a.inverse_mass + b.inverse_mass);
    contact.lambda_n = lambda;
    let impulse = lambda * geom.normal;
    a.position += impulse * a.inverse_mass;
    b.position -= impulse * b.inverse_mass;
}

unsafe fn solve_pr_position(shared: &SolveShared, pair: &NeighborPair, contact: &mut ContactRec) {
    let p = unsafe { shared.particle(pair.objects[0]) };
    let body = unsafe { shared.rigid(pair.objects[1]) };
    let xf = rigid(body.position, body.orientation);
    let xf_inv = xf.inverse();
    let Some(geom) = particle_shape_surface_contact(p.position, p.radius, &body.shape, &xf, &xf_inv)
    else {
        return;
    };
    let r = geom.position - body.position;
    let inverse_inertia = world_inverse_inertia(body);
    contact.normal = geom.normal;
    contact.relative_positions = [Vec3::ZERO, r];
    contact.separating_velocity =
        (p.velocity - (body.velocity + body.angular_velocity.cross(r))).dot(geom.normal);
    let separation_solution = solve_positional_constraint(&PositionalProblem {
        direction: geom.normal,
        distance: -geom.separation,
        relative_position: [Vec3::ZERO, r],
        inverse_mass: [p.inverse_mass, body.inverse_mass],
        inverse_inertia: [Mat3::ZERO, inverse_inertia],
    });
    contact.lambda_n = separation_solution.delta_lambda;
    let movement = (p.position - p.previous_position) - rigid_point_movement(body, r);
    let tangent = tangential(movement, geom.normal);
    let mut delta_position = separation_solution.delta_position;
    let mut delta_orientation = separation_solution.delta_orientation[1];
    if tangent != Vec3::ZERO {
        let distance = tangent.length();
        let friction_solution = solve_positional_constraint(&PositionalProblem {
            direction: tangent / -distance,
            distance,
            relative_position: [Vec3::ZERO, r],
            inverse_mass: [p.inverse_mass, body.inverse_mass],
            inverse_inertia: [Mat3::ZERO, inverse_inertia],
        });
        let static_friction = Material::combine(&p.material, &body.material).static_friction;
        if friction_solution.delta_lambda < static_friction * contact.lambda_n {
            delta_position[0] += friction_solution.delta_position[0];
            delta_position[1] += friction_solution.delta_position[1];
            delta_orientation += friction_solution.delta_orientation[1];
        }
    }
    p.position += delta_position[0];
    body.position += delta_position[1];
    apply_orientation_delta(&mut body.orientation, delta_orientation);
}

unsafe fn solve_ps_position(shared: &SolveShared, pair: &NeighborPair, contact: &mut ContactRec) {
    let p = unsafe { shared.particle(pair.objects[0]) };
    let body = unsafe { shared.static_body(pair.objects[1]) };
    let Some(geom) = particle_shape_contact(
        p.position,
        p.radius,
        &body.shape,
        &body.transform,
        &body.inverse_transform,
    ) else {
        return;
    };
    contact.normal = geom.normal;
    contact.separating_velocity = p.velocity.dot(geom.normal);
    let separation_solution = solve_positional_constraint(&PositionalProblem {
        direction: geom.normal,
        distance: -geom.separation,
        relative_position: [Vec3::ZERO, Vec3::ZERO],
        inverse_mass: [p.inverse_mass, 0.0],
        inverse_inertia: [Mat3::ZERO, Mat3::ZERO],
    });
    contact.lambda_n = separation_solution.delta_lambda;
    let movement = p.position - p.previous_position;
    let tangent = tangential(movement, geom.normal);
    let mut delta_position = separation_solution.delta_position[0];
    if tangent != Vec3::ZERO {
        let distance = tangent.length();
        let friction_solution = solve_positional_constraint(&PositionalProblem {
            direction: tangent / -distance,
            distance,
            relative_position: [Vec3::ZERO, Vec3::ZERO],
            inverse_mass: [p.inverse_mass, 0.0],
            inverse_inertia: [Mat3::ZERO, Mat3::ZERO],
        });
        let static_friction = Material::combine(&p.material, &body.material).static_friction;
        if friction_solution.delta_lambda < static_friction * contact.lambda_n {
            delta_position += friction_solution.delta_position[0];
        }
    }
    p.position += delta_position;
}

unsafe fn solve_rr_position(shared: &SolveShared, pair: &NeighborPair, contact: &mut ContactRec) {
    let (a, b) = unsafe { (shared.rigid(pair.objects[0]), shared.rigid(pair.objects[1])) };
    let xa = rigid(a.position, a.orientation);
    let xb = rigid(b.position, b.orientation);
    let (xa_inv, xb_inv) = (xa.inverse(), xb.inverse());
    let Some(geom) = shape_shape_contact(&a.shape, &xa, &xa_inv, &b.shape, &xb, &xb_inv) else {
        return;
    };
    let r = [geom.position - a.position, geom.position - b.position];
    let inverse_inertia = [world_inverse_inertia(a), world_inverse_inertia(b)];
    contact.normal = geom.normal;
    contact.relative_positions = r;
    contact.separating_velocity = ((a.velocity + a.angular_velocity.cross(r[0]))
        - (b.velocity + b.angular_velocity.cross(r[1])))
    .dot(geom.normal);
    let separation_solution = solve_positional_constraint(&PositionalProblem {
        direction: geom.normal,
        distance: -geom.separation,
        relative_position: r,
        inverse_mass: [a.inverse_mass, b.inverse_mass],
        inverse_inertia,
    });
    contact.lambda_n = separation_solution.delta_lambda;
    let movement = rigid_point_movement(a, r[0]) - rigid_point_movement(b, r[1]);
    let tangent = tangential(movement, geom.normal);
    let mut delta_position = separation_solution.delta_position;
    let mut delta_orientation = separation_solution.delta_orientation;
    if tangent != Vec3::ZERO {
        let distance = tangent.length();
        let friction_solution = solve_positional_constraint(&PositionalProblem {
            direction: tangent / -distance,
            distance,
            relative_position: r,
            inverse_mass: [a.inverse_mass, b.inverse_mass],
            inverse_inertia,
        });
        let static_friction = Material::combine(&a.material, &b.material).static_friction;
        if friction_solution.delta_lambda < static_friction * contact.lambda_n {
            for i in 0..2 {
                delta_position[i] += friction_solution.delta_position[i];
                delta_orientation[i] += friction_solution.delta_orientation[i];
            }
        }
    }
    a.position += delta_position[0];
    apply_orientation_delta(&mut a.orientation, delta_orientation[0]);
    b.position += delta_position[1];
    apply_orientation_delta(&mut b.orientation, delta_orientation[1]);
}

unsafe fn solve_rs_position(shared: &SolveShared, pair: &NeighborPair, contact: &mut ContactRec) {
    let body = unsafe { shared.rigid(pair.objects[0]) };
    let sb = unsafe { shared.static_body(pair.objects[1]) };
    let xf = rigid(body.position, body.orientation);
    let xf_inv = xf.inverse();
    let Some(geom) = shape_shape_contact(
        &body.shape,
        &xf,
        &xf_inv,
        &sb.shape,
        &sb.transform,
        &sb.inverse_transform,
    ) else {
        return;
    };
    let r = geom.position - body.position;
    let inverse_inertia = world_inverse_inertia(body);
    contact.normal = geom.normal;
    contact.relative_positions = [r, Vec3::ZERO];
    contact.separating_velocity =
        (body.velocity + body.angular_velocity.cross(r)).dot(geom.normal);
    let separation_solution = solve_positional_constraint(&PositionalProblem {
        direction: geom.normal,
        distance: -geom.separation,
        relative_position: [r, Vec3::ZERO],
        inverse_mass: [body.inverse_mass, 0.0],
        inverse_inertia: [inverse_inertia, Mat3::ZERO],
    });
    contact.lambda_n = separation_solution.delta_lambda;
    let movement = rigid_point_movement(body, r);
    let tangent = tangential(movement, geom.normal);
    let mut delta_position = separation_solution.delta_position[0];
    let mut delta_orientation = separation_solution.delta_orientation[0];
    if tangent != Vec3::ZERO {
        let distance = tangent.length();
        let friction_solution = solve_positional_constraint(&PositionalProblem {
            direction: tangent / -distance,
            distance,
            relative_position: [r, Vec3::ZERO],
            inverse_mass: [body.inverse_mass, 0.0],
            inverse_inertia: [inverse_inertia, Mat3::ZERO],
        });
        let static_friction = Material::combine(&body.material, &sb.material).static_friction;
        if friction_solution.delta_lambda < static_friction * contact.lambda_n {
            delta_position += friction_solution.delta_position[0];
            delta_orientation += friction_solution.delta_orientation[0];
        }
    }
    body.position += delta_position;
    apply_orientation_delta(&mut body.orientation, delta_orientation);
}

enum BodyView {
    Particle(*mut ParticleData),
    Rigid(*mut RigidBodyData),
    Static(*const StaticBodyData),
}

impl BodyView {
    unsafe fn material(&self) -> &Material {
        unsafe {
            match self {
                BodyView::Particle(p) => &(**p).material,
                BodyView::Rigid(b) => &(**b).material,
                BodyView::Static(s) => &(**s).material,
            }
        }
    }

    unsafe fn velocity_at(&self, r: Vec3) -> Vec3 {
        unsafe {
            match self {
                BodyView::Particle(p) => (**p).velocity,
                BodyView::Rigid(b) => (**b).velocity + (**b).angular_velocity.cross(r),
                BodyView::Static(_) => Vec3::ZERO,
            }
        }
    }

    unsafe fn inverse_inertia_world(&self) -> Mat3 {
        unsafe {
            match self {
                BodyView::Rigid(b) => world_inverse_inertia(&**b),
                _ => Mat3::ZERO,
            }
        }
    }

    unsafe fn generalized_inverse_mass(&self, inverse_inertia: &Mat3, r: Vec3, direction: Vec3) -> f32 {
        unsafe {
            match self {
                BodyView::Particle(p) => (**p).inverse_mass,
                BodyView::Rigid(b) => {
                    let r_cross_n = r.cross(direction);
                    (**b).inverse_mass + r_cross_n.dot(*inverse_inertia * r_cross_n)
                }
                BodyView::Static(_) => 0.0,
            }
        }
    }

    unsafe fn apply_impulse(&self, inverse_inertia: &Mat3, r: Vec3, impulse: Vec3) {
        unsafe {
            match self {
                BodyView::Particle(p) => {
                    let p = &mut **p;
                    p.velocity += impulse * p.inverse_mass;
                }
                BodyView::Rigid(b) => {
                    let b = &mut **b;
                    b.velocity += impulse * b.inverse_mass;
                    b.angular_velocity += *inverse_inertia * r.cross(impulse);
                }
                BodyView::Static(_) => {}
            }
        }
    }
}

unsafe fn pair_views(shared: &SolveShared, pair: &NeighborPair) -> [BodyView; 2] {
    let [first, second] = pair.objects;
    unsafe {
        match pair.kind {
            PairKind::ParticleParticle => [
                BodyView::Particle(shared.particles.add(first as usize)),
                BodyView::Particle(shared.particles.add(second as usize)),
            ],
            PairKind::ParticleRigidBody => [
                BodyView::Particle(shared.particles.add(first as usize)),
                BodyView::Rigid(shared.rigid_bodies.add(second as usize)),
            ],
            PairKind::ParticleStaticBody => [
                BodyView::Particle(shared.particles.add(first as usize)),
                BodyView::Static(shared.static_bodies.add(second as usize)),
            ],
            PairKind::RigidBodyRigidBody => [
                BodyView::Rigid(shared.rigid_bodies.add(first as usize)),
                BodyView::Rigid(shared.rigid_bodies.add(second as usize)),
            ],
            PairKind::RigidBodyStaticBody => [
                BodyView::Rigid(shared.rigid_bodies.add(first as usize)),
                BodyView::Static(shared.static_bodies.add(second as usize)),
            ],
        }
    }
}

pub(crate) unsafe fn velocity_solve_chunk(shared: &SolveShared, chunk: &SolveChunk) {
    for k in 0..chunk.len {
        let pair_index = unsafe { *shared.color_pairs.add((chunk.pairs_begin + k) as usize) };
        let pair = unsafe { &*shared.pairs.add(pair_index as usize) };
        let contact = unsafe { *shared.contacts.add((chunk.contacts_begin + k) as usize) };
        if contact.normal == Vec3::ZERO {
            continue;
        }
        unsafe { solve_pair_velocity(shared, pair, &contact) };
    }
}

unsafe fn solve_pair_velocity(shared: &SolveShared, pair: &NeighborPair, contact: &ContactRec) {
    let views = unsafe { pair_views(shared, pair) };
    let r = contact.relative_positions;
    let relative_velocity =
        unsafe { views[0].velocity_at(r[0]) - views[1].velocity_at(r[1]) };
    let separating_velocity = contact.normal.dot(relative_velocity);
    let tangential_velocity = relative_velocity - contact.normal * separating_velocity;
    let material = unsafe { Material::combine(views[0].material(), views[1].material()) };

    let friction_update = if tangential_velocity != Vec3::ZERO {
        let tangential_speed = tangential_velocity.length();
        let target = (material.dynamic_friction * contact.lambda_n * shared.inv_dt)
            .min(tangential_speed);
        (-tangential_velocity / tangential_speed) * target
    } else {
        Vec3::ZERO
    };

    // restitution reads the separating velocity captured before the
    // positional corrections; slow contacts are fully damped
    let restitution = if contact.separating_velocity.abs() > shared.restitution_threshold {
        material.restitution
    } else {
        0.0
    };
    let restitution_update = contact.normal
        * (-separating_velocity + (-restitution * contact.separating_velocity).max(0.0));

    let delta_velocity = friction_update + restitution_update;
    if delta_velocity == Vec3::ZERO {
        return;
    }
    let inverse_inertia =
        unsafe { [views[0].inverse_inertia_world(), views[1].inverse_inertia_world()] };
    let direction = delta_velocity.normalize_or_zero();
    let w = unsafe {
        views[0].generalized_inverse_mass(&inverse_inertia[0], r[0], direction)
            + views[1].generalized_inverse_mass(&inverse_inertia[1], r[1], direction)
    };
    let impulse = delta_velocity / w;
    unsafe {
        views[0].apply_impulse(&inverse_inertia[0], r[0], impulse);
        views[1].apply_impulse(&inverse_inertia[1], r[1], -impulse);
    }
}
