//! End-to-end scenarios against the public API.

use std::cell::Cell;
use std::rc::Rc;

use keelphys_core::types::{Mat3, Vec3};
use keelphys_core::vec3;
use keelphys_world::*;

const DT: f32 = 1.0 / 60.0;

fn step(world: &mut World, substeps: u32) -> StepStats {
    world
        .simulate(SimulateInfo {
            delta_time: DT,
            substep_count: substeps,
            executor: &InlineExecutor,
        })
        .unwrap()
}

fn platform(world: &mut World, half_extents: Vec3, material: Material) -> StaticBodyId {
    world
        .create_static_body(StaticBodyCreateInfo {
            shape: Shape::Box { half_extents },
            position: Vec3::ZERO,
            material,
            ..Default::default()
        })
        .unwrap()
}

#[test]
fn free_fall_matches_reference_recurrence() {
    let mut world = World::new(&WorldCreateInfo::default());
    let p = world
        .create_particle(ParticleCreateInfo {
            mass: 1.0,
            radius: 0.1,
            position: vec3(0.0, 10.0, 0.0),
            ..Default::default()
        })
        .unwrap();

    let substeps = 32u32;
    let h = DT / substeps as f32;
    let damping = 0.99f32.powf(h);
    let mut y = 10.0f32;
    let mut v = 0.0f32;
    for _ in 0..60 {
        step(&mut world, substeps);
        for _ in 0..substeps {
            v = (v - 9.81 * h) * damping;
            y += h * v;
        }
    }
    let position = world.particle_position(p);
    assert!((position.y - y).abs() < 1.0e-3, "y = {}, reference = {y}", position.y);
    // ballistic sanity: close to 10 - g/2 after one second, modulo damping
    assert!((position.y - (10.0 - 0.5 * 9.81)).abs() < 0.1);
    assert_eq!(position.x, 0.0);
}

#[test]
fn dynamic_box_rests_and_sleeps_on_platform() {
    let mut world = World::new(&WorldCreateInfo::default());
    let material =
        Material { static_friction: 0.5, dynamic_friction: 0.5, restitution: 0.0 };
    platform(&mut world, vec3(10.0, 1.0, 10.0), material);
    let body = world
        .create_rigid_body(RigidBodyCreateInfo {
            shape: Shape::Box { half_extents: vec3(1.0, 1.0, 1.0) },
            mass: 1.0,
            inertia_tensor: Mat3::IDENTITY,
            position: vec3(0.0, 2.01, 0.0),
            material,
            ..Default::default()
        })
        .unwrap();

    for _ in 0..120 {
        step(&mut world, 32);
    }
    let position = world.rigid_body_position(body);
    assert!((position.y - 2.0).abs() < 1.0e-3, "box settled at y = {}", position.y);
    assert!(world.rigid_body_angular_velocity(body).length() <= 1.0e-3);
    assert!(!world.rigid_body_is_awake(body), "box failed to fall asleep");
}

#[test]
fn equal_particles_swap_velocities_elastically() {
    let mut world = World::new(&WorldCreateInfo {
        gravitational_acceleration: Vec3::ZERO,
        ..Default::default()
    });
    let material =
        Material { static_friction: 0.0, dynamic_friction: 0.0, restitution: 1.0 };
    let a = world
        .create_particle(ParticleCreateInfo {
            mass: 1.0,
            radius: 0.5,
            position: vec3(-2.0, 0.0, 0.0),
            velocity: vec3(1.0, 0.0, 0.0),
            material,
            ..Default::default()
        })
        .unwrap();
    let b = world
        .create_particle(ParticleCreateInfo {
            mass: 1.0,
            radius: 0.5,
            position: vec3(2.0, 0.0, 0.0),
            velocity: vec3(-1.0, 0.0, 0.0),
            material,
            ..Default::default()
        })
        .unwrap();

    // contact at t = 1.5 s; run past it
    for _ in 0..150 {
        step(&mut world, 32);
    }
    let va = world.particle_velocity(a);
    let vb = world.particle_velocity(b);
    assert!(va.x < -0.9, "first particle kept velocity {}", va.x);
    assert!(vb.x > 0.9, "second particle kept velocity {}", vb.x);
    // symmetric swap: equal magnitudes, opposite directions
    assert!((va.x + vb.x).abs() < 1.0e-3);
    assert!(va.y.abs() < 1.0e-5 && va.z.abs() < 1.0e-5);
}

#[test]
fn sliding_particle_decays_by_coulomb_friction() {
    let mut world = World::new(&WorldCreateInfo::default());
    let material =
        Material { static_friction: 0.5, dynamic_friction: 0.5, restitution: 0.0 };
    platform(&mut world, vec3(50.0, 1.0, 50.0), material);
    let p = world
        .create_particle(ParticleCreateInfo {
            mass: 1.0,
            radius: 0.1,
            position: vec3(0.0, 1.1, 0.0),
            velocity: vec3(2.0, 0.0, 0.0),
            material,
            ..Default::default()
        })
        .unwrap();

    let frames = 20;
    for _ in 0..frames {
        step(&mut world, 32);
    }
    let expected = (2.0 - 0.5 * 9.81 * frames as f32 * DT).max(0.0);
    let vx = world.particle_velocity(p).x;
    assert!(
        (vx - expected).abs() < 0.05 * 2.0,
        "tangential velocity {vx}, Coulomb reference {expected}"
    );
}

#[test]
fn resting_particle_vertical_velocity_is_bounded() {
    let mut world = World::new(&WorldCreateInfo::default());
    platform(&mut world, vec3(10.0, 1.0, 10.0), Material::default());
    let p = world
        .create_particle(ParticleCreateInfo {
            radius: 0.1,
            position: vec3(0.0, 1.1, 0.0),
            ..Default::default()
        })
        .unwrap();
    for _ in 0..60 {
        step(&mut world, 32);
    }
    let bound = 9.81 * (DT / 32.0) + 1.0e-5;
    assert!(world.particle_velocity(p).y.abs() <= bound);
}

#[test]
fn inserted_body_wakes_the_sleeping_island() {
    let mut world = World::new(&WorldCreateInfo::default());
    let material =
        Material { static_friction: 0.5, dynamic_friction: 0.4, restitution: 0.0 };
    platform(&mut world, vec3(10.0, 1.0, 10.0), material);
    let cube = Shape::Box { half_extents: vec3(1.0, 1.0, 1.0) };
    let left = world
        .create_rigid_body(RigidBodyCreateInfo {
            shape: cube,
            position: vec3(-0.9995, 2.0, 0.0),
            material,
            ..Default::default()
        })
        .unwrap();
    let right = world
        .create_rigid_body(RigidBodyCreateInfo {
            shape: cube,
            position: vec3(0.9995, 2.0, 0.0),
            material,
            ..Default::default()
        })
        .unwrap();

    for _ in 0..180 {
        step(&mut world, 16);
    }
    assert!(!world.rigid_body_is_awake(left), "left box never slept");
    assert!(!world.rigid_body_is_awake(right), "right box never slept");

    let intruder = world
        .create_rigid_body(RigidBodyCreateInfo {
            shape: cube,
            position: vec3(-0.9995, 2.5, 0.0),
            velocity: vec3(10.0, 0.0, 0.0),
            material,
            ..Default::default()
        })
        .unwrap();
    step(&mut world, 16);
    assert!(world.rigid_body_is_awake(intruder));
    assert!(world.rigid_body_is_awake(left));
    assert!(world.rigid_body_is_awake(right));
}

struct CountingListener(Rc<Cell<u32>>);

impl ParticleMotionListener for CountingListener {
    fn on_particle_motion(&self, world: &World, particle: ParticleId) {
        let _ = world.particle_position(particle);
        self.0.set(self.0.get() + 1);
    }
}

#[test]
fn zero_dt_is_a_noop_modulo_callbacks() {
    let mut world = World::new(&WorldCreateInfo::default());
    let fired = Rc::new(Cell::new(0u32));
    world
        .create_particle(ParticleCreateInfo {
            position: vec3(0.0, 3.0, 0.0),
            velocity: vec3(1.0, 2.0, 3.0),
            motion_callback: Some(Box::new(CountingListener(fired.clone()))),
            ..Default::default()
        })
        .unwrap();
    let before = world.state_hash();
    let stats = world
        .simulate(SimulateInfo { delta_time: 0.0, substep_count: 1, executor: &InlineExecutor })
        .unwrap();
    assert_eq!(world.state_hash(), before);
    assert_eq!(fired.get(), 1);
    assert_eq!(stats.neighbor_pairs, 0);
}

#[test]
fn motion_callbacks_fire_once_per_simulate() {
    let mut world = World::new(&WorldCreateInfo::default());
    let fired = Rc::new(Cell::new(0u32));
    world
        .create_particle(ParticleCreateInfo {
            position: vec3(0.0, 3.0, 0.0),
            motion_callback: Some(Box::new(CountingListener(fired.clone()))),
            ..Default::default()
        })
        .unwrap();
    world
        .create_particle(ParticleCreateInfo { position: vec3(5.0, 3.0, 0.0), ..Default::default() })
        .unwrap();
    for _ in 0..3 {
        step(&mut world, 8);
    }
    assert_eq!(fired.get(), 3);
}

#[test]
fn invalid_arguments_are_rejected() {
    let mut world = World::new(&WorldCreateInfo::default());
    assert!(matches!(
        world.create_particle(ParticleCreateInfo { mass: 0.0, ..Default::default() }),
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
        world.create_particle(ParticleCreateInfo { radius: -1.0, ..Default::default() }),
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
        world.create_rigid_body(RigidBodyCreateInfo {
            orientation: glam::Quat::from_xyzw(0.5, 0.5, 0.0, 0.0),
            ..Default::default()
        }),
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
        world.create_rigid_body(RigidBodyCreateInfo {
            inertia_tensor: Mat3::ZERO,
            ..Default::default()
        }),
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
        world.simulate(SimulateInfo { delta_time: DT, substep_count: 0, executor: &InlineExecutor }),
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
        world.simulate(SimulateInfo { delta_time: -DT, substep_count: 1, executor: &InlineExecutor }),
        Err(Error::InvalidArgument(_))
    ));
}

#[test]
fn pool_capacities_are_enforced() {
    let mut world = World::new(&WorldCreateInfo { max_particles: 2, ..Default::default() });
    world.create_particle(ParticleCreateInfo::default()).unwrap();
    world
        .create_particle(ParticleCreateInfo { position: vec3(5.0, 0.0, 0.0), ..Default::default() })
        .unwrap();
    assert_eq!(
        world.create_particle(ParticleCreateInfo::default()),
        Err(Error::CapacityExceeded("particles"))
    );

    let mut tight = World::new(&WorldCreateInfo {
        max_neighbor_pairs: 1,
        gravitational_acceleration: Vec3::ZERO,
        ..Default::default()
    });
    for i in 0..3 {
        tight
            .create_particle(ParticleCreateInfo {
                radius: 0.5,
                position: vec3(i as f32 * 0.1, 0.0, 0.0),
                ..Default::default()
            })
            .unwrap();
    }
    assert_eq!(
        tight.simulate(SimulateInfo { delta_time: DT, substep_count: 1, executor: &InlineExecutor }),
        Err(Error::CapacityExceeded("neighbor pairs"))
    );
}

#[test]
fn broadphase_reports_every_overlapping_dynamic_pair() {
    // a line of touching particles must chain into one island and collide
    let mut world = World::new(&WorldCreateInfo {
        gravitational_acceleration: Vec3::ZERO,
        ..Default::default()
    });
    let mut ids = Vec::new();
    for i in 0..8 {
        ids.push(
            world
                .create_particle(ParticleCreateInfo {
                    radius: 0.5,
                    position: vec3(i as f32 * 0.95, 0.0, 0.0),
                    ..Default::default()
                })
                .unwrap(),
        );
    }
    let stats = step(&mut world, 4);
    // 7 adjacent overlaps; the safety margin may add next-nearest pairs
    assert!(stats.neighbor_pairs >= 7, "only {} pairs reported", stats.neighbor_pairs);
    // overlapping chain pushes the end particles outward
    assert!(world.particle_position(ids[0]).x < 0.0);
    assert!(world.particle_position(ids[7]).x > 7.0 * 0.95);
}

#[test]
fn threaded_and_inline_execution_agree() {
    fn run(executor: &dyn Executor) -> [u8; 32] {
        let mut world = World::new(&WorldCreateInfo::default());
        let material =
            Material { static_friction: 0.5, dynamic_friction: 0.4, restitution: 0.2 };
        platform(&mut world, vec3(10.0, 1.0, 10.0), material);
        for i in 0..3 {
            for j in 0..3 {
                for k in 0..3 {
                    world
                        .create_rigid_body(RigidBodyCreateInfo {
                            shape: Shape::Ball { radius: 0.5 },
                            inertia_tensor: MassProps::from_ball(0.5, 1.0).inertia,
                            position: vec3(
                                i as f32 * 1.02 - 1.0,
                                2.0 + j as f32 * 1.02,
                                k as f32 * 1.02 - 1.0,
                            ),
                            material,
                            ..Default::default()
                        })
                        .unwrap();
                }
            }
        }
        for _ in 0..60 {
            world
                .simulate(SimulateInfo { delta_time: DT, substep_count: 8, executor })
                .unwrap();
        }
        world.state_hash()
    }

    let inline = run(&InlineExecutor);
    let pool = ThreadPool::new(4).unwrap();
    let threaded = run(&pool);
    assert_eq!(inline, threaded, "parallel execution diverged from inline execution");
}
