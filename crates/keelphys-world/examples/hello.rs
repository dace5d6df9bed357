use keelphys_core::{vec3, SplitMix64};
use keelphys_world::*;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut world = World::new(&WorldCreateInfo::default());

    // Ground
    world.create_static_body(StaticBodyCreateInfo {
        shape: Shape::Box { half_extents: vec3(10.0, 0.5, 10.0) },
        position: vec3(0.0, -0.5, 0.0),
        ..Default::default()
    })?;

    // Falling ball
    let ball = world.create_rigid_body(RigidBodyCreateInfo {
        shape: Shape::Ball { radius: 0.5 },
        mass: 1.0,
        inertia_tensor: MassProps::from_ball(0.5, 1.0).inertia,
        position: vec3(0.0, 4.0, 0.0),
        material: Material { restitution: 0.4, ..Default::default() },
        ..Default::default()
    })?;

    // A spray of particles
    let mut rng = SplitMix64::new(0x5EED);
    for _ in 0..64 {
        world.create_particle(ParticleCreateInfo {
            radius: 0.05,
            position: vec3(
                rng.next_range(-2.0, 2.0),
                rng.next_range(2.0, 6.0),
                rng.next_range(-2.0, 2.0),
            ),
            ..Default::default()
        })?;
    }

    let pool = ThreadPool::new(4)?;
    for frame in 0..120 {
        let stats = world.simulate(SimulateInfo {
            delta_time: 1.0 / 60.0,
            substep_count: 8,
            executor: &pool,
        })?;
        if frame % 30 == 0 {
            let p = world.rigid_body_position(ball);
            println!(
                "frame {frame:3}  ball y={:+.3}  pairs={}  chunks={}",
                p.y, stats.neighbor_pairs, stats.solve_chunks
            );
        }
    }
    println!("state hash: {:02x?}", world.state_hash());
    Ok(())
}
