use criterion::{criterion_group, criterion_main, Criterion};
use keelphys_core::{vec3, SplitMix64};
use keelphys_world::*;

fn particle_rain(c: &mut Criterion) {
    let mut world = World::new(&WorldCreateInfo::default());
    world
        .create_static_body(StaticBodyCreateInfo {
            shape: Shape::Box { half_extents: vec3(20.0, 1.0, 20.0) },
            ..Default::default()
        })
        .unwrap();
    let mut rng = SplitMix64::new(7);
    for _ in 0..512 {
        world
            .create_particle(ParticleCreateInfo {
                radius: 0.1,
                position: vec3(
                    rng.next_range(-5.0, 5.0),
                    rng.next_range(2.0, 20.0),
                    rng.next_range(-5.0, 5.0),
                ),
                ..Default::default()
            })
            .unwrap();
    }

    c.bench_function("simulate 512 particles, 8 substeps", |b| {
        b.iter(|| {
            world
                .simulate(SimulateInfo {
                    delta_time: 1.0 / 60.0,
                    substep_count: 8,
                    executor: &InlineExecutor,
                })
                .unwrap()
        })
    });
}

criterion_group!(benches, particle_rain);
criterion_main!(benches);
