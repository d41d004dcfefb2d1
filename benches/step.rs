use criterion::{Criterion, criterion_group, criterion_main};
use glam::DVec2;
use std::hint::black_box;

use avbd2d::{Body, World, cloth_grid};

fn stack_world(height: usize) -> World {
    let mut world = World::new();
    world.add_body(Body::rect(
        DVec2::new(0.0, -5.0),
        0.0,
        DVec2::new(100.0, 2.0),
        0.0,
        0.5,
    ));
    for i in 0..height {
        world.add_body(Body::rect(
            DVec2::new(0.0, -3.0 + 2.05 * i as f64),
            0.0,
            DVec2::new(2.0, 2.0),
            1.0,
            0.5,
        ));
    }
    world
}

fn bench_box_stack(c: &mut Criterion) {
    let mut world = stack_world(20);
    let dt = world.time_step();
    // Settle so the benchmark measures steady-state resting contact.
    for _ in 0..120 {
        world.step(dt);
    }

    c.bench_function("solver/stack_20_step", |b| {
        b.iter(|| {
            world.step(dt);
            black_box(world.step_count());
        })
    });
}

fn bench_cloth(c: &mut Criterion) {
    let mut world = World::new();
    cloth_grid(&mut world, DVec2::new(-4.0, 8.0), 16, 12, 0.5, 0.2, 1.0e-4);
    let dt = world.time_step();
    for _ in 0..60 {
        world.step(dt);
    }

    c.bench_function("solver/cloth_16x12_step", |b| {
        b.iter(|| {
            world.step(dt);
            black_box(world.contact_lines().len());
        })
    });
}

criterion_group!(benches, bench_box_stack, bench_cloth);
criterion_main!(benches);
