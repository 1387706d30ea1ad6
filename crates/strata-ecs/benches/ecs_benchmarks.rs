//! Criterion benchmarks for the storage and query engine.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use strata_ecs::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Position {
    x: f32,
    y: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Velocity {
    dx: f32,
    dy: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Inactive;

fn bench_spawn(c: &mut Criterion) {
    c.bench_function("spawn_set_1000", |b| {
        b.iter(|| {
            let mut world = World::new();
            for i in 0..1000u32 {
                let e = world.spawn();
                world
                    .set(
                        e,
                        Position {
                            x: i as f32,
                            y: 0.0,
                        },
                    )
                    .unwrap();
                world.set(e, Velocity { dx: 1.0, dy: 1.0 }).unwrap();
            }
            black_box(world.entity_count())
        })
    });
}

fn bench_signature_churn(c: &mut Criterion) {
    c.bench_function("attach_detach_churn_1000", |b| {
        let mut world = World::new();
        let entities: Vec<EntityId> = (0..1000)
            .map(|i| {
                let e = world.spawn();
                world
                    .set(
                        e,
                        Position {
                            x: i as f32,
                            y: 0.0,
                        },
                    )
                    .unwrap();
                e
            })
            .collect();

        b.iter(|| {
            for &e in &entities {
                world.set(e, Inactive).unwrap();
                world.unset::<Inactive>(e).unwrap();
            }
        })
    });
}

fn bench_query_iteration(c: &mut Criterion) {
    c.bench_function("query_iterate_10000", |b| {
        let mut world = World::new();
        for i in 0..10_000u32 {
            let e = world.spawn();
            world
                .set(
                    e,
                    Position {
                        x: i as f32,
                        y: 0.0,
                    },
                )
                .unwrap();
            if i % 2 == 0 {
                world.set(e, Velocity { dx: 1.0, dy: 0.0 }).unwrap();
            }
            if i % 3 == 0 {
                world.set(e, Inactive).unwrap();
            }
        }
        let terms = world
            .query()
            .with::<Position>()
            .with::<Velocity>()
            .without::<Inactive>()
            .build();

        b.iter(|| {
            let mut sum = 0.0f32;
            world.each(&terms, |view| {
                let pos = view.field::<Position>().unwrap();
                for row in 0..view.count() {
                    sum += pos[row].x;
                }
            });
            black_box(sum)
        })
    });
}

fn bench_command_merge(c: &mut Criterion) {
    c.bench_function("command_merge_1000", |b| {
        let mut world = World::new();
        world.component::<Position>();
        let entities: Vec<EntityId> = (0..1000).map(|_| world.spawn()).collect();

        b.iter(|| {
            let mut commands = Commands::new();
            for (i, &e) in entities.iter().enumerate() {
                commands
                    .set(
                        &world,
                        e,
                        Position {
                            x: i as f32,
                            y: 0.0,
                        },
                    )
                    .unwrap();
            }
            commands.merge(&mut world);
        })
    });
}

criterion_group!(
    benches,
    bench_spawn,
    bench_signature_churn,
    bench_query_iteration,
    bench_command_merge
);
criterion_main!(benches);
