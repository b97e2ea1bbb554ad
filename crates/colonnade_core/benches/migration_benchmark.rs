//! # Migration and Query Benchmark
//!
//! Measures attribute churn (rows hopping between tables) and superset
//! queries over a registry with many tables.

// SAFETY: Raw attributes are registered with the lifecycle table of u32.
#![allow(unsafe_code)]
#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use colonnade_core::{ArchetypeRegistry, AttributeId, World};

const ROW_COUNT: usize = 10_000;

#[derive(Clone, Copy, Default)]
struct Health(u32);

#[derive(Clone, Copy, Default)]
struct Poisoned {
    ticks: u32,
}

#[derive(Clone, Default)]
struct Label(String);

fn bench_attach_detach(c: &mut Criterion) {
    let mut world = World::new();
    let ids: Vec<_> = world
        .create_many::<(Health, Label)>(ROW_COUNT)
        .expect("bulk create")
        .iter()
        .collect();

    c.bench_function("attach_detach_10K", |b| {
        b.iter(|| {
            for &id in &ids {
                world
                    .add_attributes(id, (Poisoned { ticks: 3 },))
                    .expect("attach");
            }
            for &id in &ids {
                world.remove_attribute::<Poisoned>(id).expect("detach");
            }
            black_box(world.len())
        });
    });
}

fn bench_superset_query(c: &mut Criterion) {
    // 2^10 - 1 tables over ten raw u32 attributes
    let mut registry = ArchetypeRegistry::new();
    let ids: Vec<AttributeId> = (0..10)
        .map(|i| {
            // SAFETY: the table is the real one for u32
            unsafe {
                registry.attributes_mut().register_raw(
                    &format!("raw_{i}"),
                    4,
                    4,
                    colonnade_core::LifecycleVTable::of::<u32>(),
                )
            }
            .expect("register")
        })
        .collect();
    for mask in 1_u32..1024 {
        let signature: Vec<_> = (0..10)
            .filter(|bit| mask & (1 << bit) != 0)
            .map(|bit| ids[bit])
            .collect();
        registry.archetype_for(&signature).expect("archetype");
    }

    c.bench_function("superset_query_1023_tables", |b| {
        b.iter(|| black_box(registry.archetypes_matching(&[ids[2], ids[7]]).len()));
    });
}

criterion_group!(benches, bench_attach_detach, bench_superset_query);
criterion_main!(benches);
