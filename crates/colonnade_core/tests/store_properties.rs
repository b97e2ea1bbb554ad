//! Whole-store properties exercised through the public API.

// SAFETY: Raw attributes are registered with the lifecycle table of the
// type whose size and alignment they declare.
#![allow(unsafe_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use colonnade_core::{ArchetypeRegistry, AttributeId, Identity, World};

#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct Serial(u64);

#[derive(Clone, Debug, Default, PartialEq)]
struct Tag(String);

/// Counts live instances through a shared counter.
#[derive(Default)]
struct Tracked {
    live: Option<Arc<AtomicUsize>>,
}

impl Tracked {
    fn new(live: &Arc<AtomicUsize>) -> Self {
        live.fetch_add(1, Ordering::SeqCst);
        Self {
            live: Some(Arc::clone(live)),
        }
    }
}

impl Clone for Tracked {
    fn clone(&self) -> Self {
        match &self.live {
            Some(live) => Self::new(live),
            None => Self::default(),
        }
    }
}

impl Drop for Tracked {
    fn drop(&mut self) {
        if let Some(live) = &self.live {
            live.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

fn signature_of(mask: u32, ids: &[AttributeId]) -> Vec<AttributeId> {
    (0..ids.len())
        .filter(|&bit| mask & (1 << bit) != 0)
        .map(|bit| ids[bit])
        .collect()
}

#[test]
fn test_superset_query_is_complete_and_exact() {
    let mut registry = ArchetypeRegistry::new();
    let ids: Vec<AttributeId> = (0..5)
        .map(|i| {
            // SAFETY: the lifecycle table belongs to u64
            unsafe {
                registry.attributes_mut().register_raw(
                    &format!("field_{i}"),
                    8,
                    8,
                    colonnade_core::LifecycleVTable::of::<u64>(),
                )
            }
            .unwrap()
        })
        .collect();

    // every other subset, so some queries hit no exact table
    for mask in (1_u32..32).step_by(2) {
        registry.archetype_for(&signature_of(mask, &ids)).unwrap();
    }

    for wanted in 0_u32..32 {
        let query = signature_of(wanted, &ids);
        let found: HashSet<_> = registry.archetypes_matching(&query).into_iter().collect();
        let expected: HashSet<_> = registry
            .archetypes()
            .filter(|table| table.signature().is_superset_of(&query))
            .map(|table| table.id())
            .collect();
        assert_eq!(found, expected, "query mask {wanted:#07b}");
    }
}

#[test]
fn test_identities_are_unique_and_never_reused() {
    let mut world = World::new();
    let mut seen = HashSet::new();

    let range = world.create_many::<(Serial,)>(64).unwrap();
    for id in range.iter() {
        assert!(seen.insert(id));
    }
    for id in range.iter().step_by(3) {
        world.destroy(id).unwrap();
    }
    for _ in 0..32 {
        let id = world.create((Serial(1), Tag("late".into()))).unwrap();
        assert!(seen.insert(id), "{id} issued twice");
    }
    let copies = world.create_many_from(16, range.iter().nth(1).unwrap()).unwrap();
    for id in copies.iter() {
        assert!(seen.insert(id));
    }
    assert!(!seen.contains(&Identity::NULL));
}

#[test]
fn test_destroy_repoints_last_row() {
    let mut world = World::new();
    let ids: Vec<_> = (0..4).map(|i| world.create((Serial(i),)).unwrap()).collect();
    let table = world.registry().location(ids[0]).unwrap().archetype;

    world.destroy(ids[1]).unwrap();

    let moved = world.registry().location(ids[3]).unwrap();
    assert_eq!(moved.archetype, table);
    assert_eq!(moved.row(), 1);
    assert_eq!(world.get::<Serial>(ids[3]), Ok(&Serial(3)));
    assert_eq!(
        world.archetype(table).unwrap().identities(),
        &[ids[0], ids[3], ids[2]]
    );
}

#[test]
fn test_growth_preserves_values() {
    let mut world = World::new();
    let ids: Vec<_> = (0..1000_u64)
        .map(|i| world.create((Serial(i), Tag(format!("row-{i}")))).unwrap())
        .collect();

    for (i, &id) in ids.iter().enumerate() {
        assert_eq!(world.get::<Serial>(id), Ok(&Serial(i as u64)));
        assert_eq!(world.get::<Tag>(id).map(|t| t.0.clone()), Ok(format!("row-{i}")));
    }

    let table = world.query::<(Serial, Tag)>()[0];
    let capacity = world.archetype(table).unwrap().capacity();
    assert!(capacity >= 1000);
    assert!(capacity.is_power_of_two());
}

#[test]
fn test_every_value_dropped_exactly_once() {
    let live = Arc::new(AtomicUsize::new(0));
    {
        let mut world = World::new();
        let prototype = (Tracked::new(&live), Serial(0));
        let range = world.create_many_cloned(50, &prototype).unwrap();
        drop(prototype);
        assert_eq!(live.load(Ordering::SeqCst), 50);

        let ids: Vec<_> = range.iter().collect();
        for &id in &ids[..10] {
            world.destroy(id).unwrap();
        }
        assert_eq!(live.load(Ordering::SeqCst), 40);

        // migrate across tables and back
        for &id in &ids[10..20] {
            world.add_attributes(id, (Tag("moved".into()),)).unwrap();
        }
        for &id in &ids[10..15] {
            world.remove_attribute::<Tag>(id).unwrap();
        }
        assert_eq!(live.load(Ordering::SeqCst), 40);

        for &id in &ids[20..25] {
            world.remove_attribute::<Tracked>(id).unwrap();
        }
        assert_eq!(live.load(Ordering::SeqCst), 35);

        world.create_many_from(5, ids[30]).unwrap();
        assert_eq!(live.load(Ordering::SeqCst), 40);
    }
    assert_eq!(live.load(Ordering::SeqCst), 0);
}

#[test]
fn test_rejected_attach_drops_value_exactly_once() {
    let live = Arc::new(AtomicUsize::new(0));
    let mut world = World::new();
    let id = world.create((Tracked::new(&live),)).unwrap();

    let rejected = world.add_attributes(id, (Tracked::new(&live),));
    assert!(rejected.is_err());
    assert_eq!(live.load(Ordering::SeqCst), 1);

    world.destroy(id).unwrap();
    assert_eq!(live.load(Ordering::SeqCst), 0);
}
