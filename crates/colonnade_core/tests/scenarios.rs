//! End-to-end scenarios through the typed world.

use bytemuck::{Pod, Zeroable};
use colonnade_core::{StorageError, World};

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
struct Position {
    x: f32,
    y: f32,
    z: f32,
    _padding: f32,
}

impl Position {
    const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z, _padding: 0.0 }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
struct Velocity {
    x: f32,
    y: f32,
    z: f32,
    _padding: f32,
}

impl Velocity {
    const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z, _padding: 0.0 }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct A(u32);

#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct B(u32);

#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct C(u32);

fn integrate(world: &mut World, dt: f32) {
    let position = world.attribute_id::<Position>().unwrap();
    let velocity = world.attribute_id::<Velocity>().unwrap();

    for archetype in world.query::<(Position, Velocity)>() {
        let mut table = world.archetype_mut(archetype).unwrap();
        let (positions, velocities) = table
            .column_pair_mut::<Position, Velocity>(position, velocity)
            .unwrap();
        for (p, v) in positions.iter_mut().zip(velocities.iter()) {
            p.x += v.x * dt;
            p.y += v.y * dt;
            p.z += v.z * dt;
        }
    }
}

#[test]
fn test_integrate_1024_rows() {
    let mut world = World::new();
    let range = world
        .create_many_cloned(
            1024,
            &(Position::new(4.0, 2.0, 0.0), Velocity::new(1.0, 0.0, 0.0)),
        )
        .unwrap();
    assert_eq!(range.len(), 1024);

    let dt = 1.0 / 60.0;
    integrate(&mut world, dt);

    for id in range.iter() {
        let position = world.get::<Position>(id).unwrap();
        assert!((position.x - (4.0 + dt)).abs() < f32::EPSILON * 8.0);
        assert!((position.y - 2.0).abs() < f32::EPSILON);
        assert_eq!(position.z, 0.0);
        assert_eq!(world.get::<Velocity>(id), Ok(&Velocity::new(1.0, 0.0, 0.0)));
    }
}

#[test]
fn test_integrate_spans_every_matching_table() {
    let mut world = World::new();
    let plain = world
        .create((Position::new(0.0, 0.0, 0.0), Velocity::new(6.0, 0.0, 0.0)))
        .unwrap();
    let tagged = world
        .create((Position::new(0.0, 0.0, 0.0), Velocity::new(12.0, 0.0, 0.0), A(1)))
        .unwrap();
    let still = world.create((Position::new(1.0, 1.0, 1.0),)).unwrap();

    integrate(&mut world, 0.5);

    assert_eq!(world.get::<Position>(plain).unwrap().x, 3.0);
    assert_eq!(world.get::<Position>(tagged).unwrap().x, 6.0);
    assert_eq!(world.get::<Position>(still).unwrap().x, 1.0);
}

#[test]
fn test_add_attribute_moves_row_into_matching_queries() {
    let mut world = World::new();
    world.register::<C>();
    let id = world.create((A(7),)).unwrap();

    world.add_attributes(id, (B(9),)).unwrap();
    let location = world.registry().location(id).unwrap();

    assert!(world.query::<(A, B)>().contains(&location.archetype));
    assert!(world.query::<(A,)>().contains(&location.archetype));
    assert!(!world.query::<(B, C)>().contains(&location.archetype));
    assert_eq!(world.get::<A>(id), Ok(&A(7)));
    assert_eq!(world.get::<B>(id), Ok(&B(9)));
}

#[test]
fn test_remove_attribute_drops_it_from_row() {
    let mut world = World::new();
    let id = world.create((A(1), B(2))).unwrap();

    world.remove_attribute::<B>(id).unwrap();
    let location = world.registry().location(id).unwrap();

    assert!(world.query::<(A,)>().contains(&location.archetype));
    assert!(!world.query::<(A, B)>().contains(&location.archetype));
    assert_eq!(world.get::<A>(id), Ok(&A(1)));
    assert!(matches!(
        world.get::<B>(id),
        Err(StorageError::MissingAttribute { .. })
    ));
}

#[test]
fn test_migration_keeps_neighbours_addressable() {
    let mut world = World::new();
    let ids: Vec<_> = (0..5).map(|i| world.create((A(i),)).unwrap()).collect();

    world.add_attributes(ids[1], (B(100),)).unwrap();
    world.add_attributes(ids[3], (B(300),)).unwrap();

    for (i, &id) in ids.iter().enumerate() {
        assert_eq!(world.get::<A>(id), Ok(&A(i as u32)));
    }
    assert_eq!(world.get::<B>(ids[1]), Ok(&B(100)));
    assert_eq!(world.get::<B>(ids[3]), Ok(&B(300)));
    assert!(!world.has::<B>(ids[0]));
}

#[test]
fn test_config_from_toml_drives_world() {
    let config = colonnade_core::StorageConfig::from_toml_str(
        "min_column_capacity = 64\ncolumn_pre_reserve = 0\npooled_columns = false\n",
    )
    .unwrap();
    let mut world = World::with_config(config).unwrap();
    let id = world.create((A(1),)).unwrap();
    let location = world.registry().location(id).unwrap();
    let a = world.attribute_id::<A>().unwrap();

    let table = world.archetype(location.archetype).unwrap();
    assert_eq!(table.column(a).unwrap().capacity(), 64);
}

#[test]
fn test_table_writes_keep_rows_in_step() {
    let mut world = World::new();
    let first = world.create((A(1), B(10))).unwrap();
    let second = world.create((A(2), B(20))).unwrap();
    let archetype = world.registry().location(first).unwrap().archetype;
    let a = world.attribute_id::<A>().unwrap();
    let b = world.attribute_id::<B>().unwrap();

    {
        let mut table = world.archetype_mut(archetype).unwrap();
        for value in table.column_slice_mut::<A>(a).unwrap() {
            value.0 += 5;
        }
        let (xs, ys) = table.column_pair_mut::<A, B>(a, b).unwrap();
        ys[1].0 = xs[1].0 * 3;
        assert_eq!(table.raw_columns(&[a, b]).unwrap().len(), 2);
    }

    let table = world.archetype(archetype).unwrap();
    assert_eq!(table.identities(), &[first, second]);
    assert!(table.columns().iter().all(|column| column.len() == 2));
    assert_eq!(world.get::<B>(second), Ok(&B(21)));

    world.destroy(second).unwrap();
    assert_eq!(world.len(), 1);
    assert_eq!(world.get::<A>(first), Ok(&A(6)));
    assert_eq!(world.get::<B>(first), Ok(&B(10)));
    let table = world.archetype(archetype).unwrap();
    assert_eq!(table.identities(), &[first]);
    assert!(table.columns().iter().all(|column| column.len() == 1));
}
