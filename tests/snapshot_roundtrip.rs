//! Snapshot capture, restore, and the periodic writer, through real files.

use microcosm::{
    load_snapshot, record, ComponentDef, EntityId, SnapshotWriter, StoreMode, Value, World,
    WorldSnapshot,
};
use tempfile::tempdir;

fn herd_world(mode: StoreMode) -> (World, ComponentDef, ComponentDef) {
    let pos = ComponentDef::new("Position", record! { "x" => 0.0, "y" => 0.0 });
    let bond = ComponentDef::new("Bond", record! { "partner" => 0 });

    let mut world = World::builder().seed(11).store_mode(mode).build();
    let a = world.create().unwrap();
    let b = world.create().unwrap();
    let c = world.create().unwrap();
    world.add(a, &pos, record! { "x" => 1.0 }).unwrap();
    world.add(b, &pos, record! { "x" => 2.0 }).unwrap();
    world.add(c, &pos, record! { "x" => 3.0 }).unwrap();
    // Cross-entity references travel as plain id fields.
    world
        .add(a, &bond, record! { "partner" => c.raw() as i64 })
        .unwrap();
    world
        .add(c, &bond, record! { "partner" => a.raw() as i64 })
        .unwrap();
    // Leave a hole in the id space.
    world.destroy(b).unwrap();

    (world, pos, bond)
}

#[test]
fn round_trip_preserves_ids_and_references() {
    let (mut world, pos, bond) = herd_world(StoreMode::Associative);
    world.set_scheduler(|_, _| Ok(()));
    world.tick(2.0).unwrap();

    let snapshot = WorldSnapshot::capture(&world);
    let restored = snapshot.restore(&[pos.clone(), bond.clone()]).unwrap();

    assert_eq!(restored.entity_ids(), world.entity_ids());
    assert_eq!(restored.step(), world.step());
    assert_eq!(restored.elapsed(), world.elapsed());
    assert_eq!(restored.seed(), world.seed());
    for id in world.entity_ids() {
        assert_eq!(restored.get(id, &pos), world.get(id, &pos));
        assert_eq!(restored.get(id, &bond), world.get(id, &bond));
    }

    let a = world.entity_ids()[0];
    let partner_raw = restored.get(a, &bond).unwrap()["partner"]
        .as_int()
        .expect("partner id field");
    let partner = EntityId::from_raw(partner_raw as u64);
    assert!(restored.is_alive(partner));
    assert_eq!(restored.get(partner, &pos).unwrap()["x"], Value::Float(3.0));
}

#[test]
fn restored_worlds_keep_stepping_from_the_checkpoint() {
    let (mut world, pos, bond) = herd_world(StoreMode::Associative);
    world.set_scheduler(|_, _| Ok(()));
    world.tick(1.0).unwrap();
    world.tick(1.0).unwrap();

    let snapshot = WorldSnapshot::capture(&world);
    let mut restored = snapshot.restore(&[pos.clone(), bond]).unwrap();
    restored.set_scheduler(|_, _| Ok(()));
    let report = restored.tick(1.0).unwrap();

    assert_eq!(report.step, 3);
    assert_eq!(restored.elapsed(), 3.0);
    // New entities never collide with restored ids.
    let fresh = restored.create().unwrap();
    assert!(fresh.raw() > 3);
    assert!(!world.entity_ids().contains(&fresh));
}

#[test]
fn writer_emits_on_the_interval_and_files_reload() {
    let dir = tempdir().expect("tempdir");
    let writer = SnapshotWriter::new(dir.path(), 2);
    let (mut world, pos, bond) = herd_world(StoreMode::Associative);
    world.set_scheduler(|_, _| Ok(()));

    let mut written = Vec::new();
    for _ in 0..4 {
        world.tick(1.0).unwrap();
        written.push(writer.maybe_write(&world).unwrap());
    }

    assert!(written[0].is_none());
    assert!(written[2].is_none());
    let second = written[1].as_ref().expect("file at step 2");
    let fourth = written[3].as_ref().expect("file at step 4");
    assert!(second.ends_with("tick_000002.json"));
    assert!(fourth.ends_with("tick_000004.json"));
    assert!(second.exists());
    assert!(fourth.exists());

    let reloaded = load_snapshot(fourth).expect("parseable snapshot");
    let restored = reloaded.restore(&[pos.clone(), bond]).unwrap();
    assert_eq!(restored.step(), 4);
    assert_eq!(restored.entity_ids(), world.entity_ids());
    for id in world.entity_ids() {
        assert_eq!(restored.get(id, &pos), world.get(id, &pos));
    }
}

#[test]
fn equivalent_worlds_snapshot_identically_across_modes() {
    let (associative_world, _, _) = herd_world(StoreMode::Associative);
    let (columnar_world, _, _) = herd_world(StoreMode::Columnar);

    let a = WorldSnapshot::capture(&associative_world);
    let b = WorldSnapshot::capture(&columnar_world);

    assert_eq!(a.alive, b.alive);
    assert_eq!(a.components, b.components);
    assert_eq!(a.meta.store_mode, StoreMode::Associative);
    assert_eq!(b.meta.store_mode, StoreMode::Columnar);
}

#[test]
fn capture_is_read_only() {
    let (mut world, pos, _) = herd_world(StoreMode::Columnar);
    let before_ids = world.entity_ids();
    let before_first = world.get(before_ids[0], &pos);

    let _ = WorldSnapshot::capture(&world);
    let _ = WorldSnapshot::capture(&world);

    assert_eq!(world.entity_ids(), before_ids);
    assert_eq!(world.get(before_ids[0], &pos), before_first);
    // A snapshot is a copy, not a live view.
    let e = before_ids[0];
    world.set(e, &pos, record! { "x" => 99.0 }).unwrap();
    let fresh = WorldSnapshot::capture(&world);
    assert_eq!(fresh.components["Position"][0].1["x"], Value::Float(99.0));
}
