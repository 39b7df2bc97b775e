//! World snapshots
//!
//! A snapshot is a plain serializable image of everything the world can
//! reconstruct: alive ids, per-component records, and the step/seed/mode
//! metadata. Capture and restore go through the public [`World`] API, so a
//! restored world is equivalent without being a private-state clone.
//! Descriptors themselves never serialize (validators are functions); restore
//! takes the live descriptors and matches them to the stored names.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::component::ComponentDef;
use crate::entity::EntityId;
use crate::error::WorldError;
use crate::store::StoreMode;
use crate::value::Record;
use crate::world::World;

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub seed: u64,
    pub step: u64,
    pub elapsed: f64,
    pub store_mode: StoreMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldSnapshot {
    pub version: u32,
    pub meta: SnapshotMeta,
    /// Component name to (entity id, record) pairs, ascending by id.
    /// Components with no instances appear with an empty list so restore
    /// still learns their descriptors.
    pub components: BTreeMap<String, Vec<(u64, Record)>>,
    /// Alive entity ids, ascending.
    pub alive: Vec<u64>,
}

impl WorldSnapshot {
    pub fn capture(world: &World) -> Self {
        let ids = world.entity_ids();
        let alive: Vec<u64> = ids.iter().map(|id| id.raw()).collect();

        let mut components = BTreeMap::new();
        for def in world.component_defs() {
            let mut rows = Vec::new();
            for &id in &ids {
                if let Some(record) = world.get(id, &def) {
                    rows.push((id.raw(), record));
                }
            }
            components.insert(def.name().to_string(), rows);
        }

        Self {
            version: SNAPSHOT_VERSION,
            meta: SnapshotMeta {
                seed: world.seed(),
                step: world.step(),
                elapsed: world.elapsed(),
                store_mode: world.store_mode(),
            },
            components,
            alive,
        }
    }

    /// Rebuilds a world from this snapshot. Ids are revived verbatim, so any
    /// entity references embedded in record fields stay valid. Records replay
    /// through `add`, which means validators run again and the first tick
    /// after restore clears the resulting change marks.
    pub fn restore(&self, defs: &[ComponentDef]) -> Result<World, WorldError> {
        if self.version != SNAPSHOT_VERSION {
            return Err(WorldError::SnapshotVersion {
                expected: SNAPSHOT_VERSION,
                found: self.version,
            });
        }

        let by_name: HashMap<&str, &ComponentDef> =
            defs.iter().map(|def| (def.name(), def)).collect();

        let mut world = World::builder()
            .seed(self.meta.seed)
            .store_mode(self.meta.store_mode)
            .resume_at(self.meta.step, self.meta.elapsed)
            .build();

        for &raw in &self.alive {
            world.restore_entity(EntityId::from_raw(raw))?;
        }

        for (name, rows) in &self.components {
            let def = by_name
                .get(name.as_str())
                .copied()
                .ok_or_else(|| WorldError::UnknownComponent(name.clone()))?;
            world.register(def);
            for (raw, record) in rows {
                world.add(EntityId::from_raw(*raw), def, record.clone())?;
            }
        }

        Ok(world)
    }

    pub fn to_json(&self) -> Result<String, WorldError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self, WorldError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Periodic snapshot files named `tick_NNNNNN.json`.
pub struct SnapshotWriter {
    output_dir: PathBuf,
    interval: u64,
}

impl SnapshotWriter {
    /// `interval == 0` disables the writer.
    pub fn new(output_dir: impl AsRef<Path>, interval: u64) -> Self {
        Self {
            output_dir: output_dir.as_ref().to_path_buf(),
            interval,
        }
    }

    pub fn maybe_write(&self, world: &World) -> Result<Option<PathBuf>, WorldError> {
        if self.interval == 0 || world.step() == 0 || world.step() % self.interval != 0 {
            return Ok(None);
        }
        self.write(world).map(Some)
    }

    pub fn write(&self, world: &World) -> Result<PathBuf, WorldError> {
        fs::create_dir_all(&self.output_dir)?;
        let path = self.output_dir.join(format!("tick_{:06}.json", world.step()));
        let snapshot = WorldSnapshot::capture(world);
        fs::write(&path, snapshot.to_json()?)?;
        Ok(path)
    }
}

pub fn load_snapshot(path: impl AsRef<Path>) -> Result<WorldSnapshot, WorldError> {
    let text = fs::read_to_string(path)?;
    WorldSnapshot::from_json(&text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record;
    use crate::value::Value;

    fn sample_world() -> (World, ComponentDef, ComponentDef) {
        let pos = ComponentDef::new("Position", record! { "x" => 0.0, "y" => 0.0 });
        let tag = ComponentDef::tag("Grazer");
        let mut world = World::builder().seed(7).build();

        let a = world.create().unwrap();
        let b = world.create().unwrap();
        world.add(a, &pos, record! { "x" => 1.0 }).unwrap();
        world.add(b, &pos, record! { "x" => 2.0 }).unwrap();
        world.add(b, &tag, Record::new()).unwrap();
        (world, pos, tag)
    }

    #[test]
    fn capture_lists_alive_ids_and_records() {
        let (world, _, _) = sample_world();

        let snapshot = WorldSnapshot::capture(&world);

        assert_eq!(snapshot.version, SNAPSHOT_VERSION);
        assert_eq!(snapshot.alive, vec![1, 2]);
        assert_eq!(snapshot.components["Position"].len(), 2);
        assert_eq!(snapshot.components["Grazer"].len(), 1);
        assert_eq!(snapshot.meta.seed, 7);
    }

    #[test]
    fn restore_rebuilds_an_equivalent_world() {
        let (mut world, pos, tag) = sample_world();
        world.set_scheduler(|_, _| Ok(()));
        world.tick(0.5).unwrap();

        let snapshot = WorldSnapshot::capture(&world);
        let restored = snapshot.restore(&[pos.clone(), tag.clone()]).unwrap();

        assert_eq!(restored.entity_ids(), world.entity_ids());
        assert_eq!(restored.step(), 1);
        assert_eq!(restored.seed(), 7);
        for id in world.entity_ids() {
            assert_eq!(restored.get(id, &pos), world.get(id, &pos));
            assert_eq!(restored.has(id, &tag), world.has(id, &tag));
        }
    }

    #[test]
    fn restore_keeps_unused_ids_out_of_circulation() {
        let (mut world, pos, tag) = sample_world();
        // Leave a hole: id 2 dies, id 3 is alive.
        let c = world.create().unwrap();
        world.add(c, &pos, record! { "x" => 3.0 }).unwrap();
        world.destroy(EntityId::from_raw(2)).unwrap();

        let snapshot = WorldSnapshot::capture(&world);
        let mut restored = snapshot.restore(&[pos, tag]).unwrap();

        assert!(!restored.is_alive(EntityId::from_raw(2)));
        // Fresh ids never collide with restored ones.
        let fresh = restored.create().unwrap();
        assert!(fresh.raw() > 3);
    }

    #[test]
    fn restore_rejects_other_versions() {
        let (world, pos, tag) = sample_world();
        let mut snapshot = WorldSnapshot::capture(&world);
        snapshot.version = 99;

        assert!(matches!(
            snapshot.restore(&[pos, tag]),
            Err(WorldError::SnapshotVersion { found: 99, .. })
        ));
    }

    #[test]
    fn restore_rejects_missing_descriptors() {
        let (world, pos, _) = sample_world();
        let snapshot = WorldSnapshot::capture(&world);

        assert!(matches!(
            snapshot.restore(&[pos]),
            Err(WorldError::UnknownComponent(name)) if name == "Grazer"
        ));
    }

    #[test]
    fn instanceless_components_survive_the_round_trip() {
        let (mut world, pos, tag) = sample_world();
        let marker = ComponentDef::tag("Marker");
        world.register(&marker);

        let snapshot = WorldSnapshot::capture(&world);
        let restored = snapshot
            .restore(&[pos, tag, marker.clone()])
            .unwrap();

        assert!(restored
            .component_defs()
            .iter()
            .any(|def| def.name() == "Marker"));
    }

    #[test]
    fn json_round_trip_is_lossless() {
        let (world, _, _) = sample_world();
        let snapshot = WorldSnapshot::capture(&world);

        let text = snapshot.to_json().unwrap();
        let reparsed = WorldSnapshot::from_json(&text).unwrap();

        assert_eq!(reparsed.alive, snapshot.alive);
        assert_eq!(reparsed.components, snapshot.components);
        assert_eq!(
            reparsed.components["Position"][0].1.get("x"),
            Some(&Value::Float(1.0))
        );
    }
}
