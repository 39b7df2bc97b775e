//! Component storage backends
//!
//! Every component kind is backed by one store chosen per world:
//! [`MapStorage`] keeps one independent record per entity, [`ColumnStorage`]
//! keeps one array per field indexed by raw entity id. Both satisfy the same
//! [`ComponentStorage`] contract, so the world and the query engine never
//! care which one is underneath.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::entity::EntityId;
use crate::error::WorldError;
use crate::value::{Record, Value};

/// Backing representation for a world's component stores. Fixed at world
/// construction; labels snapshots so a restore picks the same backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreMode {
    #[default]
    Associative,
    Columnar,
}

impl StoreMode {
    pub fn new_storage(self, defaults: &Record) -> Box<dyn ComponentStorage> {
        match self {
            StoreMode::Associative => Box::new(MapStorage::new()),
            StoreMode::Columnar => Box::new(ColumnStorage::new(defaults)),
        }
    }
}

impl fmt::Display for StoreMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreMode::Associative => write!(f, "associative"),
            StoreMode::Columnar => write!(f, "columnar"),
        }
    }
}

impl FromStr for StoreMode {
    type Err = WorldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "associative" => Ok(StoreMode::Associative),
            "columnar" => Ok(StoreMode::Columnar),
            other => Err(WorldError::UnknownStoreMode(other.to_string())),
        }
    }
}

/// Uniform per-component storage contract.
///
/// `entity_ids` must be ascending and duplicate-free; the query engine's
/// sorted-merge intersection depends on it. `get` returns a materialized
/// copy; field-level access through `field`/`set_field` addresses the
/// backing storage directly.
pub trait ComponentStorage: Send {
    fn set(&mut self, id: EntityId, record: Record);
    fn get(&self, id: EntityId) -> Option<Record>;
    fn has(&self, id: EntityId) -> bool;
    /// Returns whether anything was actually removed.
    fn delete(&mut self, id: EntityId) -> bool;
    fn entity_ids(&self) -> Vec<EntityId>;
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn field(&self, id: EntityId, name: &str) -> Option<&Value>;
    /// Returns false if the entity has no record here.
    fn set_field(&mut self, id: EntityId, name: &str, value: Value) -> bool;
}

/// Associative variant: one record per entity in a hash map.
pub struct MapStorage {
    records: HashMap<EntityId, Record>,
}

impl MapStorage {
    pub fn new() -> Self {
        Self {
            records: HashMap::new(),
        }
    }
}

impl Default for MapStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentStorage for MapStorage {
    fn set(&mut self, id: EntityId, record: Record) {
        self.records.insert(id, record);
    }

    fn get(&self, id: EntityId) -> Option<Record> {
        self.records.get(&id).cloned()
    }

    fn has(&self, id: EntityId) -> bool {
        self.records.contains_key(&id)
    }

    fn delete(&mut self, id: EntityId) -> bool {
        self.records.remove(&id).is_some()
    }

    fn entity_ids(&self) -> Vec<EntityId> {
        // Fresh snapshot each call, not a live view.
        let mut ids: Vec<EntityId> = self.records.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    fn len(&self) -> usize {
        self.records.len()
    }

    fn field(&self, id: EntityId, name: &str) -> Option<&Value> {
        self.records.get(&id)?.get(name)
    }

    fn set_field(&mut self, id: EntityId, name: &str, value: Value) -> bool {
        match self.records.get_mut(&id) {
            Some(record) => {
                record.insert(name.to_string(), value);
                true
            }
            None => false,
        }
    }
}

/// Columnar variant: one `Vec<Option<Value>>` per field, indexed by raw
/// entity id, plus a sorted presence set. Declared fields get their columns
/// up front; ad hoc fields grow new columns on first write. The same
/// (id, field) always resolves to the same slot, so a write through one view
/// handle is observed by every later read of that slot.
pub struct ColumnStorage {
    columns: BTreeMap<String, Vec<Option<Value>>>,
    present: BTreeSet<EntityId>,
}

impl ColumnStorage {
    pub fn new(defaults: &Record) -> Self {
        let columns = defaults
            .keys()
            .map(|field| (field.clone(), Vec::new()))
            .collect();
        Self {
            columns,
            present: BTreeSet::new(),
        }
    }

    fn index(id: EntityId) -> usize {
        id.raw() as usize
    }

    fn write_slot(column: &mut Vec<Option<Value>>, index: usize, value: Value) {
        if column.len() <= index {
            column.resize(index + 1, None);
        }
        column[index] = Some(value);
    }

    fn clear_slot(column: &mut [Option<Value>], index: usize) {
        if let Some(slot) = column.get_mut(index) {
            *slot = None;
        }
    }
}

impl ComponentStorage for ColumnStorage {
    fn set(&mut self, id: EntityId, record: Record) {
        let index = Self::index(id);
        // Replace semantics: drop slots for fields the new record omits.
        for (field, column) in self.columns.iter_mut() {
            if !record.contains_key(field) {
                Self::clear_slot(column, index);
            }
        }
        for (field, value) in record {
            let column = self.columns.entry(field).or_default();
            Self::write_slot(column, index, value);
        }
        self.present.insert(id);
    }

    fn get(&self, id: EntityId) -> Option<Record> {
        if !self.present.contains(&id) {
            return None;
        }
        let index = Self::index(id);
        let mut record = Record::new();
        for (field, column) in &self.columns {
            if let Some(Some(value)) = column.get(index) {
                record.insert(field.clone(), value.clone());
            }
        }
        Some(record)
    }

    fn has(&self, id: EntityId) -> bool {
        self.present.contains(&id)
    }

    fn delete(&mut self, id: EntityId) -> bool {
        if !self.present.remove(&id) {
            return false;
        }
        let index = Self::index(id);
        for column in self.columns.values_mut() {
            Self::clear_slot(column, index);
        }
        true
    }

    fn entity_ids(&self) -> Vec<EntityId> {
        self.present.iter().copied().collect()
    }

    fn len(&self) -> usize {
        self.present.len()
    }

    fn field(&self, id: EntityId, name: &str) -> Option<&Value> {
        if !self.present.contains(&id) {
            return None;
        }
        self.columns.get(name)?.get(Self::index(id))?.as_ref()
    }

    fn set_field(&mut self, id: EntityId, name: &str, value: Value) -> bool {
        if !self.present.contains(&id) {
            return false;
        }
        let column = self.columns.entry(name.to_string()).or_default();
        Self::write_slot(column, Self::index(id), value);
        true
    }
}

/// Direct field-level access to one entity's record in one store.
///
/// Writes land in the backing storage immediately, even mid-step, and do not
/// mark the change set; change-filtered queries will not see them. This is
/// the sanctioned route for cheap same-step read-after-write piping between
/// systems.
pub struct FieldViewMut<'s> {
    id: EntityId,
    store: &'s mut dyn ComponentStorage,
}

impl<'s> FieldViewMut<'s> {
    pub(crate) fn new(id: EntityId, store: &'s mut dyn ComponentStorage) -> Self {
        Self { id, store }
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.store.field(self.id, field)
    }

    pub fn set(&mut self, field: &str, value: impl Into<Value>) {
        self.store.set_field(self.id, field, value.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record;

    fn both_modes() -> Vec<(StoreMode, Box<dyn ComponentStorage>)> {
        let defaults = record! { "x" => 0.0, "y" => 0.0 };
        vec![
            (
                StoreMode::Associative,
                StoreMode::Associative.new_storage(&defaults),
            ),
            (
                StoreMode::Columnar,
                StoreMode::Columnar.new_storage(&defaults),
            ),
        ]
    }

    fn id(raw: u64) -> EntityId {
        EntityId::from_raw(raw)
    }

    #[test]
    fn set_get_has_delete_round_trip() {
        for (mode, mut store) in both_modes() {
            store.set(id(3), record! { "x" => 1.0, "y" => 2.0 });

            assert!(store.has(id(3)), "{mode}");
            assert_eq!(
                store.get(id(3)),
                Some(record! { "x" => 1.0, "y" => 2.0 }),
                "{mode}"
            );
            assert_eq!(store.get(id(4)), None, "{mode}");

            assert!(store.delete(id(3)), "{mode}");
            assert!(!store.delete(id(3)), "{mode}");
            assert!(!store.has(id(3)), "{mode}");
            assert_eq!(store.len(), 0, "{mode}");
        }
    }

    #[test]
    fn entity_ids_are_ascending_and_duplicate_free() {
        for (mode, mut store) in both_modes() {
            for raw in [9, 2, 7, 4] {
                store.set(id(raw), record! { "x" => 0.0, "y" => 0.0 });
            }
            store.set(id(7), record! { "x" => 1.0, "y" => 1.0 });

            let ids: Vec<u64> = store.entity_ids().iter().map(|e| e.raw()).collect();
            assert_eq!(ids, vec![2, 4, 7, 9], "{mode}");
        }
    }

    #[test]
    fn replacing_a_record_drops_stale_fields() {
        for (mode, mut store) in both_modes() {
            store.set(id(1), record! { "x" => 1.0, "extra" => true });
            store.set(id(1), record! { "x" => 2.0 });

            assert_eq!(store.get(id(1)), Some(record! { "x" => 2.0 }), "{mode}");
        }
    }

    #[test]
    fn ad_hoc_fields_survive_in_both_modes() {
        for (mode, mut store) in both_modes() {
            store.set(id(1), record! { "x" => 0.0, "y" => 0.0, "nickname" => "scout" });

            assert_eq!(
                store.field(id(1), "nickname"),
                Some(&Value::Str("scout".into())),
                "{mode}"
            );
        }
    }

    #[test]
    fn get_returns_an_independent_copy() {
        for (mode, mut store) in both_modes() {
            store.set(id(1), record! { "x" => 1.0, "y" => 2.0 });

            let mut copy = store.get(id(1)).unwrap();
            copy.insert("x".to_string(), Value::Float(99.0));

            assert_eq!(
                store.field(id(1), "x"),
                Some(&Value::Float(1.0)),
                "{mode}"
            );
        }
    }

    #[test]
    fn field_writes_hit_the_backing_storage() {
        for (mode, mut store) in both_modes() {
            store.set(id(5), record! { "x" => 0.0, "y" => 0.0 });

            assert!(store.set_field(id(5), "x", Value::Float(7.5)), "{mode}");
            assert_eq!(store.field(id(5), "x"), Some(&Value::Float(7.5)), "{mode}");

            // Absent entities reject field writes.
            assert!(!store.set_field(id(6), "x", Value::Float(1.0)), "{mode}");
        }
    }

    #[test]
    fn view_writes_are_visible_to_later_views() {
        for (mode, mut store) in both_modes() {
            store.set(id(2), record! { "x" => 0.0, "y" => 0.0 });

            {
                let mut view = FieldViewMut::new(id(2), store.as_mut());
                view.set("x", 42.0);
            }
            let view = FieldViewMut::new(id(2), store.as_mut());
            assert_eq!(view.get("x"), Some(&Value::Float(42.0)), "{mode}");
        }
    }

    #[test]
    fn columnar_delete_clears_every_slot() {
        let mut store = ColumnStorage::new(&record! { "x" => 0.0 });
        store.set(id(1), record! { "x" => 1.0, "extra" => 2.0 });

        store.delete(id(1));
        store.set(id(1), record! { "x" => 5.0 });

        // The recycled slot must not resurrect the old extra field.
        assert_eq!(store.get(id(1)), Some(record! { "x" => 5.0 }));
    }

    #[test]
    fn store_mode_labels_round_trip() {
        assert_eq!(StoreMode::Associative.to_string(), "associative");
        assert_eq!(
            "columnar".parse::<StoreMode>().unwrap(),
            StoreMode::Columnar
        );
        assert!("sparse".parse::<StoreMode>().is_err());
    }
}
