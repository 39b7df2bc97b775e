//! Read-side entity inspection and tick-to-tick diffing
//!
//! The inspector keeps a copy of each entity's component records as of its
//! last inspection and reports field-level differences on the next one. It
//! never touches simulation state, and it can be disabled wholesale, which
//! drops the retained history.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::entity::EntityId;
use crate::value::{Record, Value};

/// One field's before/after pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldDelta {
    pub before: Value,
    pub after: Value,
}

/// Field-level difference between two records of the same component.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecordDiff {
    pub changed: BTreeMap<String, FieldDelta>,
    pub added: BTreeMap<String, Value>,
    pub removed: BTreeMap<String, Value>,
}

impl RecordDiff {
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.added.is_empty() && self.removed.is_empty()
    }
}

/// One component's state within an [`EntityReport`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComponentReport {
    pub value: Record,
    /// Whether the component differs from the previous inspection. Newly
    /// appeared components count as changed; first-ever inspections do not.
    pub changed: bool,
    pub previous: Option<Record>,
    pub diff: Option<RecordDiff>,
}

/// Structured snapshot of a single entity, with presence/absence and
/// differences since the last inspection of the same id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityReport {
    pub id: EntityId,
    pub alive: bool,
    pub components: BTreeMap<String, ComponentReport>,
    /// Known component names the entity does not currently carry.
    pub absent: Vec<String>,
    /// Components present at the last inspection but gone now.
    pub removed: Vec<String>,
}

pub(crate) struct Inspector {
    enabled: bool,
    history: HashMap<EntityId, BTreeMap<String, Record>>,
}

impl Inspector {
    pub(crate) fn new(enabled: bool) -> Self {
        Self {
            enabled,
            history: HashMap::new(),
        }
    }

    pub(crate) fn enabled(&self) -> bool {
        self.enabled
    }

    /// Disabling drops all retained history, so re-enabling starts fresh.
    pub(crate) fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.history.clear();
        }
    }

    pub(crate) fn observe(
        &mut self,
        id: EntityId,
        alive: bool,
        current: BTreeMap<String, Record>,
        absent: Vec<String>,
    ) -> EntityReport {
        let previous = self.history.get(&id);

        let mut components = BTreeMap::new();
        for (name, record) in &current {
            let report = match previous.and_then(|h| h.get(name)) {
                Some(prior) => {
                    let diff = diff_records(prior, record);
                    let changed = !diff.is_empty();
                    ComponentReport {
                        value: record.clone(),
                        changed,
                        previous: Some(prior.clone()),
                        diff: if changed { Some(diff) } else { None },
                    }
                }
                None => ComponentReport {
                    value: record.clone(),
                    // Appearing after an earlier inspection is a change;
                    // the first look at an entity is not.
                    changed: previous.is_some(),
                    previous: None,
                    diff: None,
                },
            };
            components.insert(name.clone(), report);
        }

        let mut removed: Vec<String> = previous
            .map(|h| {
                h.keys()
                    .filter(|name| !current.contains_key(*name))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        removed.sort();

        if self.enabled {
            self.history.insert(id, current);
        }

        EntityReport {
            id,
            alive,
            components,
            absent,
            removed,
        }
    }
}

/// Top-level field comparison; nested records compare wholesale.
fn diff_records(before: &Record, after: &Record) -> RecordDiff {
    let mut diff = RecordDiff::default();
    for (field, value) in after {
        match before.get(field) {
            None => {
                diff.added.insert(field.clone(), value.clone());
            }
            Some(prior) if prior != value => {
                diff.changed.insert(
                    field.clone(),
                    FieldDelta {
                        before: prior.clone(),
                        after: value.clone(),
                    },
                );
            }
            Some(_) => {}
        }
    }
    for (field, value) in before {
        if !after.contains_key(field) {
            diff.removed.insert(field.clone(), value.clone());
        }
    }
    diff
}
