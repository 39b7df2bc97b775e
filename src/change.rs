//! Per-step change tracking

use std::collections::{HashMap, HashSet};

use crate::component::ComponentId;
use crate::entity::EntityId;

/// One touched-id set per component, populated by `add`/`remove`/`set`/
/// `mutate` and cleared exactly once at the end of every tick. Direct
/// field-view writes never land here.
#[derive(Default)]
pub struct ChangeTracker {
    touched: HashMap<ComponentId, HashSet<EntityId>>,
}

impl ChangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&mut self, component: ComponentId, id: EntityId) {
        self.touched.entry(component).or_default().insert(id);
    }

    pub fn changed(&self, component: ComponentId, id: EntityId) -> bool {
        self.touched
            .get(&component)
            .is_some_and(|ids| ids.contains(&id))
    }

    pub fn touched_count(&self, component: ComponentId) -> usize {
        self.touched.get(&component).map_or(0, HashSet::len)
    }

    pub fn clear_all(&mut self) {
        self.touched.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::ComponentDef;
    use crate::record;

    #[test]
    fn marks_are_scoped_per_component() {
        let position = ComponentDef::new("Position", record! { "x" => 0.0 });
        let energy = ComponentDef::new("Energy", record! { "level" => 0 });
        let mut tracker = ChangeTracker::new();
        let e = EntityId::from_raw(1);

        tracker.mark(position.id(), e);

        assert!(tracker.changed(position.id(), e));
        assert!(!tracker.changed(energy.id(), e));
        assert!(!tracker.changed(position.id(), EntityId::from_raw(2)));
    }

    #[test]
    fn clear_empties_every_set() {
        let position = ComponentDef::new("Position", record! { "x" => 0.0 });
        let mut tracker = ChangeTracker::new();

        tracker.mark(position.id(), EntityId::from_raw(1));
        tracker.mark(position.id(), EntityId::from_raw(2));
        assert_eq!(tracker.touched_count(position.id()), 2);

        tracker.clear_all();
        assert_eq!(tracker.touched_count(position.id()), 0);
        assert!(!tracker.changed(position.id(), EntityId::from_raw(1)));
    }

    #[test]
    fn marking_twice_is_idempotent() {
        let position = ComponentDef::new("Position", record! { "x" => 0.0 });
        let mut tracker = ChangeTracker::new();
        let e = EntityId::from_raw(3);

        tracker.mark(position.id(), e);
        tracker.mark(position.id(), e);

        assert_eq!(tracker.touched_count(position.id()), 1);
    }
}
