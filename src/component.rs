//! Component descriptors
//!
//! A descriptor is the immutable identity of a component kind: a storage key,
//! a human-readable name, the default record shape, and an optional validator.
//! Descriptors are cheap to clone and safe to share; stores, caches, and
//! change sets are keyed by [`ComponentId`], never by name.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::value::Record;

static NEXT_COMPONENT_ID: AtomicU32 = AtomicU32::new(1);

/// Storage key for a component kind, assigned once per descriptor from a
/// process-wide counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ComponentId(u32);

impl ComponentId {
    fn next() -> Self {
        ComponentId(NEXT_COMPONENT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

type Validator = Arc<dyn Fn(&Record) -> bool + Send + Sync>;

/// Immutable component metadata. Equality is key identity: two descriptors
/// compare equal only if they are the same registration.
#[derive(Clone)]
pub struct ComponentDef {
    id: ComponentId,
    name: Arc<str>,
    defaults: Arc<Record>,
    validator: Option<Validator>,
}

impl ComponentDef {
    pub fn new(name: &str, defaults: Record) -> Self {
        Self {
            id: ComponentId::next(),
            name: Arc::from(name),
            defaults: Arc::new(defaults),
            validator: None,
        }
    }

    /// A descriptor with an empty default shape, used purely for presence
    /// filtering.
    pub fn tag(name: &str) -> Self {
        Self::new(name, Record::new())
    }

    /// Attaches a predicate that every candidate record must pass on `add`
    /// and `set`.
    pub fn with_validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&Record) -> bool + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(validator));
        self
    }

    pub fn id(&self) -> ComponentId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn defaults(&self) -> &Record {
        &self.defaults
    }

    pub fn is_tag(&self) -> bool {
        self.defaults.is_empty()
    }

    /// Runs the validator against a candidate record; no validator means
    /// everything passes.
    pub fn validate(&self, record: &Record) -> bool {
        match &self.validator {
            Some(check) => check(record),
            None => true,
        }
    }
}

impl PartialEq for ComponentDef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ComponentDef {}

impl fmt::Debug for ComponentDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentDef")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("defaults", &self.defaults)
            .field("validator", &self.validator.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record;
    use crate::value::Value;

    #[test]
    fn descriptors_get_distinct_ids() {
        let a = ComponentDef::new("Position", record! { "x" => 0.0, "y" => 0.0 });
        let b = ComponentDef::new("Position", record! { "x" => 0.0, "y" => 0.0 });

        assert_ne!(a.id(), b.id());
        assert_ne!(a, b);
    }

    #[test]
    fn clones_share_identity() {
        let a = ComponentDef::new("Energy", record! { "level" => 100 });
        let b = a.clone();

        assert_eq!(a, b);
        assert_eq!(a.id(), b.id());
    }

    #[test]
    fn tags_have_empty_defaults() {
        let blocked = ComponentDef::tag("Blocked");

        assert!(blocked.is_tag());
        assert!(blocked.defaults().is_empty());
        assert_eq!(blocked.name(), "Blocked");
    }

    #[test]
    fn validator_gates_candidate_records() {
        let health = ComponentDef::new("Health", record! { "hp" => 100 })
            .with_validator(|r| r.get("hp").and_then(Value::as_int).is_some_and(|hp| hp >= 0));

        assert!(health.validate(&record! { "hp" => 10 }));
        assert!(!health.validate(&record! { "hp" => -5 }));
    }

    #[test]
    fn missing_validator_accepts_anything() {
        let note = ComponentDef::new("Note", record! { "text" => "" });
        assert!(note.validate(&record! { "text" => 12345 }));
    }
}
