//! Error types shared across the crate

use thiserror::Error;

use crate::entity::EntityId;

#[derive(Debug, Error)]
pub enum WorldError {
    #[error("tick called with no scheduler installed")]
    MissingScheduler,

    #[error("entity {0} is not alive")]
    DeadEntity(EntityId),

    #[error("entity {entity} has no `{component}` component")]
    MissingComponent {
        entity: EntityId,
        component: String,
    },

    #[error("`{component}` validator rejected record for entity {entity}")]
    Validation {
        entity: EntityId,
        component: String,
    },

    #[error("{operation} on entity {entity} attempted mid-step with strict mode on")]
    StrictMutation {
        operation: &'static str,
        entity: EntityId,
        component: Option<String>,
    },

    #[error("policy hook rejected mutation: {0}")]
    Policy(String),

    #[error("entity {0} is already alive")]
    AlreadyAlive(EntityId),

    #[error("entity id 0 is reserved")]
    ReservedId,

    #[error("snapshot version {found} not supported (expected {expected})")]
    SnapshotVersion { expected: u32, found: u32 },

    #[error("snapshot references unknown component `{0}`")]
    UnknownComponent(String),

    #[error("unknown store mode `{0}`")]
    UnknownStoreMode(String),

    #[error("system `{0}` declares a dependency on unknown system `{1}`")]
    UnknownDependency(String, String),

    #[error("system dependency cycle involving `{0}`")]
    DependencyCycle(String),

    #[error("duplicate system name `{0}`")]
    DuplicateSystem(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config parse failed: {0}")]
    ConfigParse(#[from] serde_yaml::Error),
}
