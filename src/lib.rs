//! In-process entity-component-system runtime for simulations: entities are
//! plain ids, components are named record schemas attached at runtime, and
//! mutations issued while a step runs are deferred until the step's flush.

mod change;
pub mod component;
pub mod config;
mod deferred;
pub mod entity;
pub mod error;
pub mod inspect;
pub mod policy;
pub mod query;
pub mod rng;
pub mod schedule;
pub mod snapshot;
pub mod store;
pub mod value;
pub mod world;

pub use component::{ComponentDef, ComponentId};
pub use config::WorldConfig;
pub use entity::EntityId;
pub use error::WorldError;
pub use inspect::{ComponentReport, EntityReport, FieldDelta, RecordDiff};
pub use policy::{PolicyVerdict, StrictViolation};
pub use query::{changed, with, without, QueryDef, QueryOptions, QueryResult, Row, Term};
pub use rng::RngStreams;
pub use schedule::{Schedule, System};
pub use snapshot::{load_snapshot, SnapshotWriter, WorldSnapshot, SNAPSHOT_VERSION};
pub use store::{FieldViewMut, StoreMode};
pub use value::{Record, Value};
pub use world::{TickReport, World, WorldBuilder, DEFAULT_FLUSH_LIMIT};
