//! Strict-mode policy hook
//!
//! With strict mode on, any mutation call made mid-step is blocked and
//! described to the installed hook, which decides what happens to it. With
//! no hook installed the blocking error propagates to the caller.

use crate::entity::EntityId;
use crate::error::WorldError;

/// Description of one blocked mutation attempt.
#[derive(Debug)]
pub struct StrictViolation<'a> {
    /// Operation name: "create", "destroy", "add", "remove", "set", "mutate".
    pub operation: &'static str,
    /// Target entity; `EntityId::NONE` for `create`.
    pub entity: EntityId,
    pub component: Option<&'a str>,
    /// The error that propagates unless the hook intervenes.
    pub error: &'a WorldError,
}

/// The hook's decision for a blocked mutation.
#[derive(Debug)]
pub enum PolicyVerdict {
    /// Enqueue the call; it applies during the tick's flush.
    Defer,
    /// Drop the mutation silently. No error surfaces.
    Ignore,
    /// Let the original strict-mode error propagate.
    Propagate,
    /// Propagate this error instead of the original.
    Fail(WorldError),
}

pub type PolicyHook = Box<dyn FnMut(&StrictViolation<'_>) -> PolicyVerdict + Send>;
