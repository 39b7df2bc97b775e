//! Deferred mutation queue
//!
//! Mutations issued mid-step are recorded here and replayed FIFO during the
//! tick's flush phase, bounded per flush. The queue survives across ticks
//! without reordering.

use std::collections::VecDeque;

use crate::component::ComponentDef;
use crate::entity::EntityId;
use crate::value::Record;
use crate::world::World;

pub(crate) type MutateFn = Box<dyn FnOnce(&mut Record) + Send>;
pub(crate) type CallFn = Box<dyn FnOnce(&mut World) -> anyhow::Result<()> + Send>;

/// One recorded mutation request.
pub(crate) enum DeferredOp {
    Create {
        id: EntityId,
    },
    Destroy {
        id: EntityId,
    },
    Add {
        id: EntityId,
        def: ComponentDef,
        record: Record,
    },
    Remove {
        id: EntityId,
        def: ComponentDef,
    },
    Set {
        id: EntityId,
        def: ComponentDef,
        patch: Record,
    },
    Mutate {
        id: EntityId,
        def: ComponentDef,
        apply: MutateFn,
    },
    Call {
        run: CallFn,
    },
}

impl DeferredOp {
    pub fn name(&self) -> &'static str {
        match self {
            DeferredOp::Create { .. } => "create",
            DeferredOp::Destroy { .. } => "destroy",
            DeferredOp::Add { .. } => "add",
            DeferredOp::Remove { .. } => "remove",
            DeferredOp::Set { .. } => "set",
            DeferredOp::Mutate { .. } => "mutate",
            DeferredOp::Call { .. } => "call",
        }
    }
}

#[derive(Default)]
pub(crate) struct DeferredQueue {
    ops: VecDeque<DeferredOp>,
}

impl DeferredQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: DeferredOp) {
        self.ops.push_back(op);
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Detaches up to `cap` operations from the front, preserving order.
    /// Anything beyond the cap stays queued for a later flush.
    pub fn drain_up_to(&mut self, cap: usize) -> Vec<DeferredOp> {
        let take = cap.min(self.ops.len());
        self.ops.drain(..take).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn destroy(raw: u64) -> DeferredOp {
        DeferredOp::Destroy {
            id: EntityId::from_raw(raw),
        }
    }

    fn drained_ids(batch: &[DeferredOp]) -> Vec<u64> {
        batch
            .iter()
            .map(|op| match op {
                DeferredOp::Destroy { id } => id.raw(),
                _ => panic!("unexpected op"),
            })
            .collect()
    }

    #[test]
    fn drain_preserves_fifo_order() {
        let mut queue = DeferredQueue::new();
        for raw in 1..=5 {
            queue.push(destroy(raw));
        }

        let batch = queue.drain_up_to(10);
        assert_eq!(drained_ids(&batch), vec![1, 2, 3, 4, 5]);
        assert!(queue.is_empty());
    }

    #[test]
    fn drain_respects_the_cap_and_keeps_the_tail() {
        let mut queue = DeferredQueue::new();
        for raw in 1..=7 {
            queue.push(destroy(raw));
        }

        let first = queue.drain_up_to(3);
        assert_eq!(drained_ids(&first), vec![1, 2, 3]);
        assert_eq!(queue.len(), 4);

        let second = queue.drain_up_to(100);
        assert_eq!(drained_ids(&second), vec![4, 5, 6, 7]);
    }

    #[test]
    fn op_names_match_their_kind() {
        assert_eq!(destroy(1).name(), "destroy");
        assert_eq!(
            DeferredOp::Create {
                id: EntityId::from_raw(1)
            }
            .name(),
            "create"
        );
    }
}
