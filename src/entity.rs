//! Entity identity and liveness

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::WorldError;

/// Opaque entity handle. Zero is reserved as "no entity".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(u64);

impl EntityId {
    /// The "no entity" sentinel.
    pub const NONE: EntityId = EntityId(0);

    pub fn from_raw(raw: u64) -> Self {
        EntityId(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }

    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Id allocation, recycling, and liveness.
///
/// Destroyed ids return to a free list and are handed out again LIFO, which
/// bounds id growth in long-running simulations. The alive set is sorted so
/// "all alive ids, ascending" is a plain iteration.
pub struct EntityAllocator {
    next_id: u64,
    free_list: Vec<EntityId>,
    alive: BTreeSet<EntityId>,
}

impl EntityAllocator {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            free_list: Vec::new(),
            alive: BTreeSet::new(),
        }
    }

    /// Reserves an id without marking it alive. Used for mid-step creates,
    /// where the caller needs the id now but aliveness lands at flush.
    pub fn reserve(&mut self) -> EntityId {
        if let Some(id) = self.free_list.pop() {
            id
        } else {
            let id = EntityId(self.next_id);
            self.next_id += 1;
            id
        }
    }

    /// Marks a previously reserved id alive.
    pub fn activate(&mut self, id: EntityId) {
        self.alive.insert(id);
    }

    /// Returns a reserved-but-never-activated id to the free list.
    pub fn release(&mut self, id: EntityId) {
        if !self.alive.contains(&id) {
            self.free_list.push(id);
        }
    }

    pub fn allocate(&mut self) -> EntityId {
        let id = self.reserve();
        self.activate(id);
        id
    }

    /// Returns false if the id was not alive.
    pub fn deallocate(&mut self, id: EntityId) -> bool {
        if self.alive.remove(&id) {
            self.free_list.push(id);
            true
        } else {
            false
        }
    }

    pub fn is_alive(&self, id: EntityId) -> bool {
        self.alive.contains(&id)
    }

    pub fn count(&self) -> usize {
        self.alive.len()
    }

    /// All alive ids, ascending.
    pub fn alive_ids(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.alive.iter().copied()
    }

    /// Revives a specific id, raising `next_id` past it. Snapshot restore
    /// uses this to keep ids stable across a save/load round trip.
    pub fn restore(&mut self, id: EntityId) -> Result<(), WorldError> {
        if id.is_none() {
            return Err(WorldError::ReservedId);
        }
        if self.alive.contains(&id) {
            return Err(WorldError::AlreadyAlive(id));
        }
        self.free_list.retain(|&queued| queued != id);
        if id.0 >= self.next_id {
            self.next_id = id.0 + 1;
        }
        self.alive.insert(id);
        Ok(())
    }
}

impl Default for EntityAllocator {
    fn default() -> Self {
        Self::new()
    }
}
