//! Global change tracking for delta replication.
//!
//! Three sets accumulate during a tick: entities needing a full snapshot,
//! entities needing only a partial (movement) record, and entities deleted
//! this tick. A full marking supersedes a partial one, and a deletion
//! evicts the id from both. Each observer folds these global sets into its
//! own pending sets, filtered by what it can see.
//!
//! The sets are double buffered: marks land in the current buffer, the
//! fold reads it at end of tick, and [`DirtySets::swap`] exchanges it for
//! the drained buffer from the previous tick. Marks recorded after the
//! swap never land in a buffer a fold is still reading.

use redzone_core::EntityId;
use std::collections::BTreeSet;

#[derive(Debug, Default)]
struct DirtyBuffer {
    full: BTreeSet<EntityId>,
    partial: BTreeSet<EntityId>,
    deleted: BTreeSet<EntityId>,
}

impl DirtyBuffer {
    fn clear(&mut self) {
        self.full.clear();
        self.partial.clear();
        self.deleted.clear();
    }
}

/// The per-tick global dirty sets.
#[derive(Debug, Default)]
pub struct DirtySets {
    current: DirtyBuffer,
    drained: DirtyBuffer,
}

impl DirtySets {
    /// Record that `id` needs a full snapshot (created, or a discrete field
    /// changed). Removes any pending partial marking.
    pub fn mark_full(&mut self, id: EntityId) {
        self.current.partial.remove(&id);
        self.current.full.insert(id);
    }

    /// Record that `id` moved. Ignored when a full snapshot is already
    /// pending, since full records carry position too.
    pub fn mark_partial(&mut self, id: EntityId) {
        if !self.current.full.contains(&id) {
            self.current.partial.insert(id);
        }
    }

    /// Record that `id` was destroyed this tick. Any pending full or
    /// partial marking becomes moot.
    pub fn mark_deleted(&mut self, id: EntityId) {
        self.current.full.remove(&id);
        self.current.partial.remove(&id);
        self.current.deleted.insert(id);
    }

    /// Entities needing a full snapshot.
    pub fn full(&self) -> &BTreeSet<EntityId> {
        &self.current.full
    }

    /// Entities needing only a movement record.
    pub fn partial(&self) -> &BTreeSet<EntityId> {
        &self.current.partial
    }

    /// Entities deleted this tick.
    pub fn deleted(&self) -> &BTreeSet<EntityId> {
        &self.current.deleted
    }

    /// Whether nothing changed this tick.
    pub fn is_empty(&self) -> bool {
        self.current.full.is_empty()
            && self.current.partial.is_empty()
            && self.current.deleted.is_empty()
    }

    /// End-of-tick buffer swap: the drained buffer from the previous tick
    /// becomes the write target for the next one.
    pub fn swap(&mut self) {
        self.drained.clear();
        std::mem::swap(&mut self.current, &mut self.drained);
    }
}
