//! Per-connection replication state.
//!
//! An observer owns the view of the world a single client holds: which
//! entities it currently sees and which changes are pending for its next
//! update packet. The game folds the global dirty sets into every observer
//! once per tick, filtered through the observer's visible set.

use redzone_core::{EntityId, DEFAULT_ZOOM};
use redzone_net::{ConnectionId, OutboundHandle};
use redzone_world::DirtySets;
use std::collections::BTreeSet;

/// Replication state for one connected client.
#[derive(Debug)]
pub struct Observer {
    /// Transport connection this observer writes to.
    pub connection: ConnectionId,
    /// Outbound frame queue.
    pub outbound: OutboundHandle,
    /// Player entity this connection controls.
    pub player: EntityId,
    /// Entity whose viewpoint is replicated. Differs from `player` only
    /// while spectating.
    pub viewpoint: EntityId,
    /// Entities the client currently knows about.
    pub visible: BTreeSet<EntityId>,
    /// Entities owed a full snapshot in the next packet.
    pub pending_full: BTreeSet<EntityId>,
    /// Entities owed a movement record in the next packet.
    pub pending_partial: BTreeSet<EntityId>,
    /// Entities owed a deletion notice in the next packet.
    pub pending_deleted: BTreeSet<EntityId>,
    /// Force a complete resync: the visible set is rebuilt from scratch
    /// and everything in it re-sent as full. Set on join, spectate
    /// switches, and zoom changes.
    pub full_update: bool,
    /// Movements since the visible set was last recomputed.
    pub moves_since_update: u32,
    /// Zoom radius used for the last visible-set computation.
    pub zoom: u32,
}

impl Observer {
    /// Fresh observer for a newly joined player; starts with a forced
    /// full update so the first packet carries the whole visible world.
    pub fn new(connection: ConnectionId, outbound: OutboundHandle, player: EntityId) -> Self {
        Self {
            connection,
            outbound,
            player,
            viewpoint: player,
            visible: BTreeSet::new(),
            pending_full: BTreeSet::new(),
            pending_partial: BTreeSet::new(),
            pending_deleted: BTreeSet::new(),
            full_update: true,
            moves_since_update: 0,
            zoom: DEFAULT_ZOOM,
        }
    }

    /// Fold the global dirty sets into this observer's pending sets.
    ///
    /// Only changes to entities the observer can see are queued, with two
    /// exceptions: deletions always pass through when the entity was
    /// visible, and the observer's own player deletion is suppressed (the
    /// client is told about its death through the kill message instead).
    pub fn fold_dirty(&mut self, dirty: &DirtySets) {
        for &id in dirty.full() {
            if self.visible.contains(&id) {
                self.pending_partial.remove(&id);
                self.pending_full.insert(id);
            }
        }
        for &id in dirty.partial() {
            if self.visible.contains(&id) && !self.pending_full.contains(&id) {
                self.pending_partial.insert(id);
            }
        }
        for &id in dirty.deleted() {
            self.pending_full.remove(&id);
            self.pending_partial.remove(&id);
            if self.visible.remove(&id) && id != self.player {
                self.pending_deleted.insert(id);
            }
        }
    }

    /// Install a freshly computed visible set.
    ///
    /// Entities that just became visible are queued as full regardless of
    /// the global sets, entities that left view are queued for deletion,
    /// and on a forced full update the entire new set is re-sent. Either
    /// way the client is told about everything it held that is no longer
    /// in view.
    pub fn apply_visible_set(&mut self, new_visible: BTreeSet<EntityId>) {
        if self.full_update {
            for &id in &new_visible {
                self.pending_partial.remove(&id);
                self.pending_deleted.remove(&id);
                self.pending_full.insert(id);
            }
        } else {
            for &id in new_visible.difference(&self.visible) {
                self.pending_partial.remove(&id);
                self.pending_deleted.remove(&id);
                self.pending_full.insert(id);
            }
        }
        for &id in self.visible.difference(&new_visible) {
            self.pending_full.remove(&id);
            self.pending_partial.remove(&id);
            self.pending_deleted.insert(id);
        }
        self.visible = new_visible;
        self.full_update = false;
        self.moves_since_update = 0;
    }

    /// Whether anything is queued for the next update packet.
    pub fn has_pending(&self) -> bool {
        !self.pending_full.is_empty()
            || !self.pending_partial.is_empty()
            || !self.pending_deleted.is_empty()
    }

    /// Drop all pending state after it has been encoded into a packet.
    pub fn clear_pending(&mut self) {
        self.pending_full.clear();
        self.pending_partial.clear();
        self.pending_deleted.clear();
    }
}
