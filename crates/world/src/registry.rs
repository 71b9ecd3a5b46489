//! Entity registry: the authoritative id -> entity map.
//!
//! Ids are assigned from a monotonically increasing counter and never
//! reused within a game instance. Iteration order is the id order
//! (`BTreeMap`), so every pass over the registry is deterministic for a
//! given seed.

use crate::dirty::DirtySets;
use crate::entity::{Entity, EntityKind};
use redzone_core::EntityId;
use std::collections::{BTreeMap, BTreeSet};

/// Owns every live replicated entity.
#[derive(Debug, Default)]
pub struct Registry {
    entities: BTreeMap<EntityId, Entity>,
    next_id: u32,
    /// Ids of static geometry, the input to visibility precomputation.
    statics: BTreeSet<EntityId>,
    /// Ids of everything that moves or changes (players, loot, projectiles,
    /// dead bodies).
    dynamics: BTreeSet<EntityId>,
}

impl Registry {
    /// Empty registry; ids start at 1 so 0 can mean "no entity" on the wire.
    pub fn new() -> Self {
        Self {
            entities: BTreeMap::new(),
            next_id: 1,
            statics: BTreeSet::new(),
            dynamics: BTreeSet::new(),
        }
    }

    /// Reserve the next entity id without inserting anything.
    pub fn allocate_id(&mut self) -> EntityId {
        let id = EntityId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Insert a fully built entity under the id stored in its core and mark
    /// it fully dirty so every observer learns about it.
    pub fn insert(&mut self, entity: Entity, dirty: &mut DirtySets) {
        let id = entity.core.id;
        if entity.is_static() {
            self.statics.insert(id);
        } else {
            self.dynamics.insert(id);
        }
        dirty.mark_full(id);
        self.entities.insert(id, entity);
    }

    /// Remove an entity and record the deletion for replication. Removing an
    /// absent id is a no-op.
    pub fn remove(&mut self, id: EntityId, dirty: &mut DirtySets) {
        if self.entities.remove(&id).is_some() {
            self.statics.remove(&id);
            self.dynamics.remove(&id);
            dirty.mark_deleted(id);
        }
    }

    /// Shared access to one entity.
    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    /// Mutable access to one entity.
    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.entities.get_mut(&id)
    }

    /// Whether `id` is currently live.
    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    /// All live entities in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    /// Mutable iteration in id order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Entity> {
        self.entities.values_mut()
    }

    /// Ids of static geometry, in id order.
    pub fn static_ids(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.statics.iter().copied()
    }

    /// Ids of dynamic entities, in id order.
    pub fn dynamic_ids(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.dynamics.iter().copied()
    }

    /// Ids of live, connected player avatars, in id order.
    pub fn player_ids(&self) -> Vec<EntityId> {
        self.entities
            .values()
            .filter(|e| matches!(e.kind, EntityKind::Player(_)))
            .map(|e| e.core.id)
            .collect()
    }

    /// Number of live entities.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{DeadBodyState, EntityCore, ObstacleState};
    use glam::Vec2;
    use redzone_core::{EntityFlags, Layer, Orientation};
    use redzone_physics::Shape;

    fn obstacle(id: EntityId) -> Entity {
        Entity {
            core: EntityCore {
                id,
                flags: EntityFlags::OBSTACLE,
                layer: Layer::Ground,
                position: Vec2::new(10.0, 10.0),
                orientation: Orientation::East,
                scale: 1.0,
                dead: false,
                body: None,
            },
            kind: EntityKind::Obstacle(ObstacleState {
                type_id: 1,
                health: Some(100.0),
                max_health: 100.0,
                shape: Shape::Circle { radius: 1.0 },
                alters_visibility: false,
            }),
        }
    }

    fn dead_body(id: EntityId, of: EntityId) -> Entity {
        Entity {
            core: EntityCore {
                id,
                flags: EntityFlags::DEAD_BODY,
                layer: Layer::Ground,
                position: Vec2::ZERO,
                orientation: Orientation::East,
                scale: 1.0,
                dead: false,
                body: None,
            },
            kind: EntityKind::DeadBody(DeadBodyState { player: of }),
        }
    }

    #[test]
    fn ids_are_monotonic_and_never_reused() {
        let mut reg = Registry::new();
        let mut dirty = DirtySets::default();
        let a = reg.allocate_id();
        let b = reg.allocate_id();
        assert!(b > a);
        reg.insert(obstacle(a), &mut dirty);
        reg.remove(a, &mut dirty);
        let c = reg.allocate_id();
        assert!(c > b, "removed ids must not be recycled");
    }

    #[test]
    fn insert_marks_full_and_remove_marks_deleted() {
        let mut reg = Registry::new();
        let mut dirty = DirtySets::default();
        let id = reg.allocate_id();
        reg.insert(obstacle(id), &mut dirty);
        assert!(dirty.full().contains(&id));
        reg.remove(id, &mut dirty);
        assert!(dirty.deleted().contains(&id));
        assert!(!dirty.full().contains(&id));
    }

    #[test]
    fn static_and_dynamic_partitions_track_membership() {
        let mut reg = Registry::new();
        let mut dirty = DirtySets::default();
        let s = reg.allocate_id();
        let d = reg.allocate_id();
        reg.insert(obstacle(s), &mut dirty);
        reg.insert(dead_body(d, s), &mut dirty);
        assert_eq!(reg.static_ids().collect::<Vec<_>>(), vec![s]);
        assert_eq!(reg.dynamic_ids().collect::<Vec<_>>(), vec![d]);
        reg.remove(d, &mut dirty);
        assert_eq!(reg.dynamic_ids().count(), 0);
    }

    #[test]
    fn removing_an_absent_id_is_a_no_op() {
        let mut reg = Registry::new();
        let mut dirty = DirtySets::default();
        reg.remove(EntityId(99), &mut dirty);
        assert!(dirty.deleted().is_empty());
    }
}
