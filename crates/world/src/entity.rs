//! The closed set of replicated entity kinds.
//!
//! Every simulated thing a client can be told about is one `Entity`:
//! shared state in [`EntityCore`], kind-specific state in the
//! [`EntityKind`] variant. Collision and serialization code matches on the
//! kind, so adding a variant surfaces every site that needs updating.

use crate::player::PlayerState;
use glam::Vec2;
use redzone_core::{EntityFlags, EntityId, GameTick, Layer, Orientation};
use redzone_physics::{Aabb, BodyHandle, Shape};

/// Wire discriminator preceding each full/partial entity payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ObjectKind {
    /// Reserved.
    Invalid = 0,
    /// Player avatar.
    Player = 1,
    /// Static world geometry.
    Obstacle = 2,
    /// Ground pickup.
    Loot = 3,
    /// Corpse decal.
    DeadBody = 5,
    /// Thrown projectile.
    Projectile = 9,
}

impl ObjectKind {
    /// Decode a wire discriminator.
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            1 => ObjectKind::Player,
            2 => ObjectKind::Obstacle,
            3 => ObjectKind::Loot,
            5 => ObjectKind::DeadBody,
            9 => ObjectKind::Projectile,
            _ => return None,
        })
    }
}

/// State shared by every entity kind.
#[derive(Debug, Clone)]
pub struct EntityCore {
    /// Unique, never-reused identifier.
    pub id: EntityId,
    /// Category flags, fixed at creation.
    pub flags: EntityFlags,
    /// Logical vertical layer.
    pub layer: Layer,
    /// World position. Mirrors the physics body for dynamic entities.
    pub position: Vec2,
    /// Cardinal rotation.
    pub orientation: Orientation,
    /// Visual/collision scale factor.
    pub scale: f32,
    /// Set at destruction; a dead entity is skipped by every gameplay pass.
    pub dead: bool,
    /// Physics body, when the entity owns one.
    pub body: Option<BodyHandle>,
}

/// Static world geometry.
#[derive(Debug, Clone)]
pub struct ObstacleState {
    /// Content-table id of the obstacle type.
    pub type_id: u16,
    /// Remaining health; `None` for indestructible geometry.
    pub health: Option<f32>,
    /// Starting health, for the 8-bit normalized wire encoding.
    pub max_health: f32,
    /// Collision shape.
    pub shape: Shape,
    /// Whether destroying this obstacle changes what others can see
    /// (a building ceiling); triggers a global visibility refresh.
    pub alters_visibility: bool,
}

impl ObstacleState {
    /// Bounds used for visibility-grid intersection.
    pub fn bounds(&self, position: Vec2) -> Aabb {
        self.shape.bounds(position)
    }
}

/// A pickup lying on the ground.
#[derive(Debug, Clone)]
pub struct LootState {
    /// Content-table id of the item.
    pub item: u16,
    /// Stack count.
    pub count: u32,
    /// Position at the end of the previous tick, to detect drift.
    pub old_position: Vec2,
}

/// Corpse left where a player died.
#[derive(Debug, Clone)]
pub struct DeadBodyState {
    /// Id of the player this body belonged to.
    pub player: EntityId,
}

/// A thrown grenade in flight.
#[derive(Debug, Clone)]
pub struct ProjectileState {
    /// Content-table id of the throwable.
    pub type_id: u16,
    /// Height above ground; projectiles clear low obstacles.
    pub z_pos: f32,
    /// Travel direction.
    pub direction: Vec2,
    /// Tick at which the fuse expires and the payload detonates.
    pub detonate_at: GameTick,
    /// Explosion produced on detonation.
    pub explosion: u16,
    /// Player who threw it (credited for damage).
    pub thrower: EntityId,
}

/// Kind-specific entity state.
#[derive(Debug, Clone)]
pub enum EntityKind {
    /// Static world geometry.
    Obstacle(ObstacleState),
    /// Player avatar; gameplay state lives in [`PlayerState`].
    Player(Box<PlayerState>),
    /// Ground pickup.
    Loot(LootState),
    /// Corpse decal.
    DeadBody(DeadBodyState),
    /// Thrown projectile.
    Projectile(ProjectileState),
}

/// One simulated entity.
#[derive(Debug, Clone)]
pub struct Entity {
    /// Shared state.
    pub core: EntityCore,
    /// Kind-specific state.
    pub kind: EntityKind,
}

impl Entity {
    /// Wire discriminator for this entity.
    pub fn object_kind(&self) -> ObjectKind {
        match self.kind {
            EntityKind::Obstacle(_) => ObjectKind::Obstacle,
            EntityKind::Player(_) => ObjectKind::Player,
            EntityKind::Loot(_) => ObjectKind::Loot,
            EntityKind::DeadBody(_) => ObjectKind::DeadBody,
            EntityKind::Projectile(_) => ObjectKind::Projectile,
        }
    }

    /// Whether this entity participates in the static visibility grid.
    pub fn is_static(&self) -> bool {
        self.core.flags.contains(EntityFlags::OBSTACLE)
    }

    /// Bounds for visibility intersection (statics only).
    pub fn static_bounds(&self) -> Option<Aabb> {
        match &self.kind {
            EntityKind::Obstacle(o) => Some(o.bounds(self.core.position)),
            _ => None,
        }
    }

    /// Shared access to the player state, when this is a player.
    pub fn player(&self) -> Option<&PlayerState> {
        match &self.kind {
            EntityKind::Player(p) => Some(p),
            _ => None,
        }
    }

    /// Mutable access to the player state, when this is a player.
    pub fn player_mut(&mut self) -> Option<&mut PlayerState> {
        match &mut self.kind {
            EntityKind::Player(p) => Some(p),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_kind_round_trips() {
        for kind in [
            ObjectKind::Player,
            ObjectKind::Obstacle,
            ObjectKind::Loot,
            ObjectKind::DeadBody,
            ObjectKind::Projectile,
        ] {
            assert_eq!(ObjectKind::from_u8(kind as u8), Some(kind));
        }
        assert_eq!(ObjectKind::from_u8(0), None);
        assert_eq!(ObjectKind::from_u8(6), None);
    }
}
