#![warn(missing_docs)]
//! Core primitives shared across the workspace.

use bitflags::bitflags;
use rand::{rngs::StdRng, SeedableRng};
use serde::{Deserialize, Serialize};

pub mod constants;

pub use constants::*;

/// Fixed tick type (30 ms period => ~33 TPS).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GameTick(pub u64);

impl GameTick {
    /// First tick in any game instance.
    pub const ZERO: Self = Self(0);

    /// Advance by `delta` ticks.
    pub fn advance(self, delta: u64) -> Self {
        Self(self.0 + delta)
    }

    /// Ticks elapsed since `earlier`, saturating at zero.
    pub fn since(self, earlier: Self) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

/// Entity identifier. Assigned once per entity, strictly increasing, never
/// reused within a game instance.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct EntityId(pub u32);

bitflags! {
    /// Category membership for an entity. An entity keeps its flags for life.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EntityFlags: u8 {
        /// Connected or disconnected player avatar.
        const PLAYER     = 1 << 0;
        /// Static world geometry (tree, rock, wall, crate).
        const OBSTACLE   = 1 << 1;
        /// In-flight bullet (never enters the replicated registry).
        const BULLET     = 1 << 2;
        /// Pickup on the ground.
        const LOOT       = 1 << 3;
        /// Thrown projectile (grenade) with a fuse.
        const PROJECTILE = 1 << 4;
        /// Corpse left behind by a dead player.
        const DEAD_BODY  = 1 << 5;
    }
}

/// Logical vertical slice an entity occupies.
///
/// Ground (0) and basement (1) are the real layers; the stair variants (2/3)
/// alias to them for cross-layer interaction: two entities interact when the
/// low bit matches or both have the stair bit set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[repr(u8)]
pub enum Layer {
    /// Ground level.
    #[default]
    Ground = 0,
    /// Bunker / basement level.
    Basement = 1,
    /// On stairs, ground side.
    GroundStairs = 2,
    /// On stairs, basement side.
    BasementStairs = 3,
}

impl Layer {
    /// Build from the 2-bit wire representation.
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x3 {
            0 => Layer::Ground,
            1 => Layer::Basement,
            2 => Layer::GroundStairs,
            _ => Layer::BasementStairs,
        }
    }

    /// 2-bit wire representation.
    pub fn bits(self) -> u8 {
        self as u8
    }

    /// Whether entities on `self` and `other` interact.
    pub fn same_as(self, other: Layer) -> bool {
        let (a, b) = (self as u8, other as u8);
        (a & 1) == (b & 1) || (a & 2 != 0 && b & 2 != 0)
    }

    /// Collapse a stair variant back to its underlying layer.
    pub fn to_ground(self) -> Self {
        Layer::from_bits(self as u8 & 1)
    }

    /// Promote to the stair variant of this layer.
    pub fn to_stairs(self) -> Self {
        Layer::from_bits(self as u8 | 2)
    }

    /// True for the transitional stair variants.
    pub fn on_stairs(self) -> bool {
        self as u8 & 2 != 0
    }
}

/// One of four cardinal rotations, encoded in 2 bits on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[repr(u8)]
pub enum Orientation {
    /// Facing east (no rotation).
    #[default]
    East = 0,
    /// Facing north.
    North = 1,
    /// Facing west.
    West = 2,
    /// Facing south.
    South = 3,
}

impl Orientation {
    /// Build from the 2-bit wire representation.
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x3 {
            0 => Orientation::East,
            1 => Orientation::North,
            2 => Orientation::West,
            _ => Orientation::South,
        }
    }

    /// 2-bit wire representation.
    pub fn bits(self) -> u8 {
        self as u8
    }

    /// The rotation 180 degrees away.
    pub fn opposite(self) -> Self {
        Self::from_bits((self as u8 + 2) & 0x3)
    }
}

/// Helper to derive a reproducible RNG seeded by game + domain.
pub fn scoped_rng(game_seed: u64, domain: u64) -> StdRng {
    StdRng::seed_from_u64(game_seed ^ domain)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stair_layers_alias_to_their_base_layer() {
        assert!(Layer::Ground.same_as(Layer::GroundStairs));
        assert!(Layer::Basement.same_as(Layer::BasementStairs));
        assert!(Layer::GroundStairs.same_as(Layer::BasementStairs));
        assert!(!Layer::Ground.same_as(Layer::Basement));
        assert_eq!(Layer::GroundStairs.to_ground(), Layer::Ground);
        assert_eq!(Layer::BasementStairs.to_ground(), Layer::Basement);
        assert_eq!(Layer::Basement.to_stairs(), Layer::BasementStairs);
    }

    #[test]
    fn orientation_round_trips_through_bits() {
        for bits in 0..4u8 {
            assert_eq!(Orientation::from_bits(bits).bits(), bits);
        }
        assert_eq!(Orientation::East.opposite(), Orientation::West);
        assert_eq!(Orientation::North.opposite(), Orientation::South);
    }

    #[test]
    fn ticks_advance_monotonically() {
        let t = GameTick::ZERO.advance(5);
        assert_eq!(t, GameTick(5));
        assert_eq!(t.since(GameTick(2)), 3);
        assert_eq!(GameTick(2).since(t), 0);
    }
}
