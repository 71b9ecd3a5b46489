//! Fixed world and protocol constants.

use glam::Vec2;

/// Target tick period in milliseconds.
pub const TICK_PERIOD_MS: u64 = 30;

/// World extent in world units; positions are encoded over `[0, WORLD_SIZE]`.
pub const WORLD_SIZE: f32 = 1024.0;

/// Stride of the coarse cells the static visibility grid is keyed on.
pub const VISIBILITY_CELL_STRIDE: f32 = 10.0;

/// Horizontal cull half-extent per unit of zoom. The culling shape is a
/// rectangle, not a circle; the x/y asymmetry encodes the client aspect ratio.
pub const CULL_FACTOR_X: f32 = 1.5;
/// Vertical cull half-extent per unit of zoom.
pub const CULL_FACTOR_Y: f32 = 1.25;

/// Zoom radii for the standard scopes (1x, 2x, 4x).
pub const BASE_ZOOM_LEVELS: [u32; 3] = [28, 36, 48];
/// Extra zoom radii unlocked by the rare 8x scope.
pub const ZOOM_LEVELS_8X: [u32; 2] = [64, 68];
/// Extra zoom radii unlocked by the rare 15x scope.
pub const ZOOM_LEVELS_15X: [u32; 2] = [88, 104];

/// Default zoom (1x scope).
pub const DEFAULT_ZOOM: u32 = 28;

/// Observer moves tolerated before its visible-set must be recomputed.
pub const MOVES_BEFORE_VISIBILITY_UPDATE: u32 = 8;

/// Ticks between red-zone damage applications (~2 s at 30 ms).
pub const GAS_DAMAGE_TICK_INTERVAL: u64 = 67;

/// Player collision radius in world units.
pub const PLAYER_RADIUS: f32 = 1.0;
/// Maximum revive distance; moving further apart cancels the revive.
pub const REVIVE_RANGE: f32 = 5.0;
/// Health restored on a successful revive.
pub const REVIVE_HEALTH: f32 = 24.0;
/// Revive channel duration in seconds.
pub const REVIVE_DURATION_SECS: f32 = 8.0;
/// Loot pickup reach beyond the player radius.
pub const TOUCH_LOOT_RAD_MULT: f32 = 1.4;

/// Bounded attempts for collision-free spawn placement.
pub const SPAWN_ATTEMPTS: u32 = 32;

/// Ticks after game over during which final packets are still flushed.
pub const GAME_OVER_GRACE_TICKS: u64 = 10;

/// Convert a duration in seconds into whole ticks, rounding up.
pub fn secs_to_ticks(secs: f32) -> u64 {
    ((secs * 1000.0) / TICK_PERIOD_MS as f32).ceil() as u64
}

/// Clamp a position into the world square.
pub fn clamp_to_world(pos: Vec2) -> Vec2 {
    pos.clamp(Vec2::ZERO, Vec2::splat(WORLD_SIZE))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seconds_convert_to_whole_ticks() {
        assert_eq!(secs_to_ticks(0.03), 1);
        assert_eq!(secs_to_ticks(1.0), 34); // 1000/30 rounded up
        assert_eq!(secs_to_ticks(8.0), 267);
    }

    #[test]
    fn positions_clamp_into_the_world_square() {
        let p = clamp_to_world(Vec2::new(-5.0, 2000.0));
        assert_eq!(p, Vec2::new(0.0, WORLD_SIZE));
    }
}
