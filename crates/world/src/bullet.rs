//! In-flight bullets and explosion events.
//!
//! Bullets never enter the entity registry and own no physics bodies:
//! each tick they advance along a straight segment which the game casts
//! against the world. Clients are told about a bullet exactly once, in the
//! tick it was fired, and simulate its flight themselves; explosions are
//! likewise one-shot events.

use glam::Vec2;
use redzone_core::{EntityId, Layer};

/// A live bullet, simulated until it hits something or runs out of range.
#[derive(Debug, Clone)]
pub struct Bullet {
    /// Per-game sequence number carried on the wire.
    pub seq: u16,
    /// Player credited for hits.
    pub shooter: EntityId,
    /// Bullet table id.
    pub type_id: u16,
    /// Weapon table id it was fired from (clients pick tracer art by it).
    pub source_weapon: u16,
    /// Current position.
    pub position: Vec2,
    /// Muzzle position, for the one-shot announcement.
    pub origin: Vec2,
    /// Unit travel direction.
    pub direction: Vec2,
    /// Layer the bullet flies on.
    pub layer: Layer,
    /// Speed in world units per second.
    pub speed: f32,
    /// Distance flown so far.
    pub travelled: f32,
    /// Distance at which the bullet expires.
    pub max_distance: f32,
    /// Set on impact or expiry; swept out at end of tick.
    pub dead: bool,
}

impl Bullet {
    /// The segment this bullet sweeps during a `dt`-second step, clipped to
    /// its remaining range. Advancing past the clip marks it dead.
    pub fn step_segment(&self, dt: f32) -> (Vec2, Vec2) {
        let step = (self.speed * dt).min(self.max_distance - self.travelled);
        (self.position, self.position + self.direction * step)
    }

    /// Commit a step to `end`, updating travelled distance and expiry.
    pub fn advance_to(&mut self, end: Vec2) {
        self.travelled += self.position.distance(end);
        self.position = end;
        if self.travelled >= self.max_distance {
            self.dead = true;
        }
    }
}

/// A detonation to resolve and announce this tick.
#[derive(Debug, Clone)]
pub struct Explosion {
    /// Explosion table id.
    pub type_id: u16,
    /// Center of the blast.
    pub position: Vec2,
    /// Layer the blast affects.
    pub layer: Layer,
    /// Player credited for the damage.
    pub source: EntityId,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bullet() -> Bullet {
        Bullet {
            seq: 1,
            shooter: EntityId(1),
            type_id: 1,
            source_weapon: 1,
            position: Vec2::ZERO,
            origin: Vec2::ZERO,
            direction: Vec2::X,
            layer: Layer::Ground,
            speed: 100.0,
            travelled: 0.0,
            max_distance: 10.0,
            dead: false,
        }
    }

    #[test]
    fn steps_clip_to_remaining_range_and_expire() {
        let mut b = bullet();
        // 100 u/s over 30 ms would fly 3 units.
        let (from, to) = b.step_segment(0.03);
        assert_eq!(from, Vec2::ZERO);
        assert!((to.x - 3.0).abs() < 1e-5);
        b.advance_to(to);
        assert!(!b.dead);

        b.travelled = 9.5;
        let (_, to) = b.step_segment(0.03);
        assert!((to.x - b.position.x - 0.5).abs() < 1e-5);
        b.advance_to(to);
        assert!(b.dead);
    }
}
