//! The shrinking red zone.
//!
//! A stage table drives the circle: waiting stages hold it still, moving
//! stages shrink it toward a randomly chosen target inside the previous
//! safe area. Damage outside the circle is applied by the game loop on a
//! fixed tick cadence; this module only owns the geometry and the stage
//! machine.

use crate::content::GasStage;
use glam::Vec2;
use rand::Rng;
use redzone_core::{secs_to_ticks, GameTick, WORLD_SIZE};
use tracing::info;

/// Replicated phase of the red zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum GasMode {
    /// Before the first shrink is announced.
    Inactive = 0,
    /// Circle announced and holding still.
    Waiting = 1,
    /// Circle shrinking toward its target.
    Moving = 2,
}

/// Live state of the red zone.
#[derive(Debug, Clone)]
pub struct GasState {
    /// Current phase.
    pub mode: GasMode,
    /// Index into the stage table.
    pub stage: usize,
    /// Tick the current stage started.
    stage_start: GameTick,
    /// Circle center at the start of the stage.
    pub old_position: Vec2,
    /// Circle center at the end of the stage.
    pub new_position: Vec2,
    /// Radius at the start of the stage, world units.
    pub old_radius: f32,
    /// Radius at the end of the stage, world units.
    pub new_radius: f32,
    /// Interpolated center for this tick.
    pub position: Vec2,
    /// Interpolated radius for this tick.
    pub radius: f32,
    /// Damage per application for the current stage.
    pub damage: f32,
}

impl GasState {
    /// Initial state covering the whole world.
    pub fn new() -> Self {
        let center = Vec2::splat(WORLD_SIZE / 2.0);
        let radius = WORLD_SIZE;
        Self {
            mode: GasMode::Inactive,
            stage: 0,
            stage_start: GameTick::ZERO,
            old_position: center,
            new_position: center,
            old_radius: radius,
            new_radius: radius,
            position: center,
            radius,
            damage: 0.0,
        }
    }

    /// Advance the stage machine and interpolation for `tick`. Returns true
    /// when the replicated gas fields changed and a broadcast is due.
    pub fn advance(&mut self, tick: GameTick, stages: &[GasStage], rng: &mut impl Rng) -> bool {
        let mut changed = false;

        // Stage transition.
        loop {
            let Some(stage) = stages.get(self.stage.min(stages.len().saturating_sub(1))) else {
                break;
            };
            let stage_ticks = secs_to_ticks(stage.duration_secs);
            let done = self.mode != GasMode::Inactive && tick.since(self.stage_start) >= stage_ticks;
            if self.mode == GasMode::Inactive || done {
                let next_index = if self.mode == GasMode::Inactive {
                    0
                } else {
                    self.stage + 1
                };
                let Some(next) = stages.get(next_index) else {
                    // Past the last stage the circle just holds its final shape.
                    break;
                };
                self.enter_stage(next_index, next, tick, rng);
                changed = true;
                continue;
            }
            break;
        }

        // Interpolation while moving.
        if self.mode == GasMode::Moving {
            let stage = &stages[self.stage];
            let stage_ticks = secs_to_ticks(stage.duration_secs).max(1);
            let t = (tick.since(self.stage_start) as f32 / stage_ticks as f32).min(1.0);
            self.position = self.old_position.lerp(self.new_position, t);
            self.radius = self.old_radius + (self.new_radius - self.old_radius) * t;
        }

        changed
    }

    fn enter_stage(&mut self, index: usize, stage: &GasStage, tick: GameTick, rng: &mut impl Rng) {
        self.stage = index;
        self.stage_start = tick;
        self.mode = if stage.moving {
            GasMode::Moving
        } else {
            GasMode::Waiting
        };
        self.old_position = self.new_position;
        self.old_radius = stage.old_radius * WORLD_SIZE;
        self.new_radius = stage.new_radius * WORLD_SIZE;
        self.damage = stage.damage;

        if stage.moving {
            // Target center stays inside the current safe circle so the new
            // circle never strands players who were already safe.
            let slack = (self.old_radius - self.new_radius).max(0.0);
            let angle = rng.gen_range(0.0..std::f32::consts::TAU);
            let dist = rng.gen_range(0.0..=slack);
            self.new_position = redzone_core::clamp_to_world(
                self.old_position + Vec2::new(angle.cos(), angle.sin()) * dist,
            );
        } else {
            self.new_position = self.old_position;
        }
        self.position = self.old_position;
        self.radius = self.old_radius;

        info!(
            stage = index,
            mode = ?self.mode,
            radius = self.new_radius,
            damage = self.damage,
            "red zone stage started"
        );
    }

    /// Whether `pos` is outside the safe circle and takes damage.
    pub fn is_outside(&self, pos: Vec2) -> bool {
        self.mode != GasMode::Inactive
            && self.damage > 0.0
            && pos.distance_squared(self.position) > self.radius * self.radius
    }
}

impl Default for GasState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::ContentTables;
    use redzone_core::scoped_rng;

    #[test]
    fn first_advance_enters_the_waiting_stage() {
        let stages = ContentTables::builtin().gas_stages;
        let mut gas = GasState::new();
        let mut rng = scoped_rng(7, 1);
        let changed = gas.advance(GameTick::ZERO, &stages, &mut rng);
        assert!(changed);
        assert_eq!(gas.mode, GasMode::Waiting);
        assert_eq!(gas.stage, 0);
    }

    #[test]
    fn moving_stage_lerps_the_radius_down() {
        let stages = ContentTables::builtin().gas_stages;
        let mut gas = GasState::new();
        let mut rng = scoped_rng(7, 1);
        gas.advance(GameTick::ZERO, &stages, &mut rng);

        let stage0_ticks = secs_to_ticks(stages[0].duration_secs);
        let t = GameTick(stage0_ticks);
        gas.advance(t, &stages, &mut rng);
        assert_eq!(gas.mode, GasMode::Moving);
        let start_radius = gas.radius;

        let halfway = t.advance(secs_to_ticks(stages[1].duration_secs) / 2);
        gas.advance(halfway, &stages, &mut rng);
        assert!(gas.radius < start_radius);
        assert!(gas.radius > gas.new_radius);
    }

    #[test]
    fn outside_check_requires_active_damage() {
        let mut gas = GasState::new();
        // Inactive gas never damages, regardless of position.
        assert!(!gas.is_outside(Vec2::new(-100.0, -100.0)));
        gas.mode = GasMode::Moving;
        gas.damage = 2.0;
        gas.position = Vec2::splat(512.0);
        gas.radius = 10.0;
        assert!(gas.is_outside(Vec2::ZERO));
        assert!(!gas.is_outside(Vec2::splat(512.0)));
    }

    #[test]
    fn schedule_runs_out_and_holds_the_final_circle() {
        let stages = ContentTables::builtin().gas_stages;
        let mut gas = GasState::new();
        let mut rng = scoped_rng(7, 1);
        let total: u64 = stages.iter().map(|s| secs_to_ticks(s.duration_secs)).sum();
        for tick in (0..total + 500).step_by(50) {
            gas.advance(GameTick(tick), &stages, &mut rng);
        }
        assert_eq!(gas.stage, stages.len() - 1);
        assert!(gas.radius <= 1.0);
    }
}
