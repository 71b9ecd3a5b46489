//! Per-player gameplay state.
//!
//! Everything here is pure state plus small transition helpers; the game
//! loop decides when to call them and records the resulting dirty
//! markings. Wire encoding reads these fields directly.

use glam::Vec2;
use redzone_core::{secs_to_ticks, EntityId, GameTick, DEFAULT_ZOOM};
use std::collections::BTreeMap;

/// Number of carried weapon slots: two guns, melee, throwable.
pub const WEAPON_SLOTS: usize = 4;
/// Slot index of the melee weapon (always filled, never dropped).
pub const MELEE_SLOT: usize = 2;
/// Slot index of the throwable stack.
pub const THROWABLE_SLOT: usize = 3;

/// One carried weapon.
#[derive(Debug, Clone, Copy, Default)]
pub struct WeaponSlot {
    /// Loot item id occupying the slot; 0 means empty.
    pub item: u16,
    /// Weapon/throwable table id behind the item; 0 means empty.
    pub def: u16,
    /// Rounds currently in the magazine (guns only).
    pub ammo_in_mag: u32,
}

impl WeaponSlot {
    /// Whether anything occupies the slot.
    pub fn is_filled(&self) -> bool {
        self.item != 0
    }
}

/// A timed channel the player is committed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    /// Reloading the active weapon.
    Reload,
    /// Consuming a heal or boost item.
    UseItem(u16),
    /// Reviving a downed teammate.
    Revive(EntityId),
}

/// An in-progress action with its completion deadline.
#[derive(Debug, Clone, Copy)]
pub struct Action {
    /// What the player is doing.
    pub kind: ActionKind,
    /// Tick at which the action completes.
    pub ends_at: GameTick,
}

/// Movement keys held this tick.
#[derive(Debug, Clone, Copy, Default)]
pub struct MoveInput {
    /// W held.
    pub up: bool,
    /// S held.
    pub down: bool,
    /// A held.
    pub left: bool,
    /// D held.
    pub right: bool,
}

impl MoveInput {
    /// Unit-or-zero movement direction. Y grows north.
    pub fn direction(self) -> Vec2 {
        let mut d = Vec2::ZERO;
        if self.up {
            d.y += 1.0;
        }
        if self.down {
            d.y -= 1.0;
        }
        if self.left {
            d.x -= 1.0;
        }
        if self.right {
            d.x += 1.0;
        }
        if d != Vec2::ZERO {
            d = d.normalize();
        }
        d
    }
}

/// Result of applying damage to a player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DamageOutcome {
    /// Health reduced, player still up.
    Damaged,
    /// Health hit zero with teammates alive: the player is knocked.
    Downed,
    /// The player died.
    Killed,
}

/// Gameplay state of one player avatar.
#[derive(Debug, Clone)]
pub struct PlayerState {
    /// Display name from the join message.
    pub name: String,
    /// Health in `[0, 100]`.
    pub health: f32,
    /// Boost (adrenaline) in `[0, 100]`; decays and regenerates health.
    pub boost: f32,
    /// Knocked down, crawling, revivable.
    pub downed: bool,
    /// Confirmed kills.
    pub kills: u32,
    /// Current zoom radius (scope-driven).
    pub zoom: u32,
    /// Movement keys held.
    pub movement: MoveInput,
    /// Aim direction (unit vector).
    pub aim: Vec2,
    /// Trigger pressed this tick.
    pub shoot_start: bool,
    /// Trigger held.
    pub shoot_hold: bool,
    /// Sequence number of the last applied input, echoed back.
    pub last_input_seq: u8,
    /// Carried weapons.
    pub weapons: [WeaponSlot; WEAPON_SLOTS],
    /// Index of the active slot.
    pub active_slot: usize,
    /// Item stacks by item id.
    pub inventory: BTreeMap<u16, u32>,
    /// In-progress channel, if any.
    pub action: Option<Action>,
    /// Earliest tick the active weapon may fire again.
    pub next_fire: GameTick,
    /// Teammate currently reviving this player.
    pub revived_by: Option<EntityId>,
    /// Disconnected but kept in the match (their avatar idles).
    pub disconnected: bool,
}

impl PlayerState {
    /// Fresh state for a newly joined player.
    pub fn new(name: String) -> Self {
        Self {
            name,
            health: 100.0,
            boost: 0.0,
            downed: false,
            kills: 0,
            zoom: DEFAULT_ZOOM,
            movement: MoveInput::default(),
            aim: Vec2::X,
            shoot_start: false,
            shoot_hold: false,
            last_input_seq: 0,
            weapons: {
                let mut w = [WeaponSlot::default(); WEAPON_SLOTS];
                // Fists.
                w[MELEE_SLOT] = WeaponSlot {
                    item: 1,
                    def: 1,
                    ammo_in_mag: 0,
                };
                w
            },
            active_slot: MELEE_SLOT,
            inventory: BTreeMap::new(),
            action: None,
            next_fire: GameTick::ZERO,
            revived_by: None,
            disconnected: false,
        }
    }

    /// Movement speed multiplier from current status.
    pub fn speed_multiplier(&self) -> f32 {
        if self.downed {
            0.5
        } else if self.action.is_some() {
            0.6
        } else {
            1.0
        }
    }

    /// Apply damage; the caller handles death/down side effects.
    /// `can_be_downed` is true in team modes while teammates remain.
    pub fn take_damage(&mut self, amount: f32, can_be_downed: bool) -> DamageOutcome {
        self.health = (self.health - amount).max(0.0);
        if self.health > 0.0 {
            return DamageOutcome::Damaged;
        }
        if can_be_downed && !self.downed {
            self.downed = true;
            self.health = 100.0;
            self.cancel_action();
            DamageOutcome::Downed
        } else {
            DamageOutcome::Killed
        }
    }

    /// Restore health, clamped to 100.
    pub fn heal(&mut self, amount: f32) {
        self.health = (self.health + amount).min(100.0);
    }

    /// Add boost, clamped to 100.
    pub fn add_boost(&mut self, amount: f32) {
        self.boost = (self.boost + amount).min(100.0);
    }

    /// Per-tick boost decay and health regeneration. Returns true when
    /// health or boost changed, so the caller can mark the entity dirty.
    ///
    /// Regen rate steps up through boost quartiles; the top band burns
    /// boost faster in exchange for the strongest regen.
    pub fn tick_status(&mut self, dt: f32) -> bool {
        if self.boost <= 0.0 || self.downed {
            return false;
        }
        let (regen_per_sec, decay_per_sec) = match self.boost {
            b if b <= 25.0 => (1.0, 0.5),
            b if b <= 50.0 => (3.75, 0.625),
            b if b <= 87.5 => (4.75, 1.25),
            _ => (5.0, 1.5),
        };
        self.boost = (self.boost - decay_per_sec * dt).max(0.0);
        self.heal(regen_per_sec * dt);
        true
    }

    /// Begin a channel. Refused while another action is running: the first
    /// action always wins, later requests are dropped.
    pub fn start_action(&mut self, kind: ActionKind, duration_secs: f32, now: GameTick) -> bool {
        if self.action.is_some() {
            return false;
        }
        self.action = Some(Action {
            kind,
            ends_at: now.advance(secs_to_ticks(duration_secs)),
        });
        true
    }

    /// Abort the running channel, if any.
    pub fn cancel_action(&mut self) {
        self.action = None;
    }

    /// If the channel has completed by `now`, take it for resolution.
    pub fn finish_action(&mut self, now: GameTick) -> Option<ActionKind> {
        match self.action {
            Some(a) if now >= a.ends_at => {
                self.action = None;
                Some(a.kind)
            }
            _ => None,
        }
    }

    /// The active weapon slot.
    pub fn active_weapon(&self) -> &WeaponSlot {
        &self.weapons[self.active_slot]
    }

    /// Mutable active weapon slot.
    pub fn active_weapon_mut(&mut self) -> &mut WeaponSlot {
        &mut self.weapons[self.active_slot]
    }

    /// Switch to `slot` if it holds something. Switching cancels any
    /// running channel and clears the fire gate for the switch delay.
    pub fn equip_slot(&mut self, slot: usize, switch_delay_secs: f32, now: GameTick) -> bool {
        if slot >= WEAPON_SLOTS || !self.weapons[slot].is_filled() || slot == self.active_slot {
            return false;
        }
        self.cancel_action();
        self.active_slot = slot;
        self.next_fire = now.advance(secs_to_ticks(switch_delay_secs));
        true
    }

    /// First empty gun slot, if any.
    pub fn free_gun_slot(&self) -> Option<usize> {
        (0..2).find(|&i| !self.weapons[i].is_filled())
    }

    /// Count of `item` in the inventory.
    pub fn item_count(&self, item: u16) -> u32 {
        self.inventory.get(&item).copied().unwrap_or(0)
    }

    /// Add up to `count` of `item`, bounded by `max_stack`. Returns how
    /// many were actually taken.
    pub fn add_item(&mut self, item: u16, count: u32, max_stack: u32) -> u32 {
        let have = self.item_count(item);
        let taken = count.min(max_stack.saturating_sub(have));
        if taken > 0 {
            self.inventory.insert(item, have + taken);
        }
        taken
    }

    /// Remove up to `count` of `item`. Returns how many were removed.
    pub fn remove_item(&mut self, item: u16, count: u32) -> u32 {
        let have = self.item_count(item);
        let removed = count.min(have);
        if removed > 0 {
            if have == removed {
                self.inventory.remove(&item);
            } else {
                self.inventory.insert(item, have - removed);
            }
        }
        removed
    }

    /// Whether the fire gate is open at `now`.
    pub fn can_fire(&self, now: GameTick) -> bool {
        now >= self.next_fire && self.action.is_none() && !self.downed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn damage_downs_then_kills() {
        let mut p = PlayerState::new("a".into());
        assert_eq!(p.take_damage(40.0, true), DamageOutcome::Damaged);
        assert_eq!(p.take_damage(100.0, true), DamageOutcome::Downed);
        assert!(p.downed);
        assert_eq!(p.health, 100.0);
        assert_eq!(p.take_damage(150.0, true), DamageOutcome::Killed);
    }

    #[test]
    fn solo_players_die_without_being_downed() {
        let mut p = PlayerState::new("a".into());
        assert_eq!(p.take_damage(120.0, false), DamageOutcome::Killed);
        assert!(!p.downed);
    }

    #[test]
    fn first_action_wins() {
        let mut p = PlayerState::new("a".into());
        assert!(p.start_action(ActionKind::Reload, 2.0, GameTick::ZERO));
        assert!(!p.start_action(ActionKind::UseItem(201), 3.0, GameTick::ZERO));
        // Still reloading.
        assert!(matches!(
            p.action.unwrap().kind,
            ActionKind::Reload
        ));
    }

    #[test]
    fn actions_finish_exactly_once() {
        let mut p = PlayerState::new("a".into());
        p.start_action(ActionKind::Reload, 1.0, GameTick::ZERO);
        let done_at = GameTick(secs_to_ticks(1.0));
        assert!(p.finish_action(GameTick(done_at.0 - 1)).is_none());
        assert_eq!(p.finish_action(done_at), Some(ActionKind::Reload));
        assert!(p.finish_action(done_at).is_none());
    }

    #[test]
    fn boost_regenerates_health_and_decays() {
        let mut p = PlayerState::new("a".into());
        p.health = 50.0;
        p.boost = 100.0;
        assert!(p.tick_status(1.0));
        assert!(p.health > 50.0);
        assert!(p.boost < 100.0);

        let mut idle = PlayerState::new("b".into());
        idle.health = 50.0;
        assert!(!idle.tick_status(1.0));
        assert_eq!(idle.health, 50.0);
    }

    #[test]
    fn inventory_respects_stack_limits() {
        let mut p = PlayerState::new("a".into());
        assert_eq!(p.add_item(101, 90, 120), 90);
        assert_eq!(p.add_item(101, 90, 120), 30);
        assert_eq!(p.item_count(101), 120);
        assert_eq!(p.remove_item(101, 200), 120);
        assert_eq!(p.item_count(101), 0);
    }

    #[test]
    fn equip_respects_empty_slots_and_sets_switch_delay() {
        let mut p = PlayerState::new("a".into());
        assert!(!p.equip_slot(0, 0.25, GameTick::ZERO)); // empty
        p.weapons[0] = WeaponSlot {
            item: 301,
            def: 1,
            ammo_in_mag: 15,
        };
        assert!(p.equip_slot(0, 0.25, GameTick::ZERO));
        assert!(!p.can_fire(GameTick::ZERO));
        assert!(p.can_fire(GameTick(secs_to_ticks(0.25))));
    }

    #[test]
    fn diagonal_movement_is_normalized() {
        let m = MoveInput {
            up: true,
            right: true,
            ..Default::default()
        };
        let d = m.direction();
        assert!((d.length() - 1.0).abs() < 1e-6);
    }
}
