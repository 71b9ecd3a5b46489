//! The game context: one running match.
//!
//! `Game` owns the registry, physics world, dirty sets, observers, and the
//! red zone, and advances them all in a fixed pass order once per tick.
//! Inbound messages are applied at receipt, outside the tick: they only
//! flip flags and queue requests the next tick reads.

use crate::effects::{Effect, EffectQueue};
use crate::emit::{self, KillEvent, RoleEvent, TickEvents};
use crate::observer::Observer;
use anyhow::{Context, Result};
use glam::Vec2;
use rand::rngs::StdRng;
use rand::Rng;
use redzone_core::{
    scoped_rng, secs_to_ticks, EntityFlags, EntityId, GameTick, Layer, Orientation,
    GAME_OVER_GRACE_TICKS, GAS_DAMAGE_TICK_INTERVAL, MOVES_BEFORE_VISIBILITY_UPDATE,
    PLAYER_RADIUS, REVIVE_HEALTH, REVIVE_RANGE, TICK_PERIOD_MS, TOUCH_LOOT_RAD_MULT,
};
use redzone_net::packets::{EmoteMessage, InputAction, InputMessage, SpectateMessage};
use redzone_net::{
    ClientMessage, ConnectionId, OutboundHandle, PickupResult, MAX_EMOTES_PER_PACKET,
    PROTOCOL_VERSION,
};
use redzone_physics::{Body, BodyKind, PhysicsWorld, Shape};
use redzone_world::content::{ContentTables, ItemClass};
use redzone_world::entity::{
    DeadBodyState, Entity, EntityCore, EntityKind, LootState, ProjectileState,
};
use redzone_world::map::GameMap;
use redzone_world::player::{
    ActionKind, DamageOutcome, MoveInput, PlayerState, MELEE_SLOT, THROWABLE_SLOT, WEAPON_SLOTS,
};
use redzone_world::visibility::cull_rect;
use redzone_world::{Bullet, DirtySets, Explosion, GasState, Registry};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, instrument, warn};

/// RNG domain for combat randomness (spread, gas targets).
const RNG_DOMAIN_COMBAT: u64 = 0x636f_6d62_6174;

/// Kills required to become (or take over) kill leader.
const KILL_LEADER_MIN_KILLS: u32 = 3;
/// Role id broadcast for the kill leader.
const ROLE_KILL_LEADER: u8 = 1;

/// Corpses despawn this long after death.
const DEAD_BODY_LINGER_SECS: f32 = 180.0;

/// Fixed simulation step in seconds.
const DT: f32 = TICK_PERIOD_MS as f32 / 1000.0;

/// Tunable match parameters, loaded from the config file.
#[derive(Debug, Clone)]
pub struct GameOptions {
    /// Seed for map generation and combat randomness.
    pub seed: u64,
    /// Whether players are downed (revivable) instead of dying outright.
    pub team_mode: bool,
    /// Base movement speed in world units per second.
    pub movement_speed: f32,
    /// Seconds after start during which joins are accepted.
    pub join_window_secs: f32,
}

impl Default for GameOptions {
    fn default() -> Self {
        Self {
            seed: 0,
            team_mode: false,
            movement_speed: 12.0,
            join_window_secs: 60.0,
        }
    }
}

/// One running match.
pub struct Game {
    options: GameOptions,
    content: ContentTables,
    registry: Registry,
    physics: PhysicsWorld,
    dirty: DirtySets,
    map: GameMap,
    gas: GasState,
    bullets: Vec<Bullet>,
    next_bullet_seq: u16,
    pending_explosions: Vec<Explosion>,
    observers: BTreeMap<ConnectionId, Observer>,
    effects: EffectQueue,
    events: TickEvents,
    tick: GameTick,
    rng: StdRng,
    topology_changed: bool,
    objects_changed: bool,
    joins_closed: bool,
    started: bool,
    game_over: bool,
    grace_ticks_left: u64,
    alive: u32,
    kill_leader: Option<(EntityId, u32)>,
    death_ranks: BTreeMap<EntityId, u32>,
    last_gas_circle: (Vec2, f32),
}

impl Game {
    /// Build a match: validate content, generate the map, arm the red zone.
    pub fn new(options: GameOptions) -> Result<Self> {
        let content = ContentTables::builtin();
        content.validate().context("content tables invalid")?;

        let mut registry = Registry::new();
        let mut physics = PhysicsWorld::new();
        let mut dirty = DirtySets::default();
        let map = GameMap::generate(options.seed, &content, &mut registry, &mut physics, &mut dirty)
            .context("map generation failed")?;
        let rng = scoped_rng(options.seed, RNG_DOMAIN_COMBAT);
        let gas = GasState::new();
        let last_gas_circle = (gas.position, gas.radius);

        Ok(Self {
            options,
            content,
            registry,
            physics,
            dirty,
            map,
            gas,
            bullets: Vec::new(),
            next_bullet_seq: 1,
            pending_explosions: Vec::new(),
            observers: BTreeMap::new(),
            effects: EffectQueue::new(),
            events: TickEvents::default(),
            tick: GameTick::ZERO,
            rng,
            topology_changed: false,
            objects_changed: false,
            joins_closed: false,
            started: false,
            game_over: false,
            grace_ticks_left: GAME_OVER_GRACE_TICKS,
            alive: 0,
            kill_leader: None,
            death_ranks: BTreeMap::new(),
            last_gas_circle,
        })
    }

    /// Current tick number.
    pub fn current_tick(&self) -> GameTick {
        self.tick
    }

    /// True once the match ended and the final packets have been flushed.
    pub fn is_finished(&self) -> bool {
        self.game_over && self.grace_ticks_left == 0
    }

    /// Connected player count.
    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    /// Players still alive.
    pub fn alive_count(&self) -> u32 {
        self.alive
    }

    // ------------------------------------------------------------------
    // Inbound

    /// A transport connection opened. Nothing is spawned until it joins.
    pub fn handle_connected(&mut self, conn: ConnectionId, _outbound: &OutboundHandle) {
        debug!(conn, "connection opened");
    }

    /// A transport connection closed. The avatar idles in place; a dead or
    /// idle avatar is removed immediately.
    pub fn handle_disconnected(&mut self, conn: ConnectionId) {
        let Some(observer) = self.observers.remove(&conn) else {
            return;
        };
        let player = observer.player;
        let dead = self
            .registry
            .get(player)
            .map(|e| e.core.dead)
            .unwrap_or(true);
        if dead {
            self.remove_entity(player);
        } else if let Some(p) = self.registry.get_mut(player).and_then(|e| e.player_mut()) {
            p.disconnected = true;
            p.movement = MoveInput::default();
            p.shoot_start = false;
            p.shoot_hold = false;
        }
        info!(conn, player = player.0, "player disconnected");
    }

    /// Apply one inbound frame. Malformed frames are logged and dropped;
    /// the connection stays open.
    pub fn handle_message(&mut self, conn: ConnectionId, outbound: &OutboundHandle, frame: &[u8]) {
        let msg = match ClientMessage::decode(frame) {
            Ok(msg) => msg,
            Err(err) => {
                debug!(conn, %err, "discarding malformed message");
                return;
            }
        };
        match msg {
            ClientMessage::Join(join) => self.handle_join(conn, outbound, join.version, join.name),
            ClientMessage::Input(input) => self.handle_input(conn, input),
            ClientMessage::DropItem(drop) => self.handle_drop(conn, drop.item, drop.weapon_slot),
            ClientMessage::Emote(emote) => self.handle_emote(conn, emote),
            ClientMessage::Spectate(mode) => self.handle_spectate(conn, mode),
            ClientMessage::Disconnect => self.handle_disconnected(conn),
        }
    }

    fn handle_join(
        &mut self,
        conn: ConnectionId,
        outbound: &OutboundHandle,
        version: u16,
        name: String,
    ) {
        if version != PROTOCOL_VERSION {
            warn!(conn, version, "protocol mismatch, ignoring join");
            return;
        }
        if self.joins_closed || self.game_over {
            info!(conn, "join window closed, ignoring join");
            return;
        }
        if self.observers.contains_key(&conn) {
            debug!(conn, "duplicate join ignored");
            return;
        }

        let id = self.registry.allocate_id();
        let position = self.map.random_spawn_position(id.0 as u64, &self.physics);
        let body = self.physics.create_body(Body {
            entity: id,
            kind: BodyKind::Player,
            layer: Layer::Ground,
            shape: Shape::Circle {
                radius: PLAYER_RADIUS,
            },
            position,
            velocity: Vec2::ZERO,
            damping: 1.0,
        });
        let name = if name.trim().is_empty() {
            format!("Player{}", id.0)
        } else {
            name
        };
        self.registry.insert(
            Entity {
                core: EntityCore {
                    id,
                    flags: EntityFlags::PLAYER,
                    layer: Layer::Ground,
                    position,
                    orientation: Orientation::East,
                    scale: 1.0,
                    dead: false,
                    body: Some(body),
                },
                kind: EntityKind::Player(Box::new(PlayerState::new(name.clone()))),
            },
            &mut self.dirty,
        );
        self.objects_changed = true;

        self.alive += 1;
        self.events.alive_dirty = true;
        self.events.alive_count = self.alive;
        if self.alive >= 2 {
            self.started = true;
        }

        let observer = Observer::new(conn, outbound.clone(), id);
        if outbound.send(emit::encode_joined(id, self.options.team_mode)).is_err()
            || outbound.send(emit::encode_map(self.map.seed, &self.registry)).is_err()
        {
            warn!(conn, "join handshake send failed");
        }
        self.observers.insert(conn, observer);
        info!(conn, player = id.0, name, "player joined");
    }

    fn handle_input(&mut self, conn: ConnectionId, input: InputMessage) {
        let Some(player_id) = self.observers.get(&conn).map(|o| o.player) else {
            return;
        };
        let actions = input.actions.clone();
        if let Some(p) = self
            .registry
            .get_mut(player_id)
            .filter(|e| !e.core.dead)
            .and_then(|e| e.player_mut())
        {
            p.movement = MoveInput {
                up: input.moving_up,
                down: input.moving_down,
                left: input.moving_left,
                right: input.moving_right,
            };
            p.shoot_start |= input.shoot_start;
            p.shoot_hold = input.shoot_hold;
            if input.direction.length_squared() > 1e-6 {
                p.aim = input.direction.normalize();
            }
            p.last_input_seq = input.seq;
        } else {
            return;
        }
        for action in actions {
            self.apply_action(conn, player_id, action);
        }
    }

    fn apply_action(&mut self, conn: ConnectionId, player_id: EntityId, action: InputAction) {
        match action {
            InputAction::Reload => self.begin_reload(player_id),
            InputAction::Cancel => {
                if let Some(p) = self.player_mut(player_id) {
                    p.cancel_action();
                }
            }
            InputAction::Interact => self.try_pickup(conn, player_id),
            InputAction::Revive => self.begin_revive(player_id),
            InputAction::EquipSlot(slot) => {
                let delay = self.switch_delay_for(player_id, slot as usize);
                let now = self.tick;
                let changed = self
                    .player_mut(player_id)
                    .map(|p| p.equip_slot(slot as usize, delay, now))
                    .unwrap_or(false);
                if changed {
                    // Active weapon is a discrete field.
                    self.dirty.mark_full(player_id);
                }
            }
            InputAction::UseItem(index) => self.begin_use_item(player_id, index),
            InputAction::SwapWeaponSlots => {
                let swapped = self.player_mut(player_id).map(|p| {
                    p.weapons.swap(0, 1);
                    if p.active_slot < 2 {
                        p.active_slot = 1 - p.active_slot;
                    }
                });
                if swapped.is_some() {
                    self.dirty.mark_full(player_id);
                }
            }
        }
    }

    fn switch_delay_for(&self, player_id: EntityId, slot: usize) -> f32 {
        if slot >= WEAPON_SLOTS {
            return 0.0;
        }
        // Melee and throwable defs index their own tables, not the gun table.
        if slot == MELEE_SLOT || slot == THROWABLE_SLOT {
            return 0.25;
        }
        self.registry
            .get(player_id)
            .and_then(|e| e.player())
            .map(|p| p.weapons[slot].def)
            .and_then(|def| self.content.weapons.get(&def))
            .map(|w| w.switch_delay_secs)
            .unwrap_or(0.25)
    }

    fn begin_reload(&mut self, player_id: EntityId) {
        let Some(p) = self.registry.get(player_id).and_then(|e| e.player()) else {
            return;
        };
        if p.active_slot == MELEE_SLOT || p.active_slot == THROWABLE_SLOT {
            return; // nothing to reload
        }
        let slot = p.active_weapon();
        let Some(weapon) = self.content.weapons.get(&slot.def) else {
            return;
        };
        if slot.ammo_in_mag >= weapon.mag_size || p.item_count(weapon.ammo) == 0 {
            return;
        }
        let duration = weapon.reload_secs;
        let now = self.tick;
        if let Some(p) = self.player_mut(player_id) {
            // A second reload request while one runs is dropped.
            p.start_action(ActionKind::Reload, duration, now);
        }
    }

    fn begin_use_item(&mut self, player_id: EntityId, index: u8) {
        // Consumable hotbar order is fixed by the client UI.
        let item = match index {
            0 => 201, // bandage
            1 => 202, // soda
            _ => return,
        };
        let Some(def) = self.content.items.get(&item) else {
            return;
        };
        let duration = def.use_secs;
        let now = self.tick;
        if let Some(p) = self.player_mut(player_id) {
            if p.item_count(item) == 0 || p.downed {
                return;
            }
            p.start_action(ActionKind::UseItem(item), duration, now);
        }
    }

    fn begin_revive(&mut self, player_id: EntityId) {
        let Some(reviver) = self.registry.get(player_id) else {
            return;
        };
        let pos = reviver.core.position;
        let layer = reviver.core.layer;

        // Nearest downed teammate in reach.
        let mut target: Option<(EntityId, f32)> = None;
        for id in self.registry.player_ids() {
            if id == player_id {
                continue;
            }
            let Some(e) = self.registry.get(id) else {
                continue;
            };
            if e.core.dead || !layer.same_as(e.core.layer) {
                continue;
            }
            let Some(p) = e.player() else { continue };
            if !p.downed || p.revived_by.is_some() {
                continue;
            }
            let dist = pos.distance(e.core.position);
            if dist <= REVIVE_RANGE && target.map(|(_, d)| dist < d).unwrap_or(true) {
                target = Some((id, dist));
            }
        }
        let Some((target_id, _)) = target else { return };

        let now = self.tick;
        let started = self
            .player_mut(player_id)
            .map(|p| p.start_action(ActionKind::Revive(target_id), redzone_core::REVIVE_DURATION_SECS, now))
            .unwrap_or(false);
        if started {
            if let Some(t) = self.player_mut(target_id) {
                t.revived_by = Some(player_id);
            }
        }
    }

    fn handle_drop(&mut self, conn: ConnectionId, item: u16, weapon_slot: u8) {
        let Some(player_id) = self.observers.get(&conn).map(|o| o.player) else {
            return;
        };
        let Some(pos) = self.registry.get(player_id).map(|e| e.core.position) else {
            return;
        };
        let layer = self
            .registry
            .get(player_id)
            .map(|e| e.core.layer)
            .unwrap_or_default();

        let mut dropped: Option<(u16, u32)> = None;
        if let Some(p) = self.player_mut(player_id) {
            let slot = weapon_slot as usize;
            if slot < WEAPON_SLOTS && slot != MELEE_SLOT && p.weapons[slot].item == item {
                let taken = p.weapons[slot];
                p.weapons[slot] = Default::default();
                if p.active_slot == slot {
                    p.active_slot = MELEE_SLOT;
                }
                dropped = Some((taken.item, 1));
            } else {
                let removed = p.remove_item(item, u32::MAX);
                if removed > 0 {
                    dropped = Some((item, removed));
                }
            }
        }
        if let Some((item, count)) = dropped {
            self.dirty.mark_full(player_id);
            self.spawn_loot(item, count, pos + Vec2::new(0.5, 0.5), layer);
        }
    }

    fn handle_emote(&mut self, conn: ConnectionId, emote: EmoteMessage) {
        let Some(player_id) = self.observers.get(&conn).map(|o| o.player) else {
            return;
        };
        let already = self
            .events
            .emotes
            .iter()
            .filter(|(sender, _)| *sender == player_id)
            .count();
        if already >= MAX_EMOTES_PER_PACKET {
            debug!(conn, "emote rate limit hit");
            return;
        }
        self.events.emotes.push((player_id, emote));
    }

    fn handle_spectate(&mut self, conn: ConnectionId, mode: SpectateMessage) {
        let Some(player) = self.observers.get(&conn).map(|o| o.player) else {
            return;
        };
        // Spectating starts only after death.
        let own_alive = self
            .registry
            .get(player)
            .map(|e| !e.core.dead)
            .unwrap_or(false);
        if own_alive {
            return;
        }
        let alive_players: Vec<EntityId> = self
            .registry
            .player_ids()
            .into_iter()
            .filter(|&id| self.registry.get(id).map(|e| !e.core.dead).unwrap_or(false))
            .collect();
        if alive_players.is_empty() {
            return;
        }
        let Some(observer) = self.observers.get_mut(&conn) else {
            return;
        };
        let current = observer.viewpoint;
        let idx = alive_players.iter().position(|&id| id == current);
        let next = match mode {
            SpectateMessage::Begin => alive_players[0],
            SpectateMessage::Next => match idx {
                Some(i) => alive_players[(i + 1) % alive_players.len()],
                None => alive_players[0],
            },
            SpectateMessage::Previous => match idx {
                Some(i) => alive_players[(i + alive_players.len() - 1) % alive_players.len()],
                None => alive_players[0],
            },
        };
        if next != observer.viewpoint {
            observer.viewpoint = next;
            // Viewpoint changed: the whole visible world must be re-sent.
            observer.full_update = true;
        }
    }

    // ------------------------------------------------------------------
    // Tick

    /// Advance the match by one fixed step.
    #[instrument(level = "debug", skip(self), fields(tick = self.tick.0))]
    pub fn tick(&mut self) {
        if self.game_over {
            self.grace_ticks_left = self.grace_ticks_left.saturating_sub(1);
        }
        self.tick = self.tick.advance(1);

        self.drain_effects();
        self.physics.step(DT);
        self.sync_dynamic_positions();
        self.update_bullets();
        self.update_gas();
        self.close_join_window();
        self.update_players();
        self.resolve_explosions();
        self.check_game_over();
        self.update_observers();
        self.finish_tick();
    }

    fn drain_effects(&mut self) {
        while let Some(effect) = self.effects.pop_due(self.tick) {
            match effect {
                Effect::DetonateProjectile(id) => {
                    // The projectile may have been destroyed since the fuse
                    // was lit; a dangling timer is a silent no-op.
                    let Some(e) = self.registry.get(id).filter(|e| !e.core.dead) else {
                        continue;
                    };
                    let (position, layer) = (e.core.position, e.core.layer);
                    let (explosion, thrower) = match &e.kind {
                        EntityKind::Projectile(p) => (p.explosion, p.thrower),
                        _ => continue,
                    };
                    self.remove_entity(id);
                    self.pending_explosions.push(Explosion {
                        type_id: explosion,
                        position,
                        layer,
                        source: thrower,
                    });
                }
                Effect::RemoveDeadBody(id) => {
                    self.remove_entity(id);
                }
                Effect::MeleeStrike { attacker, weapon } => {
                    self.resolve_melee(attacker, weapon);
                }
            }
        }
    }

    /// Mirror physics body positions back into entity cores; movement marks
    /// partial dirty and advances observer move counters.
    fn sync_dynamic_positions(&mut self) {
        let ids: Vec<EntityId> = self.registry.dynamic_ids().collect();
        let mut moved_players = Vec::new();
        for id in ids {
            let Some(e) = self.registry.get_mut(id) else {
                continue;
            };
            let Some(handle) = e.core.body else { continue };
            let Some(pos) = self.physics.position(handle) else {
                continue;
            };
            if pos.distance_squared(e.core.position) < 1e-8 {
                continue;
            }
            e.core.position = pos;
            self.dirty.mark_partial(id);
            if let EntityKind::Loot(l) = &mut e.kind {
                l.old_position = pos;
            }
            if e.core.flags.contains(EntityFlags::PLAYER) {
                moved_players.push((id, pos));
            }
        }

        // Stair transitions and move counters.
        for (id, pos) in moved_players {
            let Some(e) = self.registry.get(id) else { continue };
            let resolved = self.map.resolve_layer(pos, e.core.layer);
            if resolved != e.core.layer {
                let handle = e.core.body;
                if let Some(e) = self.registry.get_mut(id) {
                    e.core.layer = resolved;
                }
                if let Some(handle) = handle {
                    self.physics.set_layer(handle, resolved);
                }
                // Layer is a discrete field.
                self.dirty.mark_full(id);
            }
            for observer in self.observers.values_mut() {
                if observer.player == id || observer.viewpoint == id {
                    observer.moves_since_update += 1;
                }
            }
        }
    }

    fn update_bullets(&mut self) {
        let mut impacts: Vec<(EntityId, EntityId, f32, u16)> = Vec::new(); // victim, shooter, damage, weapon
        let mut obstacle_hits: Vec<(EntityId, f32)> = Vec::new();

        for i in 0..self.bullets.len() {
            if self.bullets[i].dead {
                continue;
            }
            let (from, to) = self.bullets[i].step_segment(DT);
            let shooter = self.bullets[i].shooter;
            let layer = self.bullets[i].layer;
            let hit = self.physics.cast_segment(from, to, layer, |b| {
                b.entity != shooter && matches!(b.kind, BodyKind::Static | BodyKind::Player)
            });

            let bullet = &mut self.bullets[i];
            let def_damage = self
                .content
                .bullets
                .get(&bullet.type_id)
                .map(|d| (d.damage, d.obstacle_mult, d.on_hit))
                .unwrap_or((0.0, 1.0, 0));
            match hit {
                Some(hit) => {
                    bullet.position = hit.position;
                    bullet.dead = true;
                    let victim_is_player = self
                        .registry
                        .get(hit.entity)
                        .map(|e| e.core.flags.contains(EntityFlags::PLAYER))
                        .unwrap_or(false);
                    if victim_is_player {
                        impacts.push((hit.entity, shooter, def_damage.0, bullet.source_weapon));
                    } else {
                        obstacle_hits.push((hit.entity, def_damage.0 * def_damage.1));
                    }
                }
                None => {
                    bullet.advance_to(to);
                }
            }
            // On-hit payloads detonate wherever the bullet stopped, whether
            // it struck something or ran out of range.
            if self.bullets[i].dead && def_damage.2 != 0 {
                let b = &self.bullets[i];
                self.pending_explosions.push(Explosion {
                    type_id: def_damage.2,
                    position: b.position,
                    layer: b.layer,
                    source: b.shooter,
                });
            }
        }
        self.bullets.retain(|b| !b.dead);

        for (victim, shooter, damage, weapon) in impacts {
            self.damage_player(victim, damage, Some(shooter), weapon);
        }
        for (obstacle, damage) in obstacle_hits {
            self.damage_obstacle(obstacle, damage);
        }
    }

    fn update_gas(&mut self) {
        if self
            .gas
            .advance(self.tick, &self.content.gas_stages, &mut self.rng)
        {
            self.events.gas_dirty = true;
        }
        let circle = (self.gas.position, self.gas.radius);
        if circle != self.last_gas_circle {
            self.events.gas_circle_dirty = true;
            self.last_gas_circle = circle;
        }

        if self.gas.damage > 0.0 && self.tick.0 % GAS_DAMAGE_TICK_INTERVAL == 0 {
            let victims: Vec<EntityId> = self
                .registry
                .player_ids()
                .into_iter()
                .filter(|&id| {
                    self.registry
                        .get(id)
                        .map(|e| !e.core.dead && self.gas.is_outside(e.core.position))
                        .unwrap_or(false)
                })
                .collect();
            let damage = self.gas.damage;
            for id in victims {
                self.damage_player(id, damage, None, 0);
            }
        }
    }

    fn close_join_window(&mut self) {
        if !self.joins_closed && self.tick.0 >= secs_to_ticks(self.options.join_window_secs) {
            self.joins_closed = true;
            info!(tick = self.tick.0, "join window closed");
        }
    }

    fn update_players(&mut self) {
        let now = self.tick;
        let ids = self.registry.player_ids();
        let mut fire_requests: Vec<EntityId> = Vec::new();

        for id in ids {
            let Some(e) = self.registry.get(id) else { continue };
            if e.core.dead {
                continue;
            }
            let position = e.core.position;
            let body = e.core.body;

            // Action completion.
            let finished = self.player_mut(id).and_then(|p| p.finish_action(now));
            if let Some(kind) = finished {
                self.resolve_action(id, kind);
            }

            // Revive channels snap when the pair drifts apart.
            let revive_target = self
                .registry
                .get(id)
                .and_then(|e| e.player())
                .and_then(|p| p.action.as_ref().map(|a| a.kind))
                .and_then(|k| match k {
                    ActionKind::Revive(t) => Some(t),
                    _ => None,
                });
            if let Some(target) = revive_target {
                let in_range = self
                    .registry
                    .get(target)
                    .map(|t| t.core.position.distance(position) <= REVIVE_RANGE && !t.core.dead)
                    .unwrap_or(false);
                if !in_range {
                    if let Some(p) = self.player_mut(id) {
                        p.cancel_action();
                    }
                    if let Some(t) = self.player_mut(target) {
                        t.revived_by = None;
                    }
                }
            }

            // Movement.
            let (velocity, wants_fire) = match self.registry.get(id).and_then(|e| e.player()) {
                Some(p) => (
                    p.movement.direction() * self.options.movement_speed * p.speed_multiplier(),
                    (p.shoot_start || p.shoot_hold) && p.can_fire(now),
                ),
                None => (Vec2::ZERO, false),
            };
            if let Some(handle) = body {
                self.physics.set_velocity(handle, velocity);
            }
            if wants_fire {
                fire_requests.push(id);
            }

            // Boost-driven regeneration. Health is a discrete field.
            let status_changed = self
                .player_mut(id)
                .map(|p| p.tick_status(DT))
                .unwrap_or(false);
            if status_changed {
                self.dirty.mark_full(id);
            }

            // shoot_start is an edge, consumed once.
            if let Some(p) = self.player_mut(id) {
                p.shoot_start = false;
            }
        }

        for id in fire_requests {
            self.fire_weapon(id);
        }
    }

    fn resolve_action(&mut self, id: EntityId, kind: ActionKind) {
        match kind {
            ActionKind::Reload => {
                let Some((def_id, in_mag)) = self
                    .registry
                    .get(id)
                    .and_then(|e| e.player())
                    .map(|p| (p.active_weapon().def, p.active_weapon().ammo_in_mag))
                else {
                    return;
                };
                let Some(weapon) = self.content.weapons.get(&def_id) else {
                    return;
                };
                let needed = weapon.mag_size.saturating_sub(in_mag);
                let ammo_item = weapon.ammo;
                if let Some(p) = self.player_mut(id) {
                    let loaded = p.remove_item(ammo_item, needed);
                    p.active_weapon_mut().ammo_in_mag += loaded;
                }
                self.dirty.mark_full(id);
            }
            ActionKind::UseItem(item) => {
                let Some(def) = self.content.items.get(&item).cloned() else {
                    return;
                };
                if let Some(p) = self.player_mut(id) {
                    if p.remove_item(item, 1) == 0 {
                        return;
                    }
                    match def.class {
                        ItemClass::Heal => p.heal(def.magnitude as f32),
                        ItemClass::Boost => p.add_boost(def.magnitude as f32),
                        _ => {}
                    }
                }
                self.dirty.mark_full(id);
            }
            ActionKind::Revive(target) => {
                let reviver_pos = match self.registry.get(id) {
                    Some(e) => e.core.position,
                    None => return,
                };
                let still_valid = self
                    .registry
                    .get(target)
                    .map(|t| {
                        !t.core.dead
                            && t.core.position.distance(reviver_pos) <= REVIVE_RANGE
                            && t.player().map(|p| p.downed).unwrap_or(false)
                    })
                    .unwrap_or(false);
                if still_valid {
                    if let Some(t) = self.player_mut(target) {
                        t.downed = false;
                        t.health = REVIVE_HEALTH;
                        t.revived_by = None;
                    }
                    self.dirty.mark_full(target);
                    info!(reviver = id.0, target = target.0, "revive completed");
                } else if let Some(t) = self.player_mut(target) {
                    t.revived_by = None;
                }
            }
        }
    }

    fn fire_weapon(&mut self, id: EntityId) {
        let Some(e) = self.registry.get(id) else { return };
        let position = e.core.position;
        let layer = e.core.layer;
        let Some(p) = e.player() else { return };
        let aim = p.aim;
        let slot_index = p.active_slot;
        let slot = *p.active_weapon();

        if slot_index == THROWABLE_SLOT {
            self.throw_projectile(id, position, aim, layer);
            return;
        }
        if slot_index == MELEE_SLOT {
            self.melee_swing(id, slot.def);
            return;
        }
        let Some(weapon) = self.content.weapons.get(&slot.def).cloned() else {
            return;
        };
        if slot.ammo_in_mag == 0 {
            self.begin_reload(id);
            return;
        }
        let Some(bullet_def) = self.content.bullets.get(&weapon.bullet).cloned() else {
            return;
        };

        let gate_until = self.tick.advance(secs_to_ticks(weapon.fire_delay_secs));
        if let Some(p) = self.player_mut(id) {
            p.active_weapon_mut().ammo_in_mag -= 1;
            p.next_fire = gate_until;
        }

        let spread_rad = weapon.spread_deg.to_radians();
        for _ in 0..weapon.bullet_count {
            let jitter = self.rng.gen_range(-spread_rad..=spread_rad);
            let direction = Vec2::from_angle(jitter).rotate(aim);
            let seq = self.next_bullet_seq;
            self.next_bullet_seq = self.next_bullet_seq.wrapping_add(1);
            let origin = position + direction * (PLAYER_RADIUS + 0.1);
            let bullet = Bullet {
                seq,
                shooter: id,
                type_id: weapon.bullet,
                source_weapon: slot.def,
                position: origin,
                origin,
                direction,
                layer,
                speed: bullet_def.speed,
                travelled: 0.0,
                max_distance: bullet_def.distance,
                dead: false,
            };
            self.events.new_bullets.push(bullet.clone());
            self.bullets.push(bullet);
        }
        // Ammo count shows on the HUD.
        self.dirty.mark_full(id);
    }

    /// Start a melee swing: gate refire and schedule the strike for the end
    /// of the wind-up.
    fn melee_swing(&mut self, id: EntityId, def_id: u16) {
        let Some(def) = self.content.melees.get(&def_id) else {
            return;
        };
        let (wind_up, cooldown) = (def.wind_up_secs, def.cooldown_secs);
        let next_fire = self.tick.advance(secs_to_ticks(cooldown));
        if let Some(p) = self.player_mut(id) {
            p.next_fire = next_fire;
        }
        self.effects.schedule(
            self.tick.advance(secs_to_ticks(wind_up)),
            Effect::MeleeStrike {
                attacker: id,
                weapon: def_id,
            },
        );
    }

    /// The wind-up elapsed: resolve the strike against whatever is in the
    /// arc now, from the attacker's current position and aim.
    fn resolve_melee(&mut self, attacker: EntityId, weapon: u16) {
        let Some(def) = self.content.melees.get(&weapon).cloned() else {
            return;
        };
        let (position, layer, aim) = {
            let Some(e) = self.registry.get(attacker).filter(|e| !e.core.dead) else {
                return;
            };
            let Some(p) = e.player() else { return };
            (e.core.position, e.core.layer, p.aim)
        };
        let center = position + aim * def.offset;
        let hits = self.physics.overlap_circle(center, def.radius, layer, |b| {
            b.entity != attacker && matches!(b.kind, BodyKind::Static | BodyKind::Player)
        });
        for hit in hits {
            let Some(e) = self.registry.get(hit) else { continue };
            if e.core.flags.contains(EntityFlags::PLAYER) {
                if !e.core.dead {
                    self.damage_player(hit, def.damage, Some(attacker), weapon);
                }
            } else if e.core.flags.contains(EntityFlags::OBSTACLE) {
                self.damage_obstacle(hit, def.damage * def.obstacle_mult);
            }
        }
    }

    fn throw_projectile(&mut self, id: EntityId, position: Vec2, aim: Vec2, layer: Layer) {
        let (throwable_id, fuse, explosion, speed) = {
            let Some(p) = self.registry.get(id).and_then(|e| e.player()) else {
                return;
            };
            let slot = p.weapons[THROWABLE_SLOT];
            if !slot.is_filled() {
                return;
            }
            let Some(def) = self.content.throwables.get(&slot.def) else {
                return;
            };
            (slot.def, def.fuse_secs, def.explosion, def.throw_speed)
        };

        // Consume one from the stack; an empty stack clears the slot.
        let throw_item = self
            .player_mut(id)
            .map(|p| {
                let item = p.weapons[THROWABLE_SLOT].item;
                let left = p.remove_item(item, 1);
                let remaining = p.item_count(item);
                if left == 0 {
                    return None;
                }
                if remaining == 0 {
                    p.weapons[THROWABLE_SLOT] = Default::default();
                    if p.active_slot == THROWABLE_SLOT {
                        p.active_slot = MELEE_SLOT;
                    }
                }
                Some(item)
            })
            .unwrap_or(None);
        if throw_item.is_none() {
            return;
        }
        let gate_until = self.tick.advance(secs_to_ticks(0.5));
        if let Some(p) = self.player_mut(id) {
            p.next_fire = gate_until;
        }
        self.dirty.mark_full(id);

        let proj_id = self.registry.allocate_id();
        let start = position + aim * (PLAYER_RADIUS + 0.3);
        let body = self.physics.create_body(Body {
            entity: proj_id,
            kind: BodyKind::Projectile,
            layer,
            shape: Shape::Circle { radius: 0.3 },
            position: start,
            velocity: aim * speed,
            damping: 0.3,
        });
        let detonate_at = self.tick.advance(secs_to_ticks(fuse));
        self.registry.insert(
            Entity {
                core: EntityCore {
                    id: proj_id,
                    flags: EntityFlags::PROJECTILE,
                    layer,
                    position: start,
                    orientation: Orientation::East,
                    scale: 1.0,
                    dead: false,
                    body: Some(body),
                },
                kind: EntityKind::Projectile(ProjectileState {
                    type_id: throwable_id,
                    z_pos: 1.0,
                    direction: aim,
                    detonate_at,
                    explosion,
                    thrower: id,
                }),
            },
            &mut self.dirty,
        );
        self.objects_changed = true;
        self.effects
            .schedule(detonate_at, Effect::DetonateProjectile(proj_id));
    }

    fn resolve_explosions(&mut self) {
        let explosions = std::mem::take(&mut self.pending_explosions);
        for explosion in explosions {
            let Some(def) = self.content.explosions.get(&explosion.type_id).cloned() else {
                warn!(type_id = explosion.type_id, "unknown explosion type");
                continue;
            };
            // Players in range, with linear falloff past the inner radius.
            let victims: Vec<(EntityId, f32)> = self
                .registry
                .player_ids()
                .into_iter()
                .filter_map(|id| {
                    let e = self.registry.get(id)?;
                    if e.core.dead || !explosion.layer.same_as(e.core.layer) {
                        return None;
                    }
                    let dist = e.core.position.distance(explosion.position);
                    if dist > def.outer_radius {
                        return None;
                    }
                    let damage = if dist <= def.inner_radius {
                        def.damage
                    } else {
                        let t = (dist - def.inner_radius) / (def.outer_radius - def.inner_radius);
                        def.damage * (1.0 - t)
                    };
                    Some((id, damage))
                })
                .collect();
            for (id, damage) in victims {
                self.damage_player(id, damage, Some(explosion.source), explosion.type_id);
            }

            // Obstacles in range take full damage.
            let hit_obstacles: Vec<EntityId> = self
                .registry
                .static_ids()
                .filter(|&id| {
                    self.registry
                        .get(id)
                        .map(|e| {
                            !e.core.dead
                                && explosion.layer.same_as(e.core.layer)
                                && e.core.position.distance(explosion.position) <= def.outer_radius
                        })
                        .unwrap_or(false)
                })
                .collect();
            for id in hit_obstacles {
                self.damage_obstacle(id, def.damage);
            }

            self.events.explosions.push(explosion);
        }
    }

    fn damage_obstacle(&mut self, id: EntityId, damage: f32) {
        let destroyed = {
            let Some(e) = self.registry.get_mut(id) else {
                return;
            };
            let EntityKind::Obstacle(o) = &mut e.kind else {
                return;
            };
            match o.health.as_mut() {
                Some(h) => {
                    *h = (*h - damage).max(0.0);
                    *h <= 0.0
                }
                None => return, // indestructible
            }
        };
        self.dirty.mark_full(id);
        if !destroyed {
            return;
        }

        let (position, layer, loot, alters) = {
            let Some(e) = self.registry.get(id) else { return };
            let EntityKind::Obstacle(o) = &e.kind else {
                return;
            };
            let loot = self
                .content
                .obstacles
                .get(&o.type_id)
                .map(|d| d.loot.clone())
                .unwrap_or_default();
            (e.core.position, e.core.layer, loot, o.alters_visibility)
        };
        self.remove_entity(id);
        for (item, count) in loot {
            self.spawn_loot(item, count, position, layer);
        }
        if alters {
            self.map.rebuild_visibility(&self.registry);
            self.topology_changed = true;
            debug!(id = id.0, "sight-altering obstacle destroyed");
        }
    }

    fn spawn_loot(&mut self, item: u16, count: u32, position: Vec2, layer: Layer) {
        let id = self.registry.allocate_id();
        // Small outward nudge; loot-loot collision spreads piles apart.
        let jitter = Vec2::new(
            self.rng.gen_range(-1.0..=1.0f32),
            self.rng.gen_range(-1.0..=1.0f32),
        );
        let body = self.physics.create_body(Body {
            entity: id,
            kind: BodyKind::Loot,
            layer,
            shape: Shape::Circle { radius: 0.6 },
            position,
            velocity: jitter * 4.0,
            damping: 0.05,
        });
        self.registry.insert(
            Entity {
                core: EntityCore {
                    id,
                    flags: EntityFlags::LOOT,
                    layer,
                    position,
                    orientation: Orientation::East,
                    scale: 1.0,
                    dead: false,
                    body: Some(body),
                },
                kind: EntityKind::Loot(LootState {
                    item,
                    count,
                    old_position: position,
                }),
            },
            &mut self.dirty,
        );
        self.objects_changed = true;
    }

    fn try_pickup(&mut self, conn: ConnectionId, player_id: EntityId) {
        let Some(e) = self.registry.get(player_id) else {
            return;
        };
        let position = e.core.position;
        let layer = e.core.layer;
        let reach = PLAYER_RADIUS * TOUCH_LOOT_RAD_MULT + 0.6;

        // Nearest loot in reach.
        let mut nearest: Option<(EntityId, f32)> = None;
        for id in self.registry.dynamic_ids().collect::<Vec<_>>() {
            let Some(e) = self.registry.get(id) else { continue };
            let EntityKind::Loot(_) = &e.kind else { continue };
            if !layer.same_as(e.core.layer) {
                continue;
            }
            let dist = e.core.position.distance(position);
            if dist <= reach && nearest.map(|(_, d)| dist < d).unwrap_or(true) {
                nearest = Some((id, dist));
            }
        }
        let Some((loot_id, _)) = nearest else { return };
        let (item, count) = match self.registry.get(loot_id).map(|e| &e.kind) {
            Some(EntityKind::Loot(l)) => (l.item, l.count),
            _ => return,
        };
        let Some(def) = self.content.items.get(&item).cloned() else {
            warn!(item, "loot references unknown item");
            return;
        };

        let mut result = PickupResult::Success;
        let mut taken = 0u32;
        let mut zoom_changed = None;
        match def.class {
            ItemClass::Gun => {
                let linked = def.linked;
                let outcome = self.player_mut(player_id).map(|p| {
                    if let Some(slot) = p.free_gun_slot() {
                        p.weapons[slot] = redzone_world::player::WeaponSlot {
                            item,
                            def: linked,
                            ammo_in_mag: 0,
                        };
                        taken = 1;
                        true
                    } else {
                        false
                    }
                });
                if outcome != Some(true) {
                    result = PickupResult::Full;
                }
            }
            ItemClass::Throwable => {
                let linked = def.linked;
                if let Some(p) = self.player_mut(player_id) {
                    let got = p.add_item(item, count, def.max_stack);
                    taken = got;
                    if got > 0 {
                        p.weapons[THROWABLE_SLOT] = redzone_world::player::WeaponSlot {
                            item,
                            def: linked,
                            ammo_in_mag: 0,
                        };
                    } else {
                        result = PickupResult::AlreadyOwned;
                    }
                }
            }
            ItemClass::Scope => {
                let zoom = def.magnitude;
                if let Some(p) = self.player_mut(player_id) {
                    if p.zoom >= zoom {
                        result = PickupResult::AlreadyEquipped;
                    } else {
                        p.zoom = zoom;
                        taken = 1;
                        zoom_changed = Some(zoom);
                    }
                }
            }
            ItemClass::Ammo | ItemClass::Heal | ItemClass::Boost => {
                if let Some(p) = self.player_mut(player_id) {
                    taken = p.add_item(item, count, def.max_stack);
                    if taken == 0 {
                        result = PickupResult::AlreadyOwned;
                    }
                }
            }
        }

        if taken > 0 {
            if taken >= count {
                self.remove_entity(loot_id);
            } else if let Some(EntityKind::Loot(l)) = self.registry.get_mut(loot_id).map(|e| &mut e.kind)
            {
                l.count -= taken;
                self.dirty.mark_full(loot_id);
            }
            self.dirty.mark_full(player_id);
        }
        if let Some(zoom) = zoom_changed {
            if let Some(observer) = self.observers.get_mut(&conn) {
                observer.zoom = zoom;
                // A wider viewport invalidates the visible set wholesale.
                observer.full_update = true;
            }
        }
        if let Some(observer) = self.observers.get(&conn) {
            if observer.outbound.send(emit::encode_pickup(item, taken, result)).is_err() {
                debug!(conn, "pickup result send failed");
            }
        }
    }

    /// Apply damage, resolving downs, deaths, loot drops, and kill credit.
    fn damage_player(&mut self, id: EntityId, amount: f32, killer: Option<EntityId>, weapon: u16) {
        if amount <= 0.0 {
            return;
        }
        let can_be_downed = self.options.team_mode;
        let outcome = {
            let Some(p) = self.player_mut(id) else { return };
            p.take_damage(amount, can_be_downed)
        };
        self.dirty.mark_full(id);
        match outcome {
            DamageOutcome::Damaged => {}
            DamageOutcome::Downed => {
                info!(player = id.0, "player downed");
            }
            DamageOutcome::Killed => self.kill_player(id, killer, weapon),
        }
    }

    fn kill_player(&mut self, id: EntityId, killer: Option<EntityId>, weapon: u16) {
        let (position, layer, body, name, drops) = {
            let Some(e) = self.registry.get(id) else { return };
            let Some(p) = e.player() else { return };
            let mut drops: Vec<(u16, u32)> = p
                .inventory
                .iter()
                .map(|(&item, &count)| (item, count))
                .collect();
            for slot in 0..WEAPON_SLOTS {
                if slot != MELEE_SLOT && p.weapons[slot].is_filled() && slot != THROWABLE_SLOT {
                    drops.push((p.weapons[slot].item, 1));
                }
            }
            (
                e.core.position,
                e.core.layer,
                e.core.body,
                p.name.clone(),
                drops,
            )
        };

        if let Some(e) = self.registry.get_mut(id) {
            e.core.dead = true;
            if let Some(p) = e.player_mut() {
                p.cancel_action();
            }
            e.core.body = None;
        }
        if let Some(handle) = body {
            self.physics.destroy_body(handle);
        }
        self.dirty.mark_full(id);

        self.alive = self.alive.saturating_sub(1);
        self.events.alive_dirty = true;
        self.events.alive_count = self.alive;
        self.death_ranks.insert(id, self.alive + 1);

        // Corpse.
        let body_id = self.registry.allocate_id();
        self.registry.insert(
            Entity {
                core: EntityCore {
                    id: body_id,
                    flags: EntityFlags::DEAD_BODY,
                    layer,
                    position,
                    orientation: Orientation::East,
                    scale: 1.0,
                    dead: false,
                    body: None,
                },
                kind: EntityKind::DeadBody(DeadBodyState { player: id }),
            },
            &mut self.dirty,
        );
        self.objects_changed = true;
        self.effects.schedule(
            self.tick.advance(secs_to_ticks(DEAD_BODY_LINGER_SECS)),
            Effect::RemoveDeadBody(body_id),
        );

        for (item, count) in drops {
            self.spawn_loot(item, count, position, layer);
        }

        // Kill credit and the kill-leader role.
        let killer_kills = killer
            .and_then(|k| {
                let kills = self.player_mut(k).map(|p| {
                    p.kills += 1;
                    p.kills
                });
                if kills.is_some() {
                    self.dirty.mark_full(k);
                }
                kills
            })
            .unwrap_or(0);
        let kill = KillEvent {
            victim: id,
            killer,
            weapon,
            killer_kills,
        };
        self.events.kills.push(kill);
        info!(victim = id.0, name, killer = killer.map(|k| k.0), "player killed");

        // Victim and killer get the standalone kill notice immediately.
        for observer in self.observers.values() {
            if observer.player == id || Some(observer.player) == killer {
                let _ = observer.outbound.send(emit::encode_kill(&kill));
            }
        }

        if let (Some(killer), kills) = (killer, killer_kills) {
            if kills >= KILL_LEADER_MIN_KILLS
                && self.kill_leader.map(|(_, k)| kills > k).unwrap_or(true)
            {
                if let Some((previous, _)) = self.kill_leader {
                    if previous != killer {
                        self.events.roles.push(RoleEvent {
                            player: previous,
                            role: ROLE_KILL_LEADER,
                            assigned: false,
                        });
                    }
                }
                if self.kill_leader.map(|(p, _)| p != killer).unwrap_or(true) {
                    self.events.roles.push(RoleEvent {
                        player: killer,
                        role: ROLE_KILL_LEADER,
                        assigned: true,
                    });
                }
                self.kill_leader = Some((killer, kills));
            }
        }
    }

    fn check_game_over(&mut self) {
        if self.game_over || !self.started || self.alive > 1 {
            return;
        }
        self.game_over = true;
        let winner = self
            .registry
            .player_ids()
            .into_iter()
            .find(|&id| self.registry.get(id).map(|e| !e.core.dead).unwrap_or(false));
        info!(winner = winner.map(|w| w.0), "game over");

        for observer in self.observers.values() {
            let won = Some(observer.player) == winner;
            let rank = if won {
                1
            } else {
                self.death_ranks
                    .get(&observer.player)
                    .copied()
                    .unwrap_or(self.alive + 1)
            };
            let kills = self
                .registry
                .get(observer.player)
                .and_then(|e| e.player())
                .map(|p| p.kills)
                .unwrap_or(0);
            if observer
                .outbound
                .send(emit::encode_game_over(rank, kills, won))
                .is_err()
            {
                warn!(conn = observer.connection, "game-over send failed");
            }
        }
    }

    // ------------------------------------------------------------------
    // Replication

    /// Recompute an observer's visible set from its viewpoint.
    fn compute_visible_set(&self, viewpoint: EntityId, zoom: u32) -> BTreeSet<EntityId> {
        let mut visible = BTreeSet::new();
        let Some(center) = self.registry.get(viewpoint).map(|e| e.core.position) else {
            return visible;
        };
        if let Some(statics) = self.map.visibility.visible_statics(zoom, center) {
            // The grid is only rebuilt for sight-altering destruction, so it
            // can still list obstacles the registry has since dropped.
            visible.extend(
                statics
                    .iter()
                    .copied()
                    .filter(|&id| self.registry.get(id).is_some()),
            );
        }
        let rect = cull_rect(center, zoom);
        for id in self.registry.dynamic_ids() {
            let Some(e) = self.registry.get(id) else { continue };
            if rect.contains(e.core.position) || e.core.id == viewpoint {
                visible.insert(id);
            }
        }
        visible.insert(viewpoint);
        visible
    }

    /// Second pass: visibility recompute, dirty folding, emission.
    fn update_observers(&mut self) {
        let conns: Vec<ConnectionId> = self.observers.keys().copied().collect();

        // Visibility recompute where due, collecting the player-player pairs
        // that must be mirrored.
        let mut newly_seen_players: Vec<(EntityId, EntityId)> = Vec::new(); // (seer, seen)
        for &conn in &conns {
            let (due, viewpoint, zoom, own_player, previously_visible) = {
                let Some(o) = self.observers.get(&conn) else { continue };
                (
                    o.full_update
                        || self.topology_changed
                        || self.objects_changed
                        || o.moves_since_update > MOVES_BEFORE_VISIBILITY_UPDATE,
                    o.viewpoint,
                    o.zoom,
                    o.player,
                    o.visible.clone(),
                )
            };
            if !due {
                continue;
            }
            let new_set = self.compute_visible_set(viewpoint, zoom);
            for &id in new_set.difference(&previously_visible) {
                let is_player = self
                    .registry
                    .get(id)
                    .map(|e| e.core.flags.contains(EntityFlags::PLAYER))
                    .unwrap_or(false);
                if is_player && id != own_player {
                    newly_seen_players.push((own_player, id));
                }
            }
            if let Some(o) = self.observers.get_mut(&conn) {
                o.apply_visible_set(new_set);
            }
        }

        // Seeing is mutual between players: when A starts seeing B, B's
        // observer learns about A in the same tick.
        for (seer, seen) in newly_seen_players {
            for observer in self.observers.values_mut() {
                if observer.player == seen && !observer.visible.contains(&seer) {
                    observer.visible.insert(seer);
                    observer.pending_partial.remove(&seer);
                    observer.pending_full.insert(seer);
                }
            }
        }

        // Fold the global dirty sets and emit.
        for &conn in &conns {
            let Some(observer) = self.observers.get_mut(&conn) else {
                continue;
            };
            observer.fold_dirty(&self.dirty);

            let has_events = self.events.alive_dirty
                || self.events.gas_dirty
                || self.events.gas_circle_dirty
                || !self.events.new_bullets.is_empty()
                || !self.events.explosions.is_empty()
                || !self.events.emotes.is_empty()
                || !self.events.kills.is_empty()
                || !self.events.roles.is_empty();
            if observer.has_pending() || has_events {
                let frame = emit::encode_update(observer, &self.registry, &self.gas, &self.events);
                if observer.outbound.send(frame).is_err() {
                    // One broken pipe never stalls the tick; the transport
                    // will surface the disconnect shortly.
                    warn!(conn, "update send failed, skipping observer");
                }
            }
            observer.clear_pending();
        }

        // Standalone role broadcasts.
        for role in self.events.roles.clone() {
            for observer in self.observers.values() {
                let _ = observer.outbound.send(emit::encode_role(&role));
            }
        }

        // Standalone alive-count broadcast alongside the in-update block.
        if self.events.alive_dirty {
            let frame = emit::encode_alive_counts(self.alive);
            for observer in self.observers.values() {
                let _ = observer.outbound.send(frame.clone());
            }
        }
    }

    fn finish_tick(&mut self) {
        self.dirty.swap();
        self.events.clear();
        self.topology_changed = false;
        self.objects_changed = false;
    }

    // ------------------------------------------------------------------
    // Helpers

    fn player_mut(&mut self, id: EntityId) -> Option<&mut PlayerState> {
        self.registry.get_mut(id).and_then(|e| e.player_mut())
    }

    /// Remove an entity everywhere: physics body, registry, dirty bookkeeping.
    fn remove_entity(&mut self, id: EntityId) {
        if let Some(handle) = self.registry.get(id).and_then(|e| e.core.body) {
            self.physics.destroy_body(handle);
        }
        self.registry.remove(id, &mut self.dirty);
    }

    // Test-only state inspection.
    #[cfg(test)]
    pub(crate) fn registry(&self) -> &Registry {
        &self.registry
    }
    #[cfg(test)]
    pub(crate) fn observer(&self, conn: ConnectionId) -> Option<&Observer> {
        self.observers.get(&conn)
    }
    #[cfg(test)]
    pub(crate) fn dirty(&self) -> &DirtySets {
        &self.dirty
    }
    #[cfg(test)]
    pub(crate) fn events(&self) -> &TickEvents {
        &self.events
    }
    #[cfg(test)]
    pub(crate) fn bullets(&self) -> &[Bullet] {
        &self.bullets
    }
    #[cfg(test)]
    pub(crate) fn gas_mut(&mut self) -> &mut GasState {
        &mut self.gas
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use redzone_net::MsgType;
    use redzone_world::player::WeaponSlot;
    use redzone_world::GasMode;
    use tokio::sync::mpsc;

    fn game() -> Game {
        Game::new(GameOptions {
            seed: 11,
            ..GameOptions::default()
        })
        .expect("game construction")
    }

    fn join(game: &mut Game, conn: ConnectionId, name: &str) -> (EntityId, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = OutboundHandle::from_sender(tx);
        game.handle_message(
            conn,
            &handle,
            &redzone_net::packets::encode::join(PROTOCOL_VERSION, name),
        );
        let id = game.observer(conn).expect("observer registered").player;
        (id, rx)
    }

    fn input_frame(direction: Vec2, up: bool, shoot: bool) -> Vec<u8> {
        redzone_net::packets::encode::input(&InputMessage {
            seq: 1,
            moving_left: false,
            moving_right: false,
            moving_up: up,
            moving_down: false,
            shoot_start: shoot,
            shoot_hold: false,
            direction,
            actions: vec![],
        })
    }

    #[test]
    fn joining_spawns_a_player_and_sends_the_handshake() {
        let mut g = game();
        let (id, mut rx) = join(&mut g, 1, "alpha");
        assert!(g.registry().get(id).is_some());
        assert_eq!(g.alive_count(), 1);

        let joined = rx.try_recv().expect("joined ack");
        assert_eq!(joined[0], MsgType::Joined as u8);
        let map = rx.try_recv().expect("map snapshot");
        assert_eq!(map[0], MsgType::Map as u8);
    }

    #[test]
    fn first_tick_sends_a_full_world_snapshot() {
        let mut g = game();
        let (id, mut rx) = join(&mut g, 1, "alpha");
        g.tick();
        // Drain handshake.
        let _ = rx.try_recv();
        let _ = rx.try_recv();
        let update = rx.try_recv().expect("first update");
        assert_eq!(update[0], MsgType::Update as u8);
        // After the first update the observer sees itself.
        assert!(g.observer(1).unwrap().visible.contains(&id));
    }

    #[test]
    fn movement_marks_partial_and_advances_move_counter() {
        let mut g = game();
        let (id, _rx) = join(&mut g, 1, "alpha");
        let (tx, _r) = mpsc::unbounded_channel();
        let handle = OutboundHandle::from_sender(tx);
        g.tick(); // initial full resync

        g.handle_message(1, &handle, &input_frame(Vec2::X, true, false));
        let before = g.registry().get(id).unwrap().core.position;
        g.tick();
        g.tick();
        let after = g.registry().get(id).unwrap().core.position;
        assert!(after.distance(before) > 0.1, "player should move");
        assert!(g.observer(1).unwrap().moves_since_update >= 1);
    }

    #[test]
    fn firing_spawns_bullets_announced_once() {
        let mut g = game();
        let (id, _rx) = join(&mut g, 1, "alpha");
        // Arm the player directly.
        {
            let p = g.player_mut(id).unwrap();
            p.weapons[0] = redzone_world::player::WeaponSlot {
                item: 301,
                def: 1,
                ammo_in_mag: 15,
            };
            p.active_slot = 0;
        }
        let (tx, _r) = mpsc::unbounded_channel();
        let handle = OutboundHandle::from_sender(tx);
        g.tick();
        g.handle_message(1, &handle, &input_frame(Vec2::X, false, true));
        g.tick();
        assert_eq!(g.bullets().len(), 1);
        // The announcement queue was flushed with the tick.
        assert!(g.events().new_bullets.is_empty());
        assert_eq!(
            g.registry()
                .get(id)
                .unwrap()
                .player()
                .unwrap()
                .active_weapon()
                .ammo_in_mag,
            14
        );
    }

    #[test]
    fn double_reload_requests_run_one_reload() {
        let mut g = game();
        let (id, _rx) = join(&mut g, 1, "alpha");
        {
            let p = g.player_mut(id).unwrap();
            p.weapons[0] = redzone_world::player::WeaponSlot {
                item: 301,
                def: 1,
                ammo_in_mag: 0,
            };
            p.active_slot = 0;
            p.add_item(101, 30, 120);
        }
        g.begin_reload(id);
        let first_deadline = g
            .registry()
            .get(id)
            .unwrap()
            .player()
            .unwrap()
            .action
            .unwrap()
            .ends_at;
        g.begin_reload(id);
        let second_deadline = g
            .registry()
            .get(id)
            .unwrap()
            .player()
            .unwrap()
            .action
            .unwrap()
            .ends_at;
        assert_eq!(first_deadline, second_deadline);

        // Let it finish: mag filled once, ammo deducted once.
        for _ in 0..secs_to_ticks(2.0) {
            g.tick();
        }
        let p = g.registry().get(id).unwrap().player().unwrap();
        assert_eq!(p.active_weapon().ammo_in_mag, 15);
        assert_eq!(p.item_count(101), 15);
    }

    #[test]
    fn dangling_projectile_timer_is_a_no_op() {
        let mut g = game();
        let (id, _rx) = join(&mut g, 1, "alpha");
        {
            let p = g.player_mut(id).unwrap();
            p.weapons[THROWABLE_SLOT] = redzone_world::player::WeaponSlot {
                item: 401,
                def: 1,
                ammo_in_mag: 0,
            };
            p.add_item(401, 1, 6);
            p.active_slot = THROWABLE_SLOT;
        }
        let (tx, _r) = mpsc::unbounded_channel();
        let handle = OutboundHandle::from_sender(tx);
        g.tick();
        g.handle_message(1, &handle, &input_frame(Vec2::X, false, true));
        g.tick();
        let proj = g
            .registry()
            .iter()
            .find(|e| matches!(e.kind, EntityKind::Projectile(_)))
            .map(|e| e.core.id)
            .expect("projectile spawned");

        // Destroy it before the fuse runs out.
        g.remove_entity(proj);
        let before = g.registry().len();
        for _ in 0..secs_to_ticks(5.0) {
            g.tick();
        }
        // No explosion was queued and nothing else disappeared.
        assert_eq!(g.registry().len(), before);
    }

    #[test]
    fn projectile_fuse_detonates_and_damages_nearby_players() {
        let mut g = game();
        let (id, _rx) = join(&mut g, 1, "alpha");
        let position = g.registry().get(id).unwrap().core.position;

        // Plant an armed grenade right next to the player.
        let proj_id = g.registry.allocate_id();
        let detonate_at = g.tick.advance(3);
        g.registry.insert(
            Entity {
                core: EntityCore {
                    id: proj_id,
                    flags: EntityFlags::PROJECTILE,
                    layer: Layer::Ground,
                    position: position + Vec2::new(2.0, 0.0),
                    orientation: Orientation::East,
                    scale: 1.0,
                    dead: false,
                    body: None,
                },
                kind: EntityKind::Projectile(ProjectileState {
                    type_id: 1,
                    z_pos: 0.0,
                    direction: Vec2::X,
                    detonate_at,
                    explosion: 1,
                    thrower: id,
                }),
            },
            &mut g.dirty,
        );
        g.effects.schedule(detonate_at, Effect::DetonateProjectile(proj_id));

        for _ in 0..5 {
            g.tick();
        }
        // Inside the inner radius: full damage, which is lethal.
        assert!(g.registry().get(id).unwrap().core.dead);
        assert!(g
            .registry()
            .iter()
            .all(|e| !matches!(e.kind, EntityKind::Projectile(_))));
    }

    #[test]
    fn expired_explosive_rounds_detonate_at_terminal_position() {
        let mut g = game();
        let (id, _rx) = join(&mut g, 1, "alpha");

        // Find open ground so terrain cannot absorb the round.
        let mut clear = None;
        for i in 0..90 {
            let candidate = Vec2::new(30.0 + i as f32 * 10.0, 500.0);
            let blocked = g.physics.probe_circle(candidate, 12.0, Layer::Ground, |b| {
                b.kind == BodyKind::Static
            });
            if !blocked {
                clear = Some(candidate);
                break;
            }
        }
        let position = clear.expect("some open ground exists");
        let body = g.registry().get(id).unwrap().core.body.unwrap();
        g.physics.set_position(body, position);
        g.tick();

        let before = g.registry().get(id).unwrap().player().unwrap().health;
        // An explosive round about to run out of range beside the player.
        g.bullets.push(Bullet {
            seq: 99,
            shooter: EntityId(60000),
            type_id: 4,
            source_weapon: 4,
            position: position + Vec2::new(2.0, 0.0),
            origin: position,
            direction: Vec2::X,
            layer: Layer::Ground,
            speed: 24.0,
            travelled: 25.9,
            max_distance: 26.0,
            dead: false,
        });
        g.tick();
        assert!(g.bullets().is_empty());
        let after = g.registry().get(id).unwrap().player().unwrap().health;
        assert!(after < before, "blast at the terminal position should hurt");
    }

    #[test]
    fn gas_damage_kills_count_toward_game_over() {
        let mut g = game();
        let (a, _ra) = join(&mut g, 1, "alpha");
        let (_b, _rb) = join(&mut g, 2, "beta");
        assert!(g.started);

        // Force a lethal shrunken circle far from player a. The stage
        // machine interpolates from the old/new pairs, so those are pinned
        // too.
        {
            let gas = g.gas_mut();
            gas.mode = GasMode::Moving;
            gas.damage = 1000.0;
            gas.old_position = Vec2::ZERO;
            gas.new_position = Vec2::ZERO;
            gas.position = Vec2::ZERO;
            gas.old_radius = 0.5;
            gas.new_radius = 0.5;
            gas.radius = 0.5;
        }
        // Park player b inside the circle so only a dies.
        let b_body = g.registry().get(_b).unwrap().core.body.unwrap();
        g.physics.set_position(b_body, Vec2::new(0.2, 0.2));

        for _ in 0..(GAS_DAMAGE_TICK_INTERVAL * 2 + 2) {
            g.tick();
            if g.game_over {
                break;
            }
        }
        assert!(g.game_over, "lone survivor ends the game");
        assert!(g.registry().get(a).unwrap().core.dead);
    }

    #[test]
    fn dead_players_stay_in_the_registry_with_a_corpse() {
        let mut g = game();
        let (a, _ra) = join(&mut g, 1, "alpha");
        let (_b, _rb) = join(&mut g, 2, "beta");
        g.tick();
        g.damage_player(a, 500.0, None, 0);
        assert!(g.registry().get(a).unwrap().core.dead);
        assert!(g
            .registry()
            .iter()
            .any(|e| matches!(&e.kind, EntityKind::DeadBody(d) if d.player == a)));
        assert_eq!(g.events().kills.len(), 1);
    }

    #[test]
    fn spectate_switch_forces_a_full_resync() {
        let mut g = game();
        let (a, _ra) = join(&mut g, 1, "alpha");
        let (b, _rb) = join(&mut g, 2, "beta");
        g.tick();
        g.damage_player(a, 500.0, None, 0);
        g.tick();

        let (tx, _r) = mpsc::unbounded_channel();
        let handle = OutboundHandle::from_sender(tx);
        g.handle_message(
            1,
            &handle,
            &redzone_net::packets::encode::spectate(SpectateMessage::Begin),
        );
        let o = g.observer(1).unwrap();
        assert_eq!(o.viewpoint, b);
        assert!(o.full_update);

        // After the next tick everything visible was re-sent as full and no
        // stale partial survived.
        g.tick();
        let o = g.observer(1).unwrap();
        assert!(!o.full_update);
        assert!(o.visible.contains(&b));
    }

    #[test]
    fn entity_ids_grow_monotonically_across_kinds() {
        let mut g = game();
        let (a, _ra) = join(&mut g, 1, "alpha");
        let (b, _rb) = join(&mut g, 2, "beta");
        assert!(b > a);
        g.spawn_loot(101, 10, Vec2::new(100.0, 100.0), Layer::Ground);
        let max_static = g.registry().static_ids().max().unwrap();
        assert!(a > max_static);
    }

    #[test]
    fn zoom_28_rectangle_bounds_visibility() {
        let mut g = game();
        let (a, _ra) = join(&mut g, 1, "alpha");
        let (b, _rb) = join(&mut g, 2, "beta");

        // Pin both players at controlled positions.
        let a_body = g.registry().get(a).unwrap().core.body.unwrap();
        let b_body = g.registry().get(b).unwrap().core.body.unwrap();
        g.physics.set_position(a_body, Vec2::new(100.0, 100.0));
        // 38 east: inside 42 horizontal reach.
        g.physics.set_position(b_body, Vec2::new(138.0, 100.0));
        g.tick();
        assert!(g.observer(1).unwrap().visible.contains(&b));

        // 38 north: outside 35 vertical reach.
        g.physics.set_position(b_body, Vec2::new(100.0, 138.0));
        for observer in g.observers.values_mut() {
            observer.full_update = true;
        }
        g.tick();
        assert!(!g.observer(1).unwrap().visible.contains(&b));
    }

    #[test]
    fn player_visibility_is_mutual() {
        let mut g = game();
        let (a, _ra) = join(&mut g, 1, "alpha");
        let (b, _rb) = join(&mut g, 2, "beta");
        let a_body = g.registry().get(a).unwrap().core.body.unwrap();
        let b_body = g.registry().get(b).unwrap().core.body.unwrap();
        g.physics.set_position(a_body, Vec2::new(300.0, 300.0));
        g.physics.set_position(b_body, Vec2::new(700.0, 700.0));
        g.tick();
        assert!(!g.observer(1).unwrap().visible.contains(&b));

        // Move b beside a and let only a's observer recompute; b still
        // learns about a through the mutual pass.
        g.physics.set_position(b_body, Vec2::new(305.0, 300.0));
        g.observers.get_mut(&1).unwrap().full_update = true;
        g.tick();
        assert!(g.observer(1).unwrap().visible.contains(&b));
        assert!(g.observer(2).unwrap().visible.contains(&a));
    }

    #[test]
    fn kill_notice_reaches_both_victim_and_killer() {
        let mut g = game();
        let (a, mut ra) = join(&mut g, 1, "alpha");
        let (b, mut rb) = join(&mut g, 2, "beta");
        g.tick();
        while ra.try_recv().is_ok() {}
        while rb.try_recv().is_ok() {}

        g.damage_player(a, 500.0, Some(b), 1);
        let mut victim_notified = false;
        while let Ok(frame) = ra.try_recv() {
            victim_notified |= frame[0] == MsgType::Kill as u8;
        }
        let mut killer_notified = false;
        while let Ok(frame) = rb.try_recv() {
            killer_notified |= frame[0] == MsgType::Kill as u8;
        }
        assert!(victim_notified);
        assert!(killer_notified);
    }

    #[test]
    fn loot_spawned_beside_a_stationary_player_becomes_visible() {
        let mut g = game();
        let (id, _rx) = join(&mut g, 1, "alpha");
        g.tick(); // initial resync
        let position = g.registry().get(id).unwrap().core.position;

        // The observer never moves; the spawn alone must trigger the
        // visibility recompute.
        g.spawn_loot(201, 1, position + Vec2::new(2.0, 0.0), Layer::Ground);
        let loot = g
            .registry()
            .iter()
            .find(|e| matches!(e.kind, EntityKind::Loot(_)))
            .map(|e| e.core.id)
            .expect("loot spawned");
        g.tick();
        let o = g.observer(1).unwrap();
        assert!(o.moves_since_update <= MOVES_BEFORE_VISIBILITY_UPDATE);
        assert!(o.visible.contains(&loot));
    }

    #[test]
    fn destroyed_obstacle_does_not_reenter_the_visible_set() {
        let mut g = game();
        let (id, _rx) = join(&mut g, 1, "alpha");
        let (target, target_pos) = g
            .registry()
            .iter()
            .find(|e| {
                matches!(&e.kind, EntityKind::Obstacle(o) if o.health.is_some() && !o.alters_visibility)
            })
            .map(|e| (e.core.id, e.core.position))
            .expect("a destructible obstacle exists");
        let body = g.registry().get(id).unwrap().core.body.unwrap();
        g.physics.set_position(body, target_pos + Vec2::new(4.0, 0.0));
        g.observers.get_mut(&1).unwrap().full_update = true;
        g.tick();
        assert!(g.observer(1).unwrap().visible.contains(&target));

        // Destroying it leaves the static grid stale; a later resync must
        // not resurrect the id.
        g.damage_obstacle(target, 10_000.0);
        g.tick();
        g.observers.get_mut(&1).unwrap().full_update = true;
        g.tick();
        assert!(!g.observer(1).unwrap().visible.contains(&target));
    }

    #[test]
    fn melee_strike_lands_after_the_wind_up() {
        let mut g = game();
        let (a, _ra) = join(&mut g, 1, "alpha");
        let (b, _rb) = join(&mut g, 2, "beta");

        // Open ground, so nothing shoves the pair apart.
        let mut clear = None;
        for i in 0..90 {
            let candidate = Vec2::new(30.0 + i as f32 * 10.0, 700.0);
            let blocked = g.physics.probe_circle(candidate, 8.0, Layer::Ground, |body| {
                body.kind == BodyKind::Static
            });
            if !blocked {
                clear = Some(candidate);
                break;
            }
        }
        let position = clear.expect("some open ground exists");
        let a_body = g.registry().get(a).unwrap().core.body.unwrap();
        let b_body = g.registry().get(b).unwrap().core.body.unwrap();
        g.physics.set_position(a_body, position);
        g.physics.set_position(b_body, position + Vec2::new(2.0, 0.0));
        g.tick();

        // Fists are the default active slot.
        let (tx, _r) = mpsc::unbounded_channel();
        let handle = OutboundHandle::from_sender(tx);
        let before = g.registry().get(b).unwrap().player().unwrap().health;
        g.handle_message(1, &handle, &input_frame(Vec2::X, false, true));
        g.tick();
        // The swing is queued but the wind-up has not elapsed.
        assert_eq!(g.registry().get(b).unwrap().player().unwrap().health, before);

        for _ in 0..secs_to_ticks(0.2) {
            g.tick();
        }
        let after = g.registry().get(b).unwrap().player().unwrap().health;
        assert!(after <= before - 23.0, "strike lands once the wind-up elapses");
    }
}
