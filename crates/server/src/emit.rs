//! Outbound packet serialization.
//!
//! Everything the server sends is encoded here, against a fixed field
//! order. The world update is the dominant message: per observer, the
//! pending full/partial/deleted sets plus the tick's ephemeral events are
//! folded into one bit-packed buffer.

use crate::observer::Observer;
use glam::Vec2;
use redzone_core::{EntityId, WORLD_SIZE};
use redzone_net::{
    BitWriter, EmoteMessage, MsgType, PickupResult, HEALTH_BITS, MAX_NAME_LEN, ORIENTATION_BITS,
    POSITION_BITS, PROTOCOL_VERSION, UNIT_VEC_BITS,
};
use redzone_world::entity::{Entity, EntityKind};
use redzone_world::{Bullet, Explosion, GasState, Registry};
use tracing::warn;

/// Bits for content-table ids inside update payloads.
const GAME_TYPE_BITS: u32 = 10;
/// Bits for entity ids on the wire.
const ENTITY_ID_BITS: u32 = 16;
/// Scale is encoded over this range.
const SCALE_MIN: f32 = 0.5;
const SCALE_MAX: f32 = 2.0;
/// Gas stage durations are encoded over `[0, GAS_DURATION_MAX]` seconds.
const GAS_DURATION_MAX: f32 = 600.0;

/// A confirmed kill to broadcast.
#[derive(Debug, Clone, Copy)]
pub struct KillEvent {
    /// Player that died.
    pub victim: EntityId,
    /// Credited killer; `None` for red-zone deaths.
    pub killer: Option<EntityId>,
    /// Weapon or explosion table id the kill came from.
    pub weapon: u16,
    /// Killer's kill count after this kill.
    pub killer_kills: u32,
}

/// A role grant or loss to broadcast (kill leader).
#[derive(Debug, Clone, Copy)]
pub struct RoleEvent {
    /// Player concerned.
    pub player: EntityId,
    /// Role id.
    pub role: u8,
    /// True when granted, false when lost.
    pub assigned: bool,
}

/// Ephemeral events accumulated during one tick, shared by every observer's
/// update packet and cleared afterwards.
#[derive(Debug, Default)]
pub struct TickEvents {
    /// Alive count changed this tick.
    pub alive_dirty: bool,
    /// Current alive count.
    pub alive_count: u32,
    /// Gas stage fields changed this tick.
    pub gas_dirty: bool,
    /// Interpolated gas circle moved this tick.
    pub gas_circle_dirty: bool,
    /// Bullets fired this tick, announced exactly once.
    pub new_bullets: Vec<Bullet>,
    /// Detonations resolved this tick.
    pub explosions: Vec<Explosion>,
    /// Emotes relayed this tick: (sender, payload).
    pub emotes: Vec<(EntityId, EmoteMessage)>,
    /// Kills confirmed this tick.
    pub kills: Vec<KillEvent>,
    /// Role changes this tick.
    pub roles: Vec<RoleEvent>,
}

impl TickEvents {
    /// Reset between ticks. Dirty flags and event queues never survive the
    /// tick that produced them.
    pub fn clear(&mut self) {
        self.alive_dirty = false;
        self.gas_dirty = false;
        self.gas_circle_dirty = false;
        self.new_bullets.clear();
        self.explosions.clear();
        self.emotes.clear();
        self.kills.clear();
        self.roles.clear();
    }
}

fn write_entity_id(w: &mut BitWriter, id: EntityId) {
    w.write_bits(id.0, ENTITY_ID_BITS);
}

fn write_position(w: &mut BitWriter, pos: Vec2) {
    w.write_vec(pos, Vec2::ZERO, Vec2::splat(WORLD_SIZE), POSITION_BITS);
}

/// Full snapshot payload: kind discriminator, common core, kind fields.
fn write_full_entity(w: &mut BitWriter, entity: &Entity) {
    w.write_u8(entity.object_kind() as u8);
    write_position(w, entity.core.position);
    w.write_bits(entity.core.orientation.bits() as u32, ORIENTATION_BITS);
    w.write_float(entity.core.scale, SCALE_MIN, SCALE_MAX, HEALTH_BITS);
    w.write_bits(entity.core.layer.bits() as u32, 2);
    w.write_bool(entity.core.dead);
    match &entity.kind {
        EntityKind::Player(p) => {
            w.write_fixed_str(&p.name, MAX_NAME_LEN);
            w.write_float(p.health, 0.0, 100.0, HEALTH_BITS);
            w.write_float(p.boost, 0.0, 100.0, HEALTH_BITS);
            w.write_bool(p.downed);
            w.write_bits(p.active_weapon().def as u32, GAME_TYPE_BITS);
            w.write_unit_vec(p.aim, UNIT_VEC_BITS);
            w.write_u8(p.last_input_seq);
        }
        EntityKind::Obstacle(o) => {
            w.write_bits(o.type_id as u32, GAME_TYPE_BITS);
            let fraction = match o.health {
                Some(h) => h / o.max_health,
                None => 1.0,
            };
            w.write_float(fraction, 0.0, 1.0, HEALTH_BITS);
            w.write_bool(o.health.is_some());
        }
        EntityKind::Loot(l) => {
            w.write_bits(l.item as u32, GAME_TYPE_BITS);
            w.write_u8(l.count.min(255) as u8);
        }
        EntityKind::DeadBody(d) => {
            write_entity_id(w, d.player);
        }
        EntityKind::Projectile(p) => {
            w.write_bits(p.type_id as u32, GAME_TYPE_BITS);
            w.write_float(p.z_pos, 0.0, 10.0, HEALTH_BITS);
            w.write_unit_vec(p.direction, UNIT_VEC_BITS);
        }
    }
}

/// Partial (movement) payload: kind discriminator, position, orientation,
/// and the aim vector for players.
fn write_partial_entity(w: &mut BitWriter, entity: &Entity) {
    w.write_u8(entity.object_kind() as u8);
    write_position(w, entity.core.position);
    w.write_bits(entity.core.orientation.bits() as u32, ORIENTATION_BITS);
    if let EntityKind::Player(p) = &entity.kind {
        w.write_unit_vec(p.aim, UNIT_VEC_BITS);
        w.write_bits(entity.core.layer.bits() as u32, 2);
    }
}

/// Encode one world update for `observer`.
///
/// Pending ids missing from the registry are skipped with a warning; the
/// dirty-set rules make that unreachable, so a hit means a bookkeeping bug
/// rather than a reason to kill the connection.
pub fn encode_update(
    observer: &Observer,
    registry: &Registry,
    gas: &GasState,
    events: &TickEvents,
) -> Vec<u8> {
    let mut w = BitWriter::with_capacity(256);
    w.write_u8(MsgType::Update as u8);

    // Alive-count block.
    w.write_bool(events.alive_dirty);
    if events.alive_dirty {
        w.write_u8(events.alive_count.min(255) as u8);
    }

    // Gas stage block.
    w.write_bool(events.gas_dirty);
    if events.gas_dirty {
        w.write_bits(gas.mode as u32, 2);
        w.write_float(gas.damage, 0.0, 20.0, HEALTH_BITS);
        write_position(&mut w, gas.old_position);
        write_position(&mut w, gas.new_position);
        w.write_float(gas.old_radius, 0.0, WORLD_SIZE, POSITION_BITS);
        w.write_float(gas.new_radius, 0.0, WORLD_SIZE, POSITION_BITS);
        w.write_float(0.0, 0.0, GAS_DURATION_MAX, HEALTH_BITS);
    }

    // Gas circle block (interpolated position for this tick).
    w.write_bool(events.gas_circle_dirty);
    if events.gas_circle_dirty {
        write_position(&mut w, gas.position);
        w.write_float(gas.radius, 0.0, WORLD_SIZE, POSITION_BITS);
    }

    // Full entities.
    let fulls: Vec<&Entity> = observer
        .pending_full
        .iter()
        .filter_map(|&id| {
            let entity = registry.get(id);
            if entity.is_none() {
                warn!(id = id.0, "full-dirty id missing from registry");
            }
            entity
        })
        .collect();
    w.write_bits(fulls.len() as u32, 16);
    for entity in fulls {
        write_full_entity(&mut w, entity);
    }

    // Partial entities.
    let partials: Vec<&Entity> = observer
        .pending_partial
        .iter()
        .filter_map(|&id| {
            let entity = registry.get(id);
            if entity.is_none() {
                warn!(id = id.0, "partial-dirty id missing from registry");
            }
            entity
        })
        .collect();
    w.write_bits(partials.len() as u32, 16);
    for entity in partials {
        write_partial_entity(&mut w, entity);
    }

    // Deletions.
    w.write_bits(observer.pending_deleted.len() as u32, 16);
    for &id in &observer.pending_deleted {
        write_entity_id(&mut w, id);
    }

    // Emotes.
    w.write_u8(events.emotes.len().min(255) as u8);
    for (sender, emote) in events.emotes.iter().take(255) {
        write_entity_id(&mut w, *sender);
        w.write_bits(emote.emote as u32, GAME_TYPE_BITS);
        w.write_bool(emote.is_ping);
        write_position(&mut w, emote.position);
    }

    // Explosions.
    w.write_u8(events.explosions.len().min(255) as u8);
    for ex in events.explosions.iter().take(255) {
        w.write_bits(ex.type_id as u32, GAME_TYPE_BITS);
        write_position(&mut w, ex.position);
        w.write_bits(ex.layer.bits() as u32, 2);
    }

    // New bullets, announced exactly once in the tick they were fired.
    w.write_u8(events.new_bullets.len().min(255) as u8);
    for b in events.new_bullets.iter().take(255) {
        w.write_bits(b.seq as u32, 16);
        write_entity_id(&mut w, b.shooter);
        write_position(&mut w, b.origin);
        w.write_unit_vec(b.direction, UNIT_VEC_BITS);
        w.write_bits(b.source_weapon as u32, GAME_TYPE_BITS);
        w.write_bits(b.type_id as u32, GAME_TYPE_BITS);
        w.write_bits(b.layer.bits() as u32, 2);
    }

    // Kills.
    w.write_u8(events.kills.len().min(255) as u8);
    for kill in events.kills.iter().take(255) {
        write_entity_id(&mut w, kill.victim);
        write_entity_id(&mut w, kill.killer.unwrap_or(EntityId(0)));
        w.write_bits(kill.weapon as u32, GAME_TYPE_BITS);
        w.write_u8(kill.killer_kills.min(255) as u8);
    }

    // Role announcements.
    w.write_u8(events.roles.len().min(255) as u8);
    for role in events.roles.iter().take(255) {
        write_entity_id(&mut w, role.player);
        w.write_u8(role.role);
        w.write_bool(role.assigned);
    }

    w.align_to_byte();
    w.finish()
}

/// Join acknowledgement: protocol echo, assigned entity id, team mode.
pub fn encode_joined(player: EntityId, team_mode: bool) -> Vec<u8> {
    let mut w = BitWriter::new();
    w.write_u8(MsgType::Joined as u8);
    w.write_u16(PROTOCOL_VERSION);
    write_entity_id(&mut w, player);
    w.write_bool(team_mode);
    w.align_to_byte();
    w.finish()
}

/// Map snapshot: seed plus every static's placement, sent once on join.
pub fn encode_map(seed: u64, registry: &Registry) -> Vec<u8> {
    let mut w = BitWriter::with_capacity(1024);
    w.write_u8(MsgType::Map as u8);
    w.write_u32((seed & 0xFFFF_FFFF) as u32);
    w.write_u32((seed >> 32) as u32);

    let statics: Vec<&Entity> = registry
        .static_ids()
        .filter_map(|id| registry.get(id))
        .collect();
    w.write_bits(statics.len() as u32, 16);
    for entity in statics {
        let type_id = match &entity.kind {
            EntityKind::Obstacle(o) => o.type_id,
            _ => 0,
        };
        write_entity_id(&mut w, entity.core.id);
        w.write_bits(type_id as u32, GAME_TYPE_BITS);
        write_position(&mut w, entity.core.position);
        w.write_bits(entity.core.orientation.bits() as u32, ORIENTATION_BITS);
        w.write_float(entity.core.scale, SCALE_MIN, SCALE_MAX, HEALTH_BITS);
        w.write_bits(entity.core.layer.bits() as u32, 2);
    }
    w.align_to_byte();
    w.finish()
}

/// Standalone kill notice (sent to the victim and killer immediately).
pub fn encode_kill(kill: &KillEvent) -> Vec<u8> {
    let mut w = BitWriter::new();
    w.write_u8(MsgType::Kill as u8);
    write_entity_id(&mut w, kill.victim);
    write_entity_id(&mut w, kill.killer.unwrap_or(EntityId(0)));
    w.write_bits(kill.weapon as u32, GAME_TYPE_BITS);
    w.write_u8(kill.killer_kills.min(255) as u8);
    w.align_to_byte();
    w.finish()
}

/// Per-player end-of-game report.
pub fn encode_game_over(rank: u32, kills: u32, won: bool) -> Vec<u8> {
    let mut w = BitWriter::new();
    w.write_u8(MsgType::GameOver as u8);
    w.write_u8(rank.min(255) as u8);
    w.write_u8(kills.min(255) as u8);
    w.write_bool(won);
    w.align_to_byte();
    w.finish()
}

/// Result of a pickup attempt.
pub fn encode_pickup(item: u16, count: u32, result: PickupResult) -> Vec<u8> {
    let mut w = BitWriter::new();
    w.write_u8(MsgType::Pickup as u8);
    w.write_bits(item as u32, GAME_TYPE_BITS);
    w.write_u8(count.min(255) as u8);
    w.write_bits(result as u32, 2);
    w.align_to_byte();
    w.finish()
}

/// Alive-count broadcast outside the update packet.
pub fn encode_alive_counts(alive: u32) -> Vec<u8> {
    let mut w = BitWriter::new();
    w.write_u8(MsgType::AliveCounts as u8);
    w.write_u8(alive.min(255) as u8);
    w.finish()
}

/// Role announcement broadcast.
pub fn encode_role(role: &RoleEvent) -> Vec<u8> {
    let mut w = BitWriter::new();
    w.write_u8(MsgType::RoleAnnouncement as u8);
    write_entity_id(&mut w, role.player);
    w.write_u8(role.role);
    w.write_bool(role.assigned);
    w.align_to_byte();
    w.finish()
}
