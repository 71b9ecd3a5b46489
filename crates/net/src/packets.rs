//! Inbound (client → server) message decoding.
//!
//! Each message is decoded from a fresh [`BitReader`] over its own frame, so
//! a malformed message can only fail itself. Callers discard failures and
//! leave the connection open.

use crate::bitstream::{BitReader, CodecError};
use crate::protocol::{MsgType, MAX_NAME_LEN};
use glam::Vec2;
use redzone_core::WORLD_SIZE;

/// Number of bits used for content-table ("game type") identifiers.
const GAME_TYPE_BITS: u32 = 10;
/// Bits for the aim direction (finer than the 8-bit payload vectors).
const AIM_VEC_BITS: u32 = 10;

/// Join request: protocol handshake plus the display name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinMessage {
    /// Client protocol version; mismatches are rejected at accept time.
    pub version: u16,
    /// Display name, up to [`MAX_NAME_LEN`] ASCII characters.
    pub name: String,
}

/// One discrete input action carried inside an input message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputAction {
    /// Begin reloading the active weapon.
    Reload,
    /// Cancel the action in progress.
    Cancel,
    /// Interact with the nearest interactable (loot pickup, revive).
    Interact,
    /// Begin reviving a downed teammate.
    Revive,
    /// Equip weapon slot 0-3.
    EquipSlot(u8),
    /// Consume a healing item by inventory index (bandage, medkit, soda, pills).
    UseItem(u8),
    /// Swap primary and secondary slots.
    SwapWeaponSlots,
}

impl InputAction {
    fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            5 => InputAction::Reload,
            6 => InputAction::Cancel,
            7 => InputAction::Interact,
            8 => InputAction::Revive,
            11 => InputAction::EquipSlot(0),
            12 => InputAction::EquipSlot(1),
            13 => InputAction::EquipSlot(2),
            14 => InputAction::EquipSlot(3),
            23 => InputAction::UseItem(0),
            24 => InputAction::UseItem(1),
            25 => InputAction::UseItem(2),
            26 => InputAction::UseItem(3),
            28 => InputAction::SwapWeaponSlots,
            _ => return None,
        })
    }
}

/// Continuous input state sampled by the client every frame.
#[derive(Debug, Clone, PartialEq)]
pub struct InputMessage {
    /// Client-side sequence number (unused by the server, kept for parity).
    pub seq: u8,
    /// Movement keys held.
    pub moving_left: bool,
    /// Movement keys held.
    pub moving_right: bool,
    /// Movement keys held.
    pub moving_up: bool,
    /// Movement keys held.
    pub moving_down: bool,
    /// Fire pressed this frame.
    pub shoot_start: bool,
    /// Fire held.
    pub shoot_hold: bool,
    /// Aim direction (unit vector).
    pub direction: Vec2,
    /// Discrete actions bundled with this sample; unknown codes are dropped.
    pub actions: Vec<InputAction>,
}

/// Drop an item stack out of the inventory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DropItemMessage {
    /// Content-table id of the dropped item.
    pub item: u16,
    /// Weapon slot the drop refers to, when dropping an equipped weapon.
    pub weapon_slot: u8,
}

/// Emote at a world position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EmoteMessage {
    /// Content-table id of the emote.
    pub emote: u16,
    /// Whether this is a map ping only the sender's team should see.
    pub is_ping: bool,
    /// World position of the ping.
    pub position: Vec2,
}

/// Spectate navigation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpectateMessage {
    /// Begin spectating (after death), targeting the killer when possible.
    Begin,
    /// Cycle to the next spectatable player.
    Next,
    /// Cycle to the previous spectatable player.
    Previous,
}

/// A decoded client → server message.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// Join request.
    Join(JoinMessage),
    /// Input state sample.
    Input(InputMessage),
    /// Drop-item request.
    DropItem(DropItemMessage),
    /// Emote or ping.
    Emote(EmoteMessage),
    /// Spectate navigation.
    Spectate(SpectateMessage),
    /// Clean disconnect notice.
    Disconnect,
}

impl ClientMessage {
    /// Decode one message from a raw frame. The first byte is the type id.
    pub fn decode(frame: &[u8]) -> Result<Self, CodecError> {
        let mut r = BitReader::new(frame);
        let ty = r.read_u8()?;
        let ty = MsgType::from_u8(ty).ok_or(CodecError::BadValue {
            value: ty as u32,
            max: MsgType::AliveCounts as u32,
        })?;
        match ty {
            MsgType::Join => {
                let version = r.read_u16()?;
                let name = r.read_fixed_str(MAX_NAME_LEN)?;
                Ok(ClientMessage::Join(JoinMessage { version, name }))
            }
            MsgType::Input => {
                let seq = r.read_u8()?;
                let moving_left = r.read_bool()?;
                let moving_right = r.read_bool()?;
                let moving_up = r.read_bool()?;
                let moving_down = r.read_bool()?;
                let shoot_start = r.read_bool()?;
                let shoot_hold = r.read_bool()?;
                let direction = r.read_unit_vec(AIM_VEC_BITS)?;
                let count = r.read_bits(4)? as usize;
                let mut actions = Vec::with_capacity(count);
                for _ in 0..count {
                    // Unknown action codes are skipped, not fatal: older
                    // clients may send inputs this server does not handle.
                    if let Some(action) = InputAction::from_code(r.read_u8()?) {
                        actions.push(action);
                    }
                }
                Ok(ClientMessage::Input(InputMessage {
                    seq,
                    moving_left,
                    moving_right,
                    moving_up,
                    moving_down,
                    shoot_start,
                    shoot_hold,
                    direction,
                    actions,
                }))
            }
            MsgType::DropItem => {
                let item = r.read_bits(GAME_TYPE_BITS)? as u16;
                let weapon_slot = r.read_bits(2)? as u8;
                Ok(ClientMessage::DropItem(DropItemMessage { item, weapon_slot }))
            }
            MsgType::Emote => {
                let emote = r.read_bits(GAME_TYPE_BITS)? as u16;
                let is_ping = r.read_bool()?;
                let position = r.read_vec(Vec2::ZERO, Vec2::splat(WORLD_SIZE), 16)?;
                Ok(ClientMessage::Emote(EmoteMessage {
                    emote,
                    is_ping,
                    position,
                }))
            }
            MsgType::Spectate => {
                let mode = r.read_bits(2)?;
                Ok(ClientMessage::Spectate(match mode {
                    0 => SpectateMessage::Begin,
                    1 => SpectateMessage::Next,
                    2 => SpectateMessage::Previous,
                    other => {
                        return Err(CodecError::BadValue {
                            value: other,
                            max: 2,
                        })
                    }
                }))
            }
            MsgType::Disconnect => Ok(ClientMessage::Disconnect),
            other => Err(CodecError::BadValue {
                value: other as u32,
                max: MsgType::AliveCounts as u32,
            }),
        }
    }
}

/// Encode helpers used by tests and by the stress client.
#[doc(hidden)]
pub mod encode {
    use super::*;
    use crate::bitstream::BitWriter;

    /// Encode a join message.
    pub fn join(version: u16, name: &str) -> Vec<u8> {
        let mut w = BitWriter::new();
        w.write_u8(MsgType::Join as u8);
        w.write_u16(version);
        w.write_fixed_str(name, MAX_NAME_LEN);
        w.finish()
    }

    /// Encode an input message.
    pub fn input(msg: &InputMessage) -> Vec<u8> {
        let mut w = BitWriter::new();
        w.write_u8(MsgType::Input as u8);
        w.write_u8(msg.seq);
        w.write_bool(msg.moving_left);
        w.write_bool(msg.moving_right);
        w.write_bool(msg.moving_up);
        w.write_bool(msg.moving_down);
        w.write_bool(msg.shoot_start);
        w.write_bool(msg.shoot_hold);
        w.write_unit_vec(msg.direction, AIM_VEC_BITS);
        let count = msg.actions.len().min(15);
        w.write_bits(count as u32, 4);
        for action in msg.actions.iter().take(count) {
            let code: u8 = match action {
                InputAction::Reload => 5,
                InputAction::Cancel => 6,
                InputAction::Interact => 7,
                InputAction::Revive => 8,
                InputAction::EquipSlot(s) => 11 + s,
                InputAction::UseItem(i) => 23 + i,
                InputAction::SwapWeaponSlots => 28,
            };
            w.write_u8(code);
        }
        w.finish()
    }

    /// Encode a spectate message.
    pub fn spectate(msg: SpectateMessage) -> Vec<u8> {
        let mut w = BitWriter::new();
        w.write_u8(MsgType::Spectate as u8);
        w.write_bits(
            match msg {
                SpectateMessage::Begin => 0,
                SpectateMessage::Next => 1,
                SpectateMessage::Previous => 2,
            },
            2,
        );
        w.finish()
    }

    /// Encode an emote message.
    pub fn emote(msg: &EmoteMessage) -> Vec<u8> {
        let mut w = BitWriter::new();
        w.write_u8(MsgType::Emote as u8);
        w.write_bits(msg.emote as u32, GAME_TYPE_BITS);
        w.write_bool(msg.is_ping);
        w.write_vec(msg.position, Vec2::ZERO, Vec2::splat(WORLD_SIZE), 16);
        w.finish()
    }

    /// Encode a drop-item message.
    pub fn drop_item(msg: &DropItemMessage) -> Vec<u8> {
        let mut w = BitWriter::new();
        w.write_u8(MsgType::DropItem as u8);
        w.write_bits(msg.item as u32, GAME_TYPE_BITS);
        w.write_bits(msg.weapon_slot as u32, 2);
        w.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_message_round_trips() {
        let frame = encode::join(76, "survivor");
        match ClientMessage::decode(&frame).unwrap() {
            ClientMessage::Join(join) => {
                assert_eq!(join.version, 76);
                assert_eq!(join.name, "survivor");
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn input_message_round_trips_with_actions() {
        let msg = InputMessage {
            seq: 7,
            moving_left: false,
            moving_right: true,
            moving_up: true,
            moving_down: false,
            shoot_start: true,
            shoot_hold: false,
            direction: Vec2::new(0.0, 1.0),
            actions: vec![InputAction::Reload, InputAction::EquipSlot(2)],
        };
        let frame = encode::input(&msg);
        match ClientMessage::decode(&frame).unwrap() {
            ClientMessage::Input(out) => {
                assert_eq!(out.seq, 7);
                assert!(out.moving_right && out.moving_up);
                assert!(out.shoot_start && !out.shoot_hold);
                assert!((out.direction - msg.direction).length() < 0.01);
                assert_eq!(out.actions, msg.actions);
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn spectate_modes_round_trip() {
        for mode in [
            SpectateMessage::Begin,
            SpectateMessage::Next,
            SpectateMessage::Previous,
        ] {
            let frame = encode::spectate(mode);
            assert_eq!(
                ClientMessage::decode(&frame).unwrap(),
                ClientMessage::Spectate(mode)
            );
        }
    }

    #[test]
    fn truncated_frames_error_instead_of_panicking() {
        let frame = encode::join(76, "survivor");
        let err = ClientMessage::decode(&frame[..3]).unwrap_err();
        assert!(matches!(err, CodecError::Overrun { .. }));
    }

    #[test]
    fn unknown_message_type_is_rejected() {
        let err = ClientMessage::decode(&[0xFE, 0, 0]).unwrap_err();
        assert!(matches!(err, CodecError::BadValue { .. }));
    }

    #[test]
    fn server_only_types_are_rejected_inbound() {
        let err = ClientMessage::decode(&[MsgType::Update as u8]).unwrap_err();
        assert!(matches!(err, CodecError::BadValue { .. }));
    }
}
