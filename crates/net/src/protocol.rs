//! Protocol message ids, field widths, and size limits.
//!
//! Every message on the wire begins with one unsigned byte identifying its
//! type. The numbering is part of the wire contract; gaps are ids the
//! protocol reserves but this server never emits.

/// Protocol version; sent in the join handshake.
pub const PROTOCOL_VERSION: u16 = 76;

/// Largest accepted inbound or outbound frame payload.
pub const MAX_FRAME_LEN: usize = 32 * 1024;

/// Fixed length of player names on the wire.
pub const MAX_NAME_LEN: usize = 16;

/// Emotes accepted from one client within one tick.
pub const MAX_EMOTES_PER_PACKET: usize = 4;

/// Bits per position component, quantized over `[0, WORLD_SIZE]`.
pub const POSITION_BITS: u32 = 16;

/// Bits for a cardinal orientation.
pub const ORIENTATION_BITS: u32 = 2;

/// Bits for normalized magnitudes (health, scale, boost).
pub const HEALTH_BITS: u32 = 8;

/// Bits per component of a direction unit vector.
pub const UNIT_VEC_BITS: u32 = 8;

/// One-byte message discriminator leading every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MsgType {
    /// Unused placeholder.
    None = 0,
    /// Client requests to join the game.
    Join = 1,
    /// Client announces a clean disconnect.
    Disconnect = 2,
    /// Client input state (movement keys, aim, actions).
    Input = 3,
    /// Server acknowledges a join and assigns the player id.
    Joined = 5,
    /// Server world update (the delta-encoded dominant message).
    Update = 6,
    /// Server kill notice.
    Kill = 7,
    /// Server game-over report.
    GameOver = 8,
    /// Server pickup result (success / full / already owned).
    Pickup = 9,
    /// Server map snapshot (static geometry, sent once on join).
    Map = 10,
    /// Client spectate request (begin / next / previous).
    Spectate = 11,
    /// Client drops an inventory item.
    DropItem = 12,
    /// Client emote.
    Emote = 13,
    /// Server role announcement (kill leader).
    RoleAnnouncement = 17,
    /// Server alive-count broadcast.
    AliveCounts = 20,
}

impl MsgType {
    /// Decode a wire discriminator.
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => MsgType::None,
            1 => MsgType::Join,
            2 => MsgType::Disconnect,
            3 => MsgType::Input,
            5 => MsgType::Joined,
            6 => MsgType::Update,
            7 => MsgType::Kill,
            8 => MsgType::GameOver,
            9 => MsgType::Pickup,
            10 => MsgType::Map,
            11 => MsgType::Spectate,
            12 => MsgType::DropItem,
            13 => MsgType::Emote,
            17 => MsgType::RoleAnnouncement,
            20 => MsgType::AliveCounts,
            _ => return None,
        })
    }
}

/// Outcome of a pickup attempt, reported back to the acting player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PickupResult {
    /// Item moved into the inventory or equipped.
    Success = 0,
    /// No space left for this item class.
    Full = 1,
    /// An identical or better item is already equipped.
    AlreadyEquipped = 2,
    /// The stack is already owned at capacity.
    AlreadyOwned = 3,
}
