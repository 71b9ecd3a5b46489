#![warn(missing_docs)]
//! Wire protocol: bit-level codec, message definitions, framed TCP transport.

mod bitstream;
pub mod packets;
mod protocol;
mod transport;

pub use bitstream::{BitReader, BitWriter, CodecError};
pub use packets::{
    ClientMessage, DropItemMessage, EmoteMessage, InputAction, InputMessage, JoinMessage,
    SpectateMessage,
};
pub use protocol::{
    MsgType, PickupResult, HEALTH_BITS, MAX_EMOTES_PER_PACKET, MAX_FRAME_LEN, MAX_NAME_LEN,
    ORIENTATION_BITS, POSITION_BITS, PROTOCOL_VERSION, UNIT_VEC_BITS,
};
pub use transport::{ConnectionId, OutboundHandle, ServerEndpoint, TransportEvent};
