//! Length-prefixed binary packet framing over duplex pipes.
//!
//! Every packet on the wire is:
//! - A 4-byte native-endian body length
//! - The bincode-encoded header (request or response)
//! - The bincode-encoded payload, typed per action
//!
//! The body length is computed after serialization, and receivers can read
//! the header first to decide how to decode the payload.

pub mod codec;
pub mod error;
pub mod packet;
pub mod pipe;
pub mod status;

pub use codec::{
    decode_frame, encode_packet, FrameConfig, PacketCodec, DEFAULT_MAX_PAYLOAD, LENGTH_PREFIX_SIZE,
};
pub use error::{FrameError, Result};
pub use packet::{EmptyPayload, EncodedPacket, InboundPacket, RequestHeader, ResponseHeader};
pub use pipe::{DuplexPipe, PendingPipe};
