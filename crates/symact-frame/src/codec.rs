use std::time::Duration;

use bincode::Options;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::Serialize;
use symact_transport::TransportError;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{FrameError, Result};
use crate::packet::EncodedPacket;

/// Length prefix: one native-endian u32.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Default maximum packet body size: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// Serialization options shared by every packet.
///
/// Fixed-width integers in native byte order; strings and sequences carry a
/// u64 length. Peers are same-architecture processes on one machine.
pub(crate) fn bincode_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_native_endian()
        .allow_trailing_bytes()
}

/// Encode a `(header, payload)` pair into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────────────────┬──────────────────────────────────────┐
/// │ Length (4B, NE)  │ bincode(header) ++ bincode(payload)  │
/// └──────────────────┴──────────────────────────────────────┘
/// ```
///
/// The length is not known until the body is serialized, so a placeholder is
/// reserved first and patched afterwards.
pub fn encode_packet<H, P>(header: &H, payload: &P, dst: &mut BytesMut) -> Result<()>
where
    H: Serialize + ?Sized,
    P: Serialize + ?Sized,
{
    let start = dst.len();
    dst.put_u32_ne(0);

    let written = {
        let mut writer = (&mut *dst).writer();
        bincode_options()
            .serialize_into(&mut writer, header)
            .and_then(|()| bincode_options().serialize_into(&mut writer, payload))
    };
    if let Err(err) = written {
        dst.truncate(start);
        return Err(FrameError::Encode(err));
    }

    let body_len = dst.len() - start - LENGTH_PREFIX_SIZE;
    let Ok(prefix) = u32::try_from(body_len) else {
        dst.truncate(start);
        return Err(FrameError::PayloadTooLarge {
            size: body_len,
            max: u32::MAX as usize,
        });
    };
    dst[start..start + LENGTH_PREFIX_SIZE].copy_from_slice(&prefix.to_ne_bytes());
    Ok(())
}

/// Decode one packet body from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete packet yet.
/// On success, consumes the packet bytes from the buffer.
pub fn decode_frame(src: &mut BytesMut, max_payload: usize) -> Result<Option<Bytes>> {
    if src.len() < LENGTH_PREFIX_SIZE {
        return Ok(None);
    }

    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    prefix.copy_from_slice(&src[..LENGTH_PREFIX_SIZE]);
    let body_len = u32::from_ne_bytes(prefix) as usize;

    if body_len > max_payload {
        return Err(FrameError::PayloadTooLarge {
            size: body_len,
            max: max_payload,
        });
    }

    let total = LENGTH_PREFIX_SIZE + body_len;
    if src.len() < total {
        src.reserve(total - src.len());
        return Ok(None);
    }

    src.advance(LENGTH_PREFIX_SIZE);
    Ok(Some(src.split_to(body_len).freeze()))
}

/// Packet codec for `FramedRead`/`FramedWrite` over a pipe stream.
#[derive(Debug, Clone)]
pub struct PacketCodec {
    max_payload_size: usize,
}

impl PacketCodec {
    pub fn new(max_payload_size: usize) -> Self {
        Self { max_payload_size }
    }
}

impl Default for PacketCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PAYLOAD)
    }
}

impl Decoder for PacketCodec {
    type Item = Bytes;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        decode_frame(src, self.max_payload_size)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        match self.decode(src)? {
            Some(body) => Ok(Some(body)),
            None if src.is_empty() => Ok(None),
            None => Err(FrameError::Transport(TransportError::PipeBroken(format!(
                "connection closed mid-packet ({} bytes buffered)",
                src.len()
            )))),
        }
    }
}

impl Encoder<EncodedPacket> for PacketCodec {
    type Error = FrameError;

    fn encode(&mut self, packet: EncodedPacket, dst: &mut BytesMut) -> Result<()> {
        if packet.body_len() > self.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: packet.body_len(),
                max: self.max_payload_size,
            });
        }
        dst.extend_from_slice(packet.as_bytes());
        Ok(())
    }
}

/// Configuration for packet exchange on one pipe.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum packet body size in bytes. Default: 16 MiB.
    pub max_payload_size: usize,
    /// Read deadline used when a call supplies none. Default: unbounded.
    pub read_timeout: Option<Duration>,
    /// Write deadline used when a call supplies none. Default: unbounded.
    pub write_timeout: Option<Duration>,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            read_timeout: None,
            write_timeout: None,
        }
    }
}

impl FrameConfig {
    pub fn with_max_payload_size(mut self, max_payload_size: usize) -> Self {
        self.max_payload_size = max_payload_size;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_write_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.write_timeout = timeout;
        self
    }
}
