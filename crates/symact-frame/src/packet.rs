use bincode::Options;
use bytes::{Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::codec::{bincode_options, encode_packet, LENGTH_PREFIX_SIZE};
use crate::error::{FrameError, Result};

/// Header preceding every request body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestHeader {
    /// Identifier of the requested action.
    pub identifier: String,
    /// Token the response must echo back.
    pub command_token: u32,
}

/// Header preceding every response body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseHeader {
    /// Token of the request this answers.
    pub command_token: u32,
    /// Zero on success. See [`crate::status`].
    pub status: i32,
}

/// Body for packets that carry only a header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmptyPayload;

/// A fully encoded packet, length prefix included, ready to be written.
#[derive(Debug, Clone)]
pub struct EncodedPacket {
    bytes: Bytes,
}

impl EncodedPacket {
    /// Serialize `header` then `payload` into one packet.
    pub fn new<H, P>(header: &H, payload: &P) -> Result<Self>
    where
        H: Serialize + ?Sized,
        P: Serialize + ?Sized,
    {
        let mut buf = BytesMut::new();
        encode_packet(header, payload, &mut buf)?;
        Ok(Self {
            bytes: buf.freeze(),
        })
    }

    /// A response carrying only a status, used for failures.
    pub fn status_only(command_token: u32, status: i32) -> Result<Self> {
        Self::new(
            &ResponseHeader {
                command_token,
                status,
            },
            &EmptyPayload,
        )
    }

    /// The wire bytes of this packet.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Size of the body after the length prefix.
    pub fn body_len(&self) -> usize {
        self.bytes.len() - LENGTH_PREFIX_SIZE
    }

    /// View this packet as if it had been received, without a pipe.
    pub fn into_inbound(self) -> InboundPacket {
        InboundPacket::new(self.bytes.slice(LENGTH_PREFIX_SIZE..))
    }
}

/// A received packet body, deserialized piecewise.
///
/// The header is read first to learn how to interpret the rest; the payload
/// is then read from where the header ended without copying the buffer.
#[derive(Debug, Clone)]
pub struct InboundPacket {
    body: Bytes,
    consumed: usize,
}

impl InboundPacket {
    pub fn new(body: Bytes) -> Self {
        Self { body, consumed: 0 }
    }

    /// Total body size in bytes.
    pub fn len(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> &[u8] {
        &self.body[self.consumed..]
    }

    /// Deserialize the header, leaving the payload bytes in place.
    pub fn consume_header<H: DeserializeOwned>(&mut self) -> Result<H> {
        self.consume()
    }

    /// Deserialize the payload from the bytes following the header.
    ///
    /// Bytes left over after the payload are discarded with a warning.
    pub fn consume_payload<P: DeserializeOwned>(mut self) -> Result<P> {
        let payload = self.consume()?;
        let trailing = self.body.len() - self.consumed;
        if trailing > 0 {
            warn!(
                trailing,
                payload = std::any::type_name::<P>(),
                "discarding trailing bytes after packet payload"
            );
        }
        Ok(payload)
    }

    fn consume<T: DeserializeOwned>(&mut self) -> Result<T> {
        let mut rest = &self.body[self.consumed..];
        let before = rest.len();
        // Length fields inside the body can never claim more than what is left.
        let value = bincode_options()
            .with_limit(before as u64)
            .deserialize_from(&mut rest)
            .map_err(FrameError::Decode)?;
        self.consumed += before - rest.len();
        Ok(value)
    }
}
