//! Routed game-data envelope (wire format).
//!
//! Encoding rules:
//! - Fixed header of exactly `HEADER_LEN` bytes followed by the payload.
//! - Integer fields are little-endian.
//! - Layout is defined by `encode()` / `decode()` offsets below.
//!
//! The routing [`Target`] is advisory: only the sender decides who physically
//! receives the bytes. It is carried so receivers can tell a host-only
//! message from a broadcast.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use strum::FromRepr;

use crate::{
    constants::{ENVELOPE_MAGIC, HEADER_LEN, VERSION},
    error::ProtoError,
    limits::MAX_RELIABLE_PAYLOAD,
};

/// Logical routing target of an envelope.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr, Serialize, Deserialize)]
pub enum Target {
    /// Only the lobby host.
    Host = 0,
    /// Every lobby member except the sender.
    Others = 1,
    /// Every lobby member including the sender.
    All = 2,
}

/// Envelope kind identifier.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr, Serialize, Deserialize)]
pub enum EnvelopeKind {
    /// Complete authoritative entity set. The only kind that may create or
    /// destroy client-side proxies.
    FullState = 1,
    /// Update-only entity states, sent every host tick.
    StateUpdate = 2,
    /// Opaque client-to-host game command.
    GameCommand = 16,
    /// Opaque game event.
    GameEvent = 17,
}

impl EnvelopeKind {
    /// Returns `true` for kinds consumed by the replication layer.
    pub const fn is_replication(self) -> bool {
        matches!(self, Self::FullState | Self::StateUpdate)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub target: Target,
    pub kind: EnvelopeKind,
    pub payload: Bytes,
}

impl Envelope {
    pub fn new(target: Target, kind: EnvelopeKind, payload: impl Into<Bytes>) -> Self {
        Self {
            target,
            kind,
            payload: payload.into(),
        }
    }

    /// Encoded size in bytes.
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }

    /// Encode this envelope using the current fixed wire layout.
    ///
    /// Offsets (bytes):
    /// - 0..2   magic
    /// - 2      version
    /// - 3      kind
    /// - 4      target
    /// - 5      reserved (always 0)
    /// - 6..10  payload_len (u32 LE)
    pub fn encode(&self) -> Result<Vec<u8>, ProtoError> {
        if self.payload.len() > MAX_RELIABLE_PAYLOAD {
            return Err(ProtoError::PayloadTooLarge(self.payload.len()));
        }

        let mut out = Vec::with_capacity(self.encoded_len());
        out.extend_from_slice(&ENVELOPE_MAGIC);
        out.push(VERSION);
        out.push(self.kind as u8);
        out.push(self.target as u8);
        out.push(0); // reserved
        out.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.payload);
        Ok(out)
    }

    /// Decode a buffer that contains exactly `[Header][Payload]`.
    ///
    /// - If `buf.len() < HEADER_LEN`, returns `TooShort`.
    /// - If magic/version mismatch, returns an error.
    /// - Unknown kind or target bytes are rejected.
    /// - Requires `buf.len() == HEADER_LEN + payload_len`.
    pub fn decode(buf: &[u8]) -> Result<Self, ProtoError> {
        if buf.len() < HEADER_LEN {
            return Err(ProtoError::TooShort);
        }
        if buf[0..2] != ENVELOPE_MAGIC {
            return Err(ProtoError::BadMagic);
        }

        let version = buf[2];
        if version != VERSION {
            return Err(ProtoError::UnsupportedVersion(version));
        }

        let kind = EnvelopeKind::from_repr(buf[3]).ok_or(ProtoError::UnknownKind(buf[3]))?;
        let target = Target::from_repr(buf[4]).ok_or(ProtoError::UnknownTarget(buf[4]))?;

        let payload_len = read_u32_le(buf, 6)? as usize;
        if payload_len > MAX_RELIABLE_PAYLOAD {
            return Err(ProtoError::PayloadTooLarge(payload_len));
        }
        if buf.len() != HEADER_LEN + payload_len {
            return Err(ProtoError::LengthMismatch);
        }

        Ok(Self {
            target,
            kind,
            payload: Bytes::copy_from_slice(&buf[HEADER_LEN..]),
        })
    }
}

fn read_u32_le(buf: &[u8], start: usize) -> Result<u32, ProtoError> {
    let bytes: [u8; 4] = buf
        .get(start..start + 4)
        .ok_or(ProtoError::TooShort)?
        .try_into()
        .map_err(|_| ProtoError::TooShort)?;
    Ok(u32::from_le_bytes(bytes))
}
