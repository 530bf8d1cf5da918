//! LAN control packets (lobby lifecycle only).
//!
//! Wire layout: `[magic "RC"][version u8][postcard {kind: String, payload: bytes}]`.
//!
//! Every datagram a LAN transport receives is first tried as a control
//! packet. Anything that does not parse as a recognised control packet is
//! treated as opaque game data and forwarded untouched, which keeps the
//! session protocol and the replication protocol decoupled on the wire.

use std::str::FromStr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::{
    constants::{CONTROL_MAGIC, CONTROL_PREFIX_LEN, VERSION},
    error::ProtoError,
    limits::MAX_DATAGRAM,
    messages::ControlMessage,
};

/// Control packet type. Travels as its string name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, AsRefStr, Display, EnumString)]
pub enum ControlKind {
    DiscoveryRequest,
    DiscoveryResponse,
    JoinRequest,
    JoinAccept,
    JoinReject,
    PlayerJoined,
    PlayerLeft,
    Leave,
    LobbyClosed,
}

#[derive(Serialize, Deserialize)]
struct ControlFrame {
    kind: String,
    payload: Vec<u8>,
}

/// A decoded control packet with its body still encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlPacket {
    pub kind: ControlKind,
    pub payload: Bytes,
}

impl ControlPacket {
    /// Decode the body as `T`, checking that the packet type matches.
    pub fn body<T: ControlMessage>(&self) -> Result<T, ProtoError> {
        if self.kind != T::control_kind() {
            return Err(ProtoError::UnknownControl(format!(
                "expected {}, got {}",
                T::control_kind(),
                self.kind
            )));
        }
        Ok(postcard::from_bytes(&self.payload)?)
    }
}

/// Encode a control message into a single datagram.
pub fn encode_control<T: ControlMessage>(msg: &T) -> Result<Vec<u8>, ProtoError> {
    let frame = ControlFrame {
        kind: T::control_kind().as_ref().to_owned(),
        payload: postcard::to_stdvec(msg)?,
    };
    let body = postcard::to_stdvec(&frame)?;

    let total = CONTROL_PREFIX_LEN + body.len();
    if total > MAX_DATAGRAM {
        return Err(ProtoError::PayloadTooLarge(total));
    }

    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(&CONTROL_MAGIC);
    out.push(VERSION);
    out.extend_from_slice(&body);
    Ok(out)
}

/// Decode a datagram as a control packet.
pub fn decode_control(datagram: &[u8]) -> Result<ControlPacket, ProtoError> {
    if datagram.len() < CONTROL_PREFIX_LEN {
        return Err(ProtoError::TooShort);
    }
    if datagram[0..2] != CONTROL_MAGIC {
        return Err(ProtoError::BadMagic);
    }
    if datagram[2] != VERSION {
        return Err(ProtoError::UnsupportedVersion(datagram[2]));
    }

    let frame: ControlFrame = postcard::from_bytes(&datagram[CONTROL_PREFIX_LEN..])?;
    let kind =
        ControlKind::from_str(&frame.kind).map_err(|_| ProtoError::UnknownControl(frame.kind))?;

    Ok(ControlPacket {
        kind,
        payload: Bytes::from(frame.payload),
    })
}

/// Result of the two-tier datagram classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Datagram<'a> {
    Control(ControlPacket),
    GameData(&'a [u8]),
}

/// Classify a received datagram: recognised control packet or opaque game data.
pub fn classify(datagram: &[u8]) -> Datagram<'_> {
    match decode_control(datagram) {
        Ok(packet) => Datagram::Control(packet),
        Err(_) => Datagram::GameData(datagram),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::lobby::{JoinRequest, Leave, PlayerLeft};

    #[test]
    fn control_kind_travels_as_its_name() {
        assert_eq!(ControlKind::DiscoveryRequest.as_ref(), "DiscoveryRequest");
        assert_eq!(
            ControlKind::from_str("LobbyClosed").unwrap(),
            ControlKind::LobbyClosed
        );
        assert!(ControlKind::from_str("Teleport").is_err());
    }

    #[test]
    fn join_request_is_classified_as_control() {
        let msg = JoinRequest {
            name: "bob".into(),
            password: Some("hunter2".into()),
        };
        let bytes = encode_control(&msg).unwrap();

        let Datagram::Control(packet) = classify(&bytes) else {
            panic!("expected control packet");
        };
        assert_eq!(packet.kind, ControlKind::JoinRequest);
        assert_eq!(packet.body::<JoinRequest>().unwrap(), msg);
    }

    #[test]
    fn body_rejects_wrong_type() {
        let bytes = encode_control(&Leave { reason_code: 0 }).unwrap();
        let packet = decode_control(&bytes).unwrap();
        assert!(packet.body::<PlayerLeft>().is_err());
    }

    #[test]
    fn unknown_type_falls_through_to_game_data() {
        let frame = ControlFrame {
            kind: "Teleport".into(),
            payload: vec![1, 2, 3],
        };
        let mut bytes = CONTROL_MAGIC.to_vec();
        bytes.push(VERSION);
        bytes.extend_from_slice(&postcard::to_stdvec(&frame).unwrap());

        assert_eq!(classify(&bytes), Datagram::GameData(&bytes));
    }

    #[test]
    fn arbitrary_bytes_are_game_data() {
        let payload = b"RE\x01\x02\x01\x00\x00\x00\x00\x00";
        assert_eq!(classify(payload), Datagram::GameData(payload));
        assert_eq!(classify(&[]), Datagram::GameData(&[]));
    }
}
