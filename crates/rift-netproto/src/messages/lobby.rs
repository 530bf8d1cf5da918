//! Lobby lifecycle bodies exchanged by the LAN transport.

use serde::{Deserialize, Serialize};

use crate::control::ControlKind;
use crate::messages::impl_control_message;

/// Lobby description as it travels on the wire.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct LobbyInfo {
    /// Lobby id. For the LAN backend this is the host's `"<ip>:<port>"`.
    pub id: String,
    pub owner_id: String,
    pub owner_name: String,
    pub name: String,
    pub current_players: u8,
    pub max_players: u8,
    pub has_password: bool,
}

/// A lobby member as announced by the host.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub id: String,
    pub name: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryRequest {
    /// Sender's protocol version; hosts ignore mismatching requests.
    pub version: u8,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryResponse {
    pub lobby: LobbyInfo,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct JoinRequest {
    pub name: String,
    pub password: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct JoinAccept {
    pub lobby: LobbyInfo,
    /// Current roster, host first, including the joiner.
    pub members: Vec<PeerInfo>,
    /// The joiner's id as observed by the host.
    pub assigned_id: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct JoinReject {
    pub reason: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PlayerJoined {
    pub peer: PeerInfo,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PlayerLeft {
    pub peer_id: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Leave {
    pub reason_code: u8,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct LobbyClosed {
    pub reason: String,
}

impl_control_message! {
    DiscoveryRequest => ControlKind::DiscoveryRequest,
    DiscoveryResponse => ControlKind::DiscoveryResponse,
    JoinRequest => ControlKind::JoinRequest,
    JoinAccept => ControlKind::JoinAccept,
    JoinReject => ControlKind::JoinReject,
    PlayerJoined => ControlKind::PlayerJoined,
    PlayerLeft => ControlKind::PlayerLeft,
    Leave => ControlKind::Leave,
    LobbyClosed => ControlKind::LobbyClosed,
}
