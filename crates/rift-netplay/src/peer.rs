//! Peer identities, lobby descriptors and the membership roster.

use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;

use rift_netproto::messages::lobby::{LobbyInfo, PeerInfo};
use serde::{Deserialize, Serialize};

/// Opaque, backend-specific peer id.
///
/// LAN peers use `"<ip>:<port>"`, platform peers use the vendor user id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn from_addr(addr: SocketAddr) -> Self {
        Self(addr.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parse the id as a socket address (LAN ids only).
    pub fn to_socket_addr(&self) -> Option<SocketAddr> {
        self.0.parse().ok()
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerIdentity {
    pub id: PeerId,
    pub name: String,
}

impl PeerIdentity {
    pub fn new(id: PeerId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

impl From<PeerInfo> for PeerIdentity {
    fn from(info: PeerInfo) -> Self {
        Self {
            id: PeerId(info.id),
            name: info.name,
        }
    }
}

impl From<&PeerIdentity> for PeerInfo {
    fn from(peer: &PeerIdentity) -> Self {
        Self {
            id: peer.id.0.clone(),
            name: peer.name.clone(),
        }
    }
}

/// Description of a lobby as advertised by a backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LobbyDescriptor {
    pub id: String,
    pub owner: PeerId,
    pub owner_name: String,
    pub name: String,
    pub current_players: u8,
    pub max_players: u8,
    pub has_password: bool,
}

impl LobbyDescriptor {
    /// Descriptor for a LAN host reached directly by address, without discovery.
    pub fn direct(addr: SocketAddr) -> Self {
        Self {
            id: addr.to_string(),
            owner: PeerId::from_addr(addr),
            owner_name: String::new(),
            name: String::new(),
            current_players: 0,
            max_players: 0,
            has_password: false,
        }
    }

    pub fn is_full(&self) -> bool {
        self.max_players > 0 && self.current_players >= self.max_players
    }

    pub fn to_info(&self) -> LobbyInfo {
        LobbyInfo {
            id: self.id.clone(),
            owner_id: self.owner.0.clone(),
            owner_name: self.owner_name.clone(),
            name: self.name.clone(),
            current_players: self.current_players,
            max_players: self.max_players,
            has_password: self.has_password,
        }
    }
}

impl From<LobbyInfo> for LobbyDescriptor {
    fn from(info: LobbyInfo) -> Self {
        Self {
            id: info.id,
            owner: PeerId(info.owner_id),
            owner_name: info.owner_name,
            name: info.name,
            current_players: info.current_players,
            max_players: info.max_players,
            has_password: info.has_password,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RosterError {
    /// The id is already a member.
    Duplicate,
    /// The id belonged to a member that left; ids are not reused within a lobby.
    Retired,
}

/// Ordered set of lobby members, unique by id.
///
/// Ids of members that left are remembered until [`clear`](Self::clear) so
/// they cannot be handed out again within the same lobby.
#[derive(Debug, Clone, Default)]
pub struct MembershipRoster {
    members: Vec<PeerIdentity>,
    retired: HashSet<PeerId>,
}

impl MembershipRoster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, peer: PeerIdentity) -> Result<(), RosterError> {
        if self.contains(&peer.id) {
            return Err(RosterError::Duplicate);
        }
        if self.retired.contains(&peer.id) {
            return Err(RosterError::Retired);
        }
        self.members.push(peer);
        Ok(())
    }

    pub fn remove(&mut self, id: &PeerId) -> Option<PeerIdentity> {
        let index = self.members.iter().position(|m| &m.id == id)?;
        let peer = self.members.remove(index);
        self.retired.insert(peer.id.clone());
        Some(peer)
    }

    /// Replace a member's display name. Returns false for unknown ids.
    pub fn rename(&mut self, id: &PeerId, name: &str) -> bool {
        match self.members.iter_mut().find(|m| &m.id == id) {
            Some(member) => {
                member.name = name.to_string();
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: &PeerId) -> bool {
        self.members.iter().any(|m| &m.id == id)
    }

    pub fn get(&self, id: &PeerId) -> Option<&PeerIdentity> {
        self.members.iter().find(|m| &m.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PeerIdentity> {
        self.members.iter()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Forget every member and every retired id.
    pub fn clear(&mut self) {
        self.members.clear();
        self.retired.clear();
    }

    /// Rebuild from a host-provided member list, dropping duplicates.
    pub fn reset_from(&mut self, members: impl IntoIterator<Item = PeerIdentity>) {
        self.clear();
        for member in members {
            let _ = self.insert(member);
        }
    }
}
