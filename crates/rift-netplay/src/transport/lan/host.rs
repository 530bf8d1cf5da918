//! Lobby state kept by a LAN host.

use std::net::SocketAddr;

use rift_netproto::messages::lobby::PeerInfo;

use crate::peer::{LobbyDescriptor, MembershipRoster, PeerId, PeerIdentity, RosterError};

/// Why a join request was turned down. The text is sent back to the joiner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum JoinRejection {
    Full,
    WrongPassword,
    IdRetired,
}

impl JoinRejection {
    pub(crate) fn reason(&self) -> &'static str {
        match self {
            JoinRejection::Full => "lobby is full",
            JoinRejection::WrongPassword => "wrong password",
            JoinRejection::IdRetired => "peer id already used in this lobby",
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Admission {
    /// New member added.
    Admitted,
    /// Already a member; the accept is repeated without a roster change.
    AlreadyMember,
}

pub(crate) struct HostLobby {
    lobby: LobbyDescriptor,
    password: Option<String>,
    members: MembershipRoster,
}

impl HostLobby {
    pub(crate) fn new(
        host: PeerIdentity,
        name: &str,
        password: Option<&str>,
        max_players: u8,
    ) -> Self {
        let password = password.filter(|p| !p.is_empty()).map(str::to_string);
        let lobby = LobbyDescriptor {
            id: host.id.to_string(),
            owner: host.id.clone(),
            owner_name: host.name.clone(),
            name: name.to_string(),
            current_players: 1,
            max_players,
            has_password: password.is_some(),
        };
        let mut members = MembershipRoster::new();
        let _ = members.insert(host);
        Self {
            lobby,
            password,
            members,
        }
    }

    pub(crate) fn descriptor(&self) -> &LobbyDescriptor {
        &self.lobby
    }

    pub(crate) fn host_id(&self) -> &PeerId {
        &self.lobby.owner
    }

    pub(crate) fn is_member(&self, id: &PeerId) -> bool {
        self.members.contains(id)
    }

    pub(crate) fn member_infos(&self) -> Vec<PeerInfo> {
        self.members.iter().map(PeerInfo::from).collect()
    }

    /// Validate and record a join request.
    pub(crate) fn admit(
        &mut self,
        peer: PeerIdentity,
        password: Option<&str>,
    ) -> Result<Admission, JoinRejection> {
        if self.members.contains(&peer.id) {
            return Ok(Admission::AlreadyMember);
        }
        if self.members.len() >= usize::from(self.lobby.max_players) {
            return Err(JoinRejection::Full);
        }
        if let Some(expected) = &self.password {
            if password != Some(expected.as_str()) {
                return Err(JoinRejection::WrongPassword);
            }
        }
        match self.members.insert(peer) {
            Ok(()) => {
                self.sync_count();
                Ok(Admission::Admitted)
            }
            Err(RosterError::Retired) => Err(JoinRejection::IdRetired),
            Err(RosterError::Duplicate) => Ok(Admission::AlreadyMember),
        }
    }

    /// Remove a member. The host itself cannot be removed.
    pub(crate) fn remove(&mut self, id: &PeerId) -> Option<PeerIdentity> {
        if id == self.host_id() {
            return None;
        }
        let removed = self.members.remove(id);
        self.sync_count();
        removed
    }

    /// Addresses of every member except the host and `except`.
    pub(crate) fn remote_addrs(&self, except: Option<&PeerId>) -> Vec<SocketAddr> {
        self.members
            .iter()
            .filter(|m| &m.id != self.host_id() && Some(&m.id) != except)
            .filter_map(|m| m.id.to_socket_addr())
            .collect()
    }

    fn sync_count(&mut self) {
        self.lobby.current_players = u8::try_from(self.members.len()).unwrap_or(u8::MAX);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host_lobby(password: Option<&str>, max_players: u8) -> HostLobby {
        let host = PeerIdentity::new(PeerId::from("127.0.0.1:47777"), "Host");
        HostLobby::new(host, "Test", password, max_players)
    }

    fn joiner(port: u16) -> PeerIdentity {
        PeerIdentity::new(PeerId::from(format!("127.0.0.1:{port}").as_str()), "Joiner")
    }

    #[test]
    fn admits_until_full() {
        let mut lobby = host_lobby(None, 2);
        assert_eq!(lobby.admit(joiner(1), None), Ok(Admission::Admitted));
        assert_eq!(lobby.descriptor().current_players, 2);
        assert_eq!(lobby.admit(joiner(2), None), Err(JoinRejection::Full));
    }

    #[test]
    fn repeated_request_is_idempotent() {
        let mut lobby = host_lobby(None, 4);
        lobby.admit(joiner(1), None).unwrap();
        assert_eq!(lobby.admit(joiner(1), None), Ok(Admission::AlreadyMember));
        assert_eq!(lobby.descriptor().current_players, 2);
    }

    #[test]
    fn password_is_checked() {
        let mut lobby = host_lobby(Some("hunter2"), 4);
        assert!(lobby.descriptor().has_password);
        assert_eq!(lobby.admit(joiner(1), None), Err(JoinRejection::WrongPassword));
        assert_eq!(
            lobby.admit(joiner(1), Some("nope")),
            Err(JoinRejection::WrongPassword)
        );
        assert_eq!(
            lobby.admit(joiner(1), Some("hunter2")),
            Ok(Admission::Admitted)
        );
    }

    #[test]
    fn empty_password_means_open_lobby() {
        let lobby = host_lobby(Some(""), 4);
        assert!(!lobby.descriptor().has_password);
    }

    #[test]
    fn departed_member_cannot_rejoin_with_same_id() {
        let mut lobby = host_lobby(None, 4);
        lobby.admit(joiner(1), None).unwrap();
        assert!(lobby.remove(&joiner(1).id).is_some());
        assert_eq!(lobby.admit(joiner(1), None), Err(JoinRejection::IdRetired));
    }

    #[test]
    fn host_is_never_removed_or_addressed() {
        let mut lobby = host_lobby(None, 4);
        lobby.admit(joiner(1), None).unwrap();
        lobby.admit(joiner(2), None).unwrap();
        let host = lobby.host_id().clone();
        assert!(lobby.remove(&host).is_none());

        let addrs = lobby.remote_addrs(Some(&joiner(1).id));
        assert_eq!(addrs, vec!["127.0.0.1:2".parse().unwrap()]);
    }
}
