//! LAN backend: UDP broadcast discovery and direct datagrams.
//!
//! Every instance binds the first free port out of a fixed candidate list so
//! several instances can share one machine. Discovery probes each candidate
//! port at the broadcast address; hosts answer with their lobby info.
//!
//! Datagrams that parse as control packets drive the lobby lifecycle. All
//! other datagrams are game data and are forwarded untouched, but only when
//! they come from a current lobby member.
//!
//! Peer ids are the `ip:port` a datagram was received from. A client always
//! rewrites the host's self-reported id to the address it actually reached
//! the host at, since a host bound to the unspecified address cannot know
//! which of its addresses its peers see.
//!
//! `Reliable` is not honoured natively: every send is a single datagram.
//! Callers that need delivery guarantees repeat state (periodic full
//! snapshots) instead.

mod host;
mod socket;

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Instant;

use bytes::Bytes;
use crossbeam_channel::Receiver;
use rift_netproto::constants::VERSION;
use rift_netproto::control::{ControlKind, ControlPacket, Datagram, classify, encode_control};
use rift_netproto::error::ProtoError;
use rift_netproto::messages::ControlMessage;
use rift_netproto::messages::lobby::{
    DiscoveryRequest, DiscoveryResponse, JoinAccept, JoinReject, JoinRequest, Leave, LobbyClosed,
    PlayerJoined, PlayerLeft,
};
use tracing::{debug, info, trace, warn};

use self::host::{Admission, HostLobby};
use self::socket::{Inbound, LanSocket};
use super::{EventSink, Reliability, Transport, TransportCapabilities, TransportEvent, TransportKind};
use crate::config::LanConfig;
use crate::error::NetplayError;
use crate::peer::{LobbyDescriptor, MembershipRoster, PeerId, PeerIdentity};

/// `Leave::reason_code` for a voluntary departure.
const LEAVE_VOLUNTARY: u8 = 0;

pub struct LanTransport {
    config: LanConfig,
    player_name: String,
    events: EventSink,
    socket: Option<LanSocket>,
    role: Role,
    discovery: Option<Discovery>,
    /// Clock of the latest `tick`; deadlines are measured against it.
    last_tick: Instant,
}

enum Role {
    Idle,
    Hosting(HostLobby),
    Joining(PendingJoin),
    Member(ClientLobby),
}

struct PendingJoin {
    host: SocketAddr,
    request: Vec<u8>,
    deadline: Instant,
    next_retry: Instant,
}

struct ClientLobby {
    host: SocketAddr,
    local: PeerIdentity,
    members: MembershipRoster,
}

struct Discovery {
    until: Instant,
    lobbies: BTreeMap<String, LobbyDescriptor>,
}

impl LanTransport {
    pub fn new(config: LanConfig, player_name: impl Into<String>) -> Self {
        Self {
            config,
            player_name: player_name.into(),
            events: EventSink::new(),
            socket: None,
            role: Role::Idle,
            discovery: None,
            last_tick: Instant::now(),
        }
    }

    /// Bound local address, once initialized.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().map(LanSocket::local_addr)
    }

    pub fn is_hosting(&self) -> bool {
        matches!(self.role, Role::Hosting(_))
    }

    fn handle_datagram(&mut self, inbound: Inbound, now: Instant) {
        let control = match classify(&inbound.bytes) {
            Datagram::Control(packet) => Some(packet),
            Datagram::GameData(_) => None,
        };
        match control {
            Some(packet) => self.handle_control(inbound.from, packet, now),
            None => self.handle_game_data(inbound.from, inbound.bytes),
        }
    }

    fn handle_control(&mut self, from: SocketAddr, packet: ControlPacket, now: Instant) {
        trace!(%from, kind = %packet.kind, "control packet");
        let result: Result<(), ProtoError> = match packet.kind {
            ControlKind::DiscoveryRequest => packet
                .body()
                .map(|msg| self.on_discovery_request(from, msg)),
            ControlKind::DiscoveryResponse => packet
                .body()
                .map(|msg| self.on_discovery_response(from, msg, now)),
            ControlKind::JoinRequest => packet.body().map(|msg| self.on_join_request(from, msg)),
            ControlKind::JoinAccept => packet.body().map(|msg| self.on_join_accept(from, msg)),
            ControlKind::JoinReject => packet.body().map(|msg| self.on_join_reject(from, msg)),
            ControlKind::PlayerJoined => packet.body().map(|msg| self.on_player_joined(from, msg)),
            ControlKind::PlayerLeft => packet.body().map(|msg| self.on_player_left(from, msg)),
            ControlKind::Leave => packet.body().map(|_: Leave| self.on_leave(from)),
            ControlKind::LobbyClosed => packet.body().map(|msg| self.on_lobby_closed(from, msg)),
        };
        if let Err(e) = result {
            debug!(%from, kind = %packet.kind, error = %e, "malformed control packet dropped");
        }
    }

    fn handle_game_data(&mut self, from: SocketAddr, payload: Bytes) {
        let sender = PeerId::from_addr(from);
        let accepted = match &self.role {
            Role::Hosting(host) => host.is_member(&sender),
            Role::Member(client) => from == client.host || client.members.contains(&sender),
            Role::Idle | Role::Joining(_) => false,
        };
        if accepted {
            self.events.emit(TransportEvent::PacketReceived {
                from: sender,
                payload,
            });
        } else {
            trace!(%from, len = payload.len(), "game data from non-member dropped");
        }
    }

    fn on_discovery_request(&mut self, from: SocketAddr, msg: DiscoveryRequest) {
        let Role::Hosting(host) = &self.role else {
            return;
        };
        if msg.version != VERSION {
            debug!(%from, version = msg.version, "discovery from incompatible version ignored");
            return;
        }
        let response = DiscoveryResponse {
            lobby: host.descriptor().to_info(),
        };
        send_control(self.socket.as_ref(), &response, from);
    }

    fn on_discovery_response(&mut self, from: SocketAddr, msg: DiscoveryResponse, now: Instant) {
        if Some(from) == self.local_addr() {
            return;
        }
        let Some(discovery) = &mut self.discovery else {
            return;
        };
        if now > discovery.until {
            return;
        }
        let mut lobby = LobbyDescriptor::from(msg.lobby);
        lobby.id = from.to_string();
        lobby.owner = PeerId::from_addr(from);
        debug!(%from, name = %lobby.name, "lobby discovered");
        discovery.lobbies.insert(lobby.id.clone(), lobby);
        self.events.emit(TransportEvent::LobbyListUpdated(
            discovery.lobbies.values().cloned().collect(),
        ));
    }

    fn on_join_request(&mut self, from: SocketAddr, msg: JoinRequest) {
        let Role::Hosting(host) = &mut self.role else {
            let reject = JoinReject {
                reason: "no lobby hosted at this address".to_string(),
            };
            send_control(self.socket.as_ref(), &reject, from);
            return;
        };

        let peer = PeerIdentity::new(PeerId::from_addr(from), msg.name);
        match host.admit(peer.clone(), msg.password.as_deref()) {
            Ok(admission) => {
                let accept = JoinAccept {
                    lobby: host.descriptor().to_info(),
                    members: host.member_infos(),
                    assigned_id: peer.id.to_string(),
                };
                send_control(self.socket.as_ref(), &accept, from);

                if admission == Admission::Admitted {
                    info!(peer = %peer.id, name = %peer.name, "player joined lobby");
                    let announce = PlayerJoined {
                        peer: (&peer).into(),
                    };
                    for addr in host.remote_addrs(Some(&peer.id)) {
                        send_control(self.socket.as_ref(), &announce, addr);
                    }
                    self.events.emit(TransportEvent::PlayerJoined(peer));
                }
            }
            Err(rejection) => {
                info!(%from, reason = rejection.reason(), "join request rejected");
                let reject = JoinReject {
                    reason: rejection.reason().to_string(),
                };
                send_control(self.socket.as_ref(), &reject, from);
            }
        }
    }

    fn on_join_accept(&mut self, from: SocketAddr, msg: JoinAccept) {
        let Role::Joining(pending) = &self.role else {
            return;
        };
        if pending.host != from {
            return;
        }

        let host_wire_id = msg.lobby.owner_id.clone();
        let mut lobby = LobbyDescriptor::from(msg.lobby);
        lobby.id = from.to_string();
        lobby.owner = PeerId::from_addr(from);

        let members: Vec<PeerIdentity> = msg
            .members
            .into_iter()
            .map(|info| {
                if info.id == host_wire_id {
                    PeerIdentity::new(PeerId::from_addr(from), info.name)
                } else {
                    info.into()
                }
            })
            .collect();
        let local = PeerIdentity::new(PeerId::new(msg.assigned_id), self.player_name.clone());

        let mut roster = MembershipRoster::new();
        roster.reset_from(members.iter().cloned());
        info!(host = %from, lobby = %lobby.name, local = %local.id, "joined lobby");
        self.role = Role::Member(ClientLobby {
            host: from,
            local: local.clone(),
            members: roster,
        });
        self.events.emit(TransportEvent::LobbyJoined {
            lobby,
            members,
            local,
        });
    }

    fn on_join_reject(&mut self, from: SocketAddr, msg: JoinReject) {
        if let Role::Joining(pending) = &self.role
            && pending.host == from
        {
            info!(host = %from, reason = %msg.reason, "join rejected");
            self.role = Role::Idle;
            self.events
                .emit(TransportEvent::LobbyJoinFailed { reason: msg.reason });
        }
    }

    fn on_player_joined(&mut self, from: SocketAddr, msg: PlayerJoined) {
        let Role::Member(client) = &mut self.role else {
            return;
        };
        if client.host != from {
            return;
        }
        let peer = PeerIdentity::from(msg.peer);
        if peer.id == client.local.id {
            return;
        }
        if client.members.insert(peer.clone()).is_ok() {
            self.events.emit(TransportEvent::PlayerJoined(peer));
        }
    }

    fn on_player_left(&mut self, from: SocketAddr, msg: PlayerLeft) {
        let Role::Member(client) = &mut self.role else {
            return;
        };
        if client.host != from {
            return;
        }
        let id = PeerId::new(msg.peer_id);
        if id == client.local.id {
            info!(host = %from, "removed from lobby by host");
            self.role = Role::Idle;
            self.events.emit(TransportEvent::LobbyLeft {
                reason: "removed by host".to_string(),
            });
        } else if client.members.remove(&id).is_some() {
            self.events.emit(TransportEvent::PlayerLeft(id));
        }
    }

    fn on_leave(&mut self, from: SocketAddr) {
        let Role::Hosting(host) = &mut self.role else {
            return;
        };
        let id = PeerId::from_addr(from);
        if host.remove(&id).is_none() {
            return;
        }
        info!(peer = %id, "player left lobby");
        let announce = PlayerLeft {
            peer_id: id.to_string(),
        };
        for addr in host.remote_addrs(None) {
            send_control(self.socket.as_ref(), &announce, addr);
        }
        self.events.emit(TransportEvent::PlayerLeft(id));
    }

    fn on_lobby_closed(&mut self, from: SocketAddr, msg: LobbyClosed) {
        match &self.role {
            Role::Member(client) if client.host == from => {
                info!(host = %from, reason = %msg.reason, "lobby closed by host");
                self.role = Role::Idle;
                self.events
                    .emit(TransportEvent::LobbyLeft { reason: msg.reason });
            }
            Role::Joining(pending) if pending.host == from => {
                self.role = Role::Idle;
                self.events
                    .emit(TransportEvent::LobbyJoinFailed { reason: msg.reason });
            }
            _ => {}
        }
    }

    fn poll_join(&mut self, now: Instant) {
        let Role::Joining(pending) = &mut self.role else {
            return;
        };
        if now >= pending.deadline {
            let host = pending.host;
            info!(%host, "join timed out");
            self.role = Role::Idle;
            // The host may already have admitted us; release the slot.
            let leave = Leave {
                reason_code: LEAVE_VOLUNTARY,
            };
            send_control(self.socket.as_ref(), &leave, host);
            self.events.emit(TransportEvent::LobbyJoinFailed {
                reason: "join timed out".to_string(),
            });
        } else if now >= pending.next_retry {
            pending.next_retry = now + self.config.join_retry();
            if let Some(socket) = &self.socket
                && let Err(e) = socket.send_to(&pending.request, pending.host)
            {
                debug!(host = %pending.host, error = %e, "join retry failed");
            }
        }
    }

    fn poll_discovery(&mut self, now: Instant) {
        let expired = self.discovery.as_ref().is_some_and(|d| now > d.until);
        if !expired {
            return;
        }
        if let Some(discovery) = self.discovery.take()
            && discovery.lobbies.is_empty()
        {
            self.events.emit(TransportEvent::LobbyListUpdated(Vec::new()));
        }
    }

    fn lobby_failure(&self, create: bool, reason: &str) {
        warn!(reason, "lobby request refused");
        let reason = reason.to_string();
        self.events.emit(if create {
            TransportEvent::LobbyCreateFailed { reason }
        } else {
            TransportEvent::LobbyJoinFailed { reason }
        });
    }

    fn socket(&self) -> Result<&LanSocket, NetplayError> {
        self.socket.as_ref().ok_or(NetplayError::NotInitialized)
    }
}

impl Transport for LanTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Lan
    }

    fn initialize(&mut self) -> Result<(), NetplayError> {
        if self.socket.is_some() {
            return Ok(());
        }
        let socket = LanSocket::bind(self.config.bind_ip, &self.config.candidate_ports)?;
        info!(local_addr = %socket.local_addr(), "LAN transport ready");
        self.socket = Some(socket);
        Ok(())
    }

    fn shutdown(&mut self) {
        self.leave_lobby();
        self.discovery = None;
        if let Some(socket) = self.socket.take() {
            socket.close();
            info!("LAN transport shut down");
        }
    }

    fn tick(&mut self, now: Instant) {
        self.last_tick = now;
        while let Some(inbound) = self.socket.as_ref().and_then(LanSocket::try_recv) {
            self.handle_datagram(inbound, now);
        }
        self.poll_join(now);
        self.poll_discovery(now);
    }

    fn create_lobby(&mut self, name: &str, password: Option<&str>, max_players: u8) {
        let Some(socket) = &self.socket else {
            return self.lobby_failure(true, "transport not initialized");
        };
        if !matches!(self.role, Role::Idle) {
            return self.lobby_failure(true, "already in a lobby");
        }
        if max_players == 0 {
            return self.lobby_failure(true, "max players must be at least 1");
        }

        let host = PeerIdentity::new(
            PeerId::from_addr(socket.local_addr()),
            self.player_name.clone(),
        );
        let lobby = HostLobby::new(host, name, password, max_players);
        let descriptor = lobby.descriptor().clone();
        info!(lobby = name, max_players, local_addr = %socket.local_addr(), "lobby created");
        self.role = Role::Hosting(lobby);
        self.events.emit(TransportEvent::LobbyCreated(descriptor));
    }

    fn request_lobby_list(&mut self) {
        let Some(socket) = &self.socket else {
            warn!("lobby list requested before initialize");
            self.events.emit(TransportEvent::LobbyListUpdated(Vec::new()));
            return;
        };

        let request = match encode_control(&DiscoveryRequest { version: VERSION }) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "failed to encode discovery request");
                return;
            }
        };
        for &port in &self.config.candidate_ports {
            let addr = SocketAddr::new(self.config.broadcast_ip, port);
            if addr == socket.local_addr() {
                continue;
            }
            if let Err(e) = socket.send_to(&request, addr) {
                debug!(%addr, error = %e, "discovery probe failed");
            }
        }
        debug!(ports = ?self.config.candidate_ports, "discovery started");
        self.discovery = Some(Discovery {
            until: self.last_tick + self.config.discovery_window(),
            lobbies: BTreeMap::new(),
        });
    }

    fn join_lobby(&mut self, lobby: &LobbyDescriptor, password: Option<&str>) {
        let Some(socket) = &self.socket else {
            return self.lobby_failure(false, "transport not initialized");
        };
        if !matches!(self.role, Role::Idle) {
            return self.lobby_failure(false, "already in a lobby");
        }
        let Ok(host) = lobby.id.parse::<SocketAddr>() else {
            return self.lobby_failure(false, "invalid lobby address");
        };
        if host == socket.local_addr() {
            return self.lobby_failure(false, "cannot join own endpoint");
        }

        let request = JoinRequest {
            name: self.player_name.clone(),
            password: password.map(str::to_string),
        };
        let request = match encode_control(&request) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "failed to encode join request");
                return self.lobby_failure(false, "join request too large");
            }
        };
        if let Err(e) = socket.send_to(&request, host) {
            debug!(%host, error = %e, "join request send failed");
        }

        info!(%host, "joining lobby");
        let now = self.last_tick;
        self.role = Role::Joining(PendingJoin {
            host,
            request,
            deadline: now + self.config.join_timeout(),
            next_retry: now + self.config.join_retry(),
        });
    }

    fn leave_lobby(&mut self) {
        let socket = self.socket.as_ref();
        match std::mem::replace(&mut self.role, Role::Idle) {
            Role::Idle => {}
            Role::Hosting(host) => {
                let closed = LobbyClosed {
                    reason: "host left".to_string(),
                };
                for addr in host.remote_addrs(None) {
                    send_control(socket, &closed, addr);
                }
                info!("hosted lobby closed");
                self.events.emit(TransportEvent::LobbyLeft {
                    reason: "left lobby".to_string(),
                });
            }
            Role::Member(client) => {
                let leave = Leave {
                    reason_code: LEAVE_VOLUNTARY,
                };
                send_control(socket, &leave, client.host);
                info!(host = %client.host, "left lobby");
                self.events.emit(TransportEvent::LobbyLeft {
                    reason: "left lobby".to_string(),
                });
            }
            Role::Joining(pending) => {
                let leave = Leave {
                    reason_code: LEAVE_VOLUNTARY,
                };
                send_control(socket, &leave, pending.host);
                self.events.emit(TransportEvent::LobbyJoinFailed {
                    reason: "join cancelled".to_string(),
                });
            }
        }
    }

    fn send_to_host(
        &mut self,
        payload: &[u8],
        _reliability: Reliability,
    ) -> Result<(), NetplayError> {
        match &self.role {
            Role::Member(client) => self.socket()?.send_to(payload, client.host),
            Role::Hosting(_) => Err(NetplayError::InvalidState("local peer is the host")),
            Role::Idle | Role::Joining(_) => Err(NetplayError::NotInLobby),
        }
    }

    fn send_to_all(
        &mut self,
        payload: &[u8],
        _reliability: Reliability,
    ) -> Result<(), NetplayError> {
        let addrs: Vec<SocketAddr> = match &self.role {
            Role::Hosting(host) => host.remote_addrs(None),
            Role::Member(client) => client
                .members
                .iter()
                .filter(|m| m.id != client.local.id)
                .filter_map(|m| m.id.to_socket_addr())
                .collect(),
            Role::Idle | Role::Joining(_) => return Err(NetplayError::NotInLobby),
        };

        let socket = self.socket()?;
        let mut result = Ok(());
        for addr in addrs {
            if let Err(e) = socket.send_to(payload, addr) {
                debug!(%addr, error = %e, "send failed");
                result = Err(e);
            }
        }
        result
    }

    fn send_to_player(
        &mut self,
        peer: &PeerId,
        payload: &[u8],
        _reliability: Reliability,
    ) -> Result<(), NetplayError> {
        let known = match &self.role {
            Role::Hosting(host) => host.is_member(peer) && peer != host.host_id(),
            Role::Member(client) => client.members.contains(peer) && *peer != client.local.id,
            Role::Idle | Role::Joining(_) => return Err(NetplayError::NotInLobby),
        };
        let addr = peer
            .to_socket_addr()
            .filter(|_| known)
            .ok_or_else(|| NetplayError::UnknownPeer(peer.to_string()))?;
        self.socket()?.send_to(payload, addr)
    }

    fn local_peer(&self) -> Option<PeerIdentity> {
        if let Role::Member(client) = &self.role {
            return Some(client.local.clone());
        }
        self.local_addr()
            .map(|addr| PeerIdentity::new(PeerId::from_addr(addr), self.player_name.clone()))
    }

    fn capabilities(&self) -> TransportCapabilities {
        TransportCapabilities {
            native_reliable: false,
            lobby_browser: true,
        }
    }

    fn events(&self) -> Receiver<TransportEvent> {
        self.events.receiver()
    }
}

impl Drop for LanTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn send_control<T: ControlMessage>(socket: Option<&LanSocket>, msg: &T, addr: SocketAddr) {
    let Some(socket) = socket else {
        return;
    };
    let result = encode_control(msg)
        .map_err(NetplayError::from)
        .and_then(|bytes| socket.send_to(&bytes, addr));
    if let Err(e) = result {
        debug!(%addr, kind = %T::control_kind(), error = %e, "control send failed");
    }
}
