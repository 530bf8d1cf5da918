//! Platform backend: adapts a vendor lobby/P2P service to [`Transport`].
//!
//! Vendor completions and notifications may arrive on any thread. They are
//! only queued there; `tick` pumps the service and turns the queue into
//! [`TransportEvent`]s on the caller's thread.
//!
//! Lobby passwords never leave the host in clear text: the lobby metadata
//! carries a SHA-256 digest. Joiners check it before joining when the lobby
//! came from a list, and right after joining otherwise.

mod loopback;
mod service;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, info, warn};

pub use self::loopback::{LoopbackCloud, LoopbackPlatform};
pub use self::service::{
    Completion, NotificationSink, PlatformService, ServiceNotification, VendorLobby,
    VendorLobbyId, VendorUserId,
};
use super::{EventSink, Reliability, Transport, TransportCapabilities, TransportEvent, TransportKind};
use crate::error::NetplayError;
use crate::peer::{LobbyDescriptor, MembershipRoster, PeerId, PeerIdentity};

const META_NAME: &str = "name";
const META_OWNER_NAME: &str = "owner_name";
const META_HAS_PASSWORD: &str = "has_password";
const META_PASSWORD_DIGEST: &str = "password_sha256";

enum Update {
    Created {
        attempt: u64,
        result: Result<VendorLobbyId, String>,
    },
    Listed(Result<Vec<VendorLobby>, String>),
    Joined {
        attempt: u64,
        result: Result<VendorLobby, String>,
        password: Option<String>,
    },
    Notification(ServiceNotification),
}

struct ActiveLobby {
    id: VendorLobbyId,
    owner: VendorUserId,
    members: MembershipRoster,
}

pub struct PlatformTransport {
    service: Arc<dyn PlatformService>,
    events: EventSink,
    updates_tx: Sender<Update>,
    updates_rx: Receiver<Update>,
    local: Option<(VendorUserId, PeerIdentity)>,
    lobby: Option<ActiveLobby>,
    pending_create: Option<PendingCreate>,
    /// Attempt number of the vendor join in flight.
    pending_join: Option<u64>,
    next_attempt: u64,
    /// Metadata of lobbies seen in the last list, for pre-join password checks.
    known: HashMap<VendorLobbyId, BTreeMap<String, String>>,
}

/// Lobby settings awaiting the vendor's create completion.
struct PendingCreate {
    attempt: u64,
    name: String,
    max_players: u8,
    has_password: bool,
}

impl PlatformTransport {
    pub fn new(service: Arc<dyn PlatformService>) -> Self {
        let (updates_tx, updates_rx) = crossbeam_channel::unbounded();
        Self {
            service,
            events: EventSink::new(),
            updates_tx,
            updates_rx,
            local: None,
            lobby: None,
            pending_create: None,
            pending_join: None,
            next_attempt: 0,
            known: HashMap::new(),
        }
    }

    fn local_user(&self) -> Option<VendorUserId> {
        self.local.as_ref().map(|(id, _)| *id)
    }

    fn busy(&self) -> bool {
        self.lobby.is_some() || self.pending_create.is_some() || self.pending_join.is_some()
    }

    fn start_attempt(&mut self) -> u64 {
        self.next_attempt += 1;
        self.next_attempt
    }

    fn handle_update(&mut self, update: Update) {
        match update {
            Update::Created { attempt, result } => {
                if self.pending_create.as_ref().is_some_and(|p| p.attempt == attempt) {
                    self.on_created(result);
                } else if let Ok(id) = result {
                    debug!(lobby = id, "cancelled lobby creation completed, leaving");
                    self.service.leave_lobby(id);
                }
            }
            Update::Listed(result) => self.on_listed(result),
            Update::Joined {
                attempt,
                result,
                password,
            } => {
                if self.pending_join == Some(attempt) {
                    self.pending_join = None;
                    self.on_joined(result, password.as_deref());
                } else if let Ok(lobby) = result {
                    debug!(lobby = lobby.id, "cancelled join completed, leaving");
                    self.service.leave_lobby(lobby.id);
                }
            }
            Update::Notification(notification) => self.on_notification(notification),
        }
    }

    fn on_created(&mut self, result: Result<VendorLobbyId, String>) {
        let (Some((user, local)), Some(pending)) = (self.local.clone(), self.pending_create.take())
        else {
            return;
        };
        match result {
            Ok(id) => {
                let mut members = MembershipRoster::new();
                let _ = members.insert(local.clone());
                let descriptor = LobbyDescriptor {
                    id: id.to_string(),
                    owner: local.id.clone(),
                    owner_name: local.name.clone(),
                    name: pending.name,
                    current_players: 1,
                    max_players: pending.max_players,
                    has_password: pending.has_password,
                };
                info!(lobby = id, "platform lobby created");
                self.lobby = Some(ActiveLobby {
                    id,
                    owner: user,
                    members,
                });
                self.events.emit(TransportEvent::LobbyCreated(descriptor));
            }
            Err(reason) => {
                warn!(%reason, "platform lobby creation failed");
                self.events.emit(TransportEvent::LobbyCreateFailed { reason });
            }
        }
    }

    fn on_listed(&mut self, result: Result<Vec<VendorLobby>, String>) {
        match result {
            Ok(lobbies) => {
                self.known = lobbies
                    .iter()
                    .map(|l| (l.id, l.metadata.clone()))
                    .collect();
                let list = lobbies.iter().map(descriptor_from).collect();
                self.events.emit(TransportEvent::LobbyListUpdated(list));
            }
            Err(reason) => {
                warn!(%reason, "lobby list request failed");
                self.events.emit(TransportEvent::LobbyListUpdated(Vec::new()));
            }
        }
    }

    fn on_joined(&mut self, result: Result<VendorLobby, String>, password: Option<&str>) {
        let Some((user, local)) = self.local.clone() else {
            return;
        };
        let lobby = match result {
            Ok(lobby) => lobby,
            Err(reason) => {
                info!(%reason, "platform lobby join failed");
                self.events.emit(TransportEvent::LobbyJoinFailed { reason });
                return;
            }
        };

        if let Some(expected) = lobby.metadata.get(META_PASSWORD_DIGEST)
            && password_digest(password.unwrap_or_default()) != *expected
        {
            self.service.leave_lobby(lobby.id);
            self.events.emit(TransportEvent::LobbyJoinFailed {
                reason: "wrong password".to_string(),
            });
            return;
        }

        let mut ordered = lobby.members.clone();
        ordered.sort_by_key(|(id, _)| *id != lobby.owner);
        let members: Vec<PeerIdentity> = ordered
            .into_iter()
            .map(|(id, name)| PeerIdentity::new(vendor_peer_id(id), name))
            .collect();
        let mut roster = MembershipRoster::new();
        roster.reset_from(members.iter().cloned());

        let descriptor = descriptor_from(&lobby);
        info!(lobby = lobby.id, local = user, "joined platform lobby");
        self.lobby = Some(ActiveLobby {
            id: lobby.id,
            owner: lobby.owner,
            members: roster,
        });
        self.events.emit(TransportEvent::LobbyJoined {
            lobby: descriptor,
            members,
            local,
        });
    }

    fn on_notification(&mut self, notification: ServiceNotification) {
        let local_user = self.local_user();
        match notification {
            ServiceNotification::MemberJoined { lobby, user, name } => {
                let Some(active) = self.lobby.as_mut().filter(|a| a.id == lobby) else {
                    return;
                };
                if Some(user) == local_user {
                    return;
                }
                let peer = PeerIdentity::new(vendor_peer_id(user), name);
                match active.members.insert(peer.clone()) {
                    Ok(()) => {
                        self.events.emit(TransportEvent::PlayerJoined(peer));
                    }
                    Err(e) => warn!(user, error = ?e, "member rejoin ignored"),
                }
            }
            ServiceNotification::MemberLeft { lobby, user } => {
                let Some(active) = self.lobby.as_mut().filter(|a| a.id == lobby) else {
                    return;
                };
                let id = vendor_peer_id(user);
                if active.members.remove(&id).is_some() {
                    self.events.emit(TransportEvent::PlayerLeft(id));
                }
            }
            ServiceNotification::LobbyDeleted { lobby } => {
                if self.lobby.as_ref().is_some_and(|a| a.id == lobby) {
                    info!(lobby, "platform lobby closed");
                    self.lobby = None;
                    self.events.emit(TransportEvent::LobbyLeft {
                        reason: "host left".to_string(),
                    });
                }
            }
            ServiceNotification::PersonaChanged { user, name } => {
                let id = vendor_peer_id(user);
                if let Some(active) = &mut self.lobby
                    && active.members.rename(&id, &name)
                {
                    self.events
                        .emit(TransportEvent::PlayerInfoUpdated(PeerIdentity::new(id, name)));
                }
            }
            ServiceNotification::AvatarLoaded { user } => {
                self.events
                    .emit(TransportEvent::AvatarReady(vendor_peer_id(user)));
            }
            ServiceNotification::Packet { from, data } => {
                let sender = vendor_peer_id(from);
                let member = self
                    .lobby
                    .as_ref()
                    .is_some_and(|a| a.members.contains(&sender));
                if member && Some(from) != local_user {
                    self.events.emit(TransportEvent::PacketReceived {
                        from: sender,
                        payload: data.into(),
                    });
                } else {
                    debug!(from, "packet from non-member dropped");
                }
            }
            ServiceNotification::ConnectionLost { reason } => {
                warn!(%reason, "platform connection lost");
                self.lobby = None;
                self.events.emit(TransportEvent::Disconnected { reason });
            }
        }
    }

    fn send(&self, to: VendorUserId, payload: &[u8], reliability: Reliability) -> Result<(), NetplayError> {
        self.service
            .send_packet(to, payload, reliability.is_reliable())
            .map_err(NetplayError::SendFailed)
    }

    fn refuse(&self, create: bool, reason: &str) {
        warn!(reason, "lobby request refused");
        let reason = reason.to_string();
        self.events.emit(if create {
            TransportEvent::LobbyCreateFailed { reason }
        } else {
            TransportEvent::LobbyJoinFailed { reason }
        });
    }
}

impl Transport for PlatformTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Platform
    }

    fn initialize(&mut self) -> Result<(), NetplayError> {
        if self.local.is_some() {
            return Ok(());
        }
        let (user, name) = self
            .service
            .local_user()
            .map_err(NetplayError::ServiceUnavailable)?;

        let tx = self.updates_tx.clone();
        self.service.set_notification_sink(Some(Box::new(move |n| {
            let _ = tx.send(Update::Notification(n));
        })));
        info!(user, %name, "platform transport ready");
        self.local = Some((user, PeerIdentity::new(vendor_peer_id(user), name)));
        Ok(())
    }

    fn shutdown(&mut self) {
        if self.local.is_none() {
            return;
        }
        self.leave_lobby();
        self.service.set_notification_sink(None);
        self.local = None;
        info!("platform transport shut down");
    }

    fn tick(&mut self, _now: Instant) {
        if self.local.is_none() {
            return;
        }
        self.service.run_callbacks();
        while let Ok(update) = self.updates_rx.try_recv() {
            self.handle_update(update);
        }
    }

    fn create_lobby(&mut self, name: &str, password: Option<&str>, max_players: u8) {
        let Some((_, local)) = &self.local else {
            return self.refuse(true, "transport not initialized");
        };
        if self.busy() {
            return self.refuse(true, "already in a lobby");
        }
        if max_players == 0 {
            return self.refuse(true, "max players must be at least 1");
        }

        let password = password.filter(|p| !p.is_empty());
        let mut metadata = BTreeMap::new();
        metadata.insert(META_NAME.to_string(), name.to_string());
        metadata.insert(META_OWNER_NAME.to_string(), local.name.clone());
        metadata.insert(
            META_HAS_PASSWORD.to_string(),
            password.is_some().to_string(),
        );
        if let Some(password) = password {
            metadata.insert(META_PASSWORD_DIGEST.to_string(), password_digest(password));
        }

        let attempt = self.start_attempt();
        self.pending_create = Some(PendingCreate {
            attempt,
            name: name.to_string(),
            max_players,
            has_password: password.is_some(),
        });
        let tx = self.updates_tx.clone();
        self.service.create_lobby(
            u32::from(max_players),
            metadata,
            Box::new(move |result| {
                let _ = tx.send(Update::Created { attempt, result });
            }),
        );
    }

    fn request_lobby_list(&mut self) {
        if self.local.is_none() {
            warn!("lobby list requested before initialize");
            self.events.emit(TransportEvent::LobbyListUpdated(Vec::new()));
            return;
        }
        let tx = self.updates_tx.clone();
        self.service.request_lobby_list(Box::new(move |result| {
            let _ = tx.send(Update::Listed(result));
        }));
    }

    fn join_lobby(&mut self, lobby: &LobbyDescriptor, password: Option<&str>) {
        if self.local.is_none() {
            return self.refuse(false, "transport not initialized");
        }
        if self.busy() {
            return self.refuse(false, "already in a lobby");
        }
        let Ok(id) = lobby.id.parse::<VendorLobbyId>() else {
            return self.refuse(false, "invalid lobby id");
        };
        if let Some(expected) = self.known.get(&id).and_then(|m| m.get(META_PASSWORD_DIGEST))
            && password_digest(password.unwrap_or_default()) != *expected
        {
            return self.refuse(false, "wrong password");
        }

        let tx = self.updates_tx.clone();
        let password = password.map(str::to_string);
        let attempt = self.start_attempt();
        self.pending_join = Some(attempt);
        info!(lobby = id, "joining platform lobby");
        self.service.join_lobby(
            id,
            Box::new(move |result| {
                let _ = tx.send(Update::Joined {
                    attempt,
                    result,
                    password,
                });
            }),
        );
    }

    fn leave_lobby(&mut self) {
        if let Some(active) = self.lobby.take() {
            self.service.leave_lobby(active.id);
            info!(lobby = active.id, "left platform lobby");
            self.events.emit(TransportEvent::LobbyLeft {
                reason: "left lobby".to_string(),
            });
        }
        if self.pending_join.take().is_some() {
            self.events.emit(TransportEvent::LobbyJoinFailed {
                reason: "join cancelled".to_string(),
            });
        }
        if self.pending_create.take().is_some() {
            self.events.emit(TransportEvent::LobbyCreateFailed {
                reason: "create cancelled".to_string(),
            });
        }
    }

    fn send_to_host(&mut self, payload: &[u8], reliability: Reliability) -> Result<(), NetplayError> {
        let active = self.lobby.as_ref().ok_or(NetplayError::NotInLobby)?;
        if Some(active.owner) == self.local_user() {
            return Err(NetplayError::InvalidState("local peer is the host"));
        }
        self.send(active.owner, payload, reliability)
    }

    fn send_to_all(&mut self, payload: &[u8], reliability: Reliability) -> Result<(), NetplayError> {
        let active = self.lobby.as_ref().ok_or(NetplayError::NotInLobby)?;
        let local = self.local_user();
        let mut result = Ok(());
        for member in active.members.iter() {
            let Ok(user) = member.id.as_str().parse::<VendorUserId>() else {
                continue;
            };
            if Some(user) == local {
                continue;
            }
            if let Err(e) = self.send(user, payload, reliability) {
                debug!(to = user, error = %e, "send failed");
                result = Err(e);
            }
        }
        result
    }

    fn send_to_player(
        &mut self,
        peer: &PeerId,
        payload: &[u8],
        reliability: Reliability,
    ) -> Result<(), NetplayError> {
        let active = self.lobby.as_ref().ok_or(NetplayError::NotInLobby)?;
        let user = peer
            .as_str()
            .parse::<VendorUserId>()
            .ok()
            .filter(|u| active.members.contains(peer) && Some(*u) != self.local_user())
            .ok_or_else(|| NetplayError::UnknownPeer(peer.to_string()))?;
        self.send(user, payload, reliability)
    }

    fn local_peer(&self) -> Option<PeerIdentity> {
        self.local.as_ref().map(|(_, peer)| peer.clone())
    }

    fn capabilities(&self) -> TransportCapabilities {
        TransportCapabilities {
            native_reliable: true,
            lobby_browser: true,
        }
    }

    fn events(&self) -> Receiver<TransportEvent> {
        self.events.receiver()
    }
}

impl Drop for PlatformTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn vendor_peer_id(user: VendorUserId) -> PeerId {
    PeerId::new(user.to_string())
}

fn password_digest(password: &str) -> String {
    let digest = ring::digest::digest(&ring::digest::SHA256, password.as_bytes());
    hex::encode(digest.as_ref())
}

fn descriptor_from(lobby: &VendorLobby) -> LobbyDescriptor {
    let owner_name = lobby
        .metadata
        .get(META_OWNER_NAME)
        .cloned()
        .or_else(|| {
            lobby
                .members
                .iter()
                .find(|(id, _)| *id == lobby.owner)
                .map(|(_, name)| name.clone())
        })
        .unwrap_or_default();
    LobbyDescriptor {
        id: lobby.id.to_string(),
        owner: vendor_peer_id(lobby.owner),
        owner_name,
        name: lobby.metadata.get(META_NAME).cloned().unwrap_or_default(),
        current_players: u8::try_from(lobby.members.len()).unwrap_or(u8::MAX),
        max_players: u8::try_from(lobby.member_limit).unwrap_or(u8::MAX),
        has_password: lobby
            .metadata
            .get(META_HAS_PASSWORD)
            .is_some_and(|v| v == "true"),
    }
}
