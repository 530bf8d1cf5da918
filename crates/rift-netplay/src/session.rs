//! Session manager: lobby lifecycle, membership roster, host tick and
//! envelope routing on top of any [`Transport`].
//!
//! The manager is an explicit context object. Create one per game session
//! and drive it from the game loop with [`SessionManager::update`].

use std::time::Instant;

use bytes::Bytes;
use crossbeam_channel::{Receiver, Sender};
use rift_netproto::codec::{decode_body, decode_envelope, encode_envelope, encode_message_frame};
use rift_netproto::messages::Message;
use rift_netproto::messages::replication::{FullState, StateUpdate};
use rift_netproto::{Envelope, EnvelopeKind, Target};
use tracing::{debug, info, trace, warn};

use crate::clock::TickClock;
use crate::error::NetplayError;
use crate::peer::{LobbyDescriptor, MembershipRoster, PeerId, PeerIdentity};
use crate::replication::{ApplyOutcome, ReplicaSet, ReplicatedWorld, ReplicationHost};
use crate::transport::{
    Reliability, Transport, TransportBuilder, TransportCapabilities, TransportEvent, TransportKind,
};

/// Events published to session subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    LobbyCreated(LobbyDescriptor),
    LobbyCreateFailed { reason: String },
    LobbyJoined(LobbyDescriptor),
    LobbyJoinFailed { reason: String },
    LobbyListUpdated(Vec<LobbyDescriptor>),
    PlayerJoined(PeerIdentity),
    PlayerLeft(PeerIdentity),
    PlayerInfoUpdated(PeerIdentity),
    AvatarReady(PeerId),
    LobbyLeft { reason: String },
    Disconnected { reason: String },
    /// A game-level envelope for the application.
    Envelope { from: PeerId, envelope: Envelope },
}

/// Lobby-scoped session state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    pub is_host: bool,
    pub lobby: Option<LobbyDescriptor>,
    /// When the host last sent a periodic full snapshot.
    pub last_full_sync: Option<Instant>,
    /// When the host last ran a replication tick.
    pub last_tick: Option<Instant>,
}

pub struct SessionManager {
    builder: TransportBuilder,
    transport: Box<dyn Transport>,
    transport_events: Receiver<TransportEvent>,
    /// Events left behind by a transport that was switched out.
    backlog: Vec<TransportEvent>,
    state: SessionState,
    local: Option<PeerIdentity>,
    roster: MembershipRoster,
    clock: TickClock,
    host: ReplicationHost,
    replicas: ReplicaSet,
    /// Proxies of a lobby left outside `update`, despawned on the next one.
    despawn_pending: bool,
    subscribers: Vec<Sender<SessionEvent>>,
}

impl SessionManager {
    /// Build and initialize the transport selected in the builder's config.
    pub fn new(builder: TransportBuilder) -> Result<Self, NetplayError> {
        let transport = builder.build(builder.config().transport)?;
        Self::with_transport(builder, transport)
    }

    /// Use an already constructed transport.
    pub fn with_transport(
        builder: TransportBuilder,
        mut transport: Box<dyn Transport>,
    ) -> Result<Self, NetplayError> {
        transport.initialize()?;
        let config = builder.config();
        let clock = TickClock::new(config.tick_interval());
        let host = ReplicationHost::new(config.full_sync_interval());
        let replicas = ReplicaSet::new(config.staleness);
        info!(
            transport = %transport.kind(),
            tick_rate_hz = config.tick_rate_hz,
            "session manager ready"
        );
        Ok(Self {
            transport_events: transport.events(),
            builder,
            transport,
            backlog: Vec::new(),
            state: SessionState::default(),
            local: None,
            roster: MembershipRoster::new(),
            clock,
            host,
            replicas,
            despawn_pending: false,
            subscribers: Vec::new(),
        })
    }

    /// Register a new event subscriber. Dropping the receiver unsubscribes.
    pub fn subscribe(&mut self) -> Receiver<SessionEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.subscribers.push(tx);
        rx
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn roster(&self) -> &MembershipRoster {
        &self.roster
    }

    pub fn replicas(&self) -> &ReplicaSet {
        &self.replicas
    }

    pub fn is_host(&self) -> bool {
        self.state.is_host
    }

    pub fn in_lobby(&self) -> bool {
        self.state.lobby.is_some()
    }

    pub fn local_peer(&self) -> Option<PeerIdentity> {
        self.local.clone().or_else(|| self.transport.local_peer())
    }

    pub fn transport_kind(&self) -> TransportKind {
        self.transport.kind()
    }

    pub fn capabilities(&self) -> TransportCapabilities {
        self.transport.capabilities()
    }

    /// Replace the active backend.
    ///
    /// The new backend is built and initialized first; on failure the old one
    /// stays active. Leaving the old backend's lobby is reported on the next
    /// `update`.
    pub fn switch_transport(&mut self, kind: TransportKind) -> Result<(), NetplayError> {
        if kind == self.transport.kind() {
            return Ok(());
        }
        let mut next = self.builder.build(kind)?;
        next.initialize()?;

        self.transport.shutdown();
        self.backlog.extend(self.transport_events.try_iter());
        self.transport_events = next.events();
        self.transport = next;
        self.local = None;
        info!(transport = %kind, "transport switched");
        Ok(())
    }

    pub fn create_lobby(&mut self, name: &str, password: Option<&str>, max_players: u8) {
        self.transport.create_lobby(name, password, max_players);
    }

    pub fn request_lobby_list(&mut self) {
        self.transport.request_lobby_list();
    }

    pub fn join_lobby(&mut self, lobby: &LobbyDescriptor, password: Option<&str>) {
        self.transport.join_lobby(lobby, password);
    }

    /// Leave the current lobby.
    ///
    /// Lobby state is dropped at once; proxies are despawned on the next
    /// `update`, which also reports the transport's `LobbyLeft`.
    pub fn leave_lobby(&mut self) {
        self.transport.leave_lobby();
        self.detach();
    }

    /// Leave any lobby and release the backend.
    pub fn shutdown(&mut self) {
        self.transport.shutdown();
        self.backlog.extend(self.transport_events.try_iter());
        self.detach();
    }

    /// Pump the backend, apply its events, then run the host tick if due.
    pub fn update<W: ReplicatedWorld + ?Sized>(&mut self, now: Instant, world: &mut W) {
        if std::mem::take(&mut self.despawn_pending) {
            self.replicas.clear(world);
        }

        for event in std::mem::take(&mut self.backlog) {
            self.handle_transport_event(event, now, world);
        }

        self.transport.tick(now);
        while let Ok(event) = self.transport_events.try_recv() {
            self.handle_transport_event(event, now, world);
        }

        if self.state.is_host && self.clock.advance(now) > 0 {
            self.host_tick(now, world);
        }
    }

    /// Send an application envelope.
    ///
    /// `Host` from the host and `All` from anyone also deliver the envelope to
    /// the local subscribers.
    pub fn send(
        &mut self,
        target: Target,
        kind: EnvelopeKind,
        payload: impl Into<Bytes>,
        reliability: Reliability,
    ) -> Result<(), NetplayError> {
        if !self.in_lobby() {
            return Err(NetplayError::NotInLobby);
        }
        let envelope = Envelope::new(target, kind, payload);
        let frame = encode_envelope(&envelope, reliability.is_reliable())?;

        let loopback = match target {
            Target::Host if self.state.is_host => true,
            Target::Host => {
                self.transport.send_to_host(&frame, reliability)?;
                false
            }
            Target::Others => {
                self.transport.send_to_all(&frame, reliability)?;
                false
            }
            Target::All => {
                self.transport.send_to_all(&frame, reliability)?;
                true
            }
        };

        if loopback && let Some(local) = self.local_peer() {
            self.publish(SessionEvent::Envelope {
                from: local.id,
                envelope,
            });
        }
        Ok(())
    }

    fn handle_transport_event<W: ReplicatedWorld + ?Sized>(
        &mut self,
        event: TransportEvent,
        now: Instant,
        world: &mut W,
    ) {
        match event {
            TransportEvent::LobbyCreated(lobby) => {
                let local = self.transport.local_peer();
                self.enter_lobby(lobby.clone(), true, now, world);
                self.roster.reset_from(local.clone());
                self.local = local;
                info!(lobby = %lobby.name, "hosting lobby");
                self.publish(SessionEvent::LobbyCreated(lobby));
            }
            TransportEvent::LobbyJoined {
                lobby,
                members,
                local,
            } => {
                self.enter_lobby(lobby.clone(), false, now, world);
                self.roster.reset_from(members);
                self.local = Some(local);
                info!(lobby = %lobby.name, members = self.roster.len(), "joined lobby");
                self.publish(SessionEvent::LobbyJoined(lobby));
            }
            TransportEvent::LobbyCreateFailed { reason } => {
                self.publish(SessionEvent::LobbyCreateFailed { reason });
            }
            TransportEvent::LobbyJoinFailed { reason } => {
                self.publish(SessionEvent::LobbyJoinFailed { reason });
            }
            TransportEvent::LobbyListUpdated(lobbies) => {
                self.publish(SessionEvent::LobbyListUpdated(lobbies));
            }
            TransportEvent::PlayerJoined(_)
            | TransportEvent::PlayerLeft(_)
            | TransportEvent::PlayerInfoUpdated(_)
            | TransportEvent::PacketReceived { .. }
                if !self.in_lobby() =>
            {
                trace!("lobby event after leaving dropped");
            }
            TransportEvent::PlayerJoined(peer) => {
                if let Err(e) = self.roster.insert(peer.clone()) {
                    debug!(peer = %peer.id, error = ?e, "duplicate join ignored");
                    return;
                }
                self.sync_player_count();
                if self.state.is_host {
                    self.send_full_state_to(&peer.id, world);
                }
                self.publish(SessionEvent::PlayerJoined(peer));
            }
            TransportEvent::PlayerLeft(id) => {
                if let Some(peer) = self.roster.remove(&id) {
                    self.sync_player_count();
                    self.publish(SessionEvent::PlayerLeft(peer));
                }
            }
            TransportEvent::PlayerInfoUpdated(peer) => {
                if self.roster.rename(&peer.id, &peer.name) {
                    self.publish(SessionEvent::PlayerInfoUpdated(peer));
                }
            }
            TransportEvent::AvatarReady(id) => {
                self.publish(SessionEvent::AvatarReady(id));
            }
            TransportEvent::PacketReceived { from, payload } => {
                self.handle_packet(from, &payload, world);
            }
            TransportEvent::LobbyLeft { reason } => {
                info!(%reason, "left lobby");
                self.exit_lobby(world);
                self.publish(SessionEvent::LobbyLeft { reason });
            }
            TransportEvent::Disconnected { reason } => {
                warn!(%reason, "transport disconnected");
                self.exit_lobby(world);
                self.publish(SessionEvent::Disconnected { reason });
            }
        }
    }

    fn handle_packet<W: ReplicatedWorld + ?Sized>(
        &mut self,
        from: PeerId,
        payload: &[u8],
        world: &mut W,
    ) {
        let envelope = match decode_envelope(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!(%from, error = %e, "undecodable packet dropped");
                return;
            }
        };

        if !envelope.kind.is_replication() {
            self.publish(SessionEvent::Envelope { from, envelope });
            return;
        }

        let from_host = self
            .state
            .lobby
            .as_ref()
            .is_some_and(|lobby| lobby.owner == from);
        if self.state.is_host || !from_host {
            debug!(%from, kind = ?envelope.kind, "replication packet from non-host ignored");
            return;
        }

        let outcome = match envelope.kind {
            EnvelopeKind::FullState => decode_body::<FullState>(&envelope)
                .map(|full| self.replicas.apply_full(&full, world)),
            _ => decode_body::<StateUpdate>(&envelope)
                .map(|update| self.replicas.apply_delta(&update, world)),
        };
        match outcome {
            Ok(ApplyOutcome::Applied(report)) => trace!(?report, "snapshot applied"),
            Ok(ApplyOutcome::Stale { tick, last_applied }) => {
                trace!(tick, last_applied, "stale snapshot dropped");
            }
            Err(e) => debug!(%from, error = %e, "malformed snapshot dropped"),
        }
    }

    fn host_tick<W: ReplicatedWorld + ?Sized>(&mut self, now: Instant, world: &mut W) {
        let entities = world.collect_entities();
        let tick = self.host.advance();
        self.state.last_tick = Some(now);

        if self.host.full_sync_due(now) {
            let full = self.host.full_state(entities.clone());
            self.broadcast(&full, Reliability::Reliable);
            self.host.mark_full_sync(now);
            self.state.last_full_sync = Some(now);
            trace!(tick, entities = entities.len(), "full snapshot sent");
        }

        for update in self.host.state_updates(&entities) {
            self.broadcast(&update, Reliability::Unreliable);
        }
    }

    fn broadcast<T: Message>(&mut self, msg: &T, reliability: Reliability) {
        let result = encode_message_frame(Target::Others, msg, reliability.is_reliable())
            .map_err(NetplayError::from)
            .and_then(|frame| self.transport.send_to_all(&frame, reliability));
        if let Err(e) = result {
            warn!(kind = ?T::kind(), error = %e, "snapshot broadcast failed");
        }
    }

    fn send_full_state_to<W: ReplicatedWorld + ?Sized>(&mut self, peer: &PeerId, world: &mut W) {
        let full = self.host.full_state(world.collect_entities());
        let result = encode_message_frame(Target::Others, &full, true)
            .map_err(NetplayError::from)
            .and_then(|frame| {
                self.transport
                    .send_to_player(peer, &frame, Reliability::Reliable)
            });
        match result {
            Ok(()) => debug!(%peer, entities = full.entities.len(), "initial full snapshot sent"),
            Err(e) => warn!(%peer, error = %e, "initial full snapshot failed"),
        }
    }

    fn enter_lobby<W: ReplicatedWorld + ?Sized>(
        &mut self,
        lobby: LobbyDescriptor,
        is_host: bool,
        now: Instant,
        world: &mut W,
    ) {
        self.replicas.clear(world);
        self.despawn_pending = false;
        self.host.reset();
        self.clock.reset(now);
        self.state = SessionState {
            is_host,
            lobby: Some(lobby),
            last_full_sync: None,
            last_tick: None,
        };
    }

    fn exit_lobby<W: ReplicatedWorld + ?Sized>(&mut self, world: &mut W) {
        self.replicas.clear(world);
        self.despawn_pending = false;
        self.roster.clear();
        self.state = SessionState::default();
    }

    fn detach(&mut self) {
        self.despawn_pending |= !self.replicas.is_empty();
        self.roster.clear();
        self.state = SessionState::default();
    }

    fn sync_player_count(&mut self) {
        let count = u8::try_from(self.roster.len()).unwrap_or(u8::MAX);
        if let Some(lobby) = &mut self.state.lobby {
            lobby.current_players = count;
        }
    }

    fn publish(&mut self, event: SessionEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.transport.shutdown();
    }
}
