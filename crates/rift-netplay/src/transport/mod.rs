//! Transport contract shared by every networking backend.
//!
//! A backend owns lobby membership at the network level and moves opaque
//! byte payloads between peers. It never interprets game data. All backend
//! activity is reported as [`TransportEvent`]s on a channel; events produced
//! off the main thread (socket readers, vendor callbacks) are queued and only
//! surface when the caller drains the channel after [`Transport::tick`].

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use crossbeam_channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tracing::warn;

use crate::config::SessionConfig;
use crate::error::NetplayError;
use crate::peer::{LobbyDescriptor, PeerId, PeerIdentity};

pub mod lan;
pub mod platform;

pub use lan::LanTransport;
pub use platform::{PlatformService, PlatformTransport};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Lan,
    Platform,
}

/// Delivery class requested for a send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reliability {
    /// Delivered in order, retransmitted by the backend where it can.
    Reliable,
    /// May be dropped, duplicated or reordered.
    Unreliable,
}

impl Reliability {
    pub fn is_reliable(self) -> bool {
        matches!(self, Reliability::Reliable)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportCapabilities {
    /// `Reliable` sends are actually retransmitted and ordered by the backend.
    pub native_reliable: bool,
    /// Lobbies can be listed without knowing the host's address.
    pub lobby_browser: bool,
}

/// Normalized backend notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    LobbyCreated(LobbyDescriptor),
    LobbyCreateFailed {
        reason: String,
    },
    /// The local peer entered a lobby as a client.
    LobbyJoined {
        lobby: LobbyDescriptor,
        /// Full roster, host first, including the local peer.
        members: Vec<PeerIdentity>,
        local: PeerIdentity,
    },
    LobbyJoinFailed {
        reason: String,
    },
    /// The complete set of lobbies currently known, replacing any previous list.
    LobbyListUpdated(Vec<LobbyDescriptor>),
    PlayerJoined(PeerIdentity),
    PlayerLeft(PeerId),
    PacketReceived {
        from: PeerId,
        payload: Bytes,
    },
    LobbyLeft {
        reason: String,
    },
    Disconnected {
        reason: String,
    },
    AvatarReady(PeerId),
    PlayerInfoUpdated(PeerIdentity),
}

/// A lobby and messaging backend.
///
/// Lobby operations complete asynchronously: each call results in exactly
/// one success or failure event. Sends are fire-and-forget; the returned
/// error only reports misuse (no lobby, unknown peer, oversize payload) or a
/// local socket failure.
pub trait Transport: Send {
    fn kind(&self) -> TransportKind;

    /// Acquire local resources. Must be called before any other operation.
    fn initialize(&mut self) -> Result<(), NetplayError>;

    /// Leave any lobby and release resources. Safe to call repeatedly.
    fn shutdown(&mut self);

    /// Process queued network input and timers.
    fn tick(&mut self, now: Instant);

    fn create_lobby(&mut self, name: &str, password: Option<&str>, max_players: u8);

    fn request_lobby_list(&mut self);

    fn join_lobby(&mut self, lobby: &LobbyDescriptor, password: Option<&str>);

    fn leave_lobby(&mut self);

    fn send_to_host(&mut self, payload: &[u8], reliability: Reliability)
    -> Result<(), NetplayError>;

    /// Send to every lobby member except the local peer.
    fn send_to_all(&mut self, payload: &[u8], reliability: Reliability)
    -> Result<(), NetplayError>;

    fn send_to_player(
        &mut self,
        peer: &PeerId,
        payload: &[u8],
        reliability: Reliability,
    ) -> Result<(), NetplayError>;

    /// Local identity, once known.
    fn local_peer(&self) -> Option<PeerIdentity>;

    fn capabilities(&self) -> TransportCapabilities;

    /// Event stream. Every call returns a handle to the same queue.
    fn events(&self) -> Receiver<TransportEvent>;
}

/// Producer side of a transport's event queue.
#[derive(Debug, Clone)]
pub(crate) struct EventSink {
    tx: Sender<TransportEvent>,
    rx: Receiver<TransportEvent>,
}

impl EventSink {
    pub(crate) fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self { tx, rx }
    }

    pub(crate) fn emit(&self, event: TransportEvent) {
        if self.tx.send(event).is_err() {
            warn!("transport event dropped: queue closed");
        }
    }

    #[cfg(test)]
    pub(crate) fn sender(&self) -> Sender<TransportEvent> {
        self.tx.clone()
    }

    pub(crate) fn receiver(&self) -> Receiver<TransportEvent> {
        self.rx.clone()
    }
}

/// Constructs backends by kind.
#[derive(Clone)]
pub struct TransportBuilder {
    config: SessionConfig,
    platform: Option<Arc<dyn PlatformService>>,
}

impl TransportBuilder {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            platform: None,
        }
    }

    /// Make the platform backend available through `service`.
    pub fn with_platform(mut self, service: Arc<dyn PlatformService>) -> Self {
        self.platform = Some(service);
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Build an uninitialized backend of the given kind.
    pub fn build(&self, kind: TransportKind) -> Result<Box<dyn Transport>, NetplayError> {
        match kind {
            TransportKind::Lan => Ok(Box::new(LanTransport::new(
                self.config.lan.clone(),
                self.config.player_name.clone(),
            ))),
            TransportKind::Platform => {
                let service = self
                    .platform
                    .clone()
                    .ok_or(NetplayError::BackendUnavailable("platform"))?;
                Ok(Box::new(PlatformTransport::new(service)))
            }
        }
    }
}
