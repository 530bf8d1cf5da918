//! Callback-style interface to a platform lobby/P2P service.
//!
//! Mirrors the shape of typical vendor SDKs: lobby requests complete through
//! one-shot callbacks, membership changes and packets arrive as notifications,
//! and nothing is delivered until [`PlatformService::run_callbacks`] pumps the
//! queue. Callbacks may run on any thread.

use std::collections::BTreeMap;

pub type VendorUserId = u64;
pub type VendorLobbyId = u64;

/// Lobby as reported by the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VendorLobby {
    pub id: VendorLobbyId,
    pub owner: VendorUserId,
    pub member_limit: u32,
    pub members: Vec<(VendorUserId, String)>,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceNotification {
    MemberJoined {
        lobby: VendorLobbyId,
        user: VendorUserId,
        name: String,
    },
    MemberLeft {
        lobby: VendorLobbyId,
        user: VendorUserId,
    },
    LobbyDeleted {
        lobby: VendorLobbyId,
    },
    PersonaChanged {
        user: VendorUserId,
        name: String,
    },
    AvatarLoaded {
        user: VendorUserId,
    },
    Packet {
        from: VendorUserId,
        data: Vec<u8>,
    },
    ConnectionLost {
        reason: String,
    },
}

/// One-shot completion callback.
pub type Completion<T> = Box<dyn FnOnce(Result<T, String>) + Send>;

pub type NotificationSink = Box<dyn Fn(ServiceNotification) + Send + Sync>;

pub trait PlatformService: Send + Sync {
    /// Logged-in user. Fails when the service is not running.
    fn local_user(&self) -> Result<(VendorUserId, String), String>;

    /// Install (or remove) the receiver for notifications.
    fn set_notification_sink(&self, sink: Option<NotificationSink>);

    fn create_lobby(
        &self,
        member_limit: u32,
        metadata: BTreeMap<String, String>,
        done: Completion<VendorLobbyId>,
    );

    fn request_lobby_list(&self, done: Completion<Vec<VendorLobby>>);

    fn join_lobby(&self, lobby: VendorLobbyId, done: Completion<VendorLobby>);

    fn leave_lobby(&self, lobby: VendorLobbyId);

    fn send_packet(&self, to: VendorUserId, data: &[u8], reliable: bool) -> Result<(), String>;

    /// Deliver queued completions and notifications.
    fn run_callbacks(&self);
}
