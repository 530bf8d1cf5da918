//! In-process [`PlatformService`] backed by a shared directory.
//!
//! A [`LoopbackCloud`] plays the role of the vendor backend; each
//! [`LoopbackPlatform`] handle is one logged-in user. Completions and
//! notifications are queued per user and delivered by `run_callbacks`, the
//! way a vendor SDK pumps its callback queue.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use super::service::{
    Completion, NotificationSink, PlatformService, ServiceNotification, VendorLobby,
    VendorLobbyId, VendorUserId,
};

type Deferred = Box<dyn FnOnce() + Send>;

enum Pending {
    Completion(Deferred),
    Notification(ServiceNotification),
}

struct UserSlot {
    name: String,
    online: bool,
    sink: Option<Arc<NotificationSink>>,
    pending: VecDeque<Pending>,
}

struct CloudLobby {
    owner: VendorUserId,
    member_limit: u32,
    members: Vec<VendorUserId>,
    metadata: BTreeMap<String, String>,
}

#[derive(Default)]
struct CloudState {
    next_lobby: VendorLobbyId,
    users: HashMap<VendorUserId, UserSlot>,
    lobbies: BTreeMap<VendorLobbyId, CloudLobby>,
}

impl CloudState {
    fn push(&mut self, user: VendorUserId, pending: Pending) {
        if let Some(slot) = self.users.get_mut(&user)
            && slot.online
        {
            slot.pending.push_back(pending);
        }
    }

    fn notify_members(
        &mut self,
        lobby: VendorLobbyId,
        except: VendorUserId,
        notification: ServiceNotification,
    ) {
        let members = match self.lobbies.get(&lobby) {
            Some(l) => l.members.clone(),
            None => return,
        };
        for member in members.into_iter().filter(|m| *m != except) {
            self.push(member, Pending::Notification(notification.clone()));
        }
    }

    fn snapshot(&self, id: VendorLobbyId) -> Option<VendorLobby> {
        let lobby = self.lobbies.get(&id)?;
        Some(VendorLobby {
            id,
            owner: lobby.owner,
            member_limit: lobby.member_limit,
            members: lobby
                .members
                .iter()
                .map(|m| (*m, self.name_of(*m)))
                .collect(),
            metadata: lobby.metadata.clone(),
        })
    }

    fn name_of(&self, user: VendorUserId) -> String {
        self.users
            .get(&user)
            .map(|slot| slot.name.clone())
            .unwrap_or_default()
    }

    /// Remove `user` from `lobby`. An owner leaving deletes the lobby.
    fn remove_member(&mut self, lobby: VendorLobbyId, user: VendorUserId) {
        let Some(entry) = self.lobbies.get_mut(&lobby) else {
            return;
        };
        entry.members.retain(|m| *m != user);
        if entry.owner == user {
            self.notify_members(lobby, user, ServiceNotification::LobbyDeleted { lobby });
            self.lobbies.remove(&lobby);
        } else {
            self.notify_members(lobby, user, ServiceNotification::MemberLeft { lobby, user });
        }
    }
}

/// Shared in-process lobby directory.
#[derive(Clone, Default)]
pub struct LoopbackCloud {
    state: Arc<Mutex<CloudState>>,
}

impl LoopbackCloud {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log `user` in and return their service handle.
    pub fn connect(&self, user: VendorUserId, name: impl Into<String>) -> LoopbackPlatform {
        self.state.lock().users.insert(
            user,
            UserSlot {
                name: name.into(),
                online: true,
                sink: None,
                pending: VecDeque::new(),
            },
        );
        LoopbackPlatform {
            cloud: self.clone(),
            user,
        }
    }

    /// Simulate `user` losing their connection to the service.
    pub fn disconnect(&self, user: VendorUserId, reason: &str) {
        let mut state = self.state.lock();
        let joined: Vec<VendorLobbyId> = state
            .lobbies
            .iter()
            .filter(|(_, l)| l.members.contains(&user))
            .map(|(id, _)| *id)
            .collect();
        for lobby in joined {
            state.remove_member(lobby, user);
        }
        if let Some(slot) = state.users.get_mut(&user) {
            slot.pending.clear();
            slot.pending
                .push_back(Pending::Notification(ServiceNotification::ConnectionLost {
                    reason: reason.to_string(),
                }));
            slot.online = false;
        }
    }

    /// Change a user's display name and tell everyone sharing a lobby.
    pub fn rename(&self, user: VendorUserId, name: &str) {
        let mut state = self.state.lock();
        if let Some(slot) = state.users.get_mut(&user) {
            slot.name = name.to_string();
        }
        let peers: Vec<VendorUserId> = state
            .lobbies
            .values()
            .filter(|l| l.members.contains(&user))
            .flat_map(|l| l.members.iter().copied())
            .collect();
        for peer in peers {
            state.push(
                peer,
                Pending::Notification(ServiceNotification::PersonaChanged {
                    user,
                    name: name.to_string(),
                }),
            );
        }
    }

    /// Announce that `user`'s avatar finished loading to `observer`.
    pub fn avatar_loaded(&self, observer: VendorUserId, user: VendorUserId) {
        self.state.lock().push(
            observer,
            Pending::Notification(ServiceNotification::AvatarLoaded { user }),
        );
    }

    pub fn lobby_count(&self) -> usize {
        self.state.lock().lobbies.len()
    }
}

/// One user's handle on a [`LoopbackCloud`].
pub struct LoopbackPlatform {
    cloud: LoopbackCloud,
    user: VendorUserId,
}

impl LoopbackPlatform {
    pub fn user_id(&self) -> VendorUserId {
        self.user
    }

    fn complete<T: Send + 'static>(&self, done: Completion<T>, result: Result<T, String>) {
        self.cloud
            .state
            .lock()
            .push(self.user, Pending::Completion(Box::new(move || done(result))));
    }
}

impl PlatformService for LoopbackPlatform {
    fn local_user(&self) -> Result<(VendorUserId, String), String> {
        let state = self.cloud.state.lock();
        match state.users.get(&self.user) {
            Some(slot) if slot.online => Ok((self.user, slot.name.clone())),
            _ => Err("platform service not running".to_string()),
        }
    }

    fn set_notification_sink(&self, sink: Option<NotificationSink>) {
        if let Some(slot) = self.cloud.state.lock().users.get_mut(&self.user) {
            slot.sink = sink.map(Arc::new);
        }
    }

    fn create_lobby(
        &self,
        member_limit: u32,
        metadata: BTreeMap<String, String>,
        done: Completion<VendorLobbyId>,
    ) {
        let result = {
            let mut state = self.cloud.state.lock();
            if member_limit == 0 {
                Err("member limit must be positive".to_string())
            } else {
                state.next_lobby += 1;
                let id = state.next_lobby;
                state.lobbies.insert(
                    id,
                    CloudLobby {
                        owner: self.user,
                        member_limit,
                        members: vec![self.user],
                        metadata,
                    },
                );
                Ok(id)
            }
        };
        self.complete(done, result);
    }

    fn request_lobby_list(&self, done: Completion<Vec<VendorLobby>>) {
        let lobbies = {
            let state = self.cloud.state.lock();
            state
                .lobbies
                .keys()
                .filter_map(|id| state.snapshot(*id))
                .collect()
        };
        self.complete(done, Ok(lobbies));
    }

    fn join_lobby(&self, lobby: VendorLobbyId, done: Completion<VendorLobby>) {
        let result = {
            let mut state = self.cloud.state.lock();
            let name = state.name_of(self.user);
            match state.lobbies.get_mut(&lobby) {
                None => Err("lobby does not exist".to_string()),
                Some(entry) if entry.members.contains(&self.user) => {
                    Err("already a member".to_string())
                }
                Some(entry) if entry.members.len() >= entry.member_limit as usize => {
                    Err("lobby is full".to_string())
                }
                Some(entry) => {
                    entry.members.push(self.user);
                    state.notify_members(
                        lobby,
                        self.user,
                        ServiceNotification::MemberJoined {
                            lobby,
                            user: self.user,
                            name,
                        },
                    );
                    state
                        .snapshot(lobby)
                        .ok_or_else(|| "lobby does not exist".to_string())
                }
            }
        };
        self.complete(done, result);
    }

    fn leave_lobby(&self, lobby: VendorLobbyId) {
        self.cloud.state.lock().remove_member(lobby, self.user);
    }

    fn send_packet(&self, to: VendorUserId, data: &[u8], _reliable: bool) -> Result<(), String> {
        let mut state = self.cloud.state.lock();
        match state.users.get(&to) {
            Some(slot) if slot.online => {
                trace!(from = self.user, to, len = data.len(), "loopback packet");
                state.push(
                    to,
                    Pending::Notification(ServiceNotification::Packet {
                        from: self.user,
                        data: data.to_vec(),
                    }),
                );
                Ok(())
            }
            _ => Err(format!("user {to} is not reachable")),
        }
    }

    fn run_callbacks(&self) {
        // Drain under the lock, deliver outside it so callbacks can call back in.
        let (pending, sink) = {
            let mut state = self.cloud.state.lock();
            match state.users.get_mut(&self.user) {
                Some(slot) => (std::mem::take(&mut slot.pending), slot.sink.clone()),
                None => return,
            }
        };
        for item in pending {
            match item {
                Pending::Completion(run) => run(),
                Pending::Notification(notification) => {
                    if let Some(sink) = &sink {
                        (sink.as_ref())(notification);
                    }
                }
            }
        }
    }
}
