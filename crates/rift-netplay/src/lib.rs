//! Rift multiplayer session library.
//!
//! This crate implements the peer-to-peer lobby and state-replication layer
//! of the game. Everything that mutates session state runs on the thread
//! that calls [`SessionManager::update`]; network receive paths only enqueue.
//!
//! # Architecture
//!
//! - [`transport`]: the backend contract plus the LAN and platform backends
//! - [`session`]: lobby membership, host tick, envelope routing
//! - [`replication`]: full/delta snapshot building and client application
//! - [`clock`]: fixed-interval tick scheduling
//! - [`peer`]: peer identities, lobby descriptors, membership roster
//! - [`config`]: session and transport configuration
//! - [`error`]: error types

pub mod clock;
pub mod config;
pub mod error;
pub mod peer;
pub mod replication;
pub mod session;
pub mod transport;

// Re-export commonly used types
pub use config::{LanConfig, SessionConfig};
pub use error::NetplayError;
pub use peer::{LobbyDescriptor, MembershipRoster, PeerId, PeerIdentity};
pub use replication::{ReplicaSet, ReplicatedWorld, ReplicationHost, StalenessPolicy};
pub use rift_netproto::messages::replication::{EntityId, EntityState};
pub use session::{SessionEvent, SessionManager, SessionState};
pub use transport::{
    Reliability, Transport, TransportBuilder, TransportEvent, TransportKind,
};
