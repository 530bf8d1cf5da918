//! Netplay error types.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum NetplayError {
    #[error("transport not initialized")]
    NotInitialized,

    #[error("no usable local endpoint: {0}")]
    BindFailed(String),

    #[error("platform service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("transport backend not available: {0}")]
    BackendUnavailable(&'static str),

    #[error("not in a lobby")]
    NotInLobby,

    #[error("unknown peer: {0}")]
    UnknownPeer(String),

    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("protocol error: {0}")]
    Protocol(#[from] rift_netproto::error::ProtoError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
