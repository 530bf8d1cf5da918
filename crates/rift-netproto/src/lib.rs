//! Wire formats shared by every Rift multiplayer component.
//!
//! Two framing layers travel over the network:
//! - [`control`]: lobby lifecycle packets used only by the LAN transport.
//! - [`envelope`]: routed game-data envelopes (replication and opaque game
//!   payloads). Transports never look inside these.

pub mod codec;
pub mod constants;
pub mod control;
pub mod envelope;
pub mod error;
pub mod limits;
pub mod messages;

pub use envelope::{Envelope, EnvelopeKind, Target};
pub use error::ProtoError;
