use serde::de::DeserializeOwned;

use crate::{control::ControlKind, envelope::EnvelopeKind};

pub mod lobby;
pub mod replication;

/// A typed body carried inside a game-data [`Envelope`](crate::Envelope).
///
/// Implemented through `impl_message!`; the kind is fixed per type so the
/// envelope header can be built automatically during encoding.
pub trait Message: serde::Serialize + DeserializeOwned + Send + 'static {
    /// Returns the envelope kind for this message type.
    fn kind() -> EnvelopeKind;
}

/// A typed body carried inside a LAN control packet.
pub trait ControlMessage: serde::Serialize + DeserializeOwned + Send + 'static {
    /// Returns the control packet type for this message type.
    fn control_kind() -> ControlKind;
}

macro_rules! impl_message {
    ($($ty:ty => $kind:expr),* $(,)?) => {
        $(
            impl $crate::messages::Message for $ty {
                fn kind() -> $crate::envelope::EnvelopeKind {
                    $kind
                }
            }
        )*
    };
}

macro_rules! impl_control_message {
    ($($ty:ty => $kind:expr),* $(,)?) => {
        $(
            impl $crate::messages::ControlMessage for $ty {
                fn control_kind() -> $crate::control::ControlKind {
                    $kind
                }
            }
        )*
    };
}

pub(crate) use impl_control_message;
pub(crate) use impl_message;
