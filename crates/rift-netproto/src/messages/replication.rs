use serde::{Deserialize, Serialize};

use crate::envelope::EnvelopeKind;
use crate::messages::impl_message;

/// Identifier of a replicated entity, assigned by the host's game layer.
pub type EntityId = u32;

/// One replicated entity: id plus opaque position/state blob.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct EntityState {
    pub entity_id: EntityId,
    pub state: Vec<u8>,
}

impl EntityState {
    pub fn new(entity_id: EntityId, state: impl Into<Vec<u8>>) -> Self {
        Self {
            entity_id,
            state: state.into(),
        }
    }
}

/// Update-only entity states (delta). Never creates or destroys proxies.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct StateUpdate {
    /// Host tick stamp, monotonically increasing for the lobby's lifetime.
    pub tick: u64,
    pub entities: Vec<EntityState>,
}

/// Complete authoritative entity set.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FullState {
    pub tick: u64,
    pub entities: Vec<EntityState>,
}

impl_message! {
    StateUpdate => EnvelopeKind::StateUpdate,
    FullState => EnvelopeKind::FullState,
}
