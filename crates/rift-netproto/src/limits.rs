//! Unified message size limits for the Rift protocol.

use crate::constants::HEADER_LEN;

/// Maximum datagram size for unreliable sends (1200 bytes).
///
/// Kept below typical path MTU to reduce fragmentation risk.
pub const MAX_DATAGRAM: usize = 1200;

/// Maximum envelope payload for unreliable sends.
pub const MAX_UNRELIABLE_PAYLOAD: usize = MAX_DATAGRAM - HEADER_LEN;

/// Maximum envelope payload for reliable sends (60 KB, below the UDP datagram ceiling).
///
/// Full snapshots may exceed one datagram; transports with native reliable
/// delivery fragment internally.
pub const MAX_RELIABLE_PAYLOAD: usize = 60 * 1024;

/// Receive buffer size large enough for any frame this protocol emits.
pub const RX_BUFFER_SIZE: usize = HEADER_LEN + MAX_RELIABLE_PAYLOAD;

/// Returns the maximum payload size allowed for the given delivery class.
#[inline]
pub const fn max_payload_for(reliable: bool) -> usize {
    if reliable {
        MAX_RELIABLE_PAYLOAD
    } else {
        MAX_UNRELIABLE_PAYLOAD
    }
}
