/// Magic bytes at the beginning of every game-data envelope.
/// Used to quickly reject unrelated or corrupted data.
pub const ENVELOPE_MAGIC: [u8; 2] = *b"RE";

/// Magic bytes at the beginning of every LAN control packet.
pub const CONTROL_MAGIC: [u8; 2] = *b"RC";

/// Wire-format protocol version.
/// Bump this only for breaking changes to the header layout or message formats.
pub const VERSION: u8 = 1;

/// Fixed envelope header length in bytes (wire format).
pub const HEADER_LEN: usize = 10;

/// Control packet prefix length: magic + version.
pub const CONTROL_PREFIX_LEN: usize = 3;

/// Default LAN listening ports, tried in order.
///
/// Several entries allow more than one game instance on the same machine.
pub const DEFAULT_LAN_PORTS: [u16; 4] = [47777, 47778, 47779, 47780];

/// Default maximum number of players in a lobby.
pub const DEFAULT_MAX_PLAYERS: u8 = 4;
