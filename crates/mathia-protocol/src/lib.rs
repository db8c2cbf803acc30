pub mod frames;

pub use frames::{
    ClientCommand, FileKind, MessageView, PresenceEntry, PresenceStatus, ServerFrame,
};

/// WS close codes clients depend on.
pub mod close {
    /// Session missing or expired on upgrade.
    pub const UNAUTHENTICATED: u16 = 4001;
    /// Authenticated but not a member of the room.
    pub const FORBIDDEN: u16 = 4003;
    /// Per-principal quota exhausted.
    pub const RATE_LIMIT: u16 = 4008;
    /// Internal error.
    pub const INTERNAL: u16 = 1011;
}
