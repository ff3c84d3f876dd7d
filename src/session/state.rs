//! Connection state owned by the session manager.

use std::fmt;

/// Lifecycle state of the underlying transport session.
///
/// Only [`SessionManager`](super::SessionManager) writes this value; every
/// other component observes it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl SessionState {
    #[must_use]
    pub fn is_connected(self) -> bool { matches!(self, Self::Connected) }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        })
    }
}
