//! Connection lifecycle states.

use std::fmt;

/// State of a managed connection.
///
/// The manager owns the transitions; everything else treats this as a
/// read-only published value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No handle exists and no reconnect is scheduled.
    #[default]
    Disconnected,
    /// A handle exists and its connect is in flight.
    Connecting,
    /// The transport reported open; traffic flows.
    Open,
    /// The previous handle died; a reconnect fires once the delay elapses.
    PendingReconnect,
    /// Explicit removal in progress.
    Closing,
}

impl ConnectionState {
    /// Display string published to the host.
    ///
    /// `PendingReconnect` has no live transport, so it reads as
    /// `"Disconnected"` to anything inspecting the link.
    pub fn label(self) -> &'static str {
        match self {
            Self::Disconnected | Self::PendingReconnect => "Disconnected",
            Self::Connecting => "Connecting",
            Self::Open => "Open",
            Self::Closing => "Closing",
        }
    }

    /// Whether the connection is currently open.
    pub fn is_open(self) -> bool {
        matches!(self, Self::Open)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}
