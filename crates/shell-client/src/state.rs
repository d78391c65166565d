//! Connection state machine.

use std::fmt;

use serde::Serialize;

/// Where the agent is in its connection lifecycle.
///
/// `Disconnected → Connecting → Connected → Disconnected → Reconnecting →
/// Connecting …`; a lost transport or failed attempt always reports
/// `Disconnected` before the retry is scheduled. `Disconnected` is also where
/// the agent rests after `disconnect()` or once reconnect attempts are
/// exhausted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionState {
    /// No transport and no retry scheduled.
    #[default]
    Disconnected,
    /// A connection attempt is in flight.
    Connecting,
    /// The transport is open.
    Connected,
    /// Waiting for the next scheduled attempt.
    Reconnecting,
}

impl ConnectionState {
    /// Lowercase label for UI display and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        }
    }

    /// Whether `connect()` should be a no-op.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Connecting | Self::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
