//! Events emitted by a session for the UI layer to consume.

use crate::store::ChatRecord;

/// Connection lifecycle as seen by the user.
///
/// Only the session's transport and reconnection callbacks change it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed(String),
}

impl ConnectionState {
    /// Human-readable status line.
    pub fn status_text(&self) -> String {
        match self {
            ConnectionState::Disconnected => "Disconnected".to_string(),
            ConnectionState::Connecting => "Connecting…".to_string(),
            ConnectionState::Connected => "Connected".to_string(),
            ConnectionState::Reconnecting => "Reconnecting…".to_string(),
            ConnectionState::Failed(detail) => format!("Error: {detail}"),
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.status_text())
    }
}

/// Events that the SDK emits to the consumer (CLI, GUI, bot, etc.)
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Connection status changed.
    StatusChanged { state: ConnectionState },

    /// A chat message for the open conversation (or a broadcast).
    /// Already persisted by the time this is emitted.
    Message { record: ChatRecord },

    /// A peer started or stopped typing.
    Typing { peer: String, is_typing: bool },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_strings() {
        assert_eq!(ConnectionState::Connecting.status_text(), "Connecting…");
        assert_eq!(ConnectionState::Connected.status_text(), "Connected");
        assert_eq!(ConnectionState::Reconnecting.status_text(), "Reconnecting…");
        assert_eq!(ConnectionState::Disconnected.status_text(), "Disconnected");
        assert_eq!(
            ConnectionState::Failed("Connection refused".into()).to_string(),
            "Error: Connection refused"
        );
    }
}
