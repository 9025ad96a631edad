//! Connection endpoint and client tunables.

use std::time::Duration;

use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};

/// Reserved receiver meaning "everyone". Messages addressed here are shown
/// whichever conversation is open.
pub const BROADCAST_IDENTITY: &str = "Family Group";

/// Characters escaped when the identity is placed in a URL path segment.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Where to connect and as whom.
///
/// Replaced wholesale when the server settings change; the transport copies
/// it at connect time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionEndpoint {
    pub host: String,
    pub port: u16,
    /// Current user name.
    pub identity: String,
}

impl ConnectionEndpoint {
    pub fn new(host: impl Into<String>, port: u16, identity: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            identity: identity.into(),
        }
    }

    /// `ws://{host}:{port}/ws/{identity}`
    pub fn ws_url(&self) -> String {
        format!(
            "ws://{}:{}/ws/{}",
            self.host,
            self.port,
            utf8_percent_encode(&self.identity, PATH_SEGMENT)
        )
    }

    /// Base URL of the HTTP API, with trailing slash.
    pub fn http_base(&self) -> String {
        format!("http://{}:{}/", self.host, self.port)
    }
}

/// Session tunables. Construct once and hand to [`crate::session::start`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Delay between reconnection attempts.
    pub reconnect_interval: Duration,
    /// How long a peer stays "typing" after its last signal.
    pub typing_expiry: Duration,
    /// Minimum gap between outbound typing signals (all peers combined).
    pub typing_throttle: Duration,
    /// Give up on a WebSocket handshake after this long.
    pub connect_timeout: Duration,
    /// Keep-alive ping period on a live connection.
    pub ping_interval: Duration,
    pub broadcast_identity: String,
    /// Capacity of the consumer event channel.
    pub event_buffer: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            reconnect_interval: Duration::from_secs(5),
            typing_expiry: Duration::from_secs(3),
            typing_throttle: Duration::from_secs(2),
            connect_timeout: Duration::from_secs(30),
            ping_interval: Duration::from_secs(30),
            broadcast_identity: BROADCAST_IDENTITY.to_string(),
            event_buffer: 4096,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ws_url_uses_identity_path() {
        let ep = ConnectionEndpoint::new("192.168.31.104", 8000, "bob");
        assert_eq!(ep.ws_url(), "ws://192.168.31.104:8000/ws/bob");
    }

    #[test]
    fn ws_url_escapes_identity() {
        let ep = ConnectionEndpoint::new("10.0.0.2", 9000, "mary ann/2");
        assert_eq!(ep.ws_url(), "ws://10.0.0.2:9000/ws/mary%20ann%2F2");
    }

    #[test]
    fn http_base_has_trailing_slash() {
        let ep = ConnectionEndpoint::new("10.0.0.2", 9000, "bob");
        assert_eq!(ep.http_base(), "http://10.0.0.2:9000/");
    }

    #[test]
    fn defaults_match_lan_policy() {
        let cfg = ClientConfig::default();
        assert_eq!(cfg.reconnect_interval, Duration::from_secs(5));
        assert_eq!(cfg.typing_expiry, Duration::from_secs(3));
        assert_eq!(cfg.typing_throttle, Duration::from_secs(2));
        assert_eq!(cfg.broadcast_identity, "Family Group");
    }
}
