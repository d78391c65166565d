//! Server configuration.

use std::time::Duration;

use shell_settings::ServerSettings;

/// Runtime configuration for the hub.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind.
    pub host: String,
    /// Port to bind (`0` for auto-assign).
    pub port: u16,
    /// Maximum concurrent WebSocket connections; further upgrades get 503.
    pub max_connections: usize,
    /// Interval between keepalive `PING` envelopes.
    pub heartbeat_interval: Duration,
    /// Deadline for the matching `PONG`.
    pub pong_timeout: Duration,
    /// Per-connection outbound queue capacity.
    pub send_queue_capacity: usize,
    /// Max inbound WebSocket message size in bytes.
    pub max_message_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 0,
            ..Self::from(&ServerSettings::default())
        }
    }
}

impl From<&ServerSettings> for ServerConfig {
    fn from(settings: &ServerSettings) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
            max_connections: settings.max_connections,
            heartbeat_interval: Duration::from_millis(settings.heartbeat_interval_ms),
            pong_timeout: Duration::from_millis(settings.pong_timeout_ms),
            send_queue_capacity: settings.send_queue_capacity.max(1),
            max_message_size: settings.max_message_size,
        }
    }
}
