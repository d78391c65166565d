//! Agent configuration.

use std::time::Duration;

use shell_settings::ClientSettings;

/// Runtime configuration for a [`SyncAgent`](crate::SyncAgent).
#[derive(Clone, Debug)]
pub struct AgentConfig {
    /// Hub WebSocket URL.
    pub url: String,
    /// Delay before the first reconnect attempt.
    pub reconnect_base: Duration,
    /// Automatic reconnect attempts before giving up.
    pub max_reconnect_attempts: u32,
    /// Queue length that flushes immediately.
    pub batch_size: usize,
    /// Debounce before a partial batch is flushed.
    pub batch_delay: Duration,
    /// Queue bound; the oldest envelope is dropped beyond it.
    pub max_queue: usize,
    /// Interval between client `PING`s while connected.
    pub heartbeat_interval: Duration,
    /// Deadline for the hub's `PONG`.
    pub pong_timeout: Duration,
    /// Deadline for a single connection attempt.
    pub connect_timeout: Duration,
}

impl AgentConfig {
    /// Defaults pointed at `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self::from(&ClientSettings::default())
    }
}

impl From<&ClientSettings> for AgentConfig {
    fn from(settings: &ClientSettings) -> Self {
        let batch_size = settings.batch_size.max(1);
        Self {
            url: settings.url.clone(),
            reconnect_base: Duration::from_millis(settings.reconnect_base_ms),
            max_reconnect_attempts: settings.max_reconnect_attempts,
            batch_size,
            batch_delay: Duration::from_millis(settings.batch_delay_ms),
            max_queue: settings.max_queue.max(batch_size),
            heartbeat_interval: Duration::from_millis(settings.heartbeat_interval_ms),
            pong_timeout: Duration::from_millis(settings.pong_timeout_ms),
            connect_timeout: Duration::from_millis(settings.connect_timeout_ms),
        }
    }
}
