//! Settings sections.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use shell_core::logging::LogFormat;

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ShellSettings {
    /// Engine process supervision.
    pub engine: EngineSettings,
    /// Broadcast hub / HTTP server.
    pub server: ServerSettings,
    /// Client sync agent.
    pub client: ClientSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl ShellSettings {
    /// Reject values that would make the runtime misbehave.
    pub fn validate(&self) -> Result<()> {
        if self.engine.startup_timeout_ms == 0 {
            return Err(invalid("engine.startupTimeoutMs must be greater than 0"));
        }
        if self.engine.write_timeout_ms == 0 {
            return Err(invalid("engine.writeTimeoutMs must be greater than 0"));
        }
        if self.server.pong_timeout_ms >= self.server.heartbeat_interval_ms {
            return Err(invalid(
                "server.pongTimeoutMs must be shorter than server.heartbeatIntervalMs",
            ));
        }
        if self.server.send_queue_capacity == 0 {
            return Err(invalid("server.sendQueueCapacity must be at least 1"));
        }
        if self.client.batch_size == 0 {
            return Err(invalid("client.batchSize must be at least 1"));
        }
        if self.client.max_queue < self.client.batch_size {
            return Err(invalid("client.maxQueue must be at least client.batchSize"));
        }
        if self.client.pong_timeout_ms >= self.client.heartbeat_interval_ms {
            return Err(invalid(
                "client.pongTimeoutMs must be shorter than client.heartbeatIntervalMs",
            ));
        }
        Ok(())
    }
}

fn invalid(msg: &str) -> SettingsError {
    SettingsError::InvalidValue(msg.to_owned())
}

/// Engine binary location and lifecycle timing.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineSettings {
    /// Explicit path to the engine binary. Overrides the versioned layout.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binary_path: Option<String>,
    /// Root of versioned engine installs (`<installDir>/<version>/<binaryName>`).
    pub install_dir: String,
    /// Engine version to run.
    pub version: String,
    /// Executable name inside the version directory.
    pub binary_name: String,
    /// Working directory for the engine process.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub work_dir: Option<String>,
    /// Extra command-line arguments passed to the engine.
    pub args: Vec<String>,
    /// Readiness deadline in milliseconds.
    pub startup_timeout_ms: u64,
    /// How long `stop()` waits after closing stdin before killing the process.
    pub stop_grace_ms: u64,
    /// Capacity of the stdin writer queue.
    pub command_queue: usize,
    /// How long a command may wait for the engine to accept it.
    pub write_timeout_ms: u64,
}

impl EngineSettings {
    /// Resolve the engine binary path.
    pub fn resolved_binary_path(&self) -> PathBuf {
        match &self.binary_path {
            Some(path) => expand_home(path),
            None => expand_home(&self.install_dir)
                .join(&self.version)
                .join(&self.binary_name),
        }
    }

    /// Resolve the engine's working directory.
    pub fn resolved_work_dir(&self) -> PathBuf {
        match &self.work_dir {
            Some(dir) => expand_home(dir),
            None => crate::loader::settings_dir().join("engine-data"),
        }
    }

    /// Readiness deadline.
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    /// Grace period before a forced kill.
    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    /// Deadline for a single stdin write.
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            binary_path: None,
            install_dir: "~/.browser-shell/engine".to_string(),
            version: "1.0.0".to_string(),
            binary_name: "shell-engine".to_string(),
            work_dir: None,
            args: Vec::new(),
            startup_timeout_ms: 10_000,
            stop_grace_ms: 2_000,
            command_queue: 256,
            write_timeout_ms: 5_000,
        }
    }
}

/// Hub network and keepalive settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (`0` for auto-assign).
    pub port: u16,
    /// Interval between server `PING` envelopes, in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// How long a client has to answer a `PING`, in milliseconds.
    pub pong_timeout_ms: u64,
    /// Maximum concurrent WebSocket clients.
    pub max_connections: usize,
    /// Per-connection outbound queue; a full queue disconnects the client.
    pub send_queue_capacity: usize,
    /// Maximum inbound WebSocket message size in bytes.
    pub max_message_size: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9340,
            heartbeat_interval_ms: 30_000,
            pong_timeout_ms: 5_000,
            max_connections: 64,
            send_queue_capacity: 256,
            max_message_size: 16 * 1024 * 1024,
        }
    }
}

/// Client sync agent behaviour.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientSettings {
    /// Hub WebSocket URL.
    pub url: String,
    /// First reconnect delay; doubles on every further attempt.
    pub reconnect_base_ms: u64,
    /// Automatic reconnect attempts before giving up.
    pub max_reconnect_attempts: u32,
    /// Queue length that triggers an immediate flush.
    pub batch_size: usize,
    /// Debounce delay before a partial batch is flushed.
    pub batch_delay_ms: u64,
    /// Upper bound on queued outbound envelopes while offline.
    pub max_queue: usize,
    /// Interval between client `PING` envelopes.
    pub heartbeat_interval_ms: u64,
    /// How long the hub has to answer a `PING`.
    pub pong_timeout_ms: u64,
    /// Deadline for a single connection attempt.
    pub connect_timeout_ms: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:9340/ws".to_string(),
            reconnect_base_ms: 1_000,
            max_reconnect_attempts: 5,
            batch_size: 10,
            batch_delay_ms: 16,
            max_queue: 1_000,
            heartbeat_interval_ms: 30_000,
            pong_timeout_ms: 5_000,
            connect_timeout_ms: 10_000,
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter level when `RUST_LOG` is unset.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}

/// Expand a leading `~/` to `$HOME`.
pub fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => crate::loader::home_dir().join(rest),
        None => PathBuf::from(path),
    }
}
