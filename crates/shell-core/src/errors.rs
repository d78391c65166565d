//! Error taxonomy for the control plane.
//!
//! Every variant maps to a stable machine-readable code via
//! [`ShellError::code`]; the hub sends that code to clients inside `ERROR`
//! envelopes and the supervisor attaches it to its out-of-band error events.

use thiserror::Error;

/// Errors produced by the supervisor, registry, hub and client agent.
#[derive(Debug, Error)]
pub enum ShellError {
    /// The engine binary is missing, not executable, or failed before readiness.
    #[error("engine startup failed: {reason}")]
    Startup {
        /// What went wrong.
        reason: String,
    },

    /// The engine produced no readiness signal within the deadline.
    #[error("engine did not signal readiness within {timeout_ms}ms")]
    StartupTimeout {
        /// How long we waited.
        timeout_ms: u64,
    },

    /// A command was issued while the engine was not running.
    #[error("engine process is not running (state: {state})")]
    ProcessNotRunning {
        /// The supervisor state at the time of the call.
        state: String,
    },

    /// The engine exited without being asked to.
    #[error("engine process exited unexpectedly (exit code: {exit_code:?})")]
    ProcessCrash {
        /// Exit code, if the process exited normally rather than by signal.
        exit_code: Option<i32>,
    },

    /// The engine stopped draining its command input.
    #[error("engine is not accepting commands: {reason}")]
    EngineStalled {
        /// Why the command was refused.
        reason: String,
    },

    /// A protocol line or frame could not be decoded.
    #[error("failed to decode protocol message: {reason}")]
    ProtocolDecode {
        /// Parser error message.
        reason: String,
        /// The offending input (possibly truncated).
        line: String,
    },

    /// An operation referenced an unknown tab or connection.
    #[error("{resource} not found: {id}")]
    NotFound {
        /// Kind of resource (`"tab"`, `"connection"`).
        resource: &'static str,
        /// The missing identifier.
        id: String,
    },

    /// Transport-level socket failure.
    #[error("connection error: {0}")]
    Connection(String),

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ShellError {
    /// Machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Startup { .. } => "STARTUP_FAILED",
            Self::StartupTimeout { .. } => "STARTUP_TIMEOUT",
            Self::ProcessNotRunning { .. } => "PROCESS_NOT_RUNNING",
            Self::ProcessCrash { .. } => "PROCESS_CRASHED",
            Self::EngineStalled { .. } => "ENGINE_STALLED",
            Self::ProtocolDecode { .. } => "PROTOCOL_DECODE",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Connection(_) => "CONNECTION_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Shorthand for a missing tab.
    pub fn tab_not_found(id: impl ToString) -> Self {
        Self::NotFound {
            resource: "tab",
            id: id.to_string(),
        }
    }

    /// Whether a client may reasonably retry the operation later.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ProcessNotRunning { .. }
                | Self::EngineStalled { .. }
                | Self::Connection(_)
                | Self::StartupTimeout { .. }
        )
    }
}

/// Result alias for control plane operations.
pub type Result<T> = std::result::Result<T, ShellError>;
