//! The engine command seam.

use async_trait::async_trait;
use shell_core::{Envelope, Result};

/// Something that accepts engine commands.
///
/// Implemented by [`Supervisor`](crate::Supervisor); tests substitute an
/// in-memory recorder.
#[async_trait]
pub trait CommandSink: Send + Sync {
    /// Deliver one command envelope to the engine.
    async fn send_command(&self, envelope: Envelope) -> Result<()>;
}
