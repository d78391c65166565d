//! The narrow publishing boundary for external collaborators.

use async_trait::async_trait;
use shell_core::Envelope;

/// Push a state-change envelope to every connected client.
///
/// Bookmark, history, download and similar services call this after
/// mutating their own state. Delivery is best-effort fan-out to the clients
/// open at that moment; nothing is queued for later connections.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Broadcast `envelope`, returning how many clients it was queued for.
    async fn publish(&self, envelope: Envelope) -> usize;
}
