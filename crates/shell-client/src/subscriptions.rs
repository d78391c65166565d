//! Local event subscriptions.

use std::collections::HashMap;
use std::error::Error;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use shell_core::Envelope;
use tracing::{error, warn};

/// Subscribe to this type to receive every envelope.
pub const WILDCARD: &str = "*";

/// What a handler returns. Errors are logged, never propagated.
pub type HandlerResult = Result<(), Box<dyn Error + Send + Sync>>;

type Handler = Arc<dyn Fn(&Envelope) -> HandlerResult + Send + Sync>;

/// Token returned by [`Subscriptions::subscribe`]; pass it back to unsubscribe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Type → handler registry.
pub struct Subscriptions {
    next_id: AtomicU64,
    handlers: RwLock<HashMap<String, Vec<(SubscriptionId, Handler)>>>,
}

impl Subscriptions {
    /// Empty registry.
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Register `handler` for envelopes of type `kind` ([`WILDCARD`] for all).
    pub fn subscribe<F>(&self, kind: &str, handler: F) -> SubscriptionId
    where
        F: Fn(&Envelope) -> HandlerResult + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .write()
            .entry(kind.to_owned())
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Remove a handler. Returns `false` if it was not registered under `kind`.
    pub fn unsubscribe(&self, kind: &str, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write();
        let Some(list) = handlers.get_mut(kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|(sid, _)| *sid != id);
        let removed = list.len() != before;
        if list.is_empty() {
            let _ = handlers.remove(kind);
        }
        removed
    }

    /// Handlers currently registered for `kind`, not counting wildcards.
    pub fn count(&self, kind: &str) -> usize {
        self.handlers.read().get(kind).map_or(0, Vec::len)
    }

    /// Invoke every handler for the envelope's type, then every wildcard one.
    ///
    /// A handler that errors or panics is logged and skipped. Returns how many
    /// handlers completed successfully.
    pub fn dispatch(&self, envelope: &Envelope) -> usize {
        let targets: Vec<(SubscriptionId, Handler)> = {
            let handlers = self.handlers.read();
            handlers
                .get(envelope.kind())
                .into_iter()
                .chain(handlers.get(WILDCARD))
                .flatten()
                .cloned()
                .collect()
        };

        let mut ok = 0;
        for (id, handler) in targets {
            match catch_unwind(AssertUnwindSafe(|| handler(envelope))) {
                Ok(Ok(())) => ok += 1,
                Ok(Err(e)) => {
                    warn!(kind = envelope.kind(), subscription = id.0, error = %e, "subscriber failed");
                }
                Err(_) => {
                    error!(kind = envelope.kind(), subscription = id.0, "subscriber panicked");
                }
            }
        }
        ok
    }
}

impl Default for Subscriptions {
    fn default() -> Self {
        Self::new()
    }
}
