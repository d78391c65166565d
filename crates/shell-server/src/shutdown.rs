//! Shutdown coordination.
//!
//! One [`CancellationToken`] is shared by the HTTP server, every WebSocket
//! session and the supervisor bridge. Cancelling it stops new upgrades,
//! closes open sessions and ends the bridge task.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How long [`ShutdownCoordinator::drain`] waits when no timeout is given.
const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Owner of the process-wide shutdown token.
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Fresh, un-cancelled coordinator.
    pub fn new() -> Self {
        Self::default()
    }

    /// A clone of the token for a task to watch.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Cancel the token.
    pub fn shutdown(&self) {
        if !self.token.is_cancelled() {
            info!("shutdown requested");
        }
        self.token.cancel();
    }

    /// Whether shutdown has begun.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel on ctrl-c, or return once something else cancels the token.
    pub async fn shutdown_on_ctrl_c(&self) {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!(error = %e, "failed to listen for ctrl-c");
                }
                self.shutdown();
            }
            () = self.token.cancelled() => {}
        }
    }

    /// Cancel the token and wait for `handles`, aborting them after `timeout`.
    pub async fn drain(&self, handles: Vec<JoinHandle<()>>, timeout: Option<Duration>) {
        let timeout = timeout.unwrap_or(DEFAULT_DRAIN_TIMEOUT);
        self.shutdown();

        let aborts: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();
        if tokio::time::timeout(timeout, futures::future::join_all(handles))
            .await
            .is_err()
        {
            warn!(
                timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                "tasks still running after drain timeout, aborting"
            );
            for handle in aborts {
                handle.abort();
            }
        }
    }
}
