//! Application-level keepalive.
//!
//! Every `interval` the hub sends a `PING` envelope and clears the
//! connection's alive flag. If no `PONG` sets it again within
//! `pong_timeout`, the connection is considered dead.

use std::sync::Arc;
use std::time::Duration;

use shell_core::protocol::events;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::connection::ClientConnection;

/// Outcome of the heartbeat loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// No `PONG` within the deadline.
    TimedOut,
    /// The `PING` could not be queued because the connection is closed.
    Closed,
    /// The heartbeat was cancelled externally.
    Cancelled,
}

/// Run keepalive pings for a connection until it times out or is cancelled.
pub async fn run_heartbeat(
    connection: Arc<ClientConnection>,
    interval: Duration,
    pong_timeout: Duration,
    cancel: CancellationToken,
) -> HeartbeatResult {
    let mut ticker = time::interval_at(time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            () = cancel.cancelled() => return HeartbeatResult::Cancelled,
        }

        connection.clear_alive();
        if !connection.send_envelope(&events::ping()) {
            return HeartbeatResult::Closed;
        }

        tokio::select! {
            () = time::sleep(pong_timeout) => {}
            () = cancel.cancelled() => return HeartbeatResult::Cancelled,
        }

        if !connection.is_alive() {
            return HeartbeatResult::TimedOut;
        }
    }
}
