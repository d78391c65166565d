//! WebSocket client connection state.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use shell_core::{ConnectionId, Envelope, codec};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::warn;

/// A connected WebSocket client.
///
/// Outbound frames go through a bounded queue drained by the session's
/// writer task. A full queue means the client cannot keep up; the connection
/// is terminated rather than letting the broadcaster wait on it.
pub struct ClientConnection {
    /// Unique connection ID.
    pub id: ConnectionId,
    tx: mpsc::Sender<Arc<str>>,
    /// When this connection was established.
    pub connected_at: Instant,
    is_alive: AtomicBool,
    last_pong: Mutex<Instant>,
    open: AtomicBool,
    closed: CancellationToken,
    dropped_messages: AtomicU64,
}

impl ClientConnection {
    /// Create an open connection feeding `tx`.
    pub fn new(id: ConnectionId, tx: mpsc::Sender<Arc<str>>) -> Self {
        let now = Instant::now();
        Self {
            id,
            tx,
            connected_at: now,
            is_alive: AtomicBool::new(true),
            last_pong: Mutex::new(now),
            open: AtomicBool::new(true),
            closed: CancellationToken::new(),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Queue an encoded frame.
    ///
    /// Returns `false` if the connection is closed or its queue is full; a
    /// full queue also terminates the connection.
    pub fn send(&self, frame: Arc<str>) -> bool {
        if !self.is_open() {
            return false;
        }
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                warn!(conn_id = %self.id, "outbound queue full, disconnecting slow consumer");
                self.terminate();
                false
            }
            Err(TrySendError::Closed(_)) => {
                let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                self.open.store(false, Ordering::Relaxed);
                false
            }
        }
    }

    /// Encode and queue a single envelope.
    pub fn send_envelope(&self, envelope: &Envelope) -> bool {
        match codec::encode(envelope) {
            Ok(line) => self.send(line.into()),
            Err(e) => {
                warn!(conn_id = %self.id, kind = envelope.kind(), error = %e, "failed to encode envelope");
                false
            }
        }
    }

    /// Whether the connection still accepts frames.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Relaxed)
    }

    /// Close the connection. The session tasks observe this and tear down.
    pub fn terminate(&self) {
        self.open.store(false, Ordering::Relaxed);
        self.closed.cancel();
    }

    /// Resolves once [`terminate`](Self::terminate) has been called.
    pub fn terminated(&self) -> WaitForCancellationFuture<'_> {
        self.closed.cancelled()
    }

    /// Record a `PONG`.
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_pong.lock() = Instant::now();
    }

    /// Clear the alive flag before a `PING`.
    pub fn clear_alive(&self) {
        self.is_alive.store(false, Ordering::Relaxed);
    }

    /// Whether a `PONG` arrived since the last [`clear_alive`](Self::clear_alive).
    pub fn is_alive(&self) -> bool {
        self.is_alive.load(Ordering::Relaxed)
    }

    /// Time since the last `PONG` (or since connecting).
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    /// Frames that could not be queued.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}
