//! Event fan-out to connected WebSocket clients.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use shell_core::{ConnectionId, Envelope, codec};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::connection::ClientConnection;
use crate::publish::EventPublisher;

/// The live connection set.
pub struct BroadcastManager {
    connections: RwLock<HashMap<ConnectionId, Arc<ClientConnection>>>,
}

impl BroadcastManager {
    /// Empty connection set.
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Register a connection.
    pub async fn add(&self, connection: Arc<ClientConnection>) {
        let mut conns = self.connections.write().await;
        let _ = conns.insert(connection.id.clone(), connection);
    }

    /// Drop a connection from the set.
    pub async fn remove(&self, connection_id: &ConnectionId) {
        let mut conns = self.connections.write().await;
        let _ = conns.remove(connection_id);
    }

    /// Send `envelope` to every open connection except `exclude`.
    ///
    /// Returns the number of connections the frame was queued for. A failure
    /// on one connection never affects the others.
    pub async fn broadcast(&self, envelope: &Envelope, exclude: Option<&ConnectionId>) -> usize {
        let frame: Arc<str> = match codec::encode(envelope) {
            Ok(line) => line.into(),
            Err(e) => {
                warn!(kind = envelope.kind(), error = %e, "failed to encode broadcast");
                return 0;
            }
        };

        let conns = self.connections.read().await;
        let mut delivered = 0;
        for conn in conns.values() {
            if exclude == Some(&conn.id) || !conn.is_open() {
                continue;
            }
            if conn.send(Arc::clone(&frame)) {
                delivered += 1;
            } else {
                warn!(conn_id = %conn.id, kind = envelope.kind(), "failed to deliver broadcast");
            }
        }
        debug!(kind = envelope.kind(), recipients = delivered, "broadcast");
        delivered
    }

    /// Terminate every connection.
    pub async fn close_all(&self) {
        let conns = self.connections.read().await;
        for conn in conns.values() {
            conn.terminate();
        }
    }

    /// Number of registered connections.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }
}

impl Default for BroadcastManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventPublisher for BroadcastManager {
    async fn publish(&self, envelope: Envelope) -> usize {
        self.broadcast(&envelope, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn make_connection(id: &str, capacity: usize) -> (Arc<ClientConnection>, mpsc::Receiver<Arc<str>>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Arc::new(ClientConnection::new(ConnectionId::from(id), tx)), rx)
    }

    #[tokio::test]
    async fn closed_connection_is_skipped() {
        let bm = BroadcastManager::new();
        let (c1, mut rx1) = make_connection("c1", 8);
        let (c2, mut rx2) = make_connection("c2", 8);
        let (c3, mut rx3) = make_connection("c3", 8);
        bm.add(c1).await;
        bm.add(Arc::clone(&c2)).await;
        bm.add(c3).await;

        c2.terminate();
        let delivered = bm.broadcast(&Envelope::new("TAB_CLOSED").with("tabId", 1), None).await;

        assert_eq!(delivered, 2);
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_err());
        assert!(rx3.try_recv().is_ok());
    }

    #[tokio::test]
    async fn exclude_skips_sender() {
        let bm = BroadcastManager::new();
        let (a, mut rx_a) = make_connection("a", 8);
        let (b, mut rx_b) = make_connection("b", 8);
        bm.add(a).await;
        bm.add(b).await;

        let sender = ConnectionId::from("a");
        let delivered = bm
            .broadcast(&Envelope::new("NAVIGATE").with("url", "https://x.test"), Some(&sender))
            .await;

        assert_eq!(delivered, 1);
        assert!(rx_a.try_recv().is_err());
        let frame = rx_b.try_recv().unwrap();
        assert!(frame.contains("https://x.test"));
    }

    #[tokio::test]
    async fn slow_consumer_does_not_block_others() {
        let bm = BroadcastManager::new();
        let (slow, _rx_slow) = make_connection("slow", 1);
        let (fast, mut rx_fast) = make_connection("fast", 8);
        bm.add(Arc::clone(&slow)).await;
        bm.add(fast).await;

        for i in 0..3 {
            let _ = bm.broadcast(&Envelope::new("URL_CHANGED").with("seq", i), None).await;
        }

        assert!(!slow.is_open());
        for _ in 0..3 {
            assert!(rx_fast.try_recv().is_ok());
        }
    }

    #[tokio::test]
    async fn per_connection_order_is_preserved() {
        let bm = BroadcastManager::new();
        let (c, mut rx) = make_connection("c", 16);
        bm.add(c).await;
        for i in 0..5_u64 {
            let _ = bm.publish(Envelope::new("DOWNLOAD_PROGRESS").with("seq", i)).await;
        }
        for i in 0..5_u64 {
            let frame = rx.recv().await.unwrap();
            let env = codec::decode_frame(&frame).remove(0);
            assert_eq!(env.get_u64("seq"), Some(i));
        }
    }

    #[tokio::test]
    async fn removed_connection_gets_nothing() {
        let bm = BroadcastManager::new();
        let (c, mut rx) = make_connection("c", 8);
        bm.add(c).await;
        let id = ConnectionId::from("c");

        assert_eq!(bm.broadcast(&Envelope::new("PING"), None).await, 1);
        assert!(rx.try_recv().is_ok());

        bm.remove(&id).await;
        assert_eq!(bm.connection_count().await, 0);
        assert_eq!(bm.broadcast(&Envelope::new("PING"), None).await, 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn close_all_terminates_everyone() {
        let bm = BroadcastManager::default();
        let (a, _ra) = make_connection("a", 8);
        let (b, _rb) = make_connection("b", 8);
        bm.add(Arc::clone(&a)).await;
        bm.add(Arc::clone(&b)).await;

        bm.close_all().await;
        assert!(!a.is_open());
        assert!(!b.is_open());
        assert_eq!(bm.broadcast(&Envelope::new("PING"), None).await, 0);
    }
}
