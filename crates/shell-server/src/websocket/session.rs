//! WebSocket session lifecycle, from upgrade through disconnect.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use shell_core::ConnectionId;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::connection::ClientConnection;
use super::handler::handle_frame;
use super::heartbeat::{HeartbeatResult, run_heartbeat};
use super::hub::Hub;
use crate::config::ServerConfig;

/// Run a WebSocket session for a connected client.
///
/// 1. Registers the connection with the broadcast set
/// 2. Forwards queued outbound frames to the socket
/// 3. Runs the keepalive and terminates the connection on a missed `PONG`
/// 4. Dispatches inbound text frames
/// 5. Unregisters on disconnect, termination or server shutdown
#[instrument(skip_all, fields(conn_id = %conn_id))]
pub async fn run_ws_session(
    ws: WebSocket,
    conn_id: ConnectionId,
    hub: Arc<Hub>,
    config: Arc<ServerConfig>,
    shutdown: CancellationToken,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();

    let (send_tx, mut send_rx) = mpsc::channel::<Arc<str>>(config.send_queue_capacity);
    let connection = Arc::new(ClientConnection::new(conn_id.clone(), send_tx));

    hub.connections().add(Arc::clone(&connection)).await;
    info!("client connected");

    let outbound_conn = Arc::clone(&connection);
    let outbound = tokio::spawn(async move {
        loop {
            tokio::select! {
                frame = send_rx.recv() => {
                    let Some(frame) = frame else { break };
                    if ws_tx.send(Message::Text(frame.to_string().into())).await.is_err() {
                        outbound_conn.terminate();
                        break;
                    }
                }
                () = outbound_conn.terminated() => break,
            }
        }
        let _ = ws_tx.send(Message::Close(None)).await;
    });

    let heartbeat_cancel = CancellationToken::new();
    let heartbeat_conn = Arc::clone(&connection);
    let heartbeat = tokio::spawn(run_heartbeat(
        Arc::clone(&connection),
        config.heartbeat_interval,
        config.pong_timeout,
        heartbeat_cancel.clone(),
    ));
    let heartbeat_watch = tokio::spawn(async move {
        if let Ok(HeartbeatResult::TimedOut) = heartbeat.await {
            warn!(
                conn_id = %heartbeat_conn.id,
                since_pong_ms = u64::try_from(heartbeat_conn.last_pong_elapsed().as_millis()).unwrap_or(u64::MAX),
                "no PONG before deadline, terminating"
            );
        }
        heartbeat_conn.terminate();
    });

    loop {
        let msg = tokio::select! {
            msg = ws_rx.next() => msg,
            () = connection.terminated() => break,
            () = shutdown.cancelled() => {
                debug!("server shutting down, closing session");
                break;
            }
        };

        let text = match msg {
            Some(Ok(Message::Text(t))) => t.to_string(),
            Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                Ok(s) => s,
                Err(_) => {
                    debug!(len = data.len(), "ignoring non-UTF8 binary frame");
                    continue;
                }
            },
            Some(Ok(Message::Close(_))) => {
                info!("client sent close frame");
                break;
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Err(e)) => {
                debug!(error = %e, "websocket read failed");
                break;
            }
            None => break,
        };

        handle_frame(&hub, &connection, &text).await;
    }

    heartbeat_cancel.cancel();
    connection.terminate();
    hub.connections().remove(&conn_id).await;
    let _ = heartbeat_watch.await;
    let _ = outbound.await;
    info!(
        duration_ms = u64::try_from(connection.age().as_millis()).unwrap_or(u64::MAX),
        dropped = connection.drop_count(),
        "client disconnected"
    );
}
