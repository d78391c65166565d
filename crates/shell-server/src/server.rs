//! `ShellServer`: Axum HTTP + WebSocket hub.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use serde_json::json;
use shell_core::protocol::TabUpdate;
use shell_core::{ConnectionId, Envelope, Tab};
use shell_engine::{Supervisor, TabRegistry};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::publish::EventPublisher;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::broadcast::BroadcastManager;
use crate::websocket::event_bridge::EventBridge;
use crate::websocket::hub::Hub;
use crate::websocket::session::run_ws_session;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Tab operations and fan-out.
    pub hub: Arc<Hub>,
    /// Engine supervisor, for health reporting.
    pub supervisor: Arc<Supervisor>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
}

/// The browser shell hub server.
pub struct ShellServer {
    config: Arc<ServerConfig>,
    supervisor: Arc<Supervisor>,
    hub: Arc<Hub>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
}

impl ShellServer {
    /// Create a server over an existing supervisor and registry.
    pub fn new(
        config: ServerConfig,
        supervisor: Arc<Supervisor>,
        registry: Arc<TabRegistry>,
    ) -> Self {
        let broadcast = Arc::new(BroadcastManager::new());
        Self {
            config: Arc::new(config),
            supervisor,
            hub: Arc::new(Hub::new(registry, broadcast)),
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            hub: Arc::clone(&self.hub),
            supervisor: Arc::clone(&self.supervisor),
            config: Arc::clone(&self.config),
            shutdown: Arc::clone(&self.shutdown),
            start_time: self.start_time,
        };

        Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/tabs", get(tabs_handler))
            .route("/events", post(publish_handler))
            .with_state(state)
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Bind the listener and serve until shutdown.
    ///
    /// Also starts the supervisor event bridge. The returned handle resolves
    /// once both the HTTP server and the bridge have stopped.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind((self.config.host.as_str(), self.config.port)).await?;
        let addr = listener.local_addr()?;

        let token = self.shutdown.token();
        let bridge = EventBridge::new(self.supervisor.subscribe(), Arc::clone(&self.hub));
        let bridge_handle = tokio::spawn(bridge.run(token.clone()));

        let router = self.router();
        let hub = Arc::clone(&self.hub);
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
            {
                error!(error = %e, "server error");
            }
            hub.connections().close_all().await;
            let _ = bridge_handle.await;
        });

        info!(%addr, "hub listening");
        Ok((addr, handle))
    }

    /// The external publishing boundary.
    pub fn publisher(&self) -> Arc<dyn EventPublisher> {
        Arc::clone(&self.hub) as Arc<dyn EventPublisher>
    }

    /// Tab operations and fan-out.
    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// GET /ws
async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    if state.shutdown.is_shutting_down() {
        return (StatusCode::SERVICE_UNAVAILABLE, "shutting down").into_response();
    }
    let connections = state.hub.connections().connection_count().await;
    if connections >= state.config.max_connections {
        warn!(
            connections,
            max = state.config.max_connections,
            "connection limit reached, rejecting upgrade"
        );
        return (StatusCode::SERVICE_UNAVAILABLE, "too many connections").into_response();
    }

    let token = state.shutdown.token();
    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| {
            run_ws_session(socket, ConnectionId::new(), state.hub, state.config, token)
        })
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let connections = state.hub.connections().connection_count().await;
    Json(health::health_check(
        state.start_time,
        connections,
        state.hub.registry().len(),
        state.supervisor.state(),
    ))
}

/// GET /tabs
async fn tabs_handler(State(state): State<AppState>) -> Json<Vec<Tab>> {
    Json(state.hub.registry().list())
}

/// POST /events
///
/// Tab updates (`URL_CHANGED`, `TITLE_CHANGED`, `FAVICON_CHANGED`) are applied
/// to the registry before they are broadcast; malformed ones get 422.
async fn publish_handler(
    State(state): State<AppState>,
    Json(envelope): Json<Envelope>,
) -> Response {
    if let Err(e) = TabUpdate::parse(&envelope) {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({ "code": e.code(), "message": e.to_string() })),
        )
            .into_response();
    }
    let recipients = state.hub.publish(envelope).await;
    (StatusCode::ACCEPTED, Json(json!({ "recipients": recipients }))).into_response()
}
