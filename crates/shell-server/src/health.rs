//! `/health` endpoint.

use std::time::Instant;

use serde::Serialize;
use shell_engine::EngineState;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` when the server is answering.
    pub status: &'static str,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Open WebSocket connections.
    pub connections: usize,
    /// Open tabs in the registry.
    pub tabs: usize,
    /// Engine process state.
    pub engine: EngineState,
}

/// Build a health response from live counters.
pub fn health_check(
    start_time: Instant,
    connections: usize,
    tabs: usize,
    engine: EngineState,
) -> HealthResponse {
    HealthResponse {
        status: "ok",
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
        tabs,
        engine,
    }
}
