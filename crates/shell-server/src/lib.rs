//! # shell-server
//!
//! Axum HTTP + `WebSocket` broadcast hub.
//!
//! - `WebSocket` gateway: connection set, keepalive, client command dispatch
//! - Fan-out of state-change envelopes to every open connection
//! - [`EventPublisher`] boundary for external collaborators
//! - HTTP endpoints: health, tab snapshot, event publishing
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod health;
pub mod publish;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use publish::EventPublisher;
pub use server::ShellServer;
