//! WebSocket connection management, keepalive, command dispatch and fan-out.

pub mod broadcast;
pub mod connection;
pub mod event_bridge;
pub mod handler;
pub mod heartbeat;
pub mod hub;
pub mod session;
