//! # shell-engine
//!
//! Ownership of the external rendering-engine process.
//!
//! - [`Supervisor`]: spawns the engine, detects readiness and crashes, and is
//!   the only writer to its stdin
//! - [`TabRegistry`]: authoritative in-memory record of open tabs, issuing
//!   engine commands through a [`CommandSink`]
//! - [`binary`]: engine binary resolution and checks

#![deny(unsafe_code)]

pub mod binary;
pub mod registry;
pub mod sink;
pub mod supervisor;

pub use registry::TabRegistry;
pub use sink::CommandSink;
pub use supervisor::{EngineProcess, EngineState, Supervisor, SupervisorConfig, SupervisorEvent};
