//! # shell-core
//!
//! Foundation types shared by every crate of the browser shell control plane:
//!
//! - **Envelope**: the `{type, ...payload}` wire unit used on both the engine
//!   protocol and the client protocol
//! - **Protocol**: message type names, typed engine/client commands, and
//!   constructors for the server→client event catalogue
//! - **Codec**: newline-delimited JSON framing tolerant of split chunks and
//!   malformed lines
//! - **Errors**: the [`ShellError`] taxonomy with stable wire codes
//! - **IDs**: [`TabId`] and [`ConnectionId`] newtypes
//! - **Logging**: `tracing` subscriber setup

#![deny(unsafe_code)]

pub mod codec;
pub mod envelope;
pub mod errors;
pub mod ids;
pub mod logging;
pub mod protocol;

pub use envelope::Envelope;
pub use errors::{Result, ShellError};
pub use ids::{ConnectionId, TabId};
pub use protocol::Tab;
