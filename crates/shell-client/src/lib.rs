//! # shell-client
//!
//! The sync agent embedded in each UI consumer. It keeps one logical
//! connection to the hub alive across drops, batches outbound commands and
//! fans inbound envelopes out to local subscribers.
//!
//! - [`SyncAgent`]: handle to the background connection actor
//! - [`Connector`]: transport seam; [`WsConnector`] is the WebSocket one
//! - [`Subscriptions`]: type → handler registry with failure isolation

#![deny(unsafe_code)]

pub mod agent;
pub mod backoff;
pub mod config;
pub mod queue;
pub mod state;
pub mod subscriptions;
pub mod transport;

pub use agent::SyncAgent;
pub use config::AgentConfig;
pub use state::ConnectionState;
pub use subscriptions::{HandlerResult, SubscriptionId, Subscriptions, WILDCARD};
pub use transport::{Connector, Transport, WsConnector};
