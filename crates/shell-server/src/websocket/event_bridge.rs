//! Supervisor event bridge.
//!
//! Turns [`SupervisorEvent`]s into client envelopes. Crashes become
//! `ENGINE_CRASHED`. Engine stdout is log-only: title and favicon changes
//! arrive through [`Hub::title_changed`] and [`Hub::favicon_changed`], never
//! from process output.

use std::sync::Arc;

use shell_core::protocol::events;
use shell_engine::SupervisorEvent;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use super::hub::Hub;
use crate::publish::EventPublisher;

/// Relays supervisor events to WebSocket clients.
pub struct EventBridge {
    rx: broadcast::Receiver<SupervisorEvent>,
    hub: Arc<Hub>,
}

impl EventBridge {
    /// Create a bridge over a supervisor subscription.
    pub fn new(rx: broadcast::Receiver<SupervisorEvent>, hub: Arc<Hub>) -> Self {
        Self { rx, hub }
    }

    /// Run until the supervisor is dropped or `cancel` fires.
    #[tracing::instrument(skip_all, name = "event_bridge")]
    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            let event = tokio::select! {
                event = self.rx.recv() => event,
                () = cancel.cancelled() => break,
            };
            match event {
                Ok(event) => self.relay(event).await,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(lagged = n, "event bridge lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::info!("supervisor closed, event bridge exiting");
                    break;
                }
            }
        }
    }

    async fn relay(&self, event: SupervisorEvent) {
        match event {
            SupervisorEvent::Crashed {
                instance_id,
                exit_code,
            } => {
                let recipients = self.hub.publish(events::engine_crashed(exit_code)).await;
                tracing::warn!(%instance_id, ?exit_code, recipients, "engine crash announced");
            }
            SupervisorEvent::Started { instance_id, pid } => {
                tracing::info!(%instance_id, ?pid, "engine started");
            }
            SupervisorEvent::Stopped {
                instance_id,
                exit_code,
            } => {
                tracing::info!(%instance_id, ?exit_code, "engine stopped");
            }
            SupervisorEvent::Error { code, message } => {
                tracing::warn!(code, %message, "supervisor rejected an operation");
            }
            SupervisorEvent::Output(envelope) => {
                tracing::debug!(kind = envelope.kind(), "engine output");
            }
        }
    }
}
