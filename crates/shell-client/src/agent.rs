//! The client sync agent.
//!
//! [`SyncAgent`] is a cheap handle to a background actor that owns the
//! transport. The actor moves through four phases:
//!
//! - **idle**: no transport, no retry; waits for `connect()`
//! - **connecting**: one attempt in flight
//! - **connected**: pumps frames, batches outbound envelopes, runs keepalive
//! - **waiting**: a reconnect is scheduled
//!
//! Outbound envelopes are queued in every phase and flushed once connected,
//! in batches of at most `batch_size`, each batch one text frame.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use shell_core::protocol::{events, kind};
use shell_core::{Envelope, Result, ShellError, codec};
use tokio::sync::{mpsc, watch};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::backoff::ReconnectPolicy;
use crate::config::AgentConfig;
use crate::queue::OutboundQueue;
use crate::state::ConnectionState;
use crate::subscriptions::{HandlerResult, SubscriptionId, Subscriptions};
use crate::transport::{Connector, FrameSink, Transport, WsConnector};

enum AgentCommand {
    Connect,
    Disconnect,
    Send(Envelope),
    Shutdown,
}

enum Phase {
    Idle,
    Connecting,
    Connected(Transport),
    Waiting(Instant),
}

/// Handle to a running sync agent. Clones share the same connection.
#[derive(Clone)]
pub struct SyncAgent {
    commands: mpsc::UnboundedSender<AgentCommand>,
    state: watch::Receiver<ConnectionState>,
    subscriptions: Arc<Subscriptions>,
}

impl SyncAgent {
    /// Start an agent that connects through `connector`.
    ///
    /// The agent stays disconnected until [`connect`](Self::connect).
    pub fn spawn(config: AgentConfig, connector: Arc<dyn Connector>) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(ConnectionState::Disconnected);
        let subscriptions = Arc::new(Subscriptions::new());

        let actor = Actor {
            policy: ReconnectPolicy::new(config.reconnect_base, config.max_reconnect_attempts),
            queue: OutboundQueue::new(config.max_queue),
            config,
            connector,
            commands: rx,
            state: state_tx,
            subscriptions: Arc::clone(&subscriptions),
            attempt: 0,
            auto_reconnect: false,
        };
        let _ = tokio::spawn(actor.run());

        Self {
            commands,
            state,
            subscriptions,
        }
    }

    /// Start an agent over WebSocket.
    pub fn spawn_ws(config: AgentConfig) -> Self {
        Self::spawn(config, Arc::new(WsConnector::new()))
    }

    /// Connect, resetting the reconnect attempt counter.
    ///
    /// A no-op while connecting or connected.
    pub fn connect(&self) {
        self.command(AgentCommand::Connect);
    }

    /// Close the transport and cancel any scheduled retry.
    ///
    /// Queued envelopes are kept for the next `connect()`.
    pub fn disconnect(&self) {
        self.command(AgentCommand::Disconnect);
    }

    /// Queue `{type: kind, ...data}` for the hub.
    pub fn send(&self, kind: &str, data: Value) {
        self.send_envelope(Envelope::from_data(kind, data));
    }

    /// Queue a prepared envelope for the hub.
    pub fn send_envelope(&self, envelope: Envelope) {
        self.command(AgentCommand::Send(envelope));
    }

    /// Register a handler for inbound envelopes of type `kind`.
    pub fn subscribe<F>(&self, kind: &str, handler: F) -> SubscriptionId
    where
        F: Fn(&Envelope) -> HandlerResult + Send + Sync + 'static,
    {
        self.subscriptions.subscribe(kind, handler)
    }

    /// Remove a handler registered with [`subscribe`](Self::subscribe).
    pub fn unsubscribe(&self, kind: &str, id: SubscriptionId) -> bool {
        self.subscriptions.unsubscribe(kind, id)
    }

    /// Deliver an envelope to local subscribers as if it came from the hub.
    pub fn dispatch(&self, envelope: &Envelope) -> usize {
        self.subscriptions.dispatch(envelope)
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch connection state changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Stop the actor and drop the transport.
    pub fn shutdown(&self) {
        self.command(AgentCommand::Shutdown);
    }

    fn command(&self, command: AgentCommand) {
        if self.commands.send(command).is_err() {
            debug!("sync agent already stopped");
        }
    }
}

struct Actor {
    config: AgentConfig,
    connector: Arc<dyn Connector>,
    commands: mpsc::UnboundedReceiver<AgentCommand>,
    state: watch::Sender<ConnectionState>,
    subscriptions: Arc<Subscriptions>,
    queue: OutboundQueue,
    policy: ReconnectPolicy,
    attempt: u32,
    auto_reconnect: bool,
}

impl Actor {
    #[tracing::instrument(skip_all, name = "sync_agent")]
    async fn run(mut self) {
        let mut phase = Phase::Idle;
        loop {
            let next = match phase {
                Phase::Idle => self.idle().await,
                Phase::Connecting => self.connecting().await,
                Phase::Connected(transport) => self.connected(transport).await,
                Phase::Waiting(deadline) => self.waiting(deadline).await,
            };
            match next {
                Some(p) => phase = p,
                None => break,
            }
        }
        self.set_state(ConnectionState::Disconnected);
        debug!("sync agent stopped");
    }

    async fn idle(&mut self) -> Option<Phase> {
        self.set_state(ConnectionState::Disconnected);
        loop {
            match self.commands.recv().await? {
                AgentCommand::Connect => {
                    self.attempt = 0;
                    self.auto_reconnect = true;
                    return Some(Phase::Connecting);
                }
                AgentCommand::Disconnect => {}
                AgentCommand::Send(envelope) => self.queue.push(envelope),
                AgentCommand::Shutdown => return None,
            }
        }
    }

    async fn waiting(&mut self, deadline: Instant) -> Option<Phase> {
        // watchers must get a chance to see `Disconnected` first
        tokio::task::yield_now().await;
        self.set_state(ConnectionState::Reconnecting);
        loop {
            tokio::select! {
                () = time::sleep_until(deadline) => return Some(Phase::Connecting),
                command = self.commands.recv() => match command? {
                    AgentCommand::Connect => {
                        self.attempt = 0;
                        return Some(Phase::Connecting);
                    }
                    AgentCommand::Disconnect => {
                        self.auto_reconnect = false;
                        info!("reconnect cancelled");
                        return Some(Phase::Idle);
                    }
                    AgentCommand::Send(envelope) => self.queue.push(envelope),
                    AgentCommand::Shutdown => return None,
                },
            }
        }
    }

    async fn connecting(&mut self) -> Option<Phase> {
        self.set_state(ConnectionState::Connecting);
        let connector = Arc::clone(&self.connector);
        let url = self.config.url.clone();
        let timeout = self.config.connect_timeout;
        let attempt = async {
            time::timeout(timeout, connector.connect(&url))
                .await
                .map_err(|_| ShellError::Connection(format!("connect to {url} timed out")))?
        };
        tokio::pin!(attempt);

        loop {
            tokio::select! {
                result = &mut attempt => {
                    return Some(match result {
                        Ok(transport) => {
                            info!(url = %self.config.url, attempt = self.attempt, "connected");
                            self.attempt = 0;
                            Phase::Connected(transport)
                        }
                        Err(e) => {
                            warn!(attempt = self.attempt, error = %e, "connection attempt failed");
                            self.schedule_reconnect()
                        }
                    });
                }
                command = self.commands.recv() => match command? {
                    AgentCommand::Connect => {}
                    AgentCommand::Disconnect => {
                        self.auto_reconnect = false;
                        return Some(Phase::Idle);
                    }
                    AgentCommand::Send(envelope) => self.queue.push(envelope),
                    AgentCommand::Shutdown => return None,
                },
            }
        }
    }

    async fn connected(&mut self, transport: Transport) -> Option<Phase> {
        let Transport {
            mut sink,
            mut stream,
        } = transport;
        self.set_state(ConnectionState::Connected);

        let heartbeat_every = self.config.heartbeat_interval;
        let mut heartbeat = time::interval_at(Instant::now() + heartbeat_every, heartbeat_every);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut flush_at: Option<Instant> = None;
        let mut pong_deadline: Option<Instant> = None;

        if let Err(e) = self.flush(&mut sink).await {
            warn!(error = %e, "initial flush failed");
            return Some(self.schedule_reconnect());
        }

        loop {
            tokio::select! {
                frame = stream.next() => match frame {
                    Some(Ok(text)) => {
                        for envelope in codec::decode_frame(&text) {
                            if envelope.is(kind::PING) {
                                if let Err(e) = send_frame(&mut sink, &events::pong()).await {
                                    warn!(error = %e, "failed to answer PING");
                                }
                            } else if envelope.is(kind::PONG) {
                                pong_deadline = None;
                            } else {
                                let _ = self.subscriptions.dispatch(&envelope);
                            }
                        }
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "transport error");
                        break;
                    }
                    None => {
                        info!("connection closed by hub");
                        break;
                    }
                },
                command = self.commands.recv() => match command {
                    None | Some(AgentCommand::Shutdown) => {
                        let _ = sink.close().await;
                        return None;
                    }
                    Some(AgentCommand::Connect) => {}
                    Some(AgentCommand::Disconnect) => {
                        self.auto_reconnect = false;
                        let _ = sink.close().await;
                        info!("disconnected");
                        return Some(Phase::Idle);
                    }
                    Some(AgentCommand::Send(envelope)) => {
                        self.queue.push(envelope);
                        if self.queue.len() >= self.config.batch_size {
                            flush_at = None;
                            if let Err(e) = self.flush(&mut sink).await {
                                warn!(error = %e, "flush failed");
                                break;
                            }
                        } else if flush_at.is_none() {
                            flush_at = Some(Instant::now() + self.config.batch_delay);
                        }
                    }
                },
                () = wait_until(flush_at) => {
                    flush_at = None;
                    if let Err(e) = self.flush(&mut sink).await {
                        warn!(error = %e, "flush failed");
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_deadline.is_none() {
                        if let Err(e) = send_frame(&mut sink, &events::ping()).await {
                            warn!(error = %e, "failed to send PING");
                            break;
                        }
                        pong_deadline = Some(Instant::now() + self.config.pong_timeout);
                    }
                }
                () = wait_until(pong_deadline) => {
                    warn!(
                        timeout_ms = u64::try_from(self.config.pong_timeout.as_millis()).unwrap_or(u64::MAX),
                        "no PONG before deadline, closing transport"
                    );
                    break;
                }
            }
        }

        let _ = sink.close().await;
        drop(stream);
        Some(self.schedule_reconnect())
    }

    /// Send everything queued, `batch_size` envelopes per frame.
    async fn flush(&mut self, sink: &mut FrameSink) -> Result<()> {
        while !self.queue.is_empty() {
            let batch = self.queue.take_batch(self.config.batch_size);
            let frame = codec::encode_batch(&batch)?;
            let count = batch.len();
            if let Err(e) = sink.send(frame).await {
                self.queue.requeue_front(batch);
                return Err(e);
            }
            debug!(count, "batch sent");
        }
        Ok(())
    }

    /// Called whenever a transport is lost or an attempt fails.
    fn schedule_reconnect(&mut self) -> Phase {
        self.set_state(ConnectionState::Disconnected);
        if !self.auto_reconnect {
            return Phase::Idle;
        }
        self.attempt += 1;
        match self.policy.delay_for(self.attempt) {
            Some(delay) => {
                info!(
                    attempt = self.attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "reconnect scheduled"
                );
                Phase::Waiting(Instant::now() + delay)
            }
            None => {
                warn!(
                    attempts = self.policy.max_attempts,
                    "reconnect attempts exhausted, staying offline"
                );
                self.auto_reconnect = false;
                Phase::Idle
            }
        }
    }

    fn set_state(&self, next: ConnectionState) {
        let _ = self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            debug!(from = %current, to = %next, "connection state");
            *current = next;
            true
        });
    }
}

async fn send_frame(sink: &mut FrameSink, envelope: &Envelope) -> Result<()> {
    sink.send(codec::encode(envelope)?).await
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
