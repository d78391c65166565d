//! Engine process supervisor.
//!
//! The supervisor owns exactly one engine process at a time. Start and stop
//! transitions are serialized by an async mutex; the current state lives in a
//! `watch` channel that the monitor task also writes to when it detects a
//! crash.
//!
//! Process I/O is split across tasks:
//! - a **writer** task owns the engine's stdin and receives envelopes over an
//!   mpsc channel, so there is a single writer no matter how many callers
//! - a **stdout** reader decodes envelopes with [`LineCodec`] and re-emits them
//!   as [`SupervisorEvent::Output`]
//! - a **stderr** reader logs lines
//! - a **monitor** task waits for exit and flips `Running` to `Crashed` when
//!   the exit was not requested
//!
//! Readiness is the first output on either stream. A stderr line containing
//! `fatal` before readiness fails the start.

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use shell_core::codec::{LineCodec, decode_stream};
use shell_core::{Envelope, Result, ShellError};
use shell_settings::EngineSettings;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_util::codec::FramedWrite;
use tokio_util::io::InspectReader;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::binary;
use crate::sink::CommandSink;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Supervisor construction parameters.
#[derive(Clone, Debug)]
pub struct SupervisorConfig {
    /// Engine executable.
    pub binary_path: PathBuf,
    /// Working directory for the engine; created on start if missing.
    pub work_dir: PathBuf,
    /// Extra arguments.
    pub args: Vec<String>,
    /// Readiness deadline.
    pub startup_timeout: Duration,
    /// Wait after closing stdin before a forced kill.
    pub stop_grace: Duration,
    /// Capacity of the stdin writer queue; a full queue rejects commands.
    pub command_queue: usize,
    /// How long `send()` waits for the engine to accept a command.
    pub write_timeout: Duration,
}

impl SupervisorConfig {
    /// Config with default timings.
    pub fn new(binary_path: impl Into<PathBuf>, work_dir: impl Into<PathBuf>) -> Self {
        let defaults = EngineSettings::default();
        Self {
            binary_path: binary_path.into(),
            work_dir: work_dir.into(),
            args: Vec::new(),
            startup_timeout: defaults.startup_timeout(),
            stop_grace: defaults.stop_grace(),
            command_queue: defaults.command_queue,
            write_timeout: defaults.write_timeout(),
        }
    }

    /// Build from the `engine` settings section.
    pub fn from_settings(settings: &EngineSettings) -> Self {
        Self {
            binary_path: settings.resolved_binary_path(),
            work_dir: settings.resolved_work_dir(),
            args: settings.args.clone(),
            startup_timeout: settings.startup_timeout(),
            stop_grace: settings.stop_grace(),
            command_queue: settings.command_queue,
            write_timeout: settings.write_timeout(),
        }
    }
}

/// Lifecycle state of the engine process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum EngineState {
    /// No process.
    Stopped,
    /// Spawned, waiting for readiness.
    Starting,
    /// Ready; commands are accepted.
    Running,
    /// Shutdown requested, waiting for exit.
    Stopping,
    /// Exited unexpectedly; cleared by `acknowledge_crash` or `start`.
    Crashed,
}

impl EngineState {
    /// Lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Crashed => "crashed",
        }
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of the live engine process.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineProcess {
    /// Unique per spawn, even if the OS reuses the pid.
    pub instance_id: Uuid,
    /// OS process id.
    pub pid: Option<u32>,
    /// Spawn time.
    pub started_at: DateTime<Utc>,
    /// State at the time of the snapshot.
    pub state: EngineState,
}

/// Out-of-band notifications from the supervisor.
#[derive(Clone, Debug)]
pub enum SupervisorEvent {
    /// The engine signalled readiness.
    Started {
        /// Process identity.
        instance_id: Uuid,
        /// OS process id.
        pid: Option<u32>,
    },
    /// The engine exited after `stop()`.
    Stopped {
        /// Process identity.
        instance_id: Uuid,
        /// Exit code, if any.
        exit_code: Option<i32>,
    },
    /// The engine exited on its own while running.
    Crashed {
        /// Process identity.
        instance_id: Uuid,
        /// Exit code, if any.
        exit_code: Option<i32>,
    },
    /// An envelope decoded from the engine's stdout.
    Output(Envelope),
    /// An operation was rejected.
    Error {
        /// [`ShellError::code`].
        code: &'static str,
        /// Human-readable message.
        message: String,
    },
}

struct WriteRequest {
    envelope: Envelope,
    ack: oneshot::Sender<Result<()>>,
}

#[derive(Clone, Copy, Debug)]
struct Exit {
    code: Option<i32>,
}

#[derive(Debug)]
enum StartupSignal {
    Ready,
    Fatal(String),
}

struct Live {
    instance_id: Uuid,
    pid: Option<u32>,
    started_at: DateTime<Utc>,
    writer: mpsc::Sender<WriteRequest>,
    kill: CancellationToken,
    exit: watch::Receiver<Option<Exit>>,
}

struct Shared {
    state: watch::Sender<EngineState>,
    live: Mutex<Option<Live>>,
    events: broadcast::Sender<SupervisorEvent>,
}

impl Shared {
    fn emit(&self, event: SupervisorEvent) {
        // no receivers is fine
        let _ = self.events.send(event);
    }

    fn state(&self) -> EngineState {
        *self.state.borrow()
    }

    /// Flip `Running` to `Crashed` if `instance_id` is still the live process.
    fn mark_crashed(&self, instance_id: Uuid, exit_code: Option<i32>) -> bool {
        let flipped = {
            let live = self.live.lock();
            live.as_ref().is_some_and(|l| l.instance_id == instance_id)
                && self.state.send_if_modified(|state| {
                    if *state == EngineState::Running {
                        *state = EngineState::Crashed;
                        true
                    } else {
                        false
                    }
                })
        };
        if flipped {
            error!(%instance_id, exit_code = ?exit_code, "engine process crashed");
            self.emit(SupervisorEvent::Crashed {
                instance_id,
                exit_code,
            });
        }
        flipped
    }
}

/// Owner of the engine process.
pub struct Supervisor {
    config: SupervisorConfig,
    transition: tokio::sync::Mutex<()>,
    shared: Arc<Shared>,
}

impl Supervisor {
    /// Create a stopped supervisor.
    pub fn new(config: SupervisorConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            config,
            transition: tokio::sync::Mutex::new(()),
            shared: Arc::new(Shared {
                state: watch::Sender::new(EngineState::Stopped),
                live: Mutex::new(None),
                events,
            }),
        }
    }

    /// Current state.
    pub fn state(&self) -> EngineState {
        self.shared.state()
    }

    /// Watch state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<EngineState> {
        self.shared.state.subscribe()
    }

    /// Subscribe to lifecycle, output and error events.
    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.shared.events.subscribe()
    }

    /// Snapshot of the live process, if any.
    pub fn process(&self) -> Option<EngineProcess> {
        let live = self.shared.live.lock();
        live.as_ref().map(|l| EngineProcess {
            instance_id: l.instance_id,
            pid: l.pid,
            started_at: l.started_at,
            state: self.shared.state(),
        })
    }

    /// Start the engine and wait for readiness.
    ///
    /// A no-op when already starting or running. A pending crash is
    /// acknowledged first.
    pub async fn start(&self) -> Result<()> {
        let _guard = self.transition.lock().await;
        match self.state() {
            state @ (EngineState::Starting | EngineState::Running) => {
                warn!(%state, "engine already started, ignoring start");
                return Ok(());
            }
            EngineState::Crashed => self.clear_crashed(),
            EngineState::Stopped | EngineState::Stopping => {}
        }
        self.launch().await.map_err(|e| self.reject(e))
    }

    /// Stop the engine: close stdin, wait the grace period, then kill.
    ///
    /// Waits for an in-flight `start()` to settle first. From `Crashed` this
    /// only acknowledges the crash.
    pub async fn stop(&self) -> Result<()> {
        let _guard = self.transition.lock().await;
        match self.state() {
            EngineState::Stopped => return Ok(()),
            EngineState::Crashed => {
                self.clear_crashed();
                return Ok(());
            }
            EngineState::Starting | EngineState::Running | EngineState::Stopping => {}
        }

        let _ = self.shared.state.send_replace(EngineState::Stopping);
        let live = self.shared.live.lock().take();
        let Some(Live {
            instance_id,
            pid,
            writer,
            kill,
            exit,
            ..
        }) = live
        else {
            let _ = self.shared.state.send_replace(EngineState::Stopped);
            return Ok(());
        };

        info!(pid, %instance_id, "stopping engine");
        // the writer task drains, then drops stdin
        drop(writer);

        let exit_code = match tokio::time::timeout(self.config.stop_grace, wait_exit(exit.clone()))
            .await
        {
            Ok(code) => code,
            Err(_) => {
                warn!(
                    pid,
                    grace_ms = millis(self.config.stop_grace),
                    "engine still running after stdin closed, killing"
                );
                kill.cancel();
                wait_exit(exit).await
            }
        };

        let _ = self.shared.state.send_replace(EngineState::Stopped);
        info!(pid, exit_code = ?exit_code, "engine stopped");
        self.shared.emit(SupervisorEvent::Stopped {
            instance_id,
            exit_code,
        });
        Ok(())
    }

    /// Clear a crash. Returns `false` if the engine was not crashed.
    pub async fn acknowledge_crash(&self) -> bool {
        let _guard = self.transition.lock().await;
        if self.state() != EngineState::Crashed {
            return false;
        }
        self.clear_crashed();
        true
    }

    /// Write one command to the engine's stdin.
    ///
    /// Fails with [`ShellError::EngineStalled`] when the command queue is full
    /// or the write is not accepted within the write timeout. A timed-out
    /// command stays queued and may still reach the engine later.
    pub async fn send(&self, envelope: Envelope) -> Result<()> {
        let writer = self.running_writer().map_err(|e| self.reject(e))?;
        let kind = envelope.kind().to_owned();
        match deliver(&writer, envelope, self.config.write_timeout).await {
            Ok(()) => {
                debug!(kind, "engine command written");
                Ok(())
            }
            Err(ShellError::ProcessNotRunning { .. }) => Err(self.reject(self.not_running())),
            Err(e) => Err(self.reject(e)),
        }
    }

    fn running_writer(&self) -> Result<mpsc::Sender<WriteRequest>> {
        let live = self.shared.live.lock();
        let state = self.shared.state();
        match (live.as_ref(), state) {
            (Some(live), EngineState::Running) => Ok(live.writer.clone()),
            _ => Err(ShellError::ProcessNotRunning {
                state: state.to_string(),
            }),
        }
    }

    fn not_running(&self) -> ShellError {
        ShellError::ProcessNotRunning {
            state: self.state().to_string(),
        }
    }

    fn reject(&self, err: ShellError) -> ShellError {
        self.shared.emit(SupervisorEvent::Error {
            code: err.code(),
            message: err.to_string(),
        });
        err
    }

    fn clear_crashed(&self) {
        let live = self.shared.live.lock().take();
        let _ = self.shared.state.send_replace(EngineState::Stopped);
        if let Some(live) = live {
            info!(pid = live.pid, instance_id = %live.instance_id, "engine crash acknowledged");
            live.kill.cancel();
        }
    }

    async fn launch(&self) -> Result<()> {
        let config = &self.config;
        binary::verify_executable(&config.binary_path)?;
        tokio::fs::create_dir_all(&config.work_dir)
            .await
            .map_err(|e| ShellError::Startup {
                reason: format!("cannot create work dir {}: {e}", config.work_dir.display()),
            })?;

        let mut child = Command::new(&config.binary_path)
            .args(&config.args)
            .current_dir(&config.work_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ShellError::Startup {
                reason: format!("failed to spawn {}: {e}", config.binary_path.display()),
            })?;

        let instance_id = Uuid::now_v7();
        let pid = child.id();
        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(ShellError::Startup {
                reason: "engine stdio pipes unavailable".into(),
            });
        };

        let (signal_tx, mut signal_rx) = mpsc::channel(2);
        let (writer_tx, writer_rx) = mpsc::channel(config.command_queue.max(1));
        let kill = CancellationToken::new();
        let (exit_tx, exit_rx) = watch::channel(None);

        let _ = tokio::spawn(write_stdin(stdin, writer_rx));
        let _ = tokio::spawn(read_stdout(
            stdout,
            signal_tx.clone(),
            Arc::clone(&self.shared),
            pid,
        ));
        let _ = tokio::spawn(read_stderr(stderr, signal_tx, pid));

        *self.shared.live.lock() = Some(Live {
            instance_id,
            pid,
            started_at: Utc::now(),
            writer: writer_tx,
            kill: kill.clone(),
            exit: exit_rx.clone(),
        });
        let _ = self.shared.state.send_replace(EngineState::Starting);
        let _ = tokio::spawn(monitor(
            child,
            kill.clone(),
            exit_tx,
            Arc::clone(&self.shared),
            instance_id,
        ));

        info!(
            pid,
            %instance_id,
            binary = %config.binary_path.display(),
            "engine spawned, waiting for readiness"
        );

        let outcome = tokio::select! {
            biased;
            signal = signal_rx.recv() => match signal {
                Some(StartupSignal::Ready) => Ok(()),
                Some(StartupSignal::Fatal(line)) => Err(ShellError::Startup {
                    reason: format!("engine reported a fatal error: {line}"),
                }),
                None => Err(ShellError::Startup {
                    reason: "engine closed its output before signalling readiness".into(),
                }),
            },
            code = wait_exit(exit_rx.clone()) => Err(ShellError::Startup {
                reason: format!("engine exited before readiness (exit code {code:?})"),
            }),
            () = tokio::time::sleep(config.startup_timeout) => Err(ShellError::StartupTimeout {
                timeout_ms: millis(config.startup_timeout),
            }),
        };

        match outcome {
            Ok(()) => {
                let _ = self.shared.state.send_replace(EngineState::Running);
                info!(pid, %instance_id, "engine ready");
                self.shared
                    .emit(SupervisorEvent::Started { instance_id, pid });
                // exited between readiness and the transition above
                let exited = *exit_rx.borrow();
                if let Some(exit) = exited {
                    let _ = self.shared.mark_crashed(instance_id, exit.code);
                }
                Ok(())
            }
            Err(err) => {
                warn!(pid, error = %err, "engine startup failed, killing process");
                kill.cancel();
                let _ = wait_exit(exit_rx).await;
                let _ = self.shared.live.lock().take();
                let _ = self.shared.state.send_replace(EngineState::Stopped);
                Err(err)
            }
        }
    }
}

#[async_trait]
impl CommandSink for Supervisor {
    async fn send_command(&self, envelope: Envelope) -> Result<()> {
        self.send(envelope).await
    }
}

async fn deliver(
    writer: &mpsc::Sender<WriteRequest>,
    envelope: Envelope,
    write_timeout: Duration,
) -> Result<()> {
    let closed = || ShellError::ProcessNotRunning {
        state: EngineState::Stopped.to_string(),
    };
    let (ack, done) = oneshot::channel();
    writer
        .try_send(WriteRequest { envelope, ack })
        .map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                warn!(capacity = writer.max_capacity(), "engine command queue full");
                ShellError::EngineStalled {
                    reason: "command queue full".into(),
                }
            }
            mpsc::error::TrySendError::Closed(_) => closed(),
        })?;
    match tokio::time::timeout(write_timeout, done).await {
        Ok(acked) => acked.map_err(|_| closed())?,
        Err(_) => {
            warn!(timeout_ms = millis(write_timeout), "engine did not accept command in time");
            Err(ShellError::EngineStalled {
                reason: format!("write not accepted within {}ms", millis(write_timeout)),
            })
        }
    }
}

async fn wait_exit(mut exit: watch::Receiver<Option<Exit>>) -> Option<i32> {
    let exited = exit.wait_for(Option::is_some).await.map(|e| *e);
    exited.ok().flatten().and_then(|e| e.code)
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

async fn monitor(
    mut child: Child,
    kill: CancellationToken,
    exit_tx: watch::Sender<Option<Exit>>,
    shared: Arc<Shared>,
    instance_id: Uuid,
) {
    let pid = child.id();
    let status = tokio::select! {
        status = child.wait() => status,
        () = kill.cancelled() => {
            debug!(pid, "killing engine process");
            if let Err(e) = child.start_kill() {
                warn!(pid, error = %e, "failed to kill engine process");
            }
            child.wait().await
        }
    };

    let code = match status {
        Ok(status) => status.code(),
        Err(e) => {
            warn!(pid, error = %e, "failed to wait for engine process");
            None
        }
    };

    // record the exit before the crash check so start() can observe it
    let _ = exit_tx.send_replace(Some(Exit { code }));
    if !shared.mark_crashed(instance_id, code) {
        debug!(pid, exit_code = ?code, "engine process exited");
    }
}

async fn write_stdin(stdin: ChildStdin, mut requests: mpsc::Receiver<WriteRequest>) {
    let mut sink = FramedWrite::new(stdin, LineCodec::new());
    while let Some(WriteRequest { envelope, ack }) = requests.recv().await {
        let result = sink.send(envelope).await;
        let failed = result.is_err();
        if let Err(ref e) = result {
            warn!(error = %e, "engine stdin write failed");
        }
        let _ = ack.send(result);
        if failed {
            break;
        }
    }
    debug!("engine stdin writer finished");
}

async fn read_stdout(
    stdout: ChildStdout,
    signal: mpsc::Sender<StartupSignal>,
    shared: Arc<Shared>,
    pid: Option<u32>,
) {
    let mut signal = Some(signal);
    let reader = InspectReader::new(stdout, move |chunk: &[u8]| {
        if !chunk.is_empty() {
            if let Some(tx) = signal.take() {
                let _ = tx.try_send(StartupSignal::Ready);
            }
        }
    });

    let envelopes = decode_stream(reader);
    tokio::pin!(envelopes);
    while let Some(envelope) = envelopes.next().await {
        debug!(pid, kind = envelope.kind(), "engine output");
        shared.emit(SupervisorEvent::Output(envelope));
    }
    debug!(pid, "engine stdout closed");
}

async fn read_stderr(stderr: ChildStderr, signal: mpsc::Sender<StartupSignal>, pid: Option<u32>) {
    let mut signal = Some(signal);
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if let Some(tx) = signal.take() {
                    let first = if line.to_ascii_lowercase().contains("fatal") {
                        StartupSignal::Fatal(line.clone())
                    } else {
                        StartupSignal::Ready
                    };
                    let _ = tx.try_send(first);
                }
                info!(pid, line = %line, "engine stderr");
            }
            Ok(None) => break,
            Err(e) => {
                warn!(pid, error = %e, "engine stderr read failed");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn missing_binary() -> (tempfile::TempDir, Supervisor) {
        let dir = tempfile::tempdir().unwrap();
        let config = SupervisorConfig::new(dir.path().join("no-engine"), dir.path().join("work"));
        (dir, Supervisor::new(config))
    }

    #[test]
    fn state_names() {
        assert_eq!(EngineState::Running.to_string(), "running");
        assert_eq!(
            serde_json::to_value(EngineState::Crashed).unwrap(),
            serde_json::json!("crashed")
        );
    }

    #[test]
    fn config_from_settings() {
        let settings = EngineSettings {
            binary_path: Some("/opt/engine/bin".into()),
            work_dir: Some("/tmp/engine".into()),
            startup_timeout_ms: 500,
            ..EngineSettings::default()
        };
        let config = SupervisorConfig::from_settings(&settings);
        assert_eq!(config.binary_path, PathBuf::from("/opt/engine/bin"));
        assert_eq!(config.work_dir, PathBuf::from("/tmp/engine"));
        assert_eq!(config.startup_timeout, Duration::from_millis(500));
        assert_eq!(config.write_timeout, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn send_while_stopped_is_rejected() {
        let (_dir, sup) = missing_binary();
        let mut events = sup.subscribe();

        let err = sup
            .send(Envelope::new("NAVIGATE").with("url", "https://a"))
            .await
            .unwrap_err();
        assert_matches!(err, ShellError::ProcessNotRunning { ref state } if state == "stopped");

        let event = events.recv().await.unwrap();
        assert_matches!(event, SupervisorEvent::Error { code: "PROCESS_NOT_RUNNING", .. });
    }

    #[tokio::test]
    async fn missing_binary_fails_start() {
        let (_dir, sup) = missing_binary();
        let mut events = sup.subscribe();

        let err = sup.start().await.unwrap_err();
        assert_matches!(err, ShellError::Startup { .. });
        assert_eq!(sup.state(), EngineState::Stopped);
        assert!(sup.process().is_none());
        assert_matches!(
            events.recv().await.unwrap(),
            SupervisorEvent::Error { code: "STARTUP_FAILED", .. }
        );
    }

    #[tokio::test]
    async fn stop_when_stopped_is_noop() {
        let (_dir, sup) = missing_binary();
        sup.stop().await.unwrap();
        assert_eq!(sup.state(), EngineState::Stopped);
        assert!(!sup.acknowledge_crash().await);
    }

    #[tokio::test]
    async fn command_sink_delegates_to_send() {
        let (_dir, sup) = missing_binary();
        let sink: &dyn CommandSink = &sup;
        assert_matches!(
            sink.send_command(Envelope::new("CLOSE_TAB")).await,
            Err(ShellError::ProcessNotRunning { .. })
        );
    }
}
