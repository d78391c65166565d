//! Supervisor lifecycle against scripted fake engines.
#![cfg(unix)]

use std::time::Duration;

use assert_matches::assert_matches;
use shell_core::{Envelope, ShellError};
use shell_engine::{EngineState, Supervisor, SupervisorConfig, SupervisorEvent};
use tempfile::TempDir;
use tokio::sync::broadcast;

/// Signals readiness, records each spawn, then echoes stdin back to stdout.
const ECHO_ENGINE: &str = r#"
echo spawn >> spawns.log
echo '{"type":"READY"}'
while IFS= read -r line; do
  printf '%s\n' "$line"
done
"#;

fn engine(script: &str) -> (TempDir, Supervisor) {
    engine_with(script, |_| {})
}

fn engine_with(script: &str, tweak: impl FnOnce(&mut SupervisorConfig)) -> (TempDir, Supervisor) {
    let dir = tempfile::tempdir().unwrap();
    let script_path = dir.path().join("engine.sh");
    std::fs::write(&script_path, script).unwrap();

    let mut config = SupervisorConfig::new("/bin/sh", dir.path().join("work"));
    config.args = vec![script_path.display().to_string()];
    config.startup_timeout = Duration::from_secs(5);
    config.stop_grace = Duration::from_millis(500);
    tweak(&mut config);
    (dir, Supervisor::new(config))
}

fn spawn_count(dir: &TempDir) -> usize {
    std::fs::read_to_string(dir.path().join("work").join("spawns.log"))
        .map(|s| s.lines().count())
        .unwrap_or(0)
}

async fn next_event<F>(rx: &mut broadcast::Receiver<SupervisorEvent>, mut pred: F) -> SupervisorEvent
where
    F: FnMut(&SupervisorEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = rx.recv().await.unwrap();
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for supervisor event")
}

#[tokio::test]
async fn start_reaches_running_and_commands_reach_stdin() {
    let (_dir, sup) = engine(ECHO_ENGINE);
    let mut events = sup.subscribe();

    sup.start().await.unwrap();
    assert_eq!(sup.state(), EngineState::Running);
    let process = sup.process().unwrap();
    assert!(process.pid.is_some());

    sup.send(Envelope::new("NAVIGATE").with("url", "https://example.com"))
        .await
        .unwrap();

    let echoed = next_event(&mut events, |e| {
        matches!(e, SupervisorEvent::Output(env) if env.is("NAVIGATE"))
    })
    .await;
    assert_matches!(echoed, SupervisorEvent::Output(env) if env.get_str("url") == Some("https://example.com"));

    sup.stop().await.unwrap();
}

#[tokio::test]
async fn second_start_spawns_nothing() {
    let (dir, sup) = engine(ECHO_ENGINE);

    sup.start().await.unwrap();
    let first = sup.process().unwrap().instance_id;
    sup.start().await.unwrap();

    assert_eq!(sup.process().unwrap().instance_id, first);
    assert_eq!(spawn_count(&dir), 1);
    sup.stop().await.unwrap();
}

#[tokio::test]
async fn concurrent_starts_spawn_one_process() {
    let (dir, sup) = engine(ECHO_ENGINE);

    let (a, b) = tokio::join!(sup.start(), sup.start());
    a.unwrap();
    b.unwrap();

    assert_eq!(sup.state(), EngineState::Running);
    assert_eq!(spawn_count(&dir), 1);
    sup.stop().await.unwrap();
}

#[tokio::test]
async fn restart_yields_new_process_identity() {
    let (dir, sup) = engine(ECHO_ENGINE);
    let mut events = sup.subscribe();

    sup.start().await.unwrap();
    let first = sup.process().unwrap();

    sup.stop().await.unwrap();
    assert_eq!(sup.state(), EngineState::Stopped);
    assert!(sup.process().is_none());
    let stopped = next_event(&mut events, |e| matches!(e, SupervisorEvent::Stopped { .. })).await;
    assert_matches!(stopped, SupervisorEvent::Stopped { instance_id, exit_code: Some(0) } if instance_id == first.instance_id);

    sup.start().await.unwrap();
    let second = sup.process().unwrap();
    assert_ne!(first.instance_id, second.instance_id);
    assert_eq!(spawn_count(&dir), 2);

    sup.stop().await.unwrap();
}

#[tokio::test]
async fn malformed_output_line_does_not_stop_later_lines() {
    let (_dir, sup) = engine(
        r#"
echo '{"type":"READY"}'
echo 'this is not json'
echo '{"type":"URL_CHANGED","tabId":1,"url":"https://a.test"}'
cat > /dev/null
"#,
    );
    let mut events = sup.subscribe();
    sup.start().await.unwrap();

    let mut kinds = Vec::new();
    while kinds.len() < 2 {
        if let SupervisorEvent::Output(env) =
            next_event(&mut events, |e| matches!(e, SupervisorEvent::Output(_))).await
        {
            kinds.push(env.kind().to_owned());
        }
    }
    assert_eq!(kinds, vec!["READY", "URL_CHANGED"]);

    sup.stop().await.unwrap();
}

#[tokio::test]
async fn stderr_output_counts_as_readiness() {
    let (_dir, sup) = engine("echo 'engine booting' >&2\ncat > /dev/null\n");
    sup.start().await.unwrap();
    assert_eq!(sup.state(), EngineState::Running);
    sup.stop().await.unwrap();
}

#[tokio::test]
async fn fatal_stderr_line_fails_startup() {
    let (_dir, sup) = engine("echo 'FATAL: gpu process failed' >&2\nexec sleep 30\n");
    let mut events = sup.subscribe();

    let err = sup.start().await.unwrap_err();
    assert_matches!(err, ShellError::Startup { ref reason } if reason.contains("gpu process failed"));
    assert_eq!(sup.state(), EngineState::Stopped);
    assert!(sup.process().is_none());

    let event = next_event(&mut events, |e| matches!(e, SupervisorEvent::Error { .. })).await;
    assert_matches!(event, SupervisorEvent::Error { code: "STARTUP_FAILED", .. });
}

#[tokio::test]
async fn exit_before_readiness_fails_startup() {
    let (_dir, sup) = engine("exit 3\n");
    assert_matches!(sup.start().await, Err(ShellError::Startup { .. }));
    assert_eq!(sup.state(), EngineState::Stopped);
}

#[tokio::test]
async fn silent_engine_times_out_and_is_killed() {
    let (dir, _) = engine("exec sleep 30\n");
    let mut config = SupervisorConfig::new("/bin/sh", dir.path().join("work"));
    config.args = vec![dir.path().join("engine.sh").display().to_string()];
    config.startup_timeout = Duration::from_millis(300);
    let sup = Supervisor::new(config);

    let err = sup.start().await.unwrap_err();
    assert_matches!(err, ShellError::StartupTimeout { timeout_ms: 300 });
    assert_eq!(sup.state(), EngineState::Stopped);
    assert!(sup.process().is_none());
}

#[tokio::test]
async fn unexpected_exit_is_a_crash() {
    let (_dir, sup) = engine("echo '{\"type\":\"READY\"}'\nread -r line\nexit 7\n");
    let mut events = sup.subscribe();
    let mut state = sup.subscribe_state();

    sup.start().await.unwrap();
    sup.send(Envelope::new("CLOSE_TAB").with("tabId", 1)).await.unwrap();

    let crashed = next_event(&mut events, |e| matches!(e, SupervisorEvent::Crashed { .. })).await;
    assert_matches!(crashed, SupervisorEvent::Crashed { exit_code: Some(7), .. });
    tokio::time::timeout(
        Duration::from_secs(5),
        state.wait_for(|s| *s == EngineState::Crashed),
    )
    .await
    .unwrap()
    .unwrap();

    assert_matches!(
        sup.send(Envelope::new("NAVIGATE").with("url", "https://a.test")).await,
        Err(ShellError::ProcessNotRunning { ref state }) if state == "crashed"
    );

    assert!(sup.acknowledge_crash().await);
    assert_eq!(sup.state(), EngineState::Stopped);
}

#[tokio::test]
async fn start_after_crash_acknowledges_and_restarts() {
    let (dir, sup) = engine(
        r#"
echo spawn >> spawns.log
echo '{"type":"READY"}'
read -r line
exit 1
"#,
    );
    let mut events = sup.subscribe();

    sup.start().await.unwrap();
    sup.send(Envelope::new("PING")).await.unwrap();
    let _ = next_event(&mut events, |e| matches!(e, SupervisorEvent::Crashed { .. })).await;

    sup.start().await.unwrap();
    assert_eq!(sup.state(), EngineState::Running);
    assert_eq!(spawn_count(&dir), 2);
    sup.stop().await.unwrap();
}

#[tokio::test]
async fn stop_kills_engine_that_ignores_stdin_close() {
    let (_dir, sup) = engine("echo '{\"type\":\"READY\"}'\nexec sleep 30\n");
    sup.start().await.unwrap();

    let started = std::time::Instant::now();
    sup.stop().await.unwrap();
    assert_eq!(sup.state(), EngineState::Stopped);
    assert!(started.elapsed() >= Duration::from_millis(500));
}

#[tokio::test]
async fn stop_from_crashed_acknowledges() {
    let (_dir, sup) = engine("echo '{\"type\":\"READY\"}'\nread -r line\nexit 2\n");
    let mut events = sup.subscribe();
    sup.start().await.unwrap();
    sup.send(Envelope::new("PING")).await.unwrap();
    let _ = next_event(&mut events, |e| matches!(e, SupervisorEvent::Crashed { .. })).await;

    sup.stop().await.unwrap();
    assert_eq!(sup.state(), EngineState::Stopped);
}

#[tokio::test]
async fn stop_waits_for_pending_start() {
    let (_dir, sup) = engine(
        r#"
sleep 1
echo '{"type":"READY"}'
while IFS= read -r line; do :; done
"#,
    );

    let stop_later = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(sup.state(), EngineState::Starting);
        sup.stop().await
    };
    let (started, stopped) = tokio::time::timeout(Duration::from_secs(10), async {
        tokio::join!(sup.start(), stop_later)
    })
    .await
    .expect("stop() hung behind a pending start()");

    started.unwrap();
    stopped.unwrap();
    assert_eq!(sup.state(), EngineState::Stopped);
    assert!(sup.process().is_none());
}

#[tokio::test]
async fn engine_that_stops_reading_does_not_block_send() {
    let (_dir, sup) = engine_with("echo '{\"type\":\"READY\"}'\nexec sleep 30\n", |config| {
        config.command_queue = 2;
        config.write_timeout = Duration::from_millis(200);
    });
    let mut events = sup.subscribe();
    sup.start().await.unwrap();

    let url = format!("https://example.com/{}", "a".repeat(4096));
    let err = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if let Err(e) = sup.send(Envelope::new("NAVIGATE").with("url", url.as_str())).await {
                return e;
            }
        }
    })
    .await
    .expect("send() blocked on a stalled engine");

    assert_matches!(err, ShellError::EngineStalled { .. });
    assert_eq!(sup.state(), EngineState::Running);
    let rejected = next_event(&mut events, |e| matches!(e, SupervisorEvent::Error { .. })).await;
    assert_matches!(rejected, SupervisorEvent::Error { code: "ENGINE_STALLED", .. });

    // queue full: refused without waiting for the timeout
    let started = std::time::Instant::now();
    for _ in 0..3 {
        let _ = sup.send(Envelope::new("NAVIGATE").with("url", url.as_str())).await;
    }
    let err = sup
        .send(Envelope::new("NAVIGATE").with("url", url.as_str()))
        .await
        .unwrap_err();
    assert_matches!(err, ShellError::EngineStalled { ref reason } if reason.contains("queue full"));
    assert!(started.elapsed() < Duration::from_secs(2));

    sup.stop().await.unwrap();
    assert_eq!(sup.state(), EngineState::Stopped);
}
