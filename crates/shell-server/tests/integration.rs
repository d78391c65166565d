//! End-to-end checks against a real listener.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use shell_core::{Envelope, codec};
use shell_engine::{CommandSink, Supervisor, SupervisorConfig, SupervisorEvent, TabRegistry};
use shell_server::ShellServer;
use shell_server::config::ServerConfig;
use tempfile::TempDir;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(5);

/// Signals readiness, then echoes stdin back to stdout.
const ECHO_ENGINE: &str = r#"
echo '{"type":"READY"}'
while IFS= read -r line; do
  printf '%s\n' "$line"
done
"#;

/// Signals readiness and exits with code 3 after the first command.
const ONE_SHOT_ENGINE: &str = r#"
echo '{"type":"READY"}'
read -r line
exit 3
"#;

struct Harness {
    _dir: TempDir,
    supervisor: Arc<Supervisor>,
    server: ShellServer,
    addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl Harness {
    async fn start(script: &str, config: ServerConfig) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let script_path = dir.path().join("engine.sh");
        std::fs::write(&script_path, script).unwrap();

        let mut sup_config = SupervisorConfig::new("/bin/sh", dir.path().join("work"));
        sup_config.args = vec![script_path.display().to_string()];
        sup_config.startup_timeout = WAIT;
        sup_config.stop_grace = Duration::from_millis(500);
        let supervisor = Arc::new(Supervisor::new(sup_config));

        let registry = Arc::new(TabRegistry::new(
            Arc::clone(&supervisor) as Arc<dyn CommandSink>
        ));
        let server = ShellServer::new(config, Arc::clone(&supervisor), registry);
        let (addr, handle) = server.listen().await.unwrap();
        Self {
            _dir: dir,
            supervisor,
            server,
            addr,
            handle,
        }
    }

    async fn connect(&self) -> Ws {
        let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws", self.addr))
            .await
            .unwrap();
        ws
    }

    async fn health(&self) -> serde_json::Value {
        reqwest::get(format!("http://{}/health", self.addr))
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }

    async fn wait_for_connections(&self, n: u64) {
        tokio::time::timeout(WAIT, async {
            while self.health().await["connections"].as_u64() != Some(n) {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("connection count never settled");
    }

    async fn shutdown(self) {
        self.server.shutdown().shutdown();
        let _ = tokio::time::timeout(WAIT, self.handle).await;
        let _ = self.supervisor.stop().await;
    }
}

async fn send(ws: &mut Ws, json: &str) {
    ws.send(Message::Text(json.into())).await.unwrap();
}

async fn recv(ws: &mut Ws) -> Envelope {
    tokio::time::timeout(WAIT, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    if let Some(env) = codec::decode_frame(text.as_str()).into_iter().next() {
                        return env;
                    }
                }
                Some(Ok(_)) => {}
                other => panic!("socket ended: {other:?}"),
            }
        }
    })
    .await
    .expect("timed out waiting for envelope")
}

async fn assert_silent(ws: &mut Ws, window: Duration) {
    if let Ok(msg) = tokio::time::timeout(window, ws.next()).await {
        panic!("expected no traffic, got {msg:?}");
    }
}

async fn wait_closed(ws: &mut Ws) {
    tokio::time::timeout(WAIT, async {
        loop {
            match ws.next().await {
                None | Some(Err(_) | Ok(Message::Close(_))) => return,
                Some(Ok(_)) => {}
            }
        }
    })
    .await
    .expect("socket was not closed");
}

async fn next_output(rx: &mut broadcast::Receiver<SupervisorEvent>, kind: &str) -> Envelope {
    tokio::time::timeout(WAIT, async {
        loop {
            if let SupervisorEvent::Output(env) = rx.recv().await.unwrap() {
                if env.is(kind) {
                    return env;
                }
            }
        }
    })
    .await
    .expect("engine never echoed the command")
}

#[cfg(unix)]
#[tokio::test]
async fn navigate_reaches_engine_and_other_clients_only() {
    let hub = Harness::start(ECHO_ENGINE, ServerConfig::default()).await;
    hub.supervisor.start().await.unwrap();
    let mut engine_out = hub.supervisor.subscribe();

    let mut a = hub.connect().await;
    let mut b = hub.connect().await;
    let mut c = hub.connect().await;
    hub.wait_for_connections(3).await;

    send(&mut a, r#"{"type":"NAVIGATE","url":"https://example.com"}"#).await;

    let echoed = next_output(&mut engine_out, "NAVIGATE").await;
    assert_eq!(echoed.get_str("url"), Some("https://example.com"));
    for ws in [&mut b, &mut c] {
        let env = recv(ws).await;
        assert!(env.is("NAVIGATE"));
        assert_eq!(env.get_str("url"), Some("https://example.com"));
    }
    assert_silent(&mut a, Duration::from_millis(300)).await;

    hub.shutdown().await;
}

#[cfg(unix)]
#[tokio::test]
async fn new_tab_is_announced_to_every_client() {
    let hub = Harness::start(ECHO_ENGINE, ServerConfig::default()).await;
    hub.supervisor.start().await.unwrap();

    let mut a = hub.connect().await;
    let mut b = hub.connect().await;
    hub.wait_for_connections(2).await;

    send(&mut a, r#"{"type":"NEW_TAB","url":"https://a.test"}"#).await;
    for ws in [&mut a, &mut b] {
        let env = recv(ws).await;
        assert!(env.is("TAB_CREATED"));
        assert_eq!(env.get_u64("tabId"), Some(1));
    }

    let tabs: serde_json::Value = reqwest::get(format!("http://{}/tabs", hub.addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(tabs[0]["url"], "https://a.test");

    send(&mut b, r#"{"type":"CLOSE_TAB","tabId":1}"#).await;
    for ws in [&mut a, &mut b] {
        assert!(recv(ws).await.is("TAB_CLOSED"));
    }

    hub.shutdown().await;
}

#[cfg(unix)]
#[tokio::test]
async fn engine_crash_is_announced() {
    let hub = Harness::start(ONE_SHOT_ENGINE, ServerConfig::default()).await;
    let mut a = hub.connect().await;
    hub.wait_for_connections(1).await;

    hub.supervisor.start().await.unwrap();
    hub.supervisor
        .send(Envelope::new("NAVIGATE").with("url", "about:blank"))
        .await
        .unwrap();

    let env = recv(&mut a).await;
    assert!(env.is("ENGINE_CRASHED"));
    assert_eq!(env.get("exitCode"), Some(&serde_json::json!(3)));

    hub.shutdown().await;
}

#[tokio::test]
async fn failures_are_reported_to_the_sender_only() {
    let hub = Harness::start(ECHO_ENGINE, ServerConfig::default()).await;
    let mut a = hub.connect().await;
    let mut b = hub.connect().await;
    hub.wait_for_connections(2).await;

    send(&mut a, r#"{"type":"CLOSE_TAB","tabId":42}"#).await;
    let env = recv(&mut a).await;
    assert!(env.is("ERROR"));
    assert_eq!(env.get_str("code"), Some("NOT_FOUND"));

    send(&mut a, r#"{"type":"NAVIGATE","url":"https://example.com"}"#).await;
    let env = recv(&mut a).await;
    assert_eq!(env.get_str("code"), Some("PROCESS_NOT_RUNNING"));

    assert_silent(&mut b, Duration::from_millis(300)).await;
    hub.shutdown().await;
}

#[tokio::test]
async fn client_ping_gets_pong() {
    let hub = Harness::start(ECHO_ENGINE, ServerConfig::default()).await;
    let mut a = hub.connect().await;

    send(&mut a, r#"{"type":"PING"}"#).await;
    assert!(recv(&mut a).await.is("PONG"));

    hub.shutdown().await;
}

#[tokio::test]
async fn published_events_reach_clients() {
    let hub = Harness::start(ECHO_ENGINE, ServerConfig::default()).await;
    let mut a = hub.connect().await;
    hub.wait_for_connections(1).await;

    let resp: serde_json::Value = reqwest::Client::new()
        .post(format!("http://{}/events", hub.addr))
        .json(&serde_json::json!({"type": "BOOKMARK_ADDED", "url": "https://a.test"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(resp["recipients"], 1);

    let env = recv(&mut a).await;
    assert!(env.is("BOOKMARK_ADDED"));

    hub.shutdown().await;
}

#[cfg(unix)]
#[tokio::test]
async fn published_tab_updates_reach_the_registry() {
    let hub = Harness::start(ECHO_ENGINE, ServerConfig::default()).await;
    hub.supervisor.start().await.unwrap();
    let mut a = hub.connect().await;
    hub.wait_for_connections(1).await;

    send(&mut a, r#"{"type":"NEW_TAB","url":"https://a.test"}"#).await;
    assert!(recv(&mut a).await.is("TAB_CREATED"));

    let client = reqwest::Client::new();
    for update in [
        serde_json::json!({"type": "TITLE_CHANGED", "tabId": 1, "title": "Hello"}),
        serde_json::json!({"type": "FAVICON_CHANGED", "tabId": 1, "favicon": "https://a.test/icon.png"}),
        serde_json::json!({"type": "URL_CHANGED", "tabId": 1, "url": "https://a.test/next"}),
        serde_json::json!({"type": "TITLE_CHANGED", "tabId": 42, "title": "Gone"}),
    ] {
        let resp = client
            .post(format!("http://{}/events", hub.addr))
            .json(&update)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::ACCEPTED);
    }

    assert_eq!(recv(&mut a).await.get_str("title"), Some("Hello"));
    assert!(recv(&mut a).await.is("FAVICON_CHANGED"));
    assert!(recv(&mut a).await.is("URL_CHANGED"));
    assert_silent(&mut a, Duration::from_millis(200)).await;

    let tabs: serde_json::Value = reqwest::get(format!("http://{}/tabs", hub.addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(tabs.as_array().unwrap().len(), 1);
    assert_eq!(tabs[0]["title"], "Hello");
    assert_eq!(tabs[0]["favicon"], "https://a.test/icon.png");
    assert_eq!(tabs[0]["url"], "https://a.test/next");

    hub.shutdown().await;
}

#[tokio::test]
async fn upgrades_beyond_limit_get_503() {
    let config = ServerConfig {
        max_connections: 1,
        ..ServerConfig::default()
    };
    let hub = Harness::start(ECHO_ENGINE, config).await;
    let _a = hub.connect().await;
    hub.wait_for_connections(1).await;

    let err = tokio_tungstenite::connect_async(format!("ws://{}/ws", hub.addr))
        .await
        .unwrap_err();
    match err {
        tungstenite::Error::Http(resp) => assert_eq!(resp.status(), 503),
        other => panic!("expected HTTP 503, got {other:?}"),
    }

    hub.shutdown().await;
}

#[tokio::test]
async fn silent_client_is_disconnected() {
    let config = ServerConfig {
        heartbeat_interval: Duration::from_millis(200),
        pong_timeout: Duration::from_millis(100),
        ..ServerConfig::default()
    };
    let hub = Harness::start(ECHO_ENGINE, config).await;
    let mut a = hub.connect().await;

    assert!(recv(&mut a).await.is("PING"));
    wait_closed(&mut a).await;
    hub.wait_for_connections(0).await;

    hub.shutdown().await;
}

#[tokio::test]
async fn answered_pings_keep_the_connection() {
    let config = ServerConfig {
        heartbeat_interval: Duration::from_millis(100),
        pong_timeout: Duration::from_millis(200),
        ..ServerConfig::default()
    };
    let hub = Harness::start(ECHO_ENGINE, config).await;
    let mut a = hub.connect().await;

    for _ in 0..3 {
        assert!(recv(&mut a).await.is("PING"));
        send(&mut a, r#"{"type":"PONG"}"#).await;
    }
    assert_eq!(hub.health().await["connections"], 1);

    hub.shutdown().await;
}

#[tokio::test]
async fn shutdown_closes_sessions() {
    let hub = Harness::start(ECHO_ENGINE, ServerConfig::default()).await;
    let mut a = hub.connect().await;
    hub.wait_for_connections(1).await;

    hub.server.shutdown().shutdown();
    wait_closed(&mut a).await;
    hub.shutdown().await;
}
