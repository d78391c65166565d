//! # shell-host
//!
//! Browser shell host binary. `serve` supervises the rendering engine and
//! runs the broadcast hub; `watch` attaches a sync agent to a running hub and
//! prints every envelope it receives.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use shell_client::{AgentConfig, SyncAgent, WILDCARD};
use shell_core::protocol::kind;
use shell_core::{Envelope, logging};
use shell_engine::{CommandSink, Supervisor, SupervisorConfig, TabRegistry};
use shell_server::ShellServer;
use shell_server::config::ServerConfig;
use shell_settings::ShellSettings;

/// Browser shell host.
#[derive(Parser, Debug)]
#[command(name = "shell-host", about = "Browser shell engine host and broadcast hub")]
struct Cli {
    /// Settings file (defaults to `~/.browser-shell/settings.json`).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the engine and the hub (default).
    Serve(ServeArgs),
    /// Connect to a hub and print its events.
    Watch(WatchArgs),
}

#[derive(Args, Debug, Default)]
struct ServeArgs {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Engine binary (overrides the versioned install layout).
    #[arg(long)]
    engine_path: Option<PathBuf>,

    /// Run the hub without launching the engine.
    #[arg(long)]
    no_engine: bool,
}

#[derive(Args, Debug)]
struct WatchArgs {
    /// Hub WebSocket URL (overrides settings).
    #[arg(long)]
    url: Option<String>,

    /// Send a `NAVIGATE` for this URL once connected.
    #[arg(long)]
    navigate: Option<String>,
}

impl Cli {
    fn load_settings(&self) -> Result<ShellSettings> {
        let path = self
            .settings
            .clone()
            .unwrap_or_else(shell_settings::settings_path);
        shell_settings::load_settings_from_path(&path)
            .with_context(|| format!("failed to load settings from {}", path.display()))
    }
}

impl ServeArgs {
    fn apply(&self, settings: &mut ShellSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(path) = &self.engine_path {
            settings.engine.binary_path = Some(path.display().to_string());
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut settings = cli.load_settings()?;
    if cli.log_json {
        settings.logging.format = logging::LogFormat::Json;
    }
    logging::init_subscriber(&settings.logging.level, settings.logging.format);

    match cli.command {
        Some(Command::Watch(args)) => watch(args, &settings).await,
        Some(Command::Serve(args)) => serve(&args, settings).await,
        None => serve(&ServeArgs::default(), settings).await,
    }
}

async fn serve(args: &ServeArgs, mut settings: ShellSettings) -> Result<()> {
    args.apply(&mut settings);

    let supervisor = Arc::new(Supervisor::new(SupervisorConfig::from_settings(
        &settings.engine,
    )));
    let registry = Arc::new(TabRegistry::new(
        Arc::clone(&supervisor) as Arc<dyn CommandSink>
    ));
    let server = ShellServer::new(
        ServerConfig::from(&settings.server),
        Arc::clone(&supervisor),
        registry,
    );

    let (addr, handle) = server.listen().await.context("failed to bind server")?;
    tracing::info!("browser shell hub listening on ws://{addr}/ws");

    if args.no_engine {
        tracing::info!("engine launch skipped");
    } else if let Err(e) = supervisor.start().await {
        // the hub stays up; tab commands fail with PROCESS_NOT_RUNNING
        tracing::error!(
            error = %e,
            path = %settings.engine.resolved_binary_path().display(),
            "engine failed to start"
        );
    }

    server.shutdown().shutdown_on_ctrl_c().await;
    tracing::info!("shutting down");
    let _ = handle.await;

    if let Err(e) = supervisor.stop().await {
        tracing::warn!(error = %e, "engine did not stop cleanly");
    }
    tracing::info!("shutdown complete");
    Ok(())
}

async fn watch(args: WatchArgs, settings: &ShellSettings) -> Result<()> {
    let mut config = AgentConfig::from(&settings.client);
    if let Some(url) = args.url {
        config.url = url;
    }
    tracing::info!(url = %config.url, "watching hub");

    let agent = SyncAgent::spawn_ws(config);
    let _ = agent.subscribe(WILDCARD, |envelope: &Envelope| {
        println!("{}", serde_json::to_string(envelope)?);
        Ok(())
    });
    agent.connect();
    if let Some(url) = args.navigate {
        agent.send(kind::NAVIGATE, serde_json::json!({ "url": url }));
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    agent.shutdown();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_subcommand_means_serve_defaults() {
        let cli = Cli::parse_from(["shell-host"]);
        assert!(cli.command.is_none());
        assert!(cli.settings.is_none());
        assert!(!cli.log_json);
    }

    #[test]
    fn serve_overrides_apply_to_settings() {
        let cli = Cli::parse_from([
            "shell-host",
            "serve",
            "--host",
            "0.0.0.0",
            "--port",
            "8080",
            "--engine-path",
            "/opt/engine/render",
        ]);
        let Some(Command::Serve(args)) = cli.command else {
            panic!("expected serve");
        };
        let mut settings = ShellSettings::default();
        args.apply(&mut settings);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.server.port, 8080);
        assert_eq!(
            settings.engine.resolved_binary_path(),
            PathBuf::from("/opt/engine/render")
        );
    }

    #[test]
    fn unset_overrides_keep_settings() {
        let mut settings = ShellSettings::default();
        ServeArgs::default().apply(&mut settings);
        assert_eq!(settings.server.port, 9340);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert!(settings.engine.binary_path.is_none());
    }

    #[test]
    fn global_flags_follow_the_subcommand() {
        let cli = Cli::parse_from([
            "shell-host",
            "watch",
            "--url",
            "ws://10.0.0.2:9340/ws",
            "--settings",
            "/tmp/s.json",
            "--log-json",
        ]);
        assert!(cli.log_json);
        assert_eq!(cli.settings, Some(PathBuf::from("/tmp/s.json")));
        let Some(Command::Watch(args)) = cli.command else {
            panic!("expected watch");
        };
        assert_eq!(args.url.as_deref(), Some("ws://10.0.0.2:9340/ws"));
        assert!(args.navigate.is_none());
    }

    #[test]
    fn missing_settings_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.json");
        let cli = Cli::parse_from(["shell-host", "--settings", path.to_str().unwrap()]);
        let settings = cli.load_settings().unwrap();
        assert_eq!(settings.server.port, 9340);
    }

    #[test]
    fn invalid_settings_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();
        let cli = Cli::parse_from(["shell-host", "--settings", path.to_str().unwrap()]);
        let err = cli.load_settings().unwrap_err();
        assert!(err.to_string().contains("failed to load settings"));
    }

    #[tokio::test]
    async fn hub_serves_health_without_engine() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = Arc::new(Supervisor::new(SupervisorConfig::new(
            dir.path().join("no-engine"),
            dir.path().join("work"),
        )));
        let registry = Arc::new(TabRegistry::new(
            Arc::clone(&supervisor) as Arc<dyn CommandSink>
        ));
        let server = ShellServer::new(ServerConfig::default(), supervisor, registry);
        let (addr, handle) = server.listen().await.unwrap();

        let resp = reqwest::get(format!("http://{addr}/health")).await.unwrap();
        assert!(resp.status().is_success());

        server.shutdown().shutdown();
        handle.await.unwrap();
    }
}
