//! # counsel-gateway
//!
//! Gateway binary. `serve` owns the sockets and runs the event listener
//! in-process; `listen` runs only the listener and pushes to a remote
//! gateway through its connection-management API. Both purge expired cache
//! entries on an interval. `call` invokes one action through a running
//! gateway's REST adapter; `publish` puts one event on the bus for the
//! listener, e.g. `cacheInvalidated` after a write made outside the gateway.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use counsel_core::MessageId;
use counsel_core::logging::{LogFormat, init_subscriber};
use counsel_realtime::{EventTransport, ListenerWorker, TaggedCache};
use counsel_rpc::{CallResult, ClientOptions, HttpClient};
use counsel_server::metrics::install_recorder;
use counsel_server::{AppContext, CounselServer, ShutdownCoordinator, build_listener, http_endpoints};
use counsel_settings::{CounselSettings, load_settings_from_path, settings_path};
use serde_json::Value;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Counsel real-time gateway.
#[derive(Parser, Debug)]
#[command(name = "counsel-gateway", about = "Counsel real-time gateway")]
struct Cli {
    /// Settings file (defaults to `~/.counsel/settings.json`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// `SQLite` database path (overrides settings).
    #[arg(long, global = true)]
    db_path: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve HTTP and `WebSocket` and run the event listener.
    Serve {
        /// Host to bind (overrides settings).
        #[arg(long)]
        host: Option<String>,
        /// Port to bind, 0 for auto-assign (overrides settings).
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run only the event listener, pushing through a remote gateway.
    Listen {
        /// Base URL of the gateway that owns the sockets (overrides settings).
        #[arg(long)]
        callback_url: Option<String>,
    },
    /// Invoke one action through a running gateway's REST adapter.
    Call {
        /// Action name, e.g. `updateStatus`.
        action: String,
        /// JSON request body.
        #[arg(long, default_value = "{}")]
        body: String,
        /// Gateway base URL (defaults to the configured host and port).
        #[arg(long)]
        url: Option<String>,
        /// Bearer token.
        #[arg(long)]
        token: Option<String>,
    },
    /// Publish one event to the bus.
    Publish {
        /// Event name, e.g. `cacheInvalidated`.
        event: String,
        /// JSON payload.
        #[arg(long)]
        payload: String,
    },
}

impl Cli {
    fn load_settings(&self) -> Result<CounselSettings> {
        let path = self.config.clone().unwrap_or_else(settings_path);
        let mut settings = load_settings_from_path(&path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?;
        if let Some(db_path) = &self.db_path {
            settings.database.path = Some(db_path.clone());
        }
        match &self.command {
            Command::Serve { host, port } => {
                if let Some(host) = host {
                    settings.server.host.clone_from(host);
                }
                if let Some(port) = port {
                    settings.server.port = *port;
                }
                // Pushes from an in-process listener go straight to local sockets.
                settings.server.callback_url = None;
            }
            Command::Listen { callback_url } => {
                if let Some(url) = callback_url {
                    settings.server.callback_url = Some(url.clone());
                }
            }
            Command::Call { .. } | Command::Publish { .. } => {}
        }
        Ok(settings)
    }
}

fn spawn_listener(app: &AppContext, coordinator: &ShutdownCoordinator) -> Result<()> {
    let listener = build_listener(app).context("Failed to build event listener")?;
    tracing::info!(events = ?listener.events(), "event listener ready");
    let transport: Arc<dyn EventTransport> = Arc::new(app.queue.clone());
    let worker = ListenerWorker::from_settings(transport, Arc::new(listener), &app.settings.bus);
    coordinator.spawn("listener", worker.run(coordinator.token()));
    Ok(())
}

async fn purge_cache_every(cache: TaggedCache, every: Duration, token: CancellationToken) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    let _ = ticker.tick().await;
    loop {
        tokio::select! {
            () = token.cancelled() => break,
            _ = ticker.tick() => match cache.purge_expired().await {
                Ok(removed) => tracing::debug!(removed, "cache purge finished"),
                Err(e) => tracing::warn!(error = %e, "cache purge failed"),
            },
        }
    }
}

fn spawn_cache_purge(app: &AppContext, coordinator: &ShutdownCoordinator) {
    let secs = app.settings.cache.purge_interval_secs;
    if secs == 0 {
        return;
    }
    coordinator.spawn(
        "cache-purge",
        purge_cache_every(app.cache.clone(), Duration::from_secs(secs), coordinator.token()),
    );
}

async fn call(settings: &CounselSettings, action: &str, body: &str, url: Option<&str>, token: Option<&str>) -> Result<CallResult> {
    let body: Value = serde_json::from_str(body).context("--body is not valid JSON")?;
    let base_url = url.map_or_else(
        || format!("http://{}:{}", settings.server.host, settings.server.port),
        str::to_owned,
    );
    let mut client = HttpClient::new(base_url, http_endpoints()?, ClientOptions::from(&settings.rpc))?;
    if let Some(token) = token {
        client = client.with_bearer(token);
    }
    Ok(client.call(action, body).await)
}

async fn publish(app: &AppContext, event: &str, payload: &str) -> Result<MessageId> {
    let payload: Value = serde_json::from_str(payload).context("--payload is not valid JSON")?;
    let message_id = app
        .publisher
        .publish(event, &payload)
        .await
        .with_context(|| format!("Failed to publish {event}"))?;
    tracing::info!(event, %message_id, "event published");
    Ok(message_id)
}

async fn serve(app: Arc<AppContext>) -> Result<()> {
    let metrics = install_recorder().context("Failed to install metrics recorder")?;
    let coordinator = ShutdownCoordinator::new();

    spawn_listener(&app, &coordinator)?;
    spawn_cache_purge(&app, &coordinator);

    let server = CounselServer::from_context(app.clone())
        .context("Failed to build action registry")?
        .with_metrics(metrics);
    let actions = server.actions().actions();
    let handle = server.start(coordinator.token()).await.context("Failed to bind server")?;
    tracing::info!(
        "Counsel gateway listening on http://{} ({} actions registered)",
        handle.addr(),
        actions.len()
    );
    coordinator.spawn("http", handle.wait());

    tokio::signal::ctrl_c().await.context("Failed to listen for ctrl-c")?;
    tracing::info!("Shutting down...");
    coordinator.graceful_shutdown(None).await;
    Ok(())
}

async fn listen(app: Arc<AppContext>) -> Result<()> {
    if app.settings.server.callback_url.is_none() {
        anyhow::bail!("listen requires server.callback_url (or --callback-url)");
    }
    let coordinator = ShutdownCoordinator::new();
    spawn_listener(&app, &coordinator)?;
    spawn_cache_purge(&app, &coordinator);
    tracing::info!(callback_url = ?app.settings.server.callback_url, "listener running");

    tokio::signal::ctrl_c().await.context("Failed to listen for ctrl-c")?;
    tracing::info!("Shutting down...");
    coordinator.graceful_shutdown(None).await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = cli.load_settings()?;
    init_subscriber(&settings.logging.level, LogFormat::from_name(&settings.logging.format));

    if let Command::Call { action, body, url, token } = &cli.command {
        return match call(&settings, action, body, url.as_deref(), token.as_deref()).await? {
            CallResult::Ok(body) => {
                println!("{}", serde_json::to_string_pretty(&body.unwrap_or(Value::Null))?);
                Ok(())
            }
            other => anyhow::bail!("{action} failed: {other:?}"),
        };
    }

    let app = Arc::new(AppContext::connect(settings).await.context("Failed to open database")?);
    match cli.command {
        Command::Serve { .. } => serve(app).await?,
        Command::Listen { .. } => listen(app).await?,
        Command::Publish { event, payload } => {
            println!("{}", publish(&app, &event, &payload).await?);
        }
        Command::Call { .. } => {}
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
