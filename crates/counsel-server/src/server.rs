//! `CounselServer`: Axum HTTP + `WebSocket` server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::routing::{get, post};
use counsel_core::CoreError;
use counsel_rpc::{ActionRegistry, DispatchOptions};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::actions::build_registry;
use crate::context::AppContext;
use crate::http::{
    AppState, api_action, delete_connection, health_handler, metrics_handler, post_to_connection, ws_upgrade,
};
use crate::invocation::Invocation;

/// The gateway server.
pub struct CounselServer {
    app: Arc<AppContext>,
    actions: Arc<ActionRegistry<Invocation>>,
    metrics: Option<PrometheusHandle>,
    start_time: Instant,
}

impl CounselServer {
    /// Create a server over `app` with an explicit action registry.
    pub fn new(app: Arc<AppContext>, actions: ActionRegistry<Invocation>) -> Self {
        Self {
            app,
            actions: Arc::new(actions),
            metrics: None,
            start_time: Instant::now(),
        }
    }

    /// Create a server with the built-in actions, dispatch options taken
    /// from the context's settings.
    pub fn from_context(app: Arc<AppContext>) -> Result<Self, CoreError> {
        let actions = build_registry(DispatchOptions::from(&app.settings.rpc))?;
        Ok(Self::new(app, actions))
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            app: self.app.clone(),
            actions: self.actions.clone(),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
        };

        Router::new()
            .route("/ws", get(ws_upgrade))
            .route("/api/{action}", post(api_action))
            .route("/@connections/{id}", post(post_to_connection).delete(delete_connection))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Shared context.
    pub fn context(&self) -> &Arc<AppContext> {
        &self.app
    }

    /// Action registry.
    pub fn actions(&self) -> &Arc<ActionRegistry<Invocation>> {
        &self.actions
    }

    /// Bind `server.host:server.port` and serve until `shutdown` fires.
    /// Port 0 picks a free port; the bound address is on the handle.
    pub async fn start(self, shutdown: CancellationToken) -> Result<ServerHandle, CoreError> {
        let server = &self.app.settings.server;
        let bind = format!("{}:{}", server.host, server.port);
        let listener = TcpListener::bind(&bind)
            .await
            .map_err(|e| CoreError::configuration(format!("cannot bind {bind}: {e}")))?;
        let addr = listener
            .local_addr()
            .map_err(|e| CoreError::internal(format!("listener address: {e}")))?;
        info!(%addr, "server listening");

        let router = self.router();
        let token = shutdown.clone();
        let task = tokio::spawn(async move {
            let served = axum::serve(listener, router)
                .with_graceful_shutdown(token.cancelled_owned())
                .await;
            if let Err(e) = served {
                error!(error = %e, "server stopped with error");
            }
            info!("server stopped");
        });

        Ok(ServerHandle { addr, shutdown, task })
    }
}

/// A running server.
pub struct ServerHandle {
    addr: SocketAddr,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl ServerHandle {
    /// Bound address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// `ws://` URL of the `/ws` endpoint.
    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    /// `http://` base URL.
    pub fn http_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Wait for the server to stop on its own (its token fired).
    pub async fn wait(self) {
        if let Err(e) = self.task.await {
            error!(error = %e, "server task failed");
        }
    }

    /// Cancel and wait for in-flight requests to drain.
    pub async fn stop(self) {
        self.shutdown.cancel();
        self.wait().await;
    }
}
