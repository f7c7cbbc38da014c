//! Axum handlers.
//!
//! | Route                       | Purpose                                      |
//! |-----------------------------|----------------------------------------------|
//! | `GET /ws`                   | `WebSocket` upgrade                          |
//! | `POST /api/{action}`        | REST adapter over the same action registry   |
//! | `POST /@connections/{id}`   | Push one frame to a socket owned here        |
//! | `DELETE /@connections/{id}` | Close a socket and drop its membership       |
//! | `GET /health`               | Liveness and counters                        |
//! | `GET /metrics`              | Prometheus text exposition                   |

use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use counsel_core::{ConnectionId, FieldError};
use counsel_realtime::{ConnectionPoster, PostError};
use counsel_rpc::{ActionRegistry, Reply};
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, instrument, warn};

use crate::auth::{AuthError, Claims};
use crate::context::AppContext;
use crate::health::{self, HealthResponse};
use crate::invocation::Invocation;
use crate::metrics::{CONNECTION_POSTS_TOTAL, WS_REJECTED_TOTAL};
use crate::websocket::session::run_ws_session;

/// Shared state for every handler.
#[derive(Clone)]
pub struct AppState {
    /// Process-wide dependencies.
    pub app: Arc<AppContext>,
    /// Action registry shared by `WebSocket` and HTTP.
    pub actions: Arc<ActionRegistry<Invocation>>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle; `/metrics` answers 404 without one.
    pub metrics: Option<PrometheusHandle>,
}

/// Query string accepted by `/ws`.
#[derive(Debug, Default, Deserialize)]
pub struct WsQuery {
    /// Bearer token for clients that cannot set headers.
    pub token: Option<String>,
}

/// Claims for a request. Without a configured secret every request is
/// anonymous and credentials are ignored. A query token wins over the header.
fn resolve_claims(app: &AppContext, headers: &HeaderMap, query_token: Option<&str>) -> Result<Option<Claims>, AuthError> {
    let Some(tokens) = &app.tokens else {
        return Ok(None);
    };
    if let Some(token) = query_token {
        return tokens.verify(token).map(Some);
    }
    let header = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok());
    tokens.verify_header(header)
}

fn unauthorized(err: &AuthError) -> Response {
    (StatusCode::UNAUTHORIZED, Json(json!({ "error": err.to_string() }))).into_response()
}

/// Render a dispatch reply as an HTTP response.
pub fn reply_response(reply: Reply) -> Response {
    let status = StatusCode::from_u16(reply.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    match reply.body {
        Some(body) => (status, Json(body)).into_response(),
        None => status.into_response(),
    }
}

/// `GET /ws`
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let claims = match resolve_claims(&state.app, &headers, query.token.as_deref()) {
        Ok(claims) => claims,
        Err(e) => {
            debug!(error = %e, "websocket upgrade refused");
            return unauthorized(&e);
        }
    };

    let server = &state.app.settings.server;
    if state.app.gateway.connection_count().await >= server.max_connections {
        warn!(max = server.max_connections, "connection limit reached, refusing upgrade");
        counter!(WS_REJECTED_TOTAL).increment(1);
        return (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "error": "too many connections" }))).into_response();
    }

    let max_message_size = server.max_message_size;
    ws.max_message_size(max_message_size).on_upgrade(move |socket| async move {
        let (connection, outbound_rx) = state.app.gateway.open(claims).await;
        run_ws_session(socket, connection, outbound_rx, state.app, state.actions).await;
    })
}

/// `POST /api/{action}`
///
/// Same dispatch as a `WebSocket` frame: the JSON body is the action body
/// and the reply's status and body become the HTTP response. Deferred work
/// completes before the response is returned.
#[instrument(skip_all, fields(action = %action))]
pub async fn api_action(
    State(state): State<AppState>,
    Path(action): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let claims = match resolve_claims(&state.app, &headers, None) {
        Ok(claims) => claims,
        Err(e) => return unauthorized(&e),
    };

    let body = if body.is_empty() {
        json!({})
    } else {
        match serde_json::from_slice::<Value>(&body) {
            Ok(value) => value,
            Err(e) => {
                let errors = vec![FieldError::new("/body", format!("invalid JSON: {e}"), Value::Null)];
                return (StatusCode::BAD_REQUEST, Json(json!({ "errors": errors }))).into_response();
            }
        }
    };

    let invocation = Invocation::http(state.app.clone(), claims);
    let reply = state.actions.dispatch(&action, body, &invocation).await;
    let failed = invocation.finish().await;
    if failed > 0 {
        warn!(failed, "deferred work failed");
    }
    reply_response(reply)
}

/// `POST /@connections/{id}`
pub async fn post_to_connection(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(frame): Json<Value>,
) -> Response {
    let connection_id = ConnectionId::from(id);
    match state.app.gateway.post(&connection_id, &frame).await {
        Ok(()) => {
            counter!(CONNECTION_POSTS_TOTAL, "outcome" => "delivered").increment(1);
            StatusCode::OK.into_response()
        }
        Err(PostError::Gone) => {
            counter!(CONNECTION_POSTS_TOTAL, "outcome" => "gone").increment(1);
            (StatusCode::GONE, Json(json!({ "error": "connection is gone" }))).into_response()
        }
        Err(PostError::Other(message)) => {
            counter!(CONNECTION_POSTS_TOTAL, "outcome" => "failed").increment(1);
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": message }))).into_response()
        }
    }
}

/// `DELETE /@connections/{id}`
///
/// Membership is cleared even when the socket is unknown here, so stale
/// registrations can be dropped by id.
pub async fn delete_connection(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let connection_id = ConnectionId::from(id);
    let known = state.app.gateway.disconnect(&connection_id).await;
    if let Err(e) = state.app.registry.leave(&connection_id).await {
        warn!(%connection_id, error = %e, "could not clear channel membership");
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": e.to_string() }))).into_response();
    }
    if known {
        StatusCode::NO_CONTENT.into_response()
    } else {
        (StatusCode::GONE, Json(json!({ "error": "connection is gone" }))).into_response()
    }
}

/// `GET /health`
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let connections = state.app.gateway.connection_count().await;
    let pending = state.app.queue.pending().await.ok();
    Json(health::health_check(state.start_time, connections, pending))
}

/// `GET /metrics`
pub async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
