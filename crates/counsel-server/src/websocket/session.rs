//! `WebSocket` session lifecycle: one connected client from upgrade through
//! disconnect.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use counsel_rpc::ActionRegistry;
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use tokio::sync::mpsc;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, info, instrument, warn};

use super::connection::ClientConnection;
use super::handler::handle_frame;
use crate::context::AppContext;
use crate::invocation::Invocation;
use crate::metrics::{
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL,
};

/// Run a session for an accepted socket.
///
/// 1. Forwards queued frames to the socket and pings on the heartbeat interval
/// 2. Dispatches each inbound text frame as its own invocation, posting the
///    response back through the connection-management API
/// 3. On disconnect (client close, heartbeat timeout, or a close requested
///    through the gateway) waits for in-flight invocations, then removes the
///    socket and its channel membership
#[instrument(skip_all, fields(connection_id = %connection.id))]
pub async fn run_ws_session(
    ws: WebSocket,
    connection: Arc<ClientConnection>,
    mut outbound_rx: mpsc::Receiver<Arc<String>>,
    app: Arc<AppContext>,
    actions: Arc<ActionRegistry<Invocation>>,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let started = Instant::now();
    info!("client connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    let ping_every = Duration::from_secs(app.settings.server.heartbeat_interval_secs.max(1));
    let pong_timeout = Duration::from_secs(app.settings.server.heartbeat_timeout_secs);

    let outbound_conn = connection.clone();
    let outbound = tokio::spawn(
        async move {
            let mut ping_interval = tokio::time::interval(ping_every);
            let _ = ping_interval.tick().await;

            loop {
                tokio::select! {
                    msg = outbound_rx.recv() => {
                        let Some(text) = msg else { break };
                        if ws_tx.send(Message::Text(text.as_str().into())).await.is_err() {
                            break;
                        }
                    }
                    _ = ping_interval.tick() => {
                        if !outbound_conn.check_alive() && outbound_conn.last_pong_elapsed() > pong_timeout {
                            warn!(timeout = ?pong_timeout, "client unresponsive, disconnecting");
                            outbound_conn.close();
                            break;
                        }
                        if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                            break;
                        }
                    }
                    () = outbound_conn.closed() => {
                        let _ = ws_tx.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
        }
        .in_current_span(),
    );

    let invocations = TaskTracker::new();
    loop {
        let msg = tokio::select! {
            msg = ws_rx.next() => msg,
            () = connection.closed() => break,
        };
        let Some(Ok(msg)) = msg else { break };

        let text = match msg {
            Message::Text(t) => t.to_string(),
            Message::Binary(data) => match String::from_utf8(data.to_vec()) {
                Ok(s) => s,
                Err(_) => {
                    debug!(len = data.len(), "ignoring non-UTF8 binary frame");
                    continue;
                }
            },
            Message::Close(_) => {
                info!("client sent close frame");
                break;
            }
            Message::Ping(_) | Message::Pong(_) => {
                connection.mark_alive();
                continue;
            }
        };
        connection.mark_alive();

        let _ = invocations.spawn(
            run_invocation(text, connection.clone(), app.clone(), actions.clone()).in_current_span(),
        );
    }

    connection.close();
    outbound.abort();

    // A join still in flight must land before membership is cleared.
    let _ = invocations.close();
    let drain = Duration::from_secs(app.settings.rpc.handler_timeout_secs.max(1));
    if tokio::time::timeout(drain, invocations.wait()).await.is_err() {
        warn!(in_flight = invocations.len(), "invocations still running at disconnect");
    }
    let _ = app.gateway.remove(&connection.id).await;
    match app.registry.leave(&connection.id).await {
        Ok(was_member) => debug!(was_member, "channel membership cleared"),
        Err(e) => warn!(error = %e, "could not clear channel membership"),
    }

    info!("client disconnected");
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
}

async fn run_invocation(
    text: String,
    connection: Arc<ClientConnection>,
    app: Arc<AppContext>,
    actions: Arc<ActionRegistry<Invocation>>,
) {
    let invocation = Invocation::websocket(app.clone(), connection.id.clone(), connection.claims.clone());
    if let Some(response) = handle_frame(&text, &actions, &invocation).await {
        if let Err(e) = app.poster.post(&connection.id, &response.to_frame()).await {
            // The peer may have left mid-call; nothing else to do.
            debug!(error = %e, action = %response.action, "response not delivered");
        }
    }
    let failed = invocation.finish().await;
    if failed > 0 {
        warn!(failed, "deferred work failed");
    }
}
