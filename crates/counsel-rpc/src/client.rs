//! WebSocket RPC client.
//!
//! Turns the fire-and-forget WebSocket transport into awaitable calls. Each
//! call gets a fresh correlation id and a pending waiter; the reader task
//! resolves waiters from `response:<action>` frames and fans registered push
//! events out to subscribers. Everything else is dropped.
//!
//! State: `Closed -> Opening -> Open -> Closed`, observable through
//! [`RpcClient::watch_state`].
//!
//! Calls never panic or return `Err` for expected failures; they return a
//! [`CallResult`]. A retryable result (transport error, or a non-2xx status
//! other than 401/403/404) is retried once after a fixed backoff with a new
//! correlation id.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use counsel_core::{CoreError, CorrelationId, FieldError};
use counsel_settings::RpcSettings;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::endpoint::{EndpointDefinition, EndpointMap};
use crate::types::{InboundFrame, PushFrame, RequestEnvelope, ResponseEnvelope};

/// Connection lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClientState {
    /// Not connected.
    Closed,
    /// Handshake in progress.
    Opening,
    /// Ready for calls.
    Open,
}

/// Result of one call.
#[derive(Clone, Debug, PartialEq)]
pub enum CallResult {
    /// 2xx; `None` for 204 or an empty body.
    Ok(Option<Value>),
    /// The request (before sending) or the response (on receipt) failed its schema.
    ValidationFailure(Vec<FieldError>),
    /// Non-2xx response.
    Rejected {
        /// Status code from the response.
        status_code: u16,
        /// Body from the response.
        body: Option<Value>,
    },
    /// No response: not connected, connection lost, or timed out.
    TransportError(String),
}

impl CallResult {
    /// Whether this is [`CallResult::Ok`].
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }

    /// Whether a single retry is warranted.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::TransportError(_) => true,
            Self::Rejected { status_code, .. } => !matches!(status_code, 401 | 403 | 404),
            Self::Ok(_) | Self::ValidationFailure(_) => false,
        }
    }
}

/// Client behavior.
#[derive(Clone, Debug)]
pub struct ClientOptions {
    /// Wait before the single retry.
    pub retry_backoff: Duration,
    /// How long to wait for a response frame.
    pub response_timeout: Duration,
    /// Validate request bodies before sending.
    pub validate_requests: bool,
    /// Validate response bodies on receipt.
    pub validate_responses: bool,
    /// Outbound frame buffer.
    pub outbound_buffer: usize,
    /// Push subscriber buffer.
    pub push_buffer: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self::from(&RpcSettings::default())
    }
}

impl From<&RpcSettings> for ClientOptions {
    fn from(settings: &RpcSettings) -> Self {
        Self {
            retry_backoff: Duration::from_millis(settings.retry_backoff_ms),
            response_timeout: Duration::from_millis(settings.response_timeout_ms),
            validate_requests: settings.validate_requests,
            validate_responses: settings.validate_responses,
            outbound_buffer: 64,
            push_buffer: 256,
        }
    }
}

type PendingTx = oneshot::Sender<ResponseEnvelope>;

struct Shared {
    pending: Mutex<HashMap<CorrelationId, PendingTx>>,
    outbound: Mutex<Option<mpsc::Sender<Message>>>,
    pushes: broadcast::Sender<PushFrame>,
    state: watch::Sender<ClientState>,
}

impl Shared {
    fn mark_closed(&self) {
        let _ = self.outbound.lock().take();
        // Dropping the senders wakes every waiter with a transport error.
        self.pending.lock().clear();
        let _ = self.state.send_replace(ClientState::Closed);
    }
}

/// Removes a waiter when its call finishes or is abandoned.
struct PendingGuard<'a> {
    shared: &'a Shared,
    id: CorrelationId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        let _ = self.shared.pending.lock().remove(&self.id);
    }
}

/// Correlating WebSocket RPC client.
pub struct RpcClient {
    shared: Arc<Shared>,
    endpoints: Arc<EndpointMap>,
    push_events: Arc<HashSet<String>>,
    options: ClientOptions,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl RpcClient {
    /// Closed client for `endpoints`. Push frames are delivered only for the
    /// event names in `push_events`.
    pub fn new<I, S>(endpoints: EndpointMap, push_events: I, options: ClientOptions) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let (pushes, _) = broadcast::channel(options.push_buffer.max(1));
        let (state, _) = watch::channel(ClientState::Closed);
        Self {
            shared: Arc::new(Shared {
                pending: Mutex::new(HashMap::new()),
                outbound: Mutex::new(None),
                pushes,
                state,
            }),
            endpoints: Arc::new(endpoints),
            push_events: Arc::new(push_events.into_iter().map(Into::into).collect()),
            options,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Current state.
    pub fn state(&self) -> ClientState {
        *self.shared.state.borrow()
    }

    /// Observe state transitions.
    pub fn watch_state(&self) -> watch::Receiver<ClientState> {
        self.shared.state.subscribe()
    }

    /// Receive registered push frames.
    pub fn subscribe(&self) -> broadcast::Receiver<PushFrame> {
        self.shared.pushes.subscribe()
    }

    /// Connect to `url`. A no-op if already open or opening.
    pub async fn open(&self, url: &str) -> Result<(), CoreError> {
        if self.state() != ClientState::Closed {
            return Ok(());
        }
        let _ = self.shared.state.send_replace(ClientState::Opening);
        match tokio_tungstenite::connect_async(url).await {
            Ok((ws, _)) => {
                self.attach(ws);
                info!(url, "rpc client connected");
                Ok(())
            }
            Err(e) => {
                let _ = self.shared.state.send_replace(ClientState::Closed);
                Err(CoreError::transport(format!("connect {url}: {e}")))
            }
        }
    }

    /// Drive an established WebSocket.
    pub fn attach<S>(&self, ws: WebSocketStream<S>)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut sink, mut stream) = ws.split();
        let (tx, mut rx) = mpsc::channel::<Message>(self.options.outbound_buffer.max(1));
        *self.shared.outbound.lock() = Some(tx);

        let writer = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if sink.send(msg).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let shared = self.shared.clone();
        let endpoints = self.endpoints.clone();
        let push_events = self.push_events.clone();
        let reader = tokio::spawn(async move {
            while let Some(msg) = stream.next().await {
                match msg {
                    Ok(Message::Text(text)) => route(&shared, &endpoints, &push_events, &text),
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
            debug!("rpc client connection ended");
            shared.mark_closed();
        });

        let mut tasks = self.tasks.lock();
        tasks.retain(|t| !t.is_finished());
        tasks.push(writer);
        tasks.push(reader);
        let _ = self.shared.state.send_replace(ClientState::Open);
    }

    /// Close the connection. Outstanding calls resolve as transport errors.
    pub async fn close(&self) {
        let sender = self.shared.outbound.lock().take();
        if let Some(sender) = sender {
            let _ = sender.send(Message::Close(None)).await;
        }
        self.shared.mark_closed();
    }

    /// Call `action` with `body`, retrying once when the result is retryable.
    pub async fn call(&self, action: &str, body: Value) -> CallResult {
        let Some(endpoint) = self.endpoints.get(action) else {
            return CallResult::ValidationFailure(vec![FieldError::new(
                "/action",
                "is not a known action",
                Value::String(action.to_owned()),
            )]);
        };

        if self.options.validate_requests {
            let errors = endpoint.validate_request(&body);
            if !errors.is_empty() {
                return CallResult::ValidationFailure(errors);
            }
        }

        let first = self.attempt(endpoint, action, &body).await;
        if !first.is_retryable() {
            return first;
        }
        debug!(action, result = ?first, backoff = ?self.options.retry_backoff, "retrying call");
        tokio::time::sleep(self.options.retry_backoff).await;
        let second = self.attempt(endpoint, action, &body).await;
        if !second.is_ok() {
            warn!(action, result = ?second, "call failed after retry");
        }
        second
    }

    async fn attempt(&self, endpoint: &EndpointDefinition, action: &str, body: &Value) -> CallResult {
        let sender = self.shared.outbound.lock().clone();
        let Some(sender) = sender else {
            return CallResult::TransportError("not connected".into());
        };

        let request = RequestEnvelope::new(action, body.clone());
        let (tx, rx) = oneshot::channel();
        let _ = self.shared.pending.lock().insert(request.correlation_id.clone(), tx);
        let _guard = PendingGuard {
            shared: &self.shared,
            id: request.correlation_id.clone(),
        };

        let frame = Message::Text(request.to_frame().to_string().into());
        if sender.send(frame).await.is_err() {
            return CallResult::TransportError("connection closed".into());
        }

        match tokio::time::timeout(self.options.response_timeout, rx).await {
            Err(_elapsed) => CallResult::TransportError("timed out waiting for response".into()),
            Ok(Err(_closed)) => CallResult::TransportError("connection closed before response".into()),
            Ok(Ok(response)) => self.interpret(endpoint, response),
        }
    }

    fn interpret(&self, endpoint: &EndpointDefinition, response: ResponseEnvelope) -> CallResult {
        interpret(endpoint, response.status_code, response.body, self.options.validate_responses)
    }
}

/// Map a status and body onto a [`CallResult`], checking 2xx bodies against
/// the endpoint's response schema when asked.
pub(crate) fn interpret(
    endpoint: &EndpointDefinition,
    status_code: u16,
    body: Option<Value>,
    validate_responses: bool,
) -> CallResult {
    if !(200..300).contains(&status_code) {
        return CallResult::Rejected { status_code, body };
    }
    if status_code == 204 {
        return CallResult::Ok(None);
    }
    if validate_responses {
        if let Some(body) = &body {
            let errors = endpoint.validate_response(body);
            if !errors.is_empty() {
                return CallResult::ValidationFailure(errors);
            }
        }
    }
    CallResult::Ok(body)
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

fn route(shared: &Shared, endpoints: &EndpointMap, push_events: &HashSet<String>, text: &str) {
    match InboundFrame::parse(text) {
        Some(InboundFrame::Response(response)) if endpoints.contains(&response.action) => {
            let waiter = shared.pending.lock().remove(&response.correlation_id);
            match waiter {
                Some(tx) => {
                    let _ = tx.send(response);
                }
                None => debug!(
                    correlation_id = %response.correlation_id,
                    "response for an abandoned or unknown call"
                ),
            }
        }
        Some(InboundFrame::Push(push)) if push_events.contains(&push.event) => {
            let _ = shared.pushes.send(push);
        }
        Some(frame) => debug!(?frame, "dropping unrecognized frame"),
        None => debug!("dropping malformed frame"),
    }
}
