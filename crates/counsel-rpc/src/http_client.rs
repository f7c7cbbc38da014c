//! HTTP RPC client.
//!
//! The synchronous counterpart of [`RpcClient`](crate::RpcClient): each call
//! is one request to the endpoint's `(method, path)` under a base URL, and
//! the response status and body become the [`CallResult`]. Validation and
//! the single retry follow the same rules as the WebSocket client.

use std::sync::Arc;

use counsel_core::{CoreError, FieldError};
use reqwest::Method;
use serde_json::Value;
use tracing::{debug, warn};

use crate::client::{CallResult, ClientOptions, interpret};
use crate::endpoint::{EndpointDefinition, EndpointMap, Route, Transport};

/// Client for an HTTP [`EndpointMap`].
#[derive(Clone)]
pub struct HttpClient {
    http: reqwest::Client,
    base_url: String,
    endpoints: Arc<EndpointMap>,
    bearer: Option<String>,
    options: ClientOptions,
}

impl HttpClient {
    /// Client for `endpoints` under `base_url`. The map must be an HTTP map.
    pub fn new(base_url: impl Into<String>, endpoints: EndpointMap, options: ClientOptions) -> Result<Self, CoreError> {
        if endpoints.transport() != Transport::Http {
            return Err(CoreError::configuration("HttpClient needs an HTTP endpoint map"));
        }
        let http = reqwest::Client::builder()
            .timeout(options.response_timeout)
            .build()
            .map_err(|e| CoreError::configuration(format!("http client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            endpoints: Arc::new(endpoints),
            bearer: None,
            options,
        })
    }

    /// Send `token` as a bearer credential on every call.
    #[must_use]
    pub fn with_bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer = Some(token.into());
        self
    }

    /// Call the endpoint registered as `name`.
    pub async fn call(&self, name: &str, body: Value) -> CallResult {
        let Some(endpoint) = self.endpoints.get(name) else {
            return CallResult::ValidationFailure(vec![FieldError::new(
                "/action",
                "is not a known action",
                Value::String(name.to_owned()),
            )]);
        };

        if self.options.validate_requests {
            let errors = endpoint.validate_request(&body);
            if !errors.is_empty() {
                return CallResult::ValidationFailure(errors);
            }
        }

        let first = self.attempt(endpoint, &body).await;
        if !first.is_retryable() {
            return first;
        }
        debug!(name, result = ?first, backoff = ?self.options.retry_backoff, "retrying call");
        tokio::time::sleep(self.options.retry_backoff).await;
        let second = self.attempt(endpoint, &body).await;
        if !second.is_ok() {
            warn!(name, result = ?second, "call failed after retry");
        }
        second
    }

    async fn attempt(&self, endpoint: &EndpointDefinition, body: &Value) -> CallResult {
        let Route::Http { method, path } = endpoint.route() else {
            return CallResult::TransportError(format!("'{}' has no HTTP route", endpoint.name()));
        };
        let Ok(method) = Method::from_bytes(method.as_bytes()) else {
            return CallResult::TransportError(format!("invalid method '{method}'"));
        };

        let mut request = self.http.request(method, format!("{}{path}", self.base_url)).json(body);
        if let Some(token) = &self.bearer {
            request = request.bearer_auth(token);
        }
        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return CallResult::TransportError(e.to_string()),
        };

        let status_code = response.status().as_u16();
        let bytes = match response.bytes().await {
            Ok(bytes) => bytes,
            Err(e) => return CallResult::TransportError(e.to_string()),
        };
        let body = if bytes.is_empty() {
            None
        } else {
            match serde_json::from_slice::<Value>(&bytes) {
                Ok(value) => Some(value),
                Err(e) => return CallResult::TransportError(format!("undecodable response body: {e}")),
            }
        };
        interpret(endpoint, status_code, body, self.options.validate_responses)
    }
}

#[cfg(test)]
#[allow(unused_results)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use counsel_schema::SchemaDescriptor;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn endpoints() -> EndpointMap {
        let send = EndpointDefinition::http("sendMessage", "post", "/api/sendMessage")
            .request_schema(
                &SchemaDescriptor::object()
                    .field("text", SchemaDescriptor::string().min_length(1))
                    .named("http_client.test.sendMessage"),
            )
            .unwrap();
        EndpointMap::http([send]).unwrap()
    }

    fn options() -> ClientOptions {
        ClientOptions {
            retry_backoff: Duration::from_millis(10),
            ..ClientOptions::default()
        }
    }

    /// Reads one request, headers and body, so closing the socket after
    /// replying does not reset it.
    async fn read_request(socket: &mut tokio::net::TcpStream) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                return;
            }
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf);
            let Some(end) = text.find("\r\n\r\n") else { continue };
            let length = text[..end]
                .lines()
                .find_map(|l| l.to_ascii_lowercase().strip_prefix("content-length:").map(|v| v.trim().to_owned()))
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= end + 4 + length {
                return;
            }
        }
    }

    /// Answers each connection with the next canned `(status, body)`.
    async fn spawn_server(replies: Vec<(u16, &'static str)>) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        tokio::spawn(async move {
            for (status, body) in replies {
                let (mut socket, _) = listener.accept().await.unwrap();
                read_request(&mut socket).await;
                counter.fetch_add(1, Ordering::SeqCst);
                let response = format!(
                    "HTTP/1.1 {status} X\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                socket.write_all(response.as_bytes()).await.unwrap();
                socket.shutdown().await.unwrap();
            }
        });
        (format!("http://{addr}"), hits)
    }

    #[test]
    fn websocket_map_is_refused() {
        let map = EndpointMap::websocket([("join", EndpointDefinition::websocket("join"))]).unwrap();
        let err = HttpClient::new("http://127.0.0.1:1", map, options()).err().unwrap();
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn unknown_name_and_invalid_body_never_send() {
        let client = HttpClient::new("http://127.0.0.1:1", endpoints(), options()).unwrap();
        assert_matches!(client.call("nope", json!({})).await, CallResult::ValidationFailure(_));
        let CallResult::ValidationFailure(errors) = client.call("sendMessage", json!({"text": ""})).await else {
            panic!("expected validation failure");
        };
        assert_eq!(errors[0].path, "/body/text");
    }

    #[tokio::test]
    async fn success_body_is_returned() {
        let (url, hits) = spawn_server(vec![(200, r#"{"messageId":"m1"}"#)]).await;
        let client = HttpClient::new(url, endpoints(), options()).unwrap();
        assert_eq!(
            client.call("sendMessage", json!({"text": "hi"})).await,
            CallResult::Ok(Some(json!({"messageId": "m1"})))
        );
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn server_error_is_retried_once() {
        let (url, hits) = spawn_server(vec![(500, r#"{"error":"x"}"#), (200, r#"{"messageId":"m2"}"#)]).await;
        let client = HttpClient::new(url, endpoints(), options()).unwrap();
        assert_eq!(
            client.call("sendMessage", json!({"text": "hi"})).await,
            CallResult::Ok(Some(json!({"messageId": "m2"})))
        );
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn forbidden_is_not_retried() {
        let (url, hits) = spawn_server(vec![(403, r#"{"error":"no"}"#)]).await;
        let client = HttpClient::new(url, endpoints(), options()).unwrap();
        assert_matches!(
            client.call("sendMessage", json!({"text": "hi"})).await,
            CallResult::Rejected { status_code: 403, .. }
        );
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
