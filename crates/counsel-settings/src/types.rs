//! Settings type definitions.
//!
//! Every section implements [`Default`] with production values and is
//! `#[serde(default)]`, so partial files and sparse env overrides work.

use serde::{Deserialize, Serialize};

/// Root settings.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CounselSettings {
    /// HTTP/WebSocket listener.
    pub server: ServerSettings,
    /// SQLite database backing the registry, cache, and event queue.
    pub database: DatabaseSettings,
    /// WebSocket RPC client and dispatch behavior.
    pub rpc: RpcSettings,
    /// Event bus listener.
    pub bus: BusSettings,
    /// Tagged cache.
    pub cache: CacheSettings,
    /// Bearer token verification.
    pub auth: AuthSettings,
    /// Logging.
    pub logging: LoggingSettings,
}

/// Network settings for the gateway.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Host to bind.
    pub host: String,
    /// Port to bind (`0` auto-assigns).
    pub port: u16,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Outbound frame buffer per connection.
    pub send_buffer: usize,
    /// Interval between server pings, in seconds.
    pub heartbeat_interval_secs: u64,
    /// Close a connection silent for this long, in seconds.
    pub heartbeat_timeout_secs: u64,
    /// Maximum inbound frame size in bytes.
    pub max_message_size: usize,
    /// Base URL of a gateway's connection-management API. When set, fan-out
    /// posts over HTTP instead of to in-process sockets.
    pub callback_url: Option<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8787,
            max_connections: 1024,
            send_buffer: 256,
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 90,
            max_message_size: 1024 * 1024,
            callback_url: None,
        }
    }
}

/// SQLite database settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// Database file; `None` uses an in-memory database.
    pub path: Option<String>,
    /// Connection pool size.
    pub pool_size: u32,
    /// Busy timeout in milliseconds.
    pub busy_timeout_ms: u32,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: None,
            pool_size: 8,
            busy_timeout_ms: 5_000,
        }
    }
}

/// RPC settings shared by the client and the dispatcher.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcSettings {
    /// Wait before the single retry of a retryable call, in milliseconds.
    pub retry_backoff_ms: u64,
    /// How long a client waits for a response frame, in milliseconds.
    pub response_timeout_ms: u64,
    /// Validate request bodies before sending.
    pub validate_requests: bool,
    /// Validate response bodies on receipt.
    pub validate_responses: bool,
    /// Maximum time one handler may run, in seconds.
    pub handler_timeout_secs: u64,
}

impl Default for RpcSettings {
    fn default() -> Self {
        Self {
            retry_backoff_ms: 1_000,
            response_timeout_ms: 30_000,
            validate_requests: true,
            validate_responses: false,
            handler_timeout_secs: 30,
        }
    }
}

/// Event bus settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusSettings {
    /// Messages leased per poll.
    pub batch_size: usize,
    /// Sleep between empty polls, in milliseconds.
    pub poll_interval_ms: u64,
    /// Lease duration before an unacknowledged message is redelivered, in seconds.
    pub visibility_timeout_secs: u64,
    /// Deliveries before a message is dead-lettered.
    pub max_attempts: u32,
    /// Validate payloads before publishing.
    pub validate_on_publish: bool,
    /// Validate payloads in the listener.
    pub validate_on_receive: bool,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            batch_size: 10,
            poll_interval_ms: 250,
            visibility_timeout_secs: 30,
            max_attempts: 5,
            validate_on_publish: true,
            validate_on_receive: true,
        }
    }
}

/// Cache settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// TTL applied when a caller does not pass one, in seconds.
    pub default_ttl_secs: u64,
    /// Use the SQLite store instead of process memory.
    pub persistent: bool,
    /// How often the gateway purges expired entries, in seconds. Zero
    /// disables the purge task.
    pub purge_interval_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            default_ttl_secs: 3_600,
            persistent: true,
            purge_interval_secs: 300,
        }
    }
}

/// Bearer token settings.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    /// HS256 secret; `None` disables token verification.
    pub jwt_secret: Option<String>,
}

/// Logging settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// `"compact"` or `"json"`.
    pub format: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "compact".into(),
        }
    }
}
