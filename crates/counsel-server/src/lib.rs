//! # counsel-server
//!
//! Axum HTTP + `WebSocket` gateway over the real-time substrate.
//!
//! - `WebSocket` gateway: each inbound frame is one invocation dispatched
//!   through the [`ActionRegistry`](counsel_rpc::ActionRegistry); the
//!   response is posted back through the connection-management API
//! - REST adapter: `POST /api/{action}` runs the same dispatch
//! - Connection management: `POST`/`DELETE /@connections/{id}` for
//!   processes that do not own the sockets
//! - Built-in actions (channel membership, chat, lawyer status) and event
//!   handlers (cache invalidation, status and chat notifications)
//! - Health, Prometheus metrics, graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod actions;
pub mod auth;
pub mod context;
pub mod events;
pub mod health;
pub mod http;
pub mod invocation;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use actions::{Action, build_registry, http_endpoints, websocket_endpoints};
pub use auth::{Claims, Role, TokenVerifier};
pub use context::AppContext;
pub use events::{build_listener, event_catalog};
pub use invocation::Invocation;
pub use server::{CounselServer, ServerHandle};
pub use shutdown::ShutdownCoordinator;
pub use websocket::gateway::LocalGateway;
