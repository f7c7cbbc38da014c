//! # counsel-rpc
//!
//! One request/response protocol, two transports.
//!
//! - **[`types`]**: wire envelopes (request, response, push frames) and [`Reply`]
//! - **[`endpoint`]**: [`EndpointDefinition`] and [`EndpointMap`], validated
//!   once at registration
//! - **[`registry`]**: [`ActionRegistry`] dispatch with validation, timeout,
//!   and panic isolation; shared by the HTTP and WebSocket gateways
//! - **[`client`]**: [`RpcClient`], the correlating WebSocket client with a
//!   single retry
//! - **[`http_client`]**: [`HttpClient`], the same calls over an HTTP map

#![deny(unsafe_code)]

pub mod client;
pub mod endpoint;
pub mod http_client;
pub mod registry;
pub mod types;

pub use client::{CallResult, ClientOptions, ClientState, RpcClient};
pub use endpoint::{EndpointDefinition, EndpointMap, Route, Transport};
pub use http_client::HttpClient;
pub use registry::{ActionHandler, ActionRegistry, DispatchOptions};
pub use types::{InboundFrame, PushFrame, Reply, RequestEnvelope, ResponseEnvelope};
