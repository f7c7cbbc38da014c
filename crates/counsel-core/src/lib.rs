//! # counsel-core
//!
//! Foundation types shared by every Counsel crate:
//!
//! - **Errors**: [`CoreError`] taxonomy (validation, transport, configuration,
//!   early exit) and the structured [`FieldError`] reported by validators
//! - **Outcomes**: [`Outcome`], the tagged result handlers return instead of
//!   unwinding for expected failures
//! - **Branded IDs**: `ConnectionId`, `CorrelationId`, `MessageId`
//! - **Deferred work**: [`DeferredWork`], side-effect tasks an invocation
//!   awaits before it returns
//! - **Logging**: `tracing` subscriber initialization

#![deny(unsafe_code)]

pub mod deferred;
pub mod errors;
pub mod ids;
pub mod logging;
pub mod outcome;

pub use deferred::DeferredWork;
pub use errors::{CoreError, FieldError, Result};
pub use ids::{ConnectionId, CorrelationId, MessageId};
pub use outcome::Outcome;
