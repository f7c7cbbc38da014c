//! Error taxonomy for the real-time substrate.
//!
//! Every failure the core can produce falls into one of four families:
//!
//! - [`CoreError::Validation`]: caller-supplied data failed its schema. Always
//!   surfaced to the caller, never retried, never logged as a server fault.
//! - [`CoreError::Transport`]: a peer or durable store could not be reached.
//!   Retried once by the client, pruned by fan-out, or logged and left.
//! - [`CoreError::Configuration`]: a startup invariant was violated. Fatal;
//!   the process must not serve traffic.
//! - [`CoreError::EarlyExit`]: a handler short-circuits its invocation with a
//!   specific status and body.
//!
//! [`CoreError::Internal`] covers everything unexpected and maps to a generic
//! 500-equivalent at the dispatch boundary.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// A single schema violation.
///
/// `path` is a JSON pointer into the checked value, already prefixed with
/// `/body` or `/response` once it leaves the endpoint layer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldError {
    /// JSON pointer of the offending value.
    pub path: String,
    /// Human-readable reason.
    pub message: String,
    /// The offending value (`null` when the field is missing).
    pub value: Value,
    /// Id of the nearest named schema, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_id: Option<String>,
}

impl FieldError {
    /// Create a field error without a schema id.
    pub fn new(path: impl Into<String>, message: impl Into<String>, value: Value) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
            value,
            schema_id: None,
        }
    }

    /// Attach the id of the schema that produced this error.
    #[must_use]
    pub fn with_schema_id(mut self, schema_id: impl Into<String>) -> Self {
        self.schema_id = Some(schema_id.into());
        self
    }

    /// Return a copy of this error with `prefix` prepended to its path.
    #[must_use]
    pub fn prefixed(mut self, prefix: &str) -> Self {
        self.path = format!("{prefix}{}", self.path);
        self
    }
}

/// Top-level error type for the substrate.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Caller-supplied data failed validation.
    #[error("validation failed: {} error(s)", .0.len())]
    Validation(Vec<FieldError>),

    /// A peer or durable store could not be reached.
    #[error("transport error: {message}")]
    Transport {
        /// What failed.
        message: String,
    },

    /// A startup-time invariant was violated.
    #[error("configuration error: {message}")]
    Configuration {
        /// Which invariant and where.
        message: String,
    },

    /// A handler ended its invocation early with a specific response.
    #[error("early exit with status {status_code}")]
    EarlyExit {
        /// Status code to answer with.
        status_code: u16,
        /// Body to answer with.
        body: Option<Value>,
    },

    /// Anything unexpected.
    #[error("internal error: {message}")]
    Internal {
        /// Details (logged, never sent to callers).
        message: String,
    },
}

impl CoreError {
    /// Build a [`CoreError::Transport`].
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Build a [`CoreError::Configuration`].
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Build a [`CoreError::Internal`].
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Build a [`CoreError::EarlyExit`].
    pub fn early_exit(status_code: u16, body: Option<Value>) -> Self {
        Self::EarlyExit { status_code, body }
    }

    /// Machine-readable category used in logs and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Transport { .. } => "transport",
            Self::Configuration { .. } => "configuration",
            Self::EarlyExit { .. } => "early_exit",
            Self::Internal { .. } => "internal",
        }
    }

    /// Whether this error is a configuration error.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration { .. })
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::internal(format!("serde error: {err}"))
    }
}

/// Convenience alias used across the workspace.
pub type Result<T> = std::result::Result<T, CoreError>;
