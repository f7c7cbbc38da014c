//! Pushing frames to individual connections.
//!
//! [`ConnectionPoster`] is the message-push API fan-out delivers through.
//! The gateway that owns the sockets implements it in-process; any other
//! process uses [`CallbackPoster`] against the gateway's
//! `/@connections/{id}` endpoint.

use std::time::Duration;

use async_trait::async_trait;
use counsel_core::ConnectionId;
use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;

/// Why a post failed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PostError {
    /// The peer no longer exists; its registration should be pruned.
    #[error("connection is gone")]
    Gone,
    /// Anything else; the registration is kept.
    #[error("post failed: {0}")]
    Other(String),
}

/// Push API for a single connection.
#[async_trait]
pub trait ConnectionPoster: Send + Sync {
    /// Send one JSON frame to `connection_id`.
    async fn post(&self, connection_id: &ConnectionId, frame: &Value) -> Result<(), PostError>;
}

/// Posts frames to a gateway over HTTP: `POST {base}/@connections/{id}`.
#[derive(Clone, Debug)]
pub struct CallbackPoster {
    client: reqwest::Client,
    base_url: String,
}

impl CallbackPoster {
    /// Poster for the gateway at `base_url` (no trailing slash needed).
    pub fn new(base_url: impl Into<String>) -> Result<Self, PostError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| PostError::Other(e.to_string()))?;
        Ok(Self::with_client(client, base_url))
    }

    /// Poster sharing an existing client.
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_owned();
        Self { client, base_url }
    }

    fn url(&self, connection_id: &ConnectionId) -> String {
        format!("{}/@connections/{connection_id}", self.base_url)
    }
}

#[async_trait]
impl ConnectionPoster for CallbackPoster {
    async fn post(&self, connection_id: &ConnectionId, frame: &Value) -> Result<(), PostError> {
        let response = self
            .client
            .post(self.url(connection_id))
            .json(frame)
            .send()
            .await
            .map_err(|e| PostError::Other(e.to_string()))?;
        match response.status() {
            StatusCode::GONE => Err(PostError::Gone),
            status if status.is_success() => Ok(()),
            status => Err(PostError::Other(format!("gateway answered {status}"))),
        }
    }
}
