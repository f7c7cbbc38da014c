//! Transport seam.

use async_trait::async_trait;
use counsel_core::CoreError;

use super::message::{EventMessage, TransportRecord};

/// At-least-once message transport.
#[async_trait]
pub trait EventTransport: Send + Sync {
    /// Enqueue one message.
    async fn send(&self, message: EventMessage) -> Result<(), CoreError>;

    /// Lease up to `max` messages. Unacknowledged messages are redelivered.
    async fn receive(&self, max: usize) -> Result<Vec<TransportRecord>, CoreError>;

    /// Acknowledge processed messages so they are never redelivered.
    async fn ack(&self, receipts: &[String]) -> Result<(), CoreError>;

    /// Record why a delivery failed. The message is redelivered later.
    async fn fail(&self, receipt: &str, reason: &str) -> Result<(), CoreError>;
}
