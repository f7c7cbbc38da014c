//! Bus message shapes.

use std::collections::HashMap;

use counsel_core::MessageId;

/// Attribute carrying the event name.
pub const EVENT_NAME_ATTRIBUTE: &str = "eventName";
/// Attribute carrying the publish time (RFC 3339).
pub const PUBLISHED_AT_ATTRIBUTE: &str = "publishedAt";

/// One event, as published or as extracted by a [`MessageAdapter`](super::MessageAdapter).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventMessage {
    /// Message id.
    pub id: MessageId,
    /// Event name.
    pub event_name: String,
    /// Publish time, RFC 3339.
    pub published_at: String,
    /// Serialized JSON payload.
    pub payload: String,
}

/// A message as a transport hands it to the listener.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportRecord {
    /// Handle used to acknowledge or fail this delivery.
    pub receipt: String,
    /// Transport metadata.
    pub attributes: HashMap<String, String>,
    /// Raw body.
    pub body: String,
    /// Times this message has been delivered, including this one.
    pub attempts: u32,
}
