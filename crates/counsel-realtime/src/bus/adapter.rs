//! Extracting events from transport records.

use counsel_core::{CoreError, MessageId};

use super::message::{EVENT_NAME_ATTRIBUTE, EventMessage, PUBLISHED_AT_ATTRIBUTE, TransportRecord};

/// Pulls `(id, eventName, publishedAt, payload)` out of a transport's envelope.
pub trait MessageAdapter: Send + Sync {
    /// Extract the event carried by `record`.
    fn extract(&self, record: &TransportRecord) -> Result<EventMessage, CoreError>;
}

/// Adapter for records whose metadata lives in attributes and whose body is
/// the raw payload. Used with [`SqliteEventQueue`](super::SqliteEventQueue).
#[derive(Clone, Copy, Debug, Default)]
pub struct QueueRecordAdapter;

impl MessageAdapter for QueueRecordAdapter {
    fn extract(&self, record: &TransportRecord) -> Result<EventMessage, CoreError> {
        let attribute = |name: &str| {
            record
                .attributes
                .get(name)
                .cloned()
                .ok_or_else(|| CoreError::internal(format!("record {} has no '{name}' attribute", record.receipt)))
        };
        Ok(EventMessage {
            id: MessageId::from(record.receipt.clone()),
            event_name: attribute(EVENT_NAME_ATTRIBUTE)?,
            published_at: attribute(PUBLISHED_AT_ATTRIBUTE)?,
            payload: record.body.clone(),
        })
    }
}
