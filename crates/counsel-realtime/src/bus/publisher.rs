//! Publishing events.

use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use counsel_core::{CoreError, MessageId};
use metrics::counter;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, instrument};

use super::catalog::EventCatalog;
use super::message::EventMessage;
use super::transport::EventTransport;

/// Validates and sends events.
#[derive(Clone)]
pub struct EventPublisher {
    transport: Arc<dyn EventTransport>,
    catalog: Arc<EventCatalog>,
    validate: bool,
}

impl EventPublisher {
    /// Publisher over `transport`. With `validate`, payloads are checked
    /// against the catalog before sending.
    pub fn new(transport: Arc<dyn EventTransport>, catalog: Arc<EventCatalog>, validate: bool) -> Self {
        Self {
            transport,
            catalog,
            validate,
        }
    }

    /// Serialize and send one event. The event name and publish time travel
    /// as transport metadata, not in the payload.
    ///
    /// An undeclared event is a configuration error. A payload that fails
    /// its own schema ends the calling invocation early with a 500.
    #[instrument(skip_all, fields(event = event_name))]
    pub async fn publish<T: Serialize + ?Sized>(&self, event_name: &str, payload: &T) -> Result<MessageId, CoreError> {
        let value = serde_json::to_value(payload)?;
        if !self.catalog.contains(event_name) {
            return Err(CoreError::configuration(format!("event '{event_name}' is not declared")));
        }
        if self.validate {
            let errors = self.catalog.validate(event_name, &value)?;
            if !errors.is_empty() {
                return Err(CoreError::early_exit(
                    500,
                    Some(json!({ "error": format!("{event_name} payload failed validation"), "errors": errors })),
                ));
            }
        }

        let message = EventMessage {
            id: MessageId::new(),
            event_name: event_name.to_owned(),
            published_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            payload: value.to_string(),
        };
        let id = message.id.clone();
        self.transport.send(message).await?;
        counter!("bus_messages_total", "event" => event_name.to_owned(), "outcome" => "published").increment(1);
        debug!(message_id = %id, "event published");
        Ok(id)
    }
}
