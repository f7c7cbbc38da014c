//! Routing delivered events to handlers.
//!
//! Per record: extract through the adapter, find the handler, parse,
//! validate, run. The outcome decides acknowledgement:
//!
//! | outcome | acked |
//! |---|---|
//! | handler succeeded | yes |
//! | payload unparseable or invalid | yes (logged, never retried) |
//! | no handler for the event | no (configuration error, logged at error) |
//! | extraction or handler failure, panic | no (redelivered, eventually dead-lettered) |

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use counsel_core::{CoreError, MessageId};
use futures::FutureExt;
use futures::future::join_all;
use metrics::counter;
use serde_json::Value;
use tracing::{debug, error, warn};

use super::adapter::MessageAdapter;
use super::catalog::EventCatalog;
use super::message::TransportRecord;

/// What a handler knows about the message it is handling.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventContext {
    /// Stable across redeliveries; forward it so consumers can dedupe.
    pub message_id: MessageId,
    /// Event name.
    pub event_name: String,
    /// Publish time, RFC 3339.
    pub published_at: String,
    /// Delivery attempt, starting at 1.
    pub attempts: u32,
}

/// Handles one event type. Must be safe to run more than once per message.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Apply the event. An error leaves the message unacknowledged.
    async fn handle(&self, payload: Value, ctx: &EventContext) -> Result<(), CoreError>;
}

/// Outcome of one batch.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Receipts to acknowledge.
    pub acked: Vec<String>,
    /// Receipts left for redelivery, with the reason.
    pub failed: Vec<(String, String)>,
    /// How many acked records were rejected rather than handled.
    pub rejected: usize,
}

enum Disposition {
    Handled,
    Rejected,
    Failed(String),
}

/// Dispatches transport records to registered handlers.
pub struct EventListener {
    adapter: Arc<dyn MessageAdapter>,
    catalog: Arc<EventCatalog>,
    handlers: HashMap<String, Arc<dyn EventHandler>>,
    validate: bool,
}

impl EventListener {
    /// Listener with no handlers.
    pub fn new(adapter: Arc<dyn MessageAdapter>, catalog: Arc<EventCatalog>, validate: bool) -> Self {
        Self {
            adapter,
            catalog,
            handlers: HashMap::new(),
            validate,
        }
    }

    /// Register the handler for `event_name`.
    pub fn on(&mut self, event_name: &str, handler: impl EventHandler + 'static) -> Result<(), CoreError> {
        if self.validate && !self.catalog.contains(event_name) {
            return Err(CoreError::configuration(format!(
                "handler registered for undeclared event '{event_name}'"
            )));
        }
        if self.handlers.insert(event_name.to_owned(), Arc::new(handler)).is_some() {
            return Err(CoreError::configuration(format!("duplicate handler for event '{event_name}'")));
        }
        Ok(())
    }

    /// Events with a handler, sorted.
    pub fn events(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Process a batch. Records are independent and run concurrently.
    pub async fn process(&self, records: &[TransportRecord]) -> BatchReport {
        let outcomes = join_all(records.iter().map(|r| self.process_one(r))).await;

        let mut report = BatchReport::default();
        for (record, outcome) in records.iter().zip(outcomes) {
            match outcome {
                Disposition::Handled => report.acked.push(record.receipt.clone()),
                Disposition::Rejected => {
                    report.acked.push(record.receipt.clone());
                    report.rejected += 1;
                }
                Disposition::Failed(reason) => report.failed.push((record.receipt.clone(), reason)),
            }
        }
        report
    }

    async fn process_one(&self, record: &TransportRecord) -> Disposition {
        let message = match self.adapter.extract(record) {
            Ok(m) => m,
            Err(err) => {
                error!(receipt = %record.receipt, error = %err, "could not extract event from record");
                return Disposition::Failed(err.to_string());
            }
        };
        let event = message.event_name.as_str();

        let Some(handler) = self.handlers.get(event) else {
            let err = CoreError::configuration(format!("no handler registered for event '{event}'"));
            error!(event, message_id = %message.id, error = %err, "undeliverable event");
            counter!("bus_messages_total", "event" => event.to_owned(), "outcome" => "unhandled").increment(1);
            return Disposition::Failed(err.to_string());
        };

        let payload: Value = match serde_json::from_str(&message.payload) {
            Ok(v) => v,
            Err(err) => {
                warn!(event, message_id = %message.id, error = %err, "dropping unparseable payload");
                counter!("bus_messages_total", "event" => event.to_owned(), "outcome" => "rejected").increment(1);
                return Disposition::Rejected;
            }
        };

        if self.validate {
            match self.catalog.validate(event, &payload) {
                Ok(errors) if errors.is_empty() => {}
                Ok(errors) => {
                    warn!(event, message_id = %message.id, ?errors, "dropping invalid payload");
                    counter!("bus_messages_total", "event" => event.to_owned(), "outcome" => "rejected").increment(1);
                    return Disposition::Rejected;
                }
                Err(err) => {
                    error!(event, error = %err, "cannot validate event");
                    return Disposition::Failed(err.to_string());
                }
            }
        }

        let ctx = EventContext {
            message_id: message.id.clone(),
            event_name: event.to_owned(),
            published_at: message.published_at.clone(),
            attempts: record.attempts,
        };
        let guarded = std::panic::AssertUnwindSafe(handler.handle(payload, &ctx)).catch_unwind();
        match guarded.await {
            Ok(Ok(())) => {
                debug!(event, message_id = %ctx.message_id, attempts = ctx.attempts, "event handled");
                counter!("bus_messages_total", "event" => event.to_owned(), "outcome" => "handled").increment(1);
                Disposition::Handled
            }
            Ok(Err(err)) => {
                warn!(event, message_id = %ctx.message_id, error = %err, "event handler failed");
                counter!("bus_messages_total", "event" => event.to_owned(), "outcome" => "failed").increment(1);
                Disposition::Failed(err.to_string())
            }
            Err(_panic) => {
                error!(event, message_id = %ctx.message_id, "event handler panicked");
                counter!("bus_messages_total", "event" => event.to_owned(), "outcome" => "failed").increment(1);
                Disposition::Failed("handler panicked".into())
            }
        }
    }
}
