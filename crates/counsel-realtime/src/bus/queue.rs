//! SQLite-backed event transport.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use counsel_core::CoreError;
use counsel_settings::BusSettings;
use counsel_store::{Database, QueueRepo, QueueRow, now_ms};

use super::message::{EVENT_NAME_ATTRIBUTE, EventMessage, PUBLISHED_AT_ATTRIBUTE, TransportRecord};
use super::transport::EventTransport;

/// Durable queue with visibility-timeout leasing and dead-lettering.
#[derive(Clone)]
pub struct SqliteEventQueue {
    db: Database,
    visibility: Duration,
    max_attempts: u32,
}

impl SqliteEventQueue {
    /// Queue over `db`.
    pub fn new(db: Database, visibility: Duration, max_attempts: u32) -> Self {
        Self {
            db,
            visibility,
            max_attempts,
        }
    }

    /// Queue configured from bus settings.
    pub fn from_settings(db: Database, settings: &BusSettings) -> Self {
        Self::new(
            db,
            Duration::from_secs(settings.visibility_timeout_secs),
            settings.max_attempts,
        )
    }

    /// Messages that exhausted their attempts.
    pub async fn dead_letters(&self) -> Result<Vec<QueueRow>, CoreError> {
        Ok(self.db.run(QueueRepo::dead_letters).await?)
    }

    /// Messages still eligible for delivery.
    pub async fn pending(&self) -> Result<i64, CoreError> {
        Ok(self.db.run(QueueRepo::count_ready).await?)
    }
}

fn to_record(row: QueueRow) -> TransportRecord {
    TransportRecord {
        receipt: row.id,
        attributes: HashMap::from([
            (EVENT_NAME_ATTRIBUTE.to_string(), row.event_name),
            (PUBLISHED_AT_ATTRIBUTE.to_string(), row.published_at),
        ]),
        body: row.payload,
        attempts: row.attempts,
    }
}

#[async_trait]
impl EventTransport for SqliteEventQueue {
    async fn send(&self, message: EventMessage) -> Result<(), CoreError> {
        self.db
            .run(move |conn| {
                QueueRepo::enqueue(
                    conn,
                    message.id.as_str(),
                    &message.event_name,
                    &message.published_at,
                    &message.payload,
                    now_ms(),
                )
            })
            .await?;
        Ok(())
    }

    async fn receive(&self, max: usize) -> Result<Vec<TransportRecord>, CoreError> {
        let visibility_ms = i64::try_from(self.visibility.as_millis()).unwrap_or(i64::MAX);
        let max_attempts = self.max_attempts;
        let rows = self
            .db
            .run(move |conn| QueueRepo::lease(conn, max, visibility_ms, max_attempts, now_ms()))
            .await?;
        Ok(rows.into_iter().map(to_record).collect())
    }

    async fn ack(&self, receipts: &[String]) -> Result<(), CoreError> {
        if receipts.is_empty() {
            return Ok(());
        }
        let receipts = receipts.to_vec();
        let _ = self.db.run(move |conn| QueueRepo::ack(conn, &receipts)).await?;
        Ok(())
    }

    async fn fail(&self, receipt: &str, reason: &str) -> Result<(), CoreError> {
        let (receipt, reason) = (receipt.to_owned(), reason.to_owned());
        self.db.run(move |conn| QueueRepo::fail(conn, &receipt, &reason)).await?;
        Ok(())
    }
}
