//! Polling loop that feeds a transport into a listener.

use std::sync::Arc;
use std::time::Duration;

use counsel_core::CoreError;
use counsel_settings::BusSettings;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::listener::{BatchReport, EventListener};
use super::transport::EventTransport;

/// Leases batches, runs them through the listener, then acks or fails each record.
pub struct ListenerWorker {
    transport: Arc<dyn EventTransport>,
    listener: Arc<EventListener>,
    batch_size: usize,
    poll_interval: Duration,
}

impl ListenerWorker {
    /// Worker over `transport`.
    pub fn new(
        transport: Arc<dyn EventTransport>,
        listener: Arc<EventListener>,
        batch_size: usize,
        poll_interval: Duration,
    ) -> Self {
        Self {
            transport,
            listener,
            batch_size: batch_size.max(1),
            poll_interval,
        }
    }

    /// Worker configured from bus settings.
    pub fn from_settings(
        transport: Arc<dyn EventTransport>,
        listener: Arc<EventListener>,
        settings: &BusSettings,
    ) -> Self {
        Self::new(
            transport,
            listener,
            settings.batch_size,
            Duration::from_millis(settings.poll_interval_ms),
        )
    }

    /// Process one batch.
    pub async fn poll_once(&self) -> Result<BatchReport, CoreError> {
        let records = self.transport.receive(self.batch_size).await?;
        if records.is_empty() {
            return Ok(BatchReport::default());
        }

        let report = self.listener.process(&records).await;
        self.transport.ack(&report.acked).await?;
        for (receipt, reason) in &report.failed {
            if let Err(err) = self.transport.fail(receipt, reason).await {
                warn!(receipt = %receipt, error = %err, "could not record delivery failure");
            }
        }
        debug!(
            received = records.len(),
            acked = report.acked.len(),
            failed = report.failed.len(),
            rejected = report.rejected,
            "batch processed"
        );
        Ok(report)
    }

    /// Poll until `cancel` fires. A full batch is followed immediately by
    /// another poll; otherwise the worker sleeps for the poll interval.
    pub async fn run(self, cancel: CancellationToken) {
        info!(batch_size = self.batch_size, "event listener started");
        loop {
            let busy = match self.poll_once().await {
                Ok(report) => report.acked.len() + report.failed.len() >= self.batch_size,
                Err(err) => {
                    warn!(error = %err, "event poll failed");
                    false
                }
            };
            if busy && !cancel.is_cancelled() {
                continue;
            }
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(self.poll_interval) => {}
            }
        }
        info!("event listener stopped");
    }
}

#[cfg(test)]
#[allow(unused_results)]
mod tests {
    use super::*;
    use crate::bus::{EventCatalog, EventContext, EventHandler, EventPublisher, QueueRecordAdapter, SqliteEventQueue};
    use async_trait::async_trait;
    use counsel_schema::{SchemaDescriptor, ValidatorCache};
    use counsel_store::Database;
    use serde_json::{Value, json};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter(Arc<AtomicUsize>, bool);

    #[async_trait]
    impl EventHandler for Counter {
        async fn handle(&self, _payload: Value, _ctx: &EventContext) -> Result<(), CoreError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            if self.1 { Err(CoreError::transport("downstream unavailable")) } else { Ok(()) }
        }
    }

    fn setup(fail: bool, visibility: Duration) -> (ListenerWorker, EventPublisher, SqliteEventQueue, Arc<AtomicUsize>) {
        let cache = ValidatorCache::new();
        let catalog = Arc::new(
            EventCatalog::new()
                .register_in(
                    &cache,
                    "lawyerStatusChanged",
                    &SchemaDescriptor::object()
                        .field("lawyerId", SchemaDescriptor::string())
                        .named("worker.test.status"),
                )
                .unwrap(),
        );
        let queue = SqliteEventQueue::new(Database::in_memory().unwrap(), visibility, 2);
        let calls = Arc::new(AtomicUsize::new(0));
        let mut listener = EventListener::new(Arc::new(QueueRecordAdapter), catalog.clone(), true);
        listener.on("lawyerStatusChanged", Counter(calls.clone(), fail)).unwrap();

        let transport: Arc<dyn EventTransport> = Arc::new(queue.clone());
        let worker = ListenerWorker::new(transport.clone(), Arc::new(listener), 10, Duration::from_millis(10));
        (worker, EventPublisher::new(transport, catalog, true), queue, calls)
    }

    #[tokio::test]
    async fn poll_once_acks_handled_messages() {
        let (worker, publisher, queue, calls) = setup(false, Duration::from_secs(30));
        publisher.publish("lawyerStatusChanged", &json!({"lawyerId": "l1"})).await.unwrap();
        publisher.publish("lawyerStatusChanged", &json!({"lawyerId": "l2"})).await.unwrap();

        let report = worker.poll_once().await.unwrap();
        assert_eq!(report.acked.len(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(queue.pending().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn failing_handler_ends_in_dead_letter() {
        let (worker, publisher, queue, calls) = setup(true, Duration::from_millis(10));
        publisher.publish("lawyerStatusChanged", &json!({"lawyerId": "l1"})).await.unwrap();

        worker.poll_once().await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        worker.poll_once().await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(worker.poll_once().await.unwrap().failed.is_empty());

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let dead = queue.dead_letters().await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].last_error.as_deref(), Some("transport error: downstream unavailable"));
    }

    #[tokio::test]
    async fn run_stops_on_cancel() {
        let (worker, publisher, _queue, calls) = setup(false, Duration::from_secs(30));
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(worker.run(cancel.clone()));

        publisher.publish("lawyerStatusChanged", &json!({"lawyerId": "l1"})).await.unwrap();
        for _ in 0..100 {
            if calls.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    }
}
