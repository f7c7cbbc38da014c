//! Broadcast / fan-out delivery.
//!
//! One push frame goes to every member of a channel concurrently. Each post
//! is independent: a peer that is gone is pruned from the registry, any
//! other failure is logged and the registration kept. Nothing is retried,
//! and only a failed membership lookup fails the delivery as a whole.

use std::sync::Arc;

use counsel_core::{ConnectionId, CoreError};
use counsel_rpc::PushFrame;
use futures::future::join_all;
use metrics::counter;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::channel::ChannelKind;
use crate::poster::{ConnectionPoster, PostError};
use crate::registry::ConnectionRegistry;

/// Tally of one delivery.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    /// Posts that succeeded.
    pub delivered: usize,
    /// Peers found gone and removed from the registry.
    pub pruned: usize,
    /// Posts that failed for another reason.
    pub failed: usize,
}

enum Delivery {
    Delivered,
    Pruned,
    Failed,
}

/// Delivers push frames to channels.
#[derive(Clone)]
pub struct FanoutDispatcher {
    registry: Arc<dyn ConnectionRegistry>,
    poster: Arc<dyn ConnectionPoster>,
}

impl FanoutDispatcher {
    /// Dispatcher over a registry and a push API.
    pub fn new(registry: Arc<dyn ConnectionRegistry>, poster: Arc<dyn ConnectionPoster>) -> Self {
        Self { registry, poster }
    }

    /// The registry this dispatcher prunes.
    pub fn registry(&self) -> &Arc<dyn ConnectionRegistry> {
        &self.registry
    }

    /// Post `push` to every connection in `(kind, key)`.
    #[instrument(skip_all, fields(channel_kind = %kind, channel_key = key, event = %push.event))]
    pub async fn deliver(&self, kind: ChannelKind, key: &str, push: &PushFrame) -> Result<DeliveryReport, CoreError> {
        let members = self.registry.list_connections(kind, key).await?;
        if members.is_empty() {
            debug!("channel has no members");
            return Ok(DeliveryReport::default());
        }

        let frame = push.to_frame();
        let outcomes = join_all(members.iter().map(|m| self.post_one(&m.connection_id, &frame))).await;

        let mut report = DeliveryReport::default();
        for outcome in outcomes {
            match outcome {
                Delivery::Delivered => report.delivered += 1,
                Delivery::Pruned => report.pruned += 1,
                Delivery::Failed => report.failed += 1,
            }
        }
        debug!(?report, "delivery finished");
        Ok(report)
    }

    async fn post_one(&self, connection_id: &ConnectionId, frame: &Value) -> Delivery {
        match self.poster.post(connection_id, frame).await {
            Ok(()) => {
                counter!("fanout_deliveries_total", "outcome" => "delivered").increment(1);
                Delivery::Delivered
            }
            Err(PostError::Gone) => match self.registry.leave(connection_id).await {
                Ok(_) => {
                    counter!("fanout_pruned_total").increment(1);
                    debug!(%connection_id, "pruned gone connection");
                    Delivery::Pruned
                }
                Err(err) => {
                    counter!("fanout_deliveries_total", "outcome" => "failed").increment(1);
                    warn!(%connection_id, error = %err, "failed to prune gone connection");
                    Delivery::Failed
                }
            },
            Err(PostError::Other(reason)) => {
                counter!("fanout_deliveries_total", "outcome" => "failed").increment(1);
                warn!(%connection_id, reason, "post failed; keeping registration");
                Delivery::Failed
            }
        }
    }
}
