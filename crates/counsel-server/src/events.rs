//! Built-in events and their handlers.
//!
//! Handlers run under at-least-once delivery. Cache invalidation is
//! naturally idempotent. The notification handlers may push the same frame
//! twice when a message is redelivered; every push carries the bus message
//! id as `messageId` so clients can drop the repeat.
//!
//! | event | published by |
//! |---|---|
//! | `lawyerStatusChanged` | the `updateStatus` action |
//! | `cacheInvalidated` | writers outside the gateway; `counsel-gateway publish` |
//! | `chatMessagePosted` | message stores in other processes; `counsel-gateway publish` |
//!
//! `sendMessage` delivers to its group directly and does not go through the
//! bus.

use async_trait::async_trait;
use counsel_core::CoreError;
use counsel_realtime::{
    CacheKey, ChannelKind, EventCatalog, EventContext, EventHandler, EventListener, FanoutDispatcher,
    QueueRecordAdapter, TaggedCache,
};
use counsel_rpc::PushFrame;
use counsel_schema::SchemaDescriptor;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::info;

use crate::actions::STATUSES;
use crate::context::AppContext;

/// Event names.
pub mod names {
    /// A lawyer's availability changed.
    pub const LAWYER_STATUS_CHANGED: &str = "lawyerStatusChanged";
    /// Cached entries under these tags are stale.
    pub const CACHE_INVALIDATED: &str = "cacheInvalidated";
    /// A chat message was stored.
    pub const CHAT_MESSAGE_POSTED: &str = "chatMessagePosted";
}

/// Push event names.
pub mod pushes {
    /// Chat message for channel members.
    pub const INCOMING_MESSAGE: &str = "incomingMessage";
    /// Lawyer availability for a user's feed.
    pub const STATUS_CHANGED: &str = "statusChanged";
}

/// `lawyerStatusChanged` payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LawyerStatusChanged {
    /// Lawyer whose status changed.
    pub lawyer_id: String,
    /// User whose feed is notified.
    pub user_id: String,
    /// New status.
    pub status: String,
}

/// `cacheInvalidated` payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheInvalidated {
    /// Tags to invalidate.
    pub tags: Vec<String>,
}

/// `chatMessagePosted` payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessagePosted {
    /// Chat channel key.
    pub group_id: String,
    /// Author.
    pub sender_id: String,
    /// Message text.
    pub text: String,
    /// Stored message id.
    pub message_id: String,
}

/// Catalog of the built-in events.
pub fn event_catalog() -> Result<EventCatalog, CoreError> {
    let id = || SchemaDescriptor::string().min_length(1);
    EventCatalog::new()
        .register(
            names::LAWYER_STATUS_CHANGED,
            &SchemaDescriptor::object()
                .field("lawyerId", id())
                .field("userId", id())
                .field("status", SchemaDescriptor::string().one_of(STATUSES))
                .named("event.lawyerStatusChanged"),
        )?
        .register(
            names::CACHE_INVALIDATED,
            &SchemaDescriptor::object()
                .field("tags", SchemaDescriptor::array(id()).min_items(1))
                .named("event.cacheInvalidated"),
        )?
        .register(
            names::CHAT_MESSAGE_POSTED,
            &SchemaDescriptor::object()
                .field("groupId", id())
                .field("senderId", id())
                .field("text", SchemaDescriptor::string())
                .field("messageId", id())
                .named("event.chatMessagePosted"),
        )
}

fn decode<T: serde::de::DeserializeOwned>(payload: Value) -> Result<T, CoreError> {
    Ok(serde_json::from_value(payload)?)
}

/// Invalidates the lawyer's cache tag and notifies the user's feed.
pub struct LawyerStatusChangedHandler {
    cache: TaggedCache,
    fanout: FanoutDispatcher,
}

#[async_trait]
impl EventHandler for LawyerStatusChangedHandler {
    async fn handle(&self, payload: Value, ctx: &EventContext) -> Result<(), CoreError> {
        let event: LawyerStatusChanged = decode(payload)?;
        let _ = self.cache.invalidate_tags(&[CacheKey::lawyer_tag(&event.lawyer_id)]).await?;
        let push = PushFrame::new(
            pushes::STATUS_CHANGED,
            json!({ "lawyerId": event.lawyer_id, "status": event.status, "messageId": ctx.message_id }),
        );
        let report = self.fanout.deliver(ChannelKind::Notifications, &event.user_id, &push).await?;
        info!(lawyer_id = %event.lawyer_id, delivered = report.delivered, "status change propagated");
        Ok(())
    }
}

/// Invalidates the listed tags.
pub struct CacheInvalidatedHandler {
    cache: TaggedCache,
}

#[async_trait]
impl EventHandler for CacheInvalidatedHandler {
    async fn handle(&self, payload: Value, _ctx: &EventContext) -> Result<(), CoreError> {
        let event: CacheInvalidated = decode(payload)?;
        let removed = self.cache.invalidate_tags(&event.tags).await?;
        info!(tags = ?event.tags, removed, "cache invalidated");
        Ok(())
    }
}

/// Delivers a stored chat message to the group's channel.
pub struct ChatMessagePostedHandler {
    fanout: FanoutDispatcher,
}

#[async_trait]
impl EventHandler for ChatMessagePostedHandler {
    async fn handle(&self, payload: Value, _ctx: &EventContext) -> Result<(), CoreError> {
        let event: ChatMessagePosted = decode(payload)?;
        let push = incoming_message(&event);
        let _ = self.fanout.deliver(ChannelKind::Chat, &event.group_id, &push).await?;
        Ok(())
    }
}

/// `incomingMessage` push for a chat message.
pub fn incoming_message(event: &ChatMessagePosted) -> PushFrame {
    PushFrame::new(
        pushes::INCOMING_MESSAGE,
        json!({
            "groupId": event.group_id,
            "senderId": event.sender_id,
            "text": event.text,
            "messageId": event.message_id,
        }),
    )
}

/// Listener with a handler for every built-in event.
pub fn build_listener(app: &AppContext) -> Result<EventListener, CoreError> {
    let mut listener = EventListener::new(
        Arc::new(QueueRecordAdapter),
        app.catalog.clone(),
        app.settings.bus.validate_on_receive,
    );
    listener.on(
        names::LAWYER_STATUS_CHANGED,
        LawyerStatusChangedHandler {
            cache: app.cache.clone(),
            fanout: app.fanout.clone(),
        },
    )?;
    listener.on(names::CACHE_INVALIDATED, CacheInvalidatedHandler { cache: app.cache.clone() })?;
    listener.on(names::CHAT_MESSAGE_POSTED, ChatMessagePostedHandler { fanout: app.fanout.clone() })?;
    Ok(listener)
}

#[cfg(test)]
#[allow(unused_results)]
mod tests {
    use super::*;
    use counsel_core::ConnectionId;
    use counsel_realtime::{EventTransport, ListenerWorker};
    use std::time::Duration;

    fn worker(app: &AppContext) -> ListenerWorker {
        let transport: Arc<dyn EventTransport> = Arc::new(app.queue.clone());
        ListenerWorker::new(transport, Arc::new(build_listener(app).unwrap()), 10, Duration::from_millis(10))
    }

    #[tokio::test]
    async fn status_change_invalidates_and_notifies() {
        let app = AppContext::in_memory().unwrap();
        let (conn, mut rx) = app.gateway.open(None).await;
        app.registry.join(&conn.id, ChannelKind::Notifications, "user-1").await.unwrap();
        app.cache
            .set(&CacheKey::profile("l1"), &json!({"name": "L"}), &[CacheKey::lawyer_tag("l1")], None)
            .await
            .unwrap();

        let event = LawyerStatusChanged {
            lawyer_id: "l1".into(),
            user_id: "user-1".into(),
            status: "busy".into(),
        };
        let id = app.publisher.publish(names::LAWYER_STATUS_CHANGED, &event).await.unwrap();
        let report = worker(&app).poll_once().await.unwrap();
        assert_eq!(report.acked.len(), 1);

        assert_eq!(app.cache.get::<Value>(&CacheKey::profile("l1")).await, None);
        let frame: Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(
            frame,
            json!({"event": "statusChanged", "lawyerId": "l1", "status": "busy", "messageId": id.as_str()})
        );
    }

    #[tokio::test]
    async fn chat_message_reaches_group() {
        let app = AppContext::in_memory().unwrap();
        let (conn, mut rx) = app.gateway.open(None).await;
        app.registry.join(&conn.id, ChannelKind::Chat, "group-42").await.unwrap();
        app.registry.join(&ConnectionId::from("ghost"), ChannelKind::Chat, "group-42").await.unwrap();

        let event = ChatMessagePosted {
            group_id: "group-42".into(),
            sender_id: "u1".into(),
            text: "hi".into(),
            message_id: "m1".into(),
        };
        app.publisher.publish(names::CHAT_MESSAGE_POSTED, &event).await.unwrap();
        worker(&app).poll_once().await.unwrap();

        let frame: Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(frame["event"], "incomingMessage");
        assert_eq!(frame["text"], "hi");
        // The ghost connection is not on this gateway and gets pruned.
        assert_eq!(app.registry.list_connections(ChannelKind::Chat, "group-42").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn cache_invalidated_event() {
        let app = AppContext::in_memory().unwrap();
        app.cache.set("specializations:9", &vec!["tax"], &["case:9"], None).await.unwrap();
        app.publisher
            .publish(names::CACHE_INVALIDATED, &CacheInvalidated { tags: vec!["case:9".into()] })
            .await
            .unwrap();
        worker(&app).poll_once().await.unwrap();
        assert_eq!(app.cache.get::<Vec<String>>("specializations:9").await, None);
    }

    #[tokio::test]
    async fn invalid_status_is_refused_at_publish() {
        let app = AppContext::in_memory().unwrap();
        let event = LawyerStatusChanged {
            lawyer_id: "l1".into(),
            user_id: "u1".into(),
            status: "asleep".into(),
        };
        let err = app.publisher.publish(names::LAWYER_STATUS_CHANGED, &event).await.unwrap_err();
        assert!(matches!(err, CoreError::EarlyExit { status_code: 500, .. }));
    }
}
