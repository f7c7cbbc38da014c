//! Channel membership actions.

use async_trait::async_trait;
use counsel_core::{CoreError, Outcome};
use counsel_realtime::ChannelKind;
use counsel_rpc::{ActionHandler, Reply};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use super::parse_body;
use crate::invocation::Invocation;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JoinRequest {
    channel_key: String,
}

/// `join`: put the calling socket in a chat channel.
pub struct JoinHandler;

#[async_trait]
impl ActionHandler<Invocation> for JoinHandler {
    async fn handle(&self, body: Value, ctx: &Invocation) -> Outcome<Reply> {
        async {
            let request: JoinRequest = parse_body(body)?;
            let connection_id = ctx.require_connection()?;
            ctx.app
                .registry
                .join(connection_id, ChannelKind::Chat, &request.channel_key)
                .await?;
            debug!(%connection_id, channel_key = %request.channel_key, "joined chat channel");
            Ok::<_, CoreError>(Reply::with_status(200, None))
        }
        .await
        .into()
    }
}

/// `leave`: drop the calling socket's membership. Not being a member is fine.
pub struct LeaveHandler;

#[async_trait]
impl ActionHandler<Invocation> for LeaveHandler {
    async fn handle(&self, _body: Value, ctx: &Invocation) -> Outcome<Reply> {
        async {
            let connection_id = ctx.require_connection()?;
            let _ = ctx.app.registry.leave(connection_id).await?;
            Ok::<_, CoreError>(Reply::no_content())
        }
        .await
        .into()
    }
}

/// `subscribeNotifications`: put the calling socket in the caller's own
/// notification feed.
pub struct SubscribeNotificationsHandler;

#[async_trait]
impl ActionHandler<Invocation> for SubscribeNotificationsHandler {
    async fn handle(&self, _body: Value, ctx: &Invocation) -> Outcome<Reply> {
        async {
            let connection_id = ctx.require_connection()?;
            let claims = ctx.require_claims()?;
            ctx.app
                .registry
                .join(connection_id, ChannelKind::Notifications, &claims.sub)
                .await?;
            Ok::<_, CoreError>(Reply::ok(json!({ "channelKey": claims.sub })))
        }
        .await
        .into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Claims, Role};
    use crate::context::AppContext;
    use assert_matches::assert_matches;
    use counsel_core::ConnectionId;
    use std::sync::Arc;

    fn invocation(claims: Option<Claims>) -> Invocation {
        Invocation::websocket(Arc::new(AppContext::in_memory().unwrap()), ConnectionId::from("c1"), claims)
    }

    #[tokio::test]
    async fn join_then_leave() {
        let inv = invocation(None);
        let reply = JoinHandler.handle(json!({"channelKey": "group-42"}), &inv).await;
        assert_matches!(reply, Outcome::Ok(Reply { status_code: 200, body: None }));

        let members = inv.app.registry.list_connections(ChannelKind::Chat, "group-42").await.unwrap();
        assert_eq!(members[0].connection_id.as_str(), "c1");

        let reply = LeaveHandler.handle(json!({}), &inv).await;
        assert_matches!(reply, Outcome::Ok(Reply { status_code: 204, .. }));
        assert!(inv.app.registry.lookup(&ConnectionId::from("c1")).await.unwrap().is_none());

        // Leaving twice is not an error.
        assert!(LeaveHandler.handle(json!({}), &inv).await.is_ok());
    }

    #[tokio::test]
    async fn rejoin_moves_connection() {
        let inv = invocation(None);
        let _ = JoinHandler.handle(json!({"channelKey": "a"}), &inv).await;
        let _ = JoinHandler.handle(json!({"channelKey": "b"}), &inv).await;
        assert!(inv.app.registry.list_connections(ChannelKind::Chat, "a").await.unwrap().is_empty());
        assert_eq!(inv.app.registry.list_connections(ChannelKind::Chat, "b").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn subscribe_requires_claims() {
        let reply = SubscribeNotificationsHandler.handle(json!({}), &invocation(None)).await;
        assert_matches!(reply, Outcome::Fatal(CoreError::EarlyExit { status_code: 401, .. }));

        let inv = invocation(Some(Claims {
            sub: "user-7".into(),
            role: Role::Client,
            exp: u64::MAX,
        }));
        let reply = SubscribeNotificationsHandler.handle(json!({}), &inv).await;
        assert_matches!(reply, Outcome::Ok(r) if r.body == Some(json!({"channelKey": "user-7"})));
        let feed = inv.app.registry.list_connections(ChannelKind::Notifications, "user-7").await.unwrap();
        assert_eq!(feed.len(), 1);
    }
}
