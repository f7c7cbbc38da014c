//! Chat actions.

use async_trait::async_trait;
use counsel_core::{CoreError, MessageId, Outcome};
use counsel_realtime::ChannelKind;
use counsel_rpc::{ActionHandler, Reply};
use serde::Deserialize;
use serde_json::{Value, json};

use super::parse_body;
use crate::events::{ChatMessagePosted, incoming_message};
use crate::invocation::Invocation;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendMessageRequest {
    group_id: String,
    text: String,
}

/// `sendMessage`: reply with the new message id, then deliver
/// `incomingMessage` to the group before the invocation ends.
pub struct SendMessageHandler;

#[async_trait]
impl ActionHandler<Invocation> for SendMessageHandler {
    async fn handle(&self, body: Value, ctx: &Invocation) -> Outcome<Reply> {
        async {
            let request: SendMessageRequest = parse_body(body)?;
            let sender = ctx.require_claims()?;
            let message = ChatMessagePosted {
                group_id: request.group_id,
                sender_id: sender.sub.clone(),
                text: request.text,
                message_id: MessageId::new().into_inner(),
            };

            let fanout = ctx.app.fanout.clone();
            let push = incoming_message(&message);
            let group = message.group_id.clone();
            ctx.deferred.defer("deliver incomingMessage", async move {
                let _ = fanout.deliver(ChannelKind::Chat, &group, &push).await?;
                Ok::<(), CoreError>(())
            });

            Ok::<_, CoreError>(Reply::ok(json!({ "messageId": message.message_id })))
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
    use std::sync::Arc;

    #[tokio::test]
    async fn delivery_waits_for_finish() {
        let app = Arc::new(AppContext::in_memory().unwrap());
        let (member, mut rx) = app.gateway.open(None).await;
        app.registry.join(&member.id, ChannelKind::Chat, "g1").await.unwrap();

        let inv = Invocation::http(
            app.clone(),
            Some(Claims {
                sub: "u1".into(),
                role: Role::Client,
                exp: u64::MAX,
            }),
        );
        let reply = SendMessageHandler.handle(json!({"groupId": "g1", "text": "hello"}), &inv).await;
        let Outcome::Ok(reply) = reply else { panic!("expected reply") };
        let message_id = reply.body.unwrap()["messageId"].as_str().unwrap().to_owned();
        assert!(rx.try_recv().is_err());

        assert_eq!(inv.finish().await, 0);
        let frame: Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(
            frame,
            json!({"event": "incomingMessage", "groupId": "g1", "senderId": "u1", "text": "hello", "messageId": message_id})
        );
    }

    #[tokio::test]
    async fn anonymous_sender_rejected() {
        let inv = Invocation::http(Arc::new(AppContext::in_memory().unwrap()), None);
        let reply = SendMessageHandler.handle(json!({"groupId": "g1", "text": "x"}), &inv).await;
        assert_matches!(reply, Outcome::Fatal(CoreError::EarlyExit { status_code: 401, .. }));
        assert!(inv.deferred.is_empty());
    }
}
