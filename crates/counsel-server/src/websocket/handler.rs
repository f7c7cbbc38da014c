//! Inbound frame dispatch.

use counsel_rpc::{ActionRegistry, RequestEnvelope, ResponseEnvelope};
use tracing::{debug, instrument, warn};

use crate::invocation::Invocation;

/// Parse one text frame and dispatch it.
///
/// Returns `None` when the frame cannot be answered: it is not JSON, or it
/// lacks the `action` or `correlationId` a response would be addressed by.
#[instrument(skip_all, fields(action, correlation_id))]
pub async fn handle_frame(
    text: &str,
    actions: &ActionRegistry<Invocation>,
    invocation: &Invocation,
) -> Option<ResponseEnvelope> {
    let frame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(error = %e, "invalid JSON frame");
            return None;
        }
    };
    let request = match RequestEnvelope::from_frame(frame) {
        Ok(request) => request,
        Err(e) => {
            warn!(error = %e, "unroutable frame");
            return None;
        }
    };

    let span = tracing::Span::current();
    let _ = span.record("action", request.action.as_str());
    let _ = span.record("correlation_id", request.correlation_id.as_str());
    debug!("dispatching frame");

    let reply = actions.dispatch(&request.action, request.body.clone(), invocation).await;
    Some(request.respond(reply))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::build_registry;
    use crate::context::AppContext;
    use counsel_core::ConnectionId;
    use counsel_rpc::DispatchOptions;
    use serde_json::json;
    use std::sync::Arc;

    fn setup() -> (ActionRegistry<Invocation>, Invocation) {
        let app = Arc::new(AppContext::in_memory().unwrap());
        let actions = build_registry(DispatchOptions::default()).unwrap();
        (actions, Invocation::websocket(app, ConnectionId::from("c1"), None))
    }

    #[tokio::test]
    async fn join_frame_gets_correlated_response() {
        let (actions, inv) = setup();
        let text = r#"{"action":"join","correlationId":"r1","channelKey":"group-42"}"#;
        let resp = handle_frame(text, &actions, &inv).await.unwrap();
        assert_eq!(
            resp.to_frame(),
            json!({"event": "response:join", "body": {"correlationId": "r1", "statusCode": 200}})
        );
    }

    #[tokio::test]
    async fn invalid_body_is_400() {
        let (actions, inv) = setup();
        let text = r#"{"action":"join","correlationId":"r2","channelKey":""}"#;
        let resp = handle_frame(text, &actions, &inv).await.unwrap();
        assert_eq!(resp.status_code, 400);
        assert_eq!(resp.body.unwrap()["errors"][0]["path"], "/body/channelKey");
    }

    #[tokio::test]
    async fn unknown_action_is_404() {
        let (actions, inv) = setup();
        let resp = handle_frame(r#"{"action":"nope","correlationId":"r3"}"#, &actions, &inv)
            .await
            .unwrap();
        assert_eq!(resp.status_code, 404);
        assert_eq!(resp.event_name(), "response:nope");
    }

    #[tokio::test]
    async fn unaddressable_frames_are_dropped() {
        let (actions, inv) = setup();
        assert!(handle_frame("not json", &actions, &inv).await.is_none());
        assert!(handle_frame(r#"{"action":"join"}"#, &actions, &inv).await.is_none());
    }
}
