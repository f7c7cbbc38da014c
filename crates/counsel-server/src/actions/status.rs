//! Lawyer status action.

use async_trait::async_trait;
use counsel_core::{CoreError, Outcome};
use counsel_rpc::{ActionHandler, Reply};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use super::parse_body;
use crate::auth::Role;
use crate::events::{LawyerStatusChanged, names};
use crate::invocation::Invocation;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateStatusRequest {
    lawyer_id: String,
    status: String,
}

/// `updateStatus`: publish `lawyerStatusChanged` for the listener to apply.
/// Lawyers may only change their own status; admins may change anyone's.
pub struct UpdateStatusHandler;

#[async_trait]
impl ActionHandler<Invocation> for UpdateStatusHandler {
    async fn handle(&self, body: Value, ctx: &Invocation) -> Outcome<Reply> {
        async {
            let request: UpdateStatusRequest = parse_body(body)?;
            let caller = ctx.require_role(&[Role::Lawyer, Role::Admin])?;
            if caller.role == Role::Lawyer && caller.sub != request.lawyer_id {
                return Err(CoreError::early_exit(
                    403,
                    Some(json!({ "error": "lawyers may only update their own status" })),
                ));
            }

            // The lawyer's own notifications feed is keyed by their id.
            let event = LawyerStatusChanged {
                user_id: request.lawyer_id.clone(),
                lawyer_id: request.lawyer_id,
                status: request.status,
            };
            let message_id = ctx.app.publisher.publish(names::LAWYER_STATUS_CHANGED, &event).await?;
            info!(lawyer_id = %event.lawyer_id, status = %event.status, "status change published");
            Ok::<_, CoreError>(Reply::with_status(202, Some(json!({ "messageId": message_id }))))
        }
        .await
        .into()
    }
}
