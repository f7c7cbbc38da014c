//! Per-invocation context.

use std::sync::Arc;

use counsel_core::{ConnectionId, CoreError, DeferredWork};
use serde_json::json;

use crate::auth::{Claims, Role};
use crate::context::AppContext;

/// One unit of work: an HTTP request, a `WebSocket` frame, or a queue batch.
/// Nothing carries over from one invocation to the next.
pub struct Invocation {
    /// Shared dependencies.
    pub app: Arc<AppContext>,
    /// Originating socket; `None` over HTTP.
    pub connection_id: Option<ConnectionId>,
    /// Verified caller; `None` when anonymous.
    pub claims: Option<Claims>,
    /// Side effects awaited before the invocation ends.
    pub deferred: DeferredWork,
}

impl Invocation {
    /// Invocation for an HTTP request.
    pub fn http(app: Arc<AppContext>, claims: Option<Claims>) -> Self {
        Self {
            app,
            connection_id: None,
            claims,
            deferred: DeferredWork::new(),
        }
    }

    /// Invocation for a frame received on `connection_id`.
    pub fn websocket(app: Arc<AppContext>, connection_id: ConnectionId, claims: Option<Claims>) -> Self {
        Self {
            app,
            connection_id: Some(connection_id),
            claims,
            deferred: DeferredWork::new(),
        }
    }

    /// The originating socket, or a 400 for actions that need one.
    pub fn require_connection(&self) -> Result<&ConnectionId, CoreError> {
        self.connection_id.as_ref().ok_or_else(|| {
            CoreError::early_exit(400, Some(json!({ "error": "action requires a websocket connection" })))
        })
    }

    /// The verified caller, or a 401.
    pub fn require_claims(&self) -> Result<&Claims, CoreError> {
        self.claims
            .as_ref()
            .ok_or_else(|| CoreError::early_exit(401, Some(json!({ "error": "authentication required" }))))
    }

    /// The verified caller if their role is one of `roles`, else 401 or 403.
    pub fn require_role(&self, roles: &[Role]) -> Result<&Claims, CoreError> {
        let claims = self.require_claims()?;
        if roles.contains(&claims.role) {
            Ok(claims)
        } else {
            Err(CoreError::early_exit(
                403,
                Some(json!({ "error": format!("role '{}' may not perform this action", claims.role) })),
            ))
        }
    }

    /// Await deferred side effects. Returns how many failed.
    pub async fn finish(self) -> usize {
        self.deferred.drain().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn claims(role: Role) -> Claims {
        Claims {
            sub: "u1".into(),
            role,
            exp: u64::MAX,
        }
    }

    #[test]
    fn http_invocation_has_no_connection() {
        let inv = Invocation::http(Arc::new(AppContext::in_memory().unwrap()), None);
        assert_matches!(inv.require_connection(), Err(CoreError::EarlyExit { status_code: 400, .. }));
        assert_matches!(inv.require_claims(), Err(CoreError::EarlyExit { status_code: 401, .. }));
    }

    #[test]
    fn role_check() {
        let app = Arc::new(AppContext::in_memory().unwrap());
        let inv = Invocation::websocket(app, ConnectionId::new(), Some(claims(Role::Client)));
        assert!(inv.require_connection().is_ok());
        assert_matches!(
            inv.require_role(&[Role::Lawyer, Role::Admin]),
            Err(CoreError::EarlyExit { status_code: 403, .. })
        );
        assert_eq!(inv.require_role(&[Role::Client]).unwrap().sub, "u1");
    }

    #[tokio::test]
    async fn finish_drains_deferred_work() {
        let inv = Invocation::http(Arc::new(AppContext::in_memory().unwrap()), None);
        inv.deferred.defer("ok", async { Ok(()) });
        inv.deferred.defer("fails", async { Err(CoreError::transport("down")) });
        assert_eq!(inv.finish().await, 1);
    }
}
