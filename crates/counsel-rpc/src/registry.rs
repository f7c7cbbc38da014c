//! Action registry and dispatch.
//!
//! The registry is built once at startup from an [`EndpointMap`] plus one
//! handler per action. Every HTTP request and every WebSocket frame goes
//! through [`ActionRegistry::dispatch`], which owns the outermost error
//! boundary: nothing a handler does (error, timeout, panic) escapes as
//! anything other than a well-formed [`Reply`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use counsel_core::{CoreError, FieldError, Outcome};
use counsel_settings::RpcSettings;
use futures::FutureExt;
use metrics::{counter, histogram};
use serde_json::{Value, json};
use tracing::{debug, error, instrument, warn};

use crate::endpoint::EndpointMap;
use crate::types::Reply;

/// Body returned for any unexpected failure. Details stay in the logs.
pub const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";

/// Trait implemented by every action handler.
///
/// `C` is the per-invocation context the gateway builds for each request.
#[async_trait]
pub trait ActionHandler<C: Send + Sync>: Send + Sync {
    /// Run the action on an already-validated body.
    async fn handle(&self, body: Value, ctx: &C) -> Outcome<Reply>;
}

/// Dispatch behavior.
#[derive(Clone, Debug)]
pub struct DispatchOptions {
    /// Validate request bodies before calling the handler.
    pub validate_requests: bool,
    /// Validate successful response bodies before replying.
    pub validate_responses: bool,
    /// Maximum time one handler may run.
    pub handler_timeout: Duration,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self::from(&RpcSettings::default())
    }
}

impl From<&RpcSettings> for DispatchOptions {
    fn from(settings: &RpcSettings) -> Self {
        Self {
            validate_requests: settings.validate_requests,
            validate_responses: settings.validate_responses,
            handler_timeout: Duration::from_secs(settings.handler_timeout_secs),
        }
    }
}

/// Map from action name to endpoint and handler.
pub struct ActionRegistry<C: Send + Sync + 'static> {
    endpoints: EndpointMap,
    handlers: HashMap<String, Arc<dyn ActionHandler<C>>>,
    options: DispatchOptions,
}

impl<C: Send + Sync + 'static> ActionRegistry<C> {
    /// Empty registry over `endpoints`.
    pub fn new(endpoints: EndpointMap, options: DispatchOptions) -> Self {
        Self {
            endpoints,
            handlers: HashMap::new(),
            options,
        }
    }

    /// Register the handler for `action`. The action must have an endpoint.
    pub fn register(&mut self, action: &str, handler: impl ActionHandler<C> + 'static) -> Result<(), CoreError> {
        if !self.endpoints.contains(action) {
            return Err(CoreError::configuration(format!(
                "handler registered for '{action}' which has no endpoint"
            )));
        }
        if self.handlers.insert(action.to_owned(), Arc::new(handler)).is_some() {
            return Err(CoreError::configuration(format!("duplicate handler for '{action}'")));
        }
        Ok(())
    }

    /// Check that every endpoint has a handler.
    pub fn verify(&self) -> Result<(), CoreError> {
        let missing: Vec<&str> = self.endpoints.keys().filter(|k| !self.handlers.contains_key(*k)).collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(CoreError::configuration(format!("no handler for: {}", missing.join(", "))))
        }
    }

    /// Registered actions, sorted.
    pub fn actions(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Whether `action` has a handler.
    pub fn has_action(&self, action: &str) -> bool {
        self.handlers.contains_key(action)
    }

    /// The endpoint map.
    pub fn endpoints(&self) -> &EndpointMap {
        &self.endpoints
    }

    /// Run `action` on `body` and turn whatever happens into a [`Reply`].
    ///
    /// - unknown action: 404
    /// - request validation failure or [`Outcome::ValidationFailure`]: 400 `{errors}`
    /// - [`CoreError::EarlyExit`]: its own status and body
    /// - any other error, a timeout, or a panic: 500 `{error}`
    #[instrument(skip_all, fields(action = %action))]
    pub async fn dispatch(&self, action: &str, body: Value, ctx: &C) -> Reply {
        let start = Instant::now();
        let reply = self.dispatch_inner(action, body, ctx).await;

        let status = reply.status_code.to_string();
        counter!("rpc_requests_total", "action" => action.to_owned(), "status" => status).increment(1);
        let elapsed = start.elapsed();
        histogram!("rpc_request_duration_seconds", "action" => action.to_owned()).record(elapsed.as_secs_f64());
        if elapsed.as_secs() >= 5 {
            warn!(action, duration_secs = elapsed.as_secs_f64(), "slow action");
        }
        reply
    }

    async fn dispatch_inner(&self, action: &str, body: Value, ctx: &C) -> Reply {
        let (Some(endpoint), Some(handler)) = (self.endpoints.get(action), self.handlers.get(action)) else {
            debug!(action, "unknown action");
            return Reply::with_status(404, Some(json!({ "error": format!("Unknown action '{action}'") })));
        };

        if self.options.validate_requests {
            let errors = endpoint.validate_request(&body);
            if !errors.is_empty() {
                return validation_reply(errors);
            }
        }

        let guarded = std::panic::AssertUnwindSafe(handler.handle(body, ctx)).catch_unwind();
        let outcome = match tokio::time::timeout(self.options.handler_timeout, guarded).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_panic)) => {
                error!(action, "action handler panicked");
                return internal_reply();
            }
            Err(_elapsed) => {
                error!(action, timeout = ?self.options.handler_timeout, "action handler timed out");
                return internal_reply();
            }
        };

        match outcome {
            Outcome::Ok(reply) => {
                if self.options.validate_responses && reply.is_success() {
                    if let Some(body) = &reply.body {
                        let errors = endpoint.validate_response(body);
                        if !errors.is_empty() {
                            error!(action, ?errors, "response failed its own schema");
                            return internal_reply();
                        }
                    }
                }
                reply
            }
            Outcome::ValidationFailure(errors) | Outcome::Fatal(CoreError::Validation(errors)) => {
                validation_reply(errors)
            }
            Outcome::Fatal(CoreError::EarlyExit { status_code, body }) => Reply::with_status(status_code, body),
            Outcome::Fatal(err) => {
                error!(action, kind = err.kind(), error = %err, "action failed");
                internal_reply()
            }
        }
    }
}

fn validation_reply(errors: Vec<FieldError>) -> Reply {
    Reply::with_status(400, Some(json!({ "errors": errors })))
}

fn internal_reply() -> Reply {
    Reply::with_status(500, Some(json!({ "error": INTERNAL_ERROR_MESSAGE })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::EndpointDefinition;
    use counsel_schema::{SchemaDescriptor, ValidatorCache};

    struct Echo;

    #[async_trait]
    impl ActionHandler<()> for Echo {
        async fn handle(&self, body: Value, _ctx: &()) -> Outcome<Reply> {
            Outcome::Ok(Reply::ok(body))
        }
    }

    struct Fixed(Outcome<Reply>);

    #[async_trait]
    impl ActionHandler<()> for Fixed {
        async fn handle(&self, _body: Value, _ctx: &()) -> Outcome<Reply> {
            match &self.0 {
                Outcome::Ok(r) => Outcome::Ok(r.clone()),
                Outcome::ValidationFailure(e) => Outcome::ValidationFailure(e.clone()),
                Outcome::Fatal(CoreError::EarlyExit { status_code, body }) => {
                    Outcome::Fatal(CoreError::early_exit(*status_code, body.clone()))
                }
                Outcome::Fatal(_) => Outcome::Fatal(CoreError::internal("db path /var/secret leaked")),
            }
        }
    }

    struct Panics;

    #[async_trait]
    impl ActionHandler<()> for Panics {
        async fn handle(&self, _body: Value, _ctx: &()) -> Outcome<Reply> {
            panic!("handler bug");
        }
    }

    struct Slow;

    #[async_trait]
    impl ActionHandler<()> for Slow {
        async fn handle(&self, _body: Value, _ctx: &()) -> Outcome<Reply> {
            tokio::time::sleep(Duration::from_secs(120)).await;
            Outcome::Ok(Reply::no_content())
        }
    }

    fn endpoints(cache: &ValidatorCache) -> EndpointMap {
        let join = EndpointDefinition::websocket("join")
            .request_schema_in(
                cache,
                &SchemaDescriptor::object()
                    .field("channelKey", SchemaDescriptor::string().min_length(1))
                    .named("registry.test.join"),
            )
            .unwrap()
            .response_schema_in(
                cache,
                &SchemaDescriptor::object()
                    .field("channelKey", SchemaDescriptor::string())
                    .named("registry.test.join.response"),
            )
            .unwrap();
        EndpointMap::websocket([
            ("join", join),
            ("fixed", EndpointDefinition::websocket("fixed")),
            ("panics", EndpointDefinition::websocket("panics")),
            ("slow", EndpointDefinition::websocket("slow")),
        ])
        .unwrap()
    }

    fn registry(fixed: Outcome<Reply>, options: DispatchOptions) -> ActionRegistry<()> {
        let cache = ValidatorCache::new();
        let mut reg = ActionRegistry::new(endpoints(&cache), options);
        reg.register("join", Echo).unwrap();
        reg.register("fixed", Fixed(fixed)).unwrap();
        reg.register("panics", Panics).unwrap();
        reg.register("slow", Slow).unwrap();
        reg
    }

    #[tokio::test]
    async fn valid_request_reaches_handler() {
        let reg = registry(Outcome::Ok(Reply::no_content()), DispatchOptions::default());
        let reply = reg.dispatch("join", json!({"channelKey": "group-42"}), &()).await;
        assert_eq!(reply, Reply::ok(json!({"channelKey": "group-42"})));
    }

    #[tokio::test]
    async fn invalid_request_is_400_with_prefixed_paths() {
        let reg = registry(Outcome::Ok(Reply::no_content()), DispatchOptions::default());
        let reply = reg.dispatch("join", json!({"channelKey": ""}), &()).await;
        assert_eq!(reply.status_code, 400);
        assert_eq!(reply.body.unwrap()["errors"][0]["path"], "/body/channelKey");
    }

    #[tokio::test]
    async fn validation_can_be_disabled() {
        let options = DispatchOptions {
            validate_requests: false,
            ..DispatchOptions::default()
        };
        let reg = registry(Outcome::Ok(Reply::no_content()), options);
        let reply = reg.dispatch("join", json!({}), &()).await;
        assert_eq!(reply.status_code, 200);
    }

    #[tokio::test]
    async fn unknown_action_is_404() {
        let reg = registry(Outcome::Ok(Reply::no_content()), DispatchOptions::default());
        let reply = reg.dispatch("nope", json!({}), &()).await;
        assert_eq!(reply.status_code, 404);
    }

    #[tokio::test]
    async fn handler_validation_failure_is_400() {
        let errors = vec![FieldError::new("/groupId", "not a member", json!("g"))];
        let reg = registry(Outcome::ValidationFailure(errors), DispatchOptions::default());
        let reply = reg.dispatch("fixed", json!({}), &()).await;
        assert_eq!(reply.status_code, 400);
        assert_eq!(reply.body.unwrap()["errors"][0]["message"], "not a member");
    }

    #[tokio::test]
    async fn early_exit_uses_its_own_status() {
        let reg = registry(
            Outcome::Fatal(CoreError::early_exit(409, Some(json!({"reason": "busy"})))),
            DispatchOptions::default(),
        );
        let reply = reg.dispatch("fixed", json!({}), &()).await;
        assert_eq!(reply, Reply::with_status(409, Some(json!({"reason": "busy"}))));
    }

    #[tokio::test]
    async fn internal_errors_are_sanitized() {
        let reg = registry(Outcome::Fatal(CoreError::internal("x")), DispatchOptions::default());
        let reply = reg.dispatch("fixed", json!({}), &()).await;
        assert_eq!(reply.status_code, 500);
        let body = reply.body.unwrap().to_string();
        assert!(!body.contains("/var/secret"));
        assert!(body.contains(INTERNAL_ERROR_MESSAGE));
    }

    #[tokio::test]
    async fn panic_is_500() {
        let reg = registry(Outcome::Ok(Reply::no_content()), DispatchOptions::default());
        let reply = reg.dispatch("panics", json!({}), &()).await;
        assert_eq!(reply.status_code, 500);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_500() {
        let reg = registry(Outcome::Ok(Reply::no_content()), DispatchOptions::default());
        let reply = reg.dispatch("slow", json!({}), &()).await;
        assert_eq!(reply.status_code, 500);
    }

    #[tokio::test]
    async fn response_validation_turns_bad_reply_into_500() {
        let options = DispatchOptions {
            validate_responses: true,
            validate_requests: false,
            ..DispatchOptions::default()
        };
        let reg = registry(Outcome::Ok(Reply::no_content()), options);
        let reply = reg.dispatch("join", json!({"channelKey": 7}), &()).await;
        assert_eq!(reply.status_code, 500);
    }

    #[test]
    fn register_requires_endpoint() {
        let cache = ValidatorCache::new();
        let mut reg: ActionRegistry<()> = ActionRegistry::new(endpoints(&cache), DispatchOptions::default());
        assert!(reg.register("ghost", Echo).unwrap_err().is_configuration());
        reg.register("join", Echo).unwrap();
        assert!(reg.register("join", Echo).unwrap_err().is_configuration());
    }

    #[test]
    fn verify_reports_missing_handlers() {
        let cache = ValidatorCache::new();
        let mut reg: ActionRegistry<()> = ActionRegistry::new(endpoints(&cache), DispatchOptions::default());
        reg.register("join", Echo).unwrap();
        let err = reg.verify().unwrap_err();
        assert!(err.to_string().contains("fixed"));

        let full = registry(Outcome::Ok(Reply::no_content()), DispatchOptions::default());
        assert!(full.verify().is_ok());
        assert_eq!(full.actions(), vec!["fixed", "join", "panics", "slow"]);
    }
}
