//! Endpoint definitions.
//!
//! An endpoint pairs a route with optional request and response validators.
//! Maps are checked once when built: a WebSocket action must equal the key
//! it is registered under, and two HTTP endpoints may not share a
//! `(method, path)`. Either violation is a configuration error and the
//! server refuses to start.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use counsel_core::{CoreError, FieldError};
use counsel_schema::{CompiledValidator, SchemaDescriptor, ValidatorCache, global_cache};
use serde_json::Value;

/// Where an endpoint is reachable.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Route {
    /// HTTP method and path.
    Http {
        /// Upper-case method.
        method: String,
        /// Path pattern.
        path: String,
    },
    /// WebSocket action.
    WebSocket {
        /// Action name carried in the request frame.
        action: String,
    },
}

/// Transport an [`EndpointMap`] serves.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transport {
    /// HTTP endpoints keyed by name.
    Http,
    /// WebSocket endpoints keyed by action.
    WebSocket,
}

/// One endpoint.
#[derive(Clone, Debug)]
pub struct EndpointDefinition {
    name: String,
    route: Route,
    request: Option<Arc<CompiledValidator>>,
    response: Option<Arc<CompiledValidator>>,
}

impl EndpointDefinition {
    /// WebSocket endpoint named after its action.
    pub fn websocket(action: impl Into<String>) -> Self {
        let action = action.into();
        Self {
            name: action.clone(),
            route: Route::WebSocket { action },
            request: None,
            response: None,
        }
    }

    /// HTTP endpoint.
    pub fn http(name: impl Into<String>, method: &str, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            route: Route::Http {
                method: method.to_ascii_uppercase(),
                path: path.into(),
            },
            request: None,
            response: None,
        }
    }

    /// Validate requests against `descriptor` (compiled through the global cache).
    pub fn request_schema(self, descriptor: &SchemaDescriptor) -> Result<Self, CoreError> {
        self.request_schema_in(global_cache(), descriptor)
    }

    /// Validate responses against `descriptor` (compiled through the global cache).
    pub fn response_schema(self, descriptor: &SchemaDescriptor) -> Result<Self, CoreError> {
        self.response_schema_in(global_cache(), descriptor)
    }

    /// Like [`request_schema`](Self::request_schema) with an explicit cache.
    pub fn request_schema_in(
        mut self,
        cache: &ValidatorCache,
        descriptor: &SchemaDescriptor,
    ) -> Result<Self, CoreError> {
        self.request = Some(cache.compile(descriptor)?);
        Ok(self)
    }

    /// Like [`response_schema`](Self::response_schema) with an explicit cache.
    pub fn response_schema_in(
        mut self,
        cache: &ValidatorCache,
        descriptor: &SchemaDescriptor,
    ) -> Result<Self, CoreError> {
        self.response = Some(cache.compile(descriptor)?);
        Ok(self)
    }

    /// Endpoint name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Endpoint route.
    pub fn route(&self) -> &Route {
        &self.route
    }

    /// Check a request body. Paths are prefixed with `/body`.
    pub fn validate_request(&self, body: &Value) -> Vec<FieldError> {
        check(self.request.as_deref(), body, "/body")
    }

    /// Check a response body. Paths are prefixed with `/response`.
    pub fn validate_response(&self, body: &Value) -> Vec<FieldError> {
        check(self.response.as_deref(), body, "/response")
    }

    /// Whether a response validator is attached.
    pub fn has_response_schema(&self) -> bool {
        self.response.is_some()
    }
}

fn check(validator: Option<&CompiledValidator>, value: &Value, prefix: &str) -> Vec<FieldError> {
    validator.map_or_else(Vec::new, |v| {
        v.check(value).into_iter().map(|e| e.prefixed(prefix)).collect()
    })
}

/// Endpoints for one transport, keyed by action (WebSocket) or name (HTTP).
#[derive(Clone, Debug)]
pub struct EndpointMap {
    transport: Transport,
    entries: BTreeMap<String, EndpointDefinition>,
}

impl EndpointMap {
    /// Build a WebSocket map. Every definition's action must equal its key.
    pub fn websocket<K>(entries: impl IntoIterator<Item = (K, EndpointDefinition)>) -> Result<Self, CoreError>
    where
        K: Into<String>,
    {
        let mut map = BTreeMap::new();
        for (key, def) in entries {
            let key = key.into();
            match def.route() {
                Route::WebSocket { action } if *action == key => {}
                Route::WebSocket { action } => {
                    return Err(CoreError::configuration(format!(
                        "websocket endpoint registered as '{key}' declares action '{action}'"
                    )));
                }
                Route::Http { .. } => {
                    return Err(CoreError::configuration(format!(
                        "endpoint '{key}' is an HTTP route in a websocket map"
                    )));
                }
            }
            if map.insert(key.clone(), def).is_some() {
                return Err(CoreError::configuration(format!("duplicate websocket action '{key}'")));
            }
        }
        Ok(Self {
            transport: Transport::WebSocket,
            entries: map,
        })
    }

    /// Build an HTTP map. `(method, path)` pairs must be unique.
    pub fn http(entries: impl IntoIterator<Item = EndpointDefinition>) -> Result<Self, CoreError> {
        let mut map = BTreeMap::new();
        let mut routes = HashSet::new();
        for def in entries {
            let Route::Http { method, path } = def.route() else {
                return Err(CoreError::configuration(format!(
                    "endpoint '{}' is a websocket route in an HTTP map",
                    def.name()
                )));
            };
            if !routes.insert((method.clone(), path.clone())) {
                return Err(CoreError::configuration(format!("duplicate HTTP route {method} {path}")));
            }
            let name = def.name().to_owned();
            if map.insert(name.clone(), def).is_some() {
                return Err(CoreError::configuration(format!("duplicate HTTP endpoint '{name}'")));
            }
        }
        Ok(Self {
            transport: Transport::Http,
            entries: map,
        })
    }

    /// Transport this map serves.
    pub fn transport(&self) -> Transport {
        self.transport
    }

    /// Look up by key.
    pub fn get(&self, key: &str) -> Option<&EndpointDefinition> {
        self.entries.get(key)
    }

    /// Whether `key` is registered.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Keys in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Number of endpoints.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn join_schema() -> SchemaDescriptor {
        SchemaDescriptor::object()
            .field("channelKey", SchemaDescriptor::string().min_length(1))
            .named("endpoint.test.join")
    }

    #[test]
    fn request_errors_are_prefixed() {
        let cache = ValidatorCache::new();
        let def = EndpointDefinition::websocket("join")
            .request_schema_in(&cache, &join_schema())
            .unwrap();
        let errors = def.validate_request(&json!({}));
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].path, "/body/channelKey");
        assert!(def.validate_request(&json!({"channelKey": "g"})).is_empty());
    }

    #[test]
    fn response_errors_are_prefixed() {
        let cache = ValidatorCache::new();
        let def = EndpointDefinition::websocket("join")
            .response_schema_in(&cache, &SchemaDescriptor::object().field("ok", SchemaDescriptor::boolean()).named("endpoint.test.resp"))
            .unwrap();
        assert_eq!(def.validate_response(&json!({}))[0].path, "/response/ok");
    }

    #[test]
    fn no_validator_accepts_anything() {
        let def = EndpointDefinition::websocket("ping");
        assert!(def.validate_request(&json!(42)).is_empty());
        assert!(!def.has_response_schema());
    }

    #[test]
    fn websocket_map_checks_action_matches_key() {
        let ok = EndpointMap::websocket([("join", EndpointDefinition::websocket("join"))]).unwrap();
        assert!(ok.contains("join"));
        assert_eq!(ok.transport(), Transport::WebSocket);

        let err = EndpointMap::websocket([("leave", EndpointDefinition::websocket("join"))]).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn websocket_map_rejects_http_routes() {
        let def = EndpointDefinition::http("join", "post", "/join");
        assert!(EndpointMap::websocket([("join", def)]).unwrap_err().is_configuration());
    }

    #[test]
    fn http_map_rejects_duplicate_routes() {
        let a = EndpointDefinition::http("a", "post", "/x");
        let b = EndpointDefinition::http("b", "POST", "/x");
        assert!(EndpointMap::http([a, b]).unwrap_err().is_configuration());

        let a = EndpointDefinition::http("a", "get", "/x");
        let b = EndpointDefinition::http("b", "post", "/x");
        let map = EndpointMap::http([a, b]).unwrap();
        assert_eq!(map.keys().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn bad_schema_fails_registration() {
        let cache = ValidatorCache::new();
        let unnamed = SchemaDescriptor::object();
        assert!(EndpointDefinition::websocket("x").request_schema_in(&cache, &unnamed).is_err());
    }
}
