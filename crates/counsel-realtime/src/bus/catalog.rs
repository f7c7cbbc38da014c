//! Known events and their payload schemas.

use std::collections::HashMap;
use std::sync::Arc;

use counsel_core::{CoreError, FieldError};
use counsel_schema::{CompiledValidator, SchemaDescriptor, ValidatorCache, global_cache};
use serde_json::Value;

/// Event name to payload validator. Built once at startup.
#[derive(Clone, Default)]
pub struct EventCatalog {
    validators: HashMap<String, Arc<CompiledValidator>>,
}

impl EventCatalog {
    /// Empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare `event_name` with a payload schema.
    pub fn register(self, event_name: &str, descriptor: &SchemaDescriptor) -> Result<Self, CoreError> {
        self.register_in(global_cache(), event_name, descriptor)
    }

    /// Like [`register`](Self::register) with an explicit validator cache.
    pub fn register_in(
        mut self,
        cache: &ValidatorCache,
        event_name: &str,
        descriptor: &SchemaDescriptor,
    ) -> Result<Self, CoreError> {
        let validator = cache.compile(descriptor)?;
        if self.validators.insert(event_name.to_owned(), validator).is_some() {
            return Err(CoreError::configuration(format!("event '{event_name}' declared twice")));
        }
        Ok(self)
    }

    /// Whether `event_name` is declared.
    pub fn contains(&self, event_name: &str) -> bool {
        self.validators.contains_key(event_name)
    }

    /// Check a payload. Paths are prefixed with `/payload`. An undeclared
    /// event is a configuration error.
    pub fn validate(&self, event_name: &str, payload: &Value) -> Result<Vec<FieldError>, CoreError> {
        let validator = self
            .validators
            .get(event_name)
            .ok_or_else(|| CoreError::configuration(format!("event '{event_name}' is not declared")))?;
        Ok(validator.check(payload).into_iter().map(|e| e.prefixed("/payload")).collect())
    }

    /// Declared event names, sorted.
    pub fn event_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.validators.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
