//! Memoizing validator cache.
//!
//! Validators are cached for the process lifetime keyed by the descriptor's
//! stable id. The first caller for an id compiles while holding the map
//! entry, so concurrent callers for the same id wait and then share the same
//! `Arc`. Registering a structurally different descriptor under an id that is
//! already cached is a configuration error.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use counsel_core::CoreError;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::debug;

use crate::descriptor::SchemaDescriptor;
use crate::validator::{self, CompiledValidator};

struct Slot {
    descriptor: SchemaDescriptor,
    validator: Arc<CompiledValidator>,
}

/// Process-lifetime map from schema id to compiled validator.
#[derive(Default)]
pub struct ValidatorCache {
    slots: DashMap<String, Slot>,
    compilations: AtomicUsize,
}

impl ValidatorCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile `descriptor`, or return the cached validator for its id.
    pub fn compile(&self, descriptor: &SchemaDescriptor) -> Result<Arc<CompiledValidator>, CoreError> {
        let id = descriptor
            .id()
            .ok_or_else(|| CoreError::configuration("top-level schema descriptors must be named"))?;

        if let Some(slot) = self.slots.get(id) {
            return Self::reuse(id, &slot, descriptor);
        }

        match self.slots.entry(id.to_owned()) {
            Entry::Occupied(entry) => Self::reuse(id, entry.get(), descriptor),
            Entry::Vacant(entry) => {
                let compiled = Arc::new(validator::compile(descriptor)?);
                let _ = self.compilations.fetch_add(1, Ordering::Relaxed);
                debug!(schema_id = id, "compiled validator");
                let _ = entry.insert(Slot {
                    descriptor: descriptor.clone(),
                    validator: compiled.clone(),
                });
                Ok(compiled)
            }
        }
    }

    fn reuse(id: &str, slot: &Slot, descriptor: &SchemaDescriptor) -> Result<Arc<CompiledValidator>, CoreError> {
        if slot.descriptor != *descriptor {
            return Err(CoreError::configuration(format!(
                "schema id '{id}' is already bound to a different descriptor"
            )));
        }
        Ok(slot.validator.clone())
    }

    /// Cached validator for `id`, if compiled.
    pub fn get(&self, id: &str) -> Option<Arc<CompiledValidator>> {
        self.slots.get(id).map(|slot| slot.validator.clone())
    }

    /// How many compilations this cache has performed.
    pub fn compilations(&self) -> usize {
        self.compilations.load(Ordering::Relaxed)
    }

    /// Number of cached validators.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether nothing has been compiled yet.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

static GLOBAL: OnceLock<ValidatorCache> = OnceLock::new();

/// The process-wide validator cache.
pub fn global_cache() -> &'static ValidatorCache {
    GLOBAL.get_or_init(ValidatorCache::new)
}

/// Compile through the process-wide cache.
pub fn compile(descriptor: &SchemaDescriptor) -> Result<Arc<CompiledValidator>, CoreError> {
    global_cache().compile(descriptor)
}
