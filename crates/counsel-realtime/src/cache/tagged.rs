//! Read-through cache with tag invalidation.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use counsel_core::CoreError;
use counsel_settings::CacheSettings;
use metrics::counter;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};

use super::keys::CacheKey;
use super::store::CacheStore;

/// Options for [`TaggedCache::cached`].
#[derive(Clone, Copy, Debug, Default)]
pub struct CachedOptions {
    /// Overrides the cache's default TTL.
    pub ttl: Option<Duration>,
    /// Skip the lookup and recompute.
    pub force_recompute: bool,
}

/// Typed cache over a [`CacheStore`].
#[derive(Clone)]
pub struct TaggedCache {
    store: Arc<dyn CacheStore>,
    default_ttl: Option<Duration>,
}

impl TaggedCache {
    /// Cache over `store`. `default_ttl` of `None` means entries never expire.
    pub fn new(store: Arc<dyn CacheStore>, default_ttl: Option<Duration>) -> Self {
        Self { store, default_ttl }
    }

    /// Cache with the configured default TTL. Zero disables expiry.
    pub fn from_settings(store: Arc<dyn CacheStore>, settings: &CacheSettings) -> Self {
        let ttl = (settings.default_ttl_secs > 0).then(|| Duration::from_secs(settings.default_ttl_secs));
        Self::new(store, ttl)
    }

    /// Cached value for `key`. Store errors and undecodable values are
    /// logged and read as a miss.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.store.get(key).await {
            Ok(raw) => raw,
            Err(err) => {
                warn!(key, error = %err, "cache read failed, treating as miss");
                None
            }
        };
        let Some(raw) = raw else {
            counter!("cache_misses_total").increment(1);
            return None;
        };
        match serde_json::from_str(&raw) {
            Ok(value) => {
                counter!("cache_hits_total").increment(1);
                Some(value)
            }
            Err(err) => {
                warn!(key, error = %err, "undecodable cache entry, treating as miss");
                counter!("cache_misses_total").increment(1);
                None
            }
        }
    }

    /// Store `value` under `key` and index it under every tag.
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        tags: &[impl AsRef<str>],
        ttl: Option<Duration>,
    ) -> Result<(), CoreError> {
        let raw = serde_json::to_string(value)?;
        let index_keys: Vec<String> = tags.iter().map(|t| CacheKey::tag_index(t.as_ref())).collect();
        self.store.set_tagged(key, raw, &index_keys, ttl.or(self.default_ttl)).await
    }

    /// Invalidate every key tagged with any of `tags`. Returns how many
    /// values were removed; invalidating an unknown tag removes nothing.
    #[instrument(skip_all, fields(tags = tags.len()))]
    pub async fn invalidate_tags(&self, tags: &[impl AsRef<str>]) -> Result<usize, CoreError> {
        let mut removed = 0;
        for tag in tags {
            removed += self.store.invalidate_index(&CacheKey::tag_index(tag.as_ref())).await?;
        }
        counter!("cache_invalidations_total").increment(tags.len() as u64);
        debug!(removed, "tags invalidated");
        Ok(removed)
    }

    /// Drop expired entries from the store.
    pub async fn purge_expired(&self) -> Result<usize, CoreError> {
        let removed = self.store.purge_expired().await?;
        counter!("cache_purged_total").increment(removed as u64);
        debug!(removed, "expired cache entries purged");
        Ok(removed)
    }

    /// Read-through lookup. On a miss, or when forced, runs `compute` and
    /// stores a `Some` result. `None` is returned as-is and never cached.
    pub async fn cached<T, F, Fut>(
        &self,
        key: &str,
        tags: &[impl AsRef<str>],
        options: CachedOptions,
        compute: F,
    ) -> Result<Option<T>, CoreError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>, CoreError>>,
    {
        if !options.force_recompute {
            if let Some(hit) = self.get(key).await {
                return Ok(Some(hit));
            }
        }

        let computed = compute().await?;
        if let Some(value) = &computed {
            if let Err(err) = self.set(key, value, tags, options.ttl).await {
                warn!(key, error = %err, "cache write failed");
            }
        }
        Ok(computed)
    }
}
