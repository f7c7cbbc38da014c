//! Cache storage backends.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use counsel_core::CoreError;
use counsel_store::{CacheRepo, Database, now_ms};
use dashmap::DashMap;
use tokio::time::Instant;

/// Key/value storage with index sets. Each call is individually atomic.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Unexpired value for `key`.
    async fn get(&self, key: &str) -> Result<Option<String>, CoreError>;

    /// Store `value` and add `key` to every set in `index_keys`, refreshing
    /// its expiry.
    async fn set_tagged(
        &self,
        key: &str,
        value: String,
        index_keys: &[String],
        ttl: Option<Duration>,
    ) -> Result<(), CoreError>;

    /// Delete every member of `index_key`, then the set. Returns how many
    /// values were removed.
    async fn invalidate_index(&self, index_key: &str) -> Result<usize, CoreError>;

    /// Drop expired values and index members pointing at them. Returns how
    /// many records were removed.
    async fn purge_expired(&self) -> Result<usize, CoreError>;
}

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// Process-local store. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryCacheStore {
    values: DashMap<String, Entry>,
    indexes: DashMap<String, HashSet<String>>,
}

impl MemoryCacheStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored values, including expired ones not yet evicted.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the store holds no values.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Number of non-empty index sets.
    pub fn index_count(&self) -> usize {
        self.indexes.len()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CoreError> {
        let now = Instant::now();
        if let Some(entry) = self.values.get(key) {
            if entry.is_live(now) {
                return Ok(Some(entry.value.clone()));
            }
        }
        let _ = self.values.remove_if(key, |_, e| !e.is_live(now));
        Ok(None)
    }

    async fn set_tagged(
        &self,
        key: &str,
        value: String,
        index_keys: &[String],
        ttl: Option<Duration>,
    ) -> Result<(), CoreError> {
        // Value before index: a racing invalidation can leave an indexed
        // key behind, never an unindexed one.
        let expires_at = ttl.map(|t| Instant::now() + t);
        let _ = self.values.insert(key.to_owned(), Entry { value, expires_at });
        for index in index_keys {
            let _ = self.indexes.entry(index.clone()).or_default().insert(key.to_owned());
        }
        Ok(())
    }

    async fn invalidate_index(&self, index_key: &str) -> Result<usize, CoreError> {
        let Some((_, members)) = self.indexes.remove(index_key) else {
            return Ok(0);
        };
        Ok(members.iter().filter(|m| self.values.remove(m.as_str()).is_some()).count())
    }

    async fn purge_expired(&self) -> Result<usize, CoreError> {
        let now = Instant::now();
        let before = self.values.len();
        self.values.retain(|_, entry| entry.is_live(now));
        let mut removed = before.saturating_sub(self.values.len());

        // Members whose value is gone, expired or removed through another tag.
        self.indexes.retain(|_, members| {
            let held = members.len();
            members.retain(|key| self.values.contains_key(key));
            removed += held - members.len();
            !members.is_empty()
        });
        Ok(removed)
    }
}

/// Store over the `cache_entries` and `cache_sets` tables. A value and its
/// index memberships are written in one transaction.
#[derive(Clone)]
pub struct SqliteCacheStore {
    db: Database,
}

impl SqliteCacheStore {
    /// Store over `db`.
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

fn expires_at(ttl: Option<Duration>) -> Option<i64> {
    ttl.map(|t| now_ms().saturating_add(i64::try_from(t.as_millis()).unwrap_or(i64::MAX)))
}

#[async_trait]
impl CacheStore for SqliteCacheStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CoreError> {
        let key = key.to_owned();
        Ok(self.db.run(move |conn| CacheRepo::get(conn, &key, now_ms())).await?)
    }

    async fn set_tagged(
        &self,
        key: &str,
        value: String,
        index_keys: &[String],
        ttl: Option<Duration>,
    ) -> Result<(), CoreError> {
        let key = key.to_owned();
        let index_keys = index_keys.to_vec();
        let expires_at = expires_at(ttl);
        self.db
            .run(move |conn| CacheRepo::set_with_index(conn, &key, &value, &index_keys, expires_at))
            .await?;
        Ok(())
    }

    async fn invalidate_index(&self, index_key: &str) -> Result<usize, CoreError> {
        let index_key = index_key.to_owned();
        Ok(self.db.run(move |conn| CacheRepo::invalidate_index(conn, &index_key)).await?)
    }

    async fn purge_expired(&self) -> Result<usize, CoreError> {
        Ok(self.db.run(|conn| CacheRepo::purge_expired(conn, now_ms())).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| (*s).to_string()).collect()
    }

    async fn exercise(store: &dyn CacheStore) {
        store.set_tagged("profile:1", "{}".into(), &tags(&["tags:a", "tags:b"]), None).await.unwrap();
        store.set_tagged("profile:2", "[]".into(), &tags(&["tags:b"]), None).await.unwrap();
        assert_eq!(store.get("profile:1").await.unwrap().as_deref(), Some("{}"));

        assert_eq!(store.invalidate_index("tags:a").await.unwrap(), 1);
        assert!(store.get("profile:1").await.unwrap().is_none());
        assert!(store.get("profile:2").await.unwrap().is_some());
        assert_eq!(store.invalidate_index("tags:a").await.unwrap(), 0);

        // profile:1 is already gone; only profile:2 is removed.
        assert_eq!(store.invalidate_index("tags:b").await.unwrap(), 1);
        assert!(store.get("profile:2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn memory_store_indexes() {
        exercise(&MemoryCacheStore::new()).await;
    }

    #[tokio::test]
    async fn sqlite_store_indexes() {
        exercise(&SqliteCacheStore::new(Database::in_memory().unwrap())).await;
    }

    #[tokio::test(start_paused = true)]
    async fn memory_store_expires() {
        let store = MemoryCacheStore::new();
        store
            .set_tagged("k", "1".into(), &[], Some(Duration::from_secs(60)))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(store.get("k").await.unwrap().is_some());
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(store.get("k").await.unwrap().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn memory_store_purge_drops_values_and_empty_indexes() {
        let store = MemoryCacheStore::new();
        for i in 0..500 {
            let key = format!("profile:{i}");
            store
                .set_tagged(&key, "{}".into(), &[format!("tags:{i}")], Some(Duration::from_millis(1)))
                .await
                .unwrap();
        }
        store.set_tagged("keep", "{}".into(), &tags(&["tags:0", "tags:keep"]), None).await.unwrap();
        assert_eq!(store.index_count(), 501);

        tokio::time::advance(Duration::from_millis(20)).await;
        assert_eq!(store.purge_expired().await.unwrap(), 1_000);
        assert_eq!(store.len(), 1);
        assert_eq!(store.index_count(), 2);
        assert_eq!(store.invalidate_index("tags:0").await.unwrap(), 1);
        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert_eq!(store.index_count(), 0);
    }

    #[tokio::test]
    async fn sqlite_store_purges_expired() {
        let db = Database::in_memory().unwrap();
        let store = SqliteCacheStore::new(db.clone());
        for i in 0..50 {
            store
                .set_tagged(&format!("profile:{i}"), "{}".into(), &tags(&["tags:t"]), Some(Duration::from_millis(1)))
                .await
                .unwrap();
        }
        store.set_tagged("keep", "{}".into(), &tags(&["tags:t"]), None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(store.get("profile:0").await.unwrap().is_none());

        assert_eq!(store.purge_expired().await.unwrap(), 100);
        assert_eq!(db.run(|conn| CacheRepo::members(conn, "tags:t")).await.unwrap(), vec!["keep"]);
        assert_eq!(store.get("keep").await.unwrap().as_deref(), Some("{}"));
    }
}
