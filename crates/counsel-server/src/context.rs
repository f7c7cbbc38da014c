//! Process-wide dependencies.
//!
//! Built once by [`AppContext::connect`] and shared by every invocation.
//! Everything here is a handle over a durable store or a transport; no
//! request state lives in it.

use std::sync::Arc;

use counsel_core::CoreError;
use counsel_realtime::{
    CacheStore, CallbackPoster, ConnectionPoster, ConnectionRegistry, EventCatalog, EventPublisher, EventTransport,
    FanoutDispatcher, MemoryCacheStore, SqliteCacheStore, SqliteConnectionRegistry, SqliteEventQueue, TaggedCache,
};
use counsel_settings::CounselSettings;
use counsel_store::{ConnectionConfig, Database};
use tracing::info;

use crate::auth::TokenVerifier;
use crate::events::event_catalog;
use crate::websocket::gateway::LocalGateway;

/// Shared dependencies for one process.
#[derive(Clone)]
pub struct AppContext {
    /// Loaded settings.
    pub settings: Arc<CounselSettings>,
    /// SQLite handle.
    pub db: Database,
    /// Sockets owned by this process.
    pub gateway: Arc<LocalGateway>,
    /// Channel membership.
    pub registry: Arc<dyn ConnectionRegistry>,
    /// Where pushes go: the local gateway, or a remote one over HTTP.
    pub poster: Arc<dyn ConnectionPoster>,
    /// Channel delivery.
    pub fanout: FanoutDispatcher,
    /// Event bus queue.
    pub queue: SqliteEventQueue,
    /// Declared events.
    pub catalog: Arc<EventCatalog>,
    /// Event publisher.
    pub publisher: EventPublisher,
    /// Tagged cache.
    pub cache: TaggedCache,
    /// Bearer token verifier; `None` when no secret is configured.
    pub tokens: Option<TokenVerifier>,
}

impl AppContext {
    /// Open the database, run migrations, and wire every component.
    ///
    /// Pushes go to the local gateway unless `server.callback_url` is set,
    /// in which case they are posted to that gateway's connection API.
    pub async fn connect(settings: CounselSettings) -> Result<Self, CoreError> {
        let config = ConnectionConfig {
            pool_size: settings.database.pool_size,
            busy_timeout_ms: settings.database.busy_timeout_ms,
        };
        let path = settings.database.path.clone();
        let db = tokio::task::spawn_blocking(move || Database::open(path.as_deref(), &config))
            .await
            .map_err(|e| CoreError::internal(format!("database open task failed: {e}")))??;
        info!(path = ?settings.database.path, "database ready");
        Self::with_database(settings, db)
    }

    /// Wire every component over an already-migrated database.
    pub fn with_database(settings: CounselSettings, db: Database) -> Result<Self, CoreError> {
        let gateway = Arc::new(LocalGateway::new(settings.server.send_buffer));
        let poster: Arc<dyn ConnectionPoster> = match &settings.server.callback_url {
            Some(url) => Arc::new(
                CallbackPoster::new(url.clone())
                    .map_err(|e| CoreError::configuration(format!("callback client: {e}")))?,
            ),
            None => gateway.clone(),
        };

        let registry: Arc<dyn ConnectionRegistry> = Arc::new(SqliteConnectionRegistry::new(db.clone()));
        let fanout = FanoutDispatcher::new(registry.clone(), poster.clone());

        let queue = SqliteEventQueue::from_settings(db.clone(), &settings.bus);
        let catalog = Arc::new(event_catalog()?);
        let transport: Arc<dyn EventTransport> = Arc::new(queue.clone());
        let publisher = EventPublisher::new(transport, catalog.clone(), settings.bus.validate_on_publish);

        let store: Arc<dyn CacheStore> = if settings.cache.persistent {
            Arc::new(SqliteCacheStore::new(db.clone()))
        } else {
            Arc::new(MemoryCacheStore::new())
        };
        let cache = TaggedCache::from_settings(store, &settings.cache);

        let tokens = settings.auth.jwt_secret.as_deref().map(TokenVerifier::new);

        Ok(Self {
            settings: Arc::new(settings),
            db,
            gateway,
            registry,
            poster,
            fanout,
            queue,
            catalog,
            publisher,
            cache,
            tokens,
        })
    }

    /// Context over an in-memory database with default settings.
    pub fn in_memory() -> Result<Self, CoreError> {
        Self::with_database(CounselSettings::default(), Database::in_memory()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use counsel_settings::CacheSettings;

    #[tokio::test]
    async fn connect_with_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = CounselSettings::default();
        settings.database.path = Some(dir.path().join("counsel.db").to_string_lossy().into_owned());
        let ctx = AppContext::connect(settings).await.unwrap();
        assert_eq!(ctx.queue.pending().await.unwrap(), 0);
        assert!(ctx.tokens.is_none());
    }

    #[tokio::test]
    async fn memory_cache_when_not_persistent() {
        let mut settings = CounselSettings::default();
        settings.cache = CacheSettings {
            default_ttl_secs: 60,
            persistent: false,
            ..CacheSettings::default()
        };
        settings.auth.jwt_secret = Some("s".into());
        let ctx = AppContext::with_database(settings, Database::in_memory().unwrap()).unwrap();
        ctx.cache.set("profile:1", &1, &["t"], None).await.unwrap();
        assert_eq!(ctx.cache.get::<i32>("profile:1").await, Some(1));
        assert!(ctx.tokens.is_some());
    }

    #[test]
    fn catalog_declares_builtin_events() {
        let ctx = AppContext::in_memory().unwrap();
        assert_eq!(
            ctx.catalog.event_names(),
            vec!["cacheInvalidated", "chatMessagePosted", "lawyerStatusChanged"]
        );
    }
}
