//! Durable connection registry.
//!
//! Maps connection ids to the single channel each belongs to. Every
//! operation is individually atomic; callers never lock around them and
//! must tolerate a connection vanishing between a list and a post.

use async_trait::async_trait;
use counsel_core::{ConnectionId, CoreError};
use counsel_store::{ConnectionRepo, ConnectionRow, Database, now_ms};
use tracing::{debug, instrument};

use crate::channel::ChannelKind;

/// One connection's channel membership.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionRecord {
    /// Gateway connection id.
    pub connection_id: ConnectionId,
    /// Channel kind.
    pub channel_kind: ChannelKind,
    /// Channel key.
    pub channel_key: String,
    /// Join time, unix ms.
    pub joined_at: i64,
}

impl TryFrom<ConnectionRow> for ConnectionRecord {
    type Error = CoreError;

    fn try_from(row: ConnectionRow) -> Result<Self, Self::Error> {
        Ok(Self {
            connection_id: ConnectionId::from(row.connection_id),
            channel_kind: row.channel_kind.parse()?,
            channel_key: row.channel_key,
            joined_at: row.joined_at,
        })
    }
}

/// Storage for channel membership.
#[async_trait]
pub trait ConnectionRegistry: Send + Sync {
    /// Put `connection_id` in `(kind, key)`, replacing any previous channel.
    async fn join(&self, connection_id: &ConnectionId, kind: ChannelKind, key: &str) -> Result<(), CoreError>;

    /// Remove `connection_id`. Returns whether it was registered.
    async fn leave(&self, connection_id: &ConnectionId) -> Result<bool, CoreError>;

    /// Every connection currently in `(kind, key)`.
    async fn list_connections(&self, kind: ChannelKind, key: &str) -> Result<Vec<ConnectionRecord>, CoreError>;

    /// The record for one connection.
    async fn lookup(&self, connection_id: &ConnectionId) -> Result<Option<ConnectionRecord>, CoreError>;
}

/// [`ConnectionRegistry`] over the SQLite `connections` table.
#[derive(Clone)]
pub struct SqliteConnectionRegistry {
    db: Database,
}

impl SqliteConnectionRegistry {
    /// Wrap a database handle.
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ConnectionRegistry for SqliteConnectionRegistry {
    #[instrument(skip_all, fields(connection_id = %connection_id, channel_kind = %kind, channel_key = key))]
    async fn join(&self, connection_id: &ConnectionId, kind: ChannelKind, key: &str) -> Result<(), CoreError> {
        let id = connection_id.to_string();
        let key = key.to_owned();
        self.db
            .run(move |conn| ConnectionRepo::upsert(conn, &id, kind.as_str(), &key, now_ms()))
            .await?;
        debug!("joined channel");
        Ok(())
    }

    async fn leave(&self, connection_id: &ConnectionId) -> Result<bool, CoreError> {
        let id = connection_id.to_string();
        let removed = self.db.run(move |conn| ConnectionRepo::delete(conn, &id)).await?;
        if removed {
            debug!(%connection_id, "left channel");
        }
        Ok(removed)
    }

    async fn list_connections(&self, kind: ChannelKind, key: &str) -> Result<Vec<ConnectionRecord>, CoreError> {
        let key = key.to_owned();
        let rows = self
            .db
            .run(move |conn| ConnectionRepo::list_by_channel(conn, kind.as_str(), &key))
            .await?;
        rows.into_iter().map(ConnectionRecord::try_from).collect()
    }

    async fn lookup(&self, connection_id: &ConnectionId) -> Result<Option<ConnectionRecord>, CoreError> {
        let id = connection_id.to_string();
        let row = self.db.run(move |conn| ConnectionRepo::get(conn, &id)).await?;
        row.map(ConnectionRecord::try_from).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> SqliteConnectionRegistry {
        SqliteConnectionRegistry::new(Database::in_memory().unwrap())
    }

    #[tokio::test]
    async fn join_list_leave() {
        let reg = registry();
        let a = ConnectionId::from("a");
        let b = ConnectionId::from("b");
        reg.join(&a, ChannelKind::Chat, "group-42").await.unwrap();
        reg.join(&b, ChannelKind::Chat, "group-42").await.unwrap();

        let members = reg.list_connections(ChannelKind::Chat, "group-42").await.unwrap();
        assert_eq!(members.len(), 2);
        assert!(members.iter().all(|m| m.channel_kind == ChannelKind::Chat));

        assert!(reg.leave(&a).await.unwrap());
        let members = reg.list_connections(ChannelKind::Chat, "group-42").await.unwrap();
        assert_eq!(members[0].connection_id, b);
    }

    #[tokio::test]
    async fn leave_unknown_is_noop() {
        let reg = registry();
        assert!(!reg.leave(&ConnectionId::from("ghost")).await.unwrap());
    }

    #[tokio::test]
    async fn rejoin_replaces_channel() {
        let reg = registry();
        let a = ConnectionId::from("a");
        reg.join(&a, ChannelKind::Chat, "g1").await.unwrap();
        reg.join(&a, ChannelKind::Notifications, "user-1").await.unwrap();

        assert!(reg.list_connections(ChannelKind::Chat, "g1").await.unwrap().is_empty());
        let record = reg.lookup(&a).await.unwrap().unwrap();
        assert_eq!(record.channel_kind, ChannelKind::Notifications);
        assert_eq!(record.channel_key, "user-1");
    }

    #[tokio::test]
    async fn empty_channel_lists_nothing() {
        let reg = registry();
        assert!(reg.list_connections(ChannelKind::Notifications, "nobody").await.unwrap().is_empty());
    }
}
