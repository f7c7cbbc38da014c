//! Connection registry rows.
//!
//! A connection belongs to exactly one channel at a time: joining again
//! replaces the previous channel.

use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::Serialize;

use crate::errors::Result;

/// One registered connection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionRow {
    /// Gateway connection id.
    pub connection_id: String,
    /// Channel kind (`chat`, `notifications`).
    pub channel_kind: String,
    /// Channel key within the kind.
    pub channel_key: String,
    /// Join time, unix ms.
    pub joined_at: i64,
}

impl ConnectionRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            connection_id: row.get(0)?,
            channel_kind: row.get(1)?,
            channel_key: row.get(2)?,
            joined_at: row.get(3)?,
        })
    }
}

/// Connection repository.
pub struct ConnectionRepo;

impl ConnectionRepo {
    /// Insert or replace the record for `connection_id`.
    pub fn upsert(
        conn: &Connection,
        connection_id: &str,
        channel_kind: &str,
        channel_key: &str,
        joined_at: i64,
    ) -> Result<()> {
        let _ = conn.execute(
            "INSERT INTO connections (connection_id, channel_kind, channel_key, joined_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (connection_id) DO UPDATE SET
               channel_kind = excluded.channel_kind,
               channel_key  = excluded.channel_key,
               joined_at    = excluded.joined_at",
            params![connection_id, channel_kind, channel_key, joined_at],
        )?;
        Ok(())
    }

    /// Delete the record. Returns whether a row was removed.
    pub fn delete(conn: &Connection, connection_id: &str) -> Result<bool> {
        let changed = conn.execute(
            "DELETE FROM connections WHERE connection_id = ?1",
            params![connection_id],
        )?;
        Ok(changed > 0)
    }

    /// Every connection currently in `(channel_kind, channel_key)`.
    pub fn list_by_channel(
        conn: &Connection,
        channel_kind: &str,
        channel_key: &str,
    ) -> Result<Vec<ConnectionRow>> {
        let mut stmt = conn.prepare_cached(
            "SELECT connection_id, channel_kind, channel_key, joined_at
             FROM connections
             WHERE channel_kind = ?1 AND channel_key = ?2
             ORDER BY joined_at, connection_id",
        )?;
        let rows = stmt
            .query_map(params![channel_kind, channel_key], ConnectionRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Record for one connection.
    pub fn get(conn: &Connection, connection_id: &str) -> Result<Option<ConnectionRow>> {
        let row = conn
            .query_row(
                "SELECT connection_id, channel_kind, channel_key, joined_at
                 FROM connections WHERE connection_id = ?1",
                params![connection_id],
                ConnectionRow::from_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Total registered connections.
    pub fn count(conn: &Connection) -> Result<i64> {
        Ok(conn.query_row("SELECT COUNT(*) FROM connections", [], |row| row.get(0))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::test_conn;

    #[test]
    fn upsert_then_list() {
        let conn = test_conn();
        ConnectionRepo::upsert(&conn, "a", "chat", "group-42", 1).unwrap();
        ConnectionRepo::upsert(&conn, "b", "chat", "group-42", 2).unwrap();
        ConnectionRepo::upsert(&conn, "c", "chat", "group-7", 3).unwrap();

        let ids: Vec<_> = ConnectionRepo::list_by_channel(&conn, "chat", "group-42")
            .unwrap()
            .into_iter()
            .map(|r| r.connection_id)
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn rejoin_moves_connection() {
        let conn = test_conn();
        ConnectionRepo::upsert(&conn, "a", "chat", "group-1", 1).unwrap();
        ConnectionRepo::upsert(&conn, "a", "notifications", "user-9", 2).unwrap();

        assert!(ConnectionRepo::list_by_channel(&conn, "chat", "group-1").unwrap().is_empty());
        let row = ConnectionRepo::get(&conn, "a").unwrap().unwrap();
        assert_eq!(row.channel_kind, "notifications");
        assert_eq!(row.channel_key, "user-9");
        assert_eq!(ConnectionRepo::count(&conn).unwrap(), 1);
    }

    #[test]
    fn delete_reports_whether_removed() {
        let conn = test_conn();
        ConnectionRepo::upsert(&conn, "a", "chat", "g", 1).unwrap();
        assert!(ConnectionRepo::delete(&conn, "a").unwrap());
        assert!(!ConnectionRepo::delete(&conn, "a").unwrap());
        assert!(ConnectionRepo::get(&conn, "a").unwrap().is_none());
    }

    #[test]
    fn channel_kinds_are_disjoint() {
        let conn = test_conn();
        ConnectionRepo::upsert(&conn, "a", "chat", "x", 1).unwrap();
        assert!(ConnectionRepo::list_by_channel(&conn, "notifications", "x").unwrap().is_empty());
    }
}
