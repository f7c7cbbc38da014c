//! Cache entries and tag index sets.
//!
//! Values live in `cache_entries`; each tag index is a set of member keys in
//! `cache_sets` under its own set key. Expiry is unix ms, `NULL` never
//! expires. Expired rows are invisible to reads and removed by
//! [`CacheRepo::purge_expired`].

use rusqlite::{Connection, OptionalExtension, params};

use crate::errors::Result;

/// Cache repository.
pub struct CacheRepo;

impl CacheRepo {
    /// Unexpired value for `key`.
    pub fn get(conn: &Connection, key: &str, now_ms: i64) -> Result<Option<String>> {
        let value = conn
            .query_row(
                "SELECT value FROM cache_entries
                 WHERE key = ?1 AND (expires_at IS NULL OR expires_at > ?2)",
                params![key, now_ms],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Store `value` under `key`, replacing any previous value.
    pub fn set(conn: &Connection, key: &str, value: &str, expires_at: Option<i64>) -> Result<()> {
        let _ = conn.execute(
            "INSERT INTO cache_entries (key, value, expires_at) VALUES (?1, ?2, ?3)
             ON CONFLICT (key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
            params![key, value, expires_at],
        )?;
        Ok(())
    }

    /// Delete one value. Returns whether a row was removed.
    pub fn delete(conn: &Connection, key: &str) -> Result<bool> {
        Ok(conn.execute("DELETE FROM cache_entries WHERE key = ?1", params![key])? > 0)
    }

    /// Add `member` to the set at `set_key`, refreshing its expiry.
    pub fn add_member(conn: &Connection, set_key: &str, member: &str, expires_at: Option<i64>) -> Result<()> {
        let _ = conn.execute(
            "INSERT INTO cache_sets (set_key, member, expires_at) VALUES (?1, ?2, ?3)
             ON CONFLICT (set_key, member) DO UPDATE SET expires_at = excluded.expires_at",
            params![set_key, member, expires_at],
        )?;
        Ok(())
    }

    /// All members of the set at `set_key`, expired or not.
    pub fn members(conn: &Connection, set_key: &str) -> Result<Vec<String>> {
        let mut stmt =
            conn.prepare_cached("SELECT member FROM cache_sets WHERE set_key = ?1 ORDER BY member")?;
        let members = stmt
            .query_map(params![set_key], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(members)
    }

    /// Store a value and add its key to every index set in one transaction.
    pub fn set_with_index(
        conn: &Connection,
        key: &str,
        value: &str,
        index_keys: &[String],
        expires_at: Option<i64>,
    ) -> Result<()> {
        let tx = conn.unchecked_transaction()?;
        Self::set(&tx, key, value, expires_at)?;
        for set_key in index_keys {
            Self::add_member(&tx, set_key, key, expires_at)?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Delete every member value of `set_key`, then the set itself.
    /// Returns how many values were removed.
    pub fn invalidate_index(conn: &Connection, set_key: &str) -> Result<usize> {
        let tx = conn.unchecked_transaction()?;
        let removed = tx.execute(
            "DELETE FROM cache_entries
             WHERE key IN (SELECT member FROM cache_sets WHERE set_key = ?1)",
            params![set_key],
        )?;
        let _ = tx.execute("DELETE FROM cache_sets WHERE set_key = ?1", params![set_key])?;
        tx.commit()?;
        Ok(removed)
    }

    /// Remove expired values, expired set members, and members whose value
    /// no longer exists. Returns rows removed.
    pub fn purge_expired(conn: &Connection, now_ms: i64) -> Result<usize> {
        let tx = conn.unchecked_transaction()?;
        let entries = tx.execute(
            "DELETE FROM cache_entries WHERE expires_at IS NOT NULL AND expires_at <= ?1",
            params![now_ms],
        )?;
        let members = tx.execute(
            "DELETE FROM cache_sets
             WHERE (expires_at IS NOT NULL AND expires_at <= ?1)
                OR member NOT IN (SELECT key FROM cache_entries)",
            params![now_ms],
        )?;
        tx.commit()?;
        Ok(entries + members)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::test_conn;

    #[test]
    fn set_get_overwrite() {
        let conn = test_conn();
        CacheRepo::set(&conn, "profile:1", "\"a\"", None).unwrap();
        CacheRepo::set(&conn, "profile:1", "\"b\"", None).unwrap();
        assert_eq!(CacheRepo::get(&conn, "profile:1", 0).unwrap().as_deref(), Some("\"b\""));
    }

    #[test]
    fn expired_value_is_absent() {
        let conn = test_conn();
        CacheRepo::set(&conn, "k", "1", Some(100)).unwrap();
        assert!(CacheRepo::get(&conn, "k", 99).unwrap().is_some());
        assert!(CacheRepo::get(&conn, "k", 100).unwrap().is_none());
    }

    #[test]
    fn set_with_index_and_invalidate() {
        let conn = test_conn();
        let tags = vec!["tags:t1".to_string(), "tags:t2".to_string()];
        CacheRepo::set_with_index(&conn, "profile:1", "{}", &tags, None).unwrap();
        assert_eq!(CacheRepo::members(&conn, "tags:t2").unwrap(), vec!["profile:1"]);

        assert_eq!(CacheRepo::invalidate_index(&conn, "tags:t1").unwrap(), 1);
        assert!(CacheRepo::get(&conn, "profile:1", 0).unwrap().is_none());
        assert!(CacheRepo::members(&conn, "tags:t1").unwrap().is_empty());
        assert_eq!(CacheRepo::invalidate_index(&conn, "tags:t1").unwrap(), 0);
        // t2 still lists the key; the stale member is tolerated
        assert_eq!(CacheRepo::members(&conn, "tags:t2").unwrap(), vec!["profile:1"]);
    }

    #[test]
    fn purge_removes_only_expired() {
        let conn = test_conn();
        CacheRepo::set(&conn, "old", "1", Some(10)).unwrap();
        CacheRepo::set(&conn, "new", "1", Some(1_000)).unwrap();
        CacheRepo::add_member(&conn, "tags:x", "old", Some(10)).unwrap();
        assert_eq!(CacheRepo::purge_expired(&conn, 500).unwrap(), 2);
        assert!(CacheRepo::get(&conn, "new", 500).unwrap().is_some());
    }

    #[test]
    fn purge_drops_members_left_by_invalidation() {
        let conn = test_conn();
        let tags = vec!["tags:t1".to_string(), "tags:t2".to_string()];
        CacheRepo::set_with_index(&conn, "profile:1", "{}", &tags, None).unwrap();
        let _ = CacheRepo::invalidate_index(&conn, "tags:t1").unwrap();

        assert_eq!(CacheRepo::purge_expired(&conn, 0).unwrap(), 1);
        assert!(CacheRepo::members(&conn, "tags:t2").unwrap().is_empty());
    }

    #[test]
    fn delete_value() {
        let conn = test_conn();
        CacheRepo::set(&conn, "k", "1", None).unwrap();
        assert!(CacheRepo::delete(&conn, "k").unwrap());
        assert!(!CacheRepo::delete(&conn, "k").unwrap());
    }
}
