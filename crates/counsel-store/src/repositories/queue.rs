//! Durable event queue.
//!
//! At-least-once delivery via visibility-timeout leasing: a leased row is
//! hidden until `visible_at`, and reappears if it is not acknowledged in
//! time. Rows leased `max_attempts` times without an ack move to the `dead`
//! state and are never leased again.

use rusqlite::{Connection, Row, params};
use serde::Serialize;

use crate::errors::Result;

/// Lifecycle state of a queued message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueState {
    /// Eligible for leasing once visible.
    Ready,
    /// Exhausted its delivery attempts.
    Dead,
}

impl QueueState {
    /// Column value.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Dead => "dead",
        }
    }

    fn parse(s: &str) -> Self {
        if s == "dead" { Self::Dead } else { Self::Ready }
    }
}

/// One queued message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueRow {
    /// Message id.
    pub id: String,
    /// Event name (transport metadata).
    pub event_name: String,
    /// Publish time, RFC 3339 (transport metadata).
    pub published_at: String,
    /// Serialized payload.
    pub payload: String,
    /// Lifecycle state.
    pub state: QueueState,
    /// Times this message has been leased.
    pub attempts: u32,
    /// Hidden from leasing until this unix ms.
    pub visible_at: i64,
    /// Last handler failure, if any.
    pub last_error: Option<String>,
}

impl QueueRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let state: String = row.get(4)?;
        Ok(Self {
            id: row.get(0)?,
            event_name: row.get(1)?,
            published_at: row.get(2)?,
            payload: row.get(3)?,
            state: QueueState::parse(&state),
            attempts: row.get(5)?,
            visible_at: row.get(6)?,
            last_error: row.get(7)?,
        })
    }
}

const COLUMNS: &str = "id, event_name, published_at, payload, state, attempts, visible_at, last_error";

/// Queue repository.
pub struct QueueRepo;

impl QueueRepo {
    /// Append a message, visible immediately.
    pub fn enqueue(
        conn: &Connection,
        id: &str,
        event_name: &str,
        published_at: &str,
        payload: &str,
        now_ms: i64,
    ) -> Result<()> {
        let _ = conn.execute(
            "INSERT INTO event_queue (id, event_name, published_at, payload, state, attempts, visible_at, seq)
             VALUES (?1, ?2, ?3, ?4, 'ready', 0, ?5,
                     (SELECT COALESCE(MAX(seq), 0) + 1 FROM event_queue))",
            params![id, event_name, published_at, payload, now_ms],
        )?;
        Ok(())
    }

    /// Lease up to `batch` visible messages in publish order.
    ///
    /// Each leased row's `attempts` is incremented and it is hidden for
    /// `visibility_ms`. Visible rows that already reached `max_attempts` are
    /// dead-lettered first.
    pub fn lease(
        conn: &Connection,
        batch: usize,
        visibility_ms: i64,
        max_attempts: u32,
        now_ms: i64,
    ) -> Result<Vec<QueueRow>> {
        let tx = conn.unchecked_transaction()?;

        let dead = tx.execute(
            "UPDATE event_queue SET state = 'dead'
             WHERE state = 'ready' AND visible_at <= ?1 AND attempts >= ?2",
            params![now_ms, max_attempts],
        )?;
        if dead > 0 {
            tracing::warn!(count = dead, "dead-lettered queue messages");
        }

        let limit = i64::try_from(batch).unwrap_or(i64::MAX);
        let mut rows = {
            let mut stmt = tx.prepare_cached(&format!(
                "SELECT {COLUMNS} FROM event_queue
                 WHERE state = 'ready' AND visible_at <= ?1
                 ORDER BY seq LIMIT ?2"
            ))?;
            let leased = stmt
                .query_map(params![now_ms, limit], QueueRow::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            leased
        };

        let hidden_until = now_ms.saturating_add(visibility_ms);
        for row in &mut rows {
            let _ = tx.execute(
                "UPDATE event_queue SET attempts = attempts + 1, visible_at = ?2 WHERE id = ?1",
                params![row.id, hidden_until],
            )?;
            row.attempts += 1;
            row.visible_at = hidden_until;
        }

        tx.commit()?;
        Ok(rows)
    }

    /// Delete acknowledged messages. Returns how many were removed.
    pub fn ack(conn: &Connection, ids: &[String]) -> Result<usize> {
        let mut removed = 0;
        for id in ids {
            removed += conn.execute("DELETE FROM event_queue WHERE id = ?1", params![id])?;
        }
        Ok(removed)
    }

    /// Record a handler failure. The lease still expires normally.
    pub fn fail(conn: &Connection, id: &str, error: &str) -> Result<()> {
        let _ = conn.execute(
            "UPDATE event_queue SET last_error = ?2 WHERE id = ?1",
            params![id, error],
        )?;
        Ok(())
    }

    /// Dead-lettered messages, oldest first.
    pub fn dead_letters(conn: &Connection) -> Result<Vec<QueueRow>> {
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {COLUMNS} FROM event_queue WHERE state = 'dead' ORDER BY seq"
        ))?;
        let rows = stmt
            .query_map([], QueueRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Messages in the `ready` state, leased or not.
    pub fn count_ready(conn: &Connection) -> Result<i64> {
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM event_queue WHERE state = 'ready'",
            [],
            |row| row.get(0),
        )?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::test_conn;

    fn enqueue(conn: &Connection, id: &str) {
        QueueRepo::enqueue(conn, id, "cacheInvalidated", "2026-01-01T00:00:00Z", "{}", 0).unwrap();
    }

    #[test]
    fn lease_in_publish_order_and_hide() {
        let conn = test_conn();
        enqueue(&conn, "m2");
        enqueue(&conn, "m1");

        let leased = QueueRepo::lease(&conn, 10, 1_000, 5, 0).unwrap();
        let ids: Vec<_> = leased.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["m2", "m1"]);
        assert!(leased.iter().all(|r| r.attempts == 1 && r.visible_at == 1_000));

        assert!(QueueRepo::lease(&conn, 10, 1_000, 5, 999).unwrap().is_empty());
    }

    #[test]
    fn batch_limit() {
        let conn = test_conn();
        for i in 0..5 {
            enqueue(&conn, &format!("m{i}"));
        }
        assert_eq!(QueueRepo::lease(&conn, 2, 1_000, 5, 0).unwrap().len(), 2);
        assert_eq!(QueueRepo::lease(&conn, 10, 1_000, 5, 0).unwrap().len(), 3);
    }

    #[test]
    fn unacked_message_is_redelivered_after_visibility() {
        let conn = test_conn();
        enqueue(&conn, "m");
        let _ = QueueRepo::lease(&conn, 1, 1_000, 5, 0).unwrap();
        let again = QueueRepo::lease(&conn, 1, 1_000, 5, 1_000).unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].attempts, 2);
    }

    #[test]
    fn acked_message_is_gone() {
        let conn = test_conn();
        enqueue(&conn, "m");
        let _ = QueueRepo::lease(&conn, 1, 1_000, 5, 0).unwrap();
        assert_eq!(QueueRepo::ack(&conn, &["m".to_string()]).unwrap(), 1);
        assert!(QueueRepo::lease(&conn, 1, 1_000, 5, 5_000).unwrap().is_empty());
        assert_eq!(QueueRepo::count_ready(&conn).unwrap(), 0);
    }

    #[test]
    fn exhausted_message_is_dead_lettered() {
        let conn = test_conn();
        enqueue(&conn, "m");
        let mut now = 0;
        for _ in 0..2 {
            assert_eq!(QueueRepo::lease(&conn, 1, 10, 2, now).unwrap().len(), 1);
            QueueRepo::fail(&conn, "m", "handler failed").unwrap();
            now += 10;
        }
        assert!(QueueRepo::lease(&conn, 1, 10, 2, now).unwrap().is_empty());

        let dead = QueueRepo::dead_letters(&conn).unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].state, QueueState::Dead);
        assert_eq!(dead[0].last_error.as_deref(), Some("handler failed"));
    }
}
