//! Stateless repositories. Every method takes `&Connection`.

pub mod cache;
pub mod connections;
pub mod queue;

#[cfg(test)]
pub(crate) fn test_conn() -> rusqlite::Connection {
    let conn = rusqlite::Connection::open_in_memory().expect("open in-memory db");
    let _ = crate::migrations::run_migrations(&conn).expect("migrations");
    conn
}
