//! Async handle over the connection pool.

use rusqlite::Connection;

use crate::connection::{ConnectionConfig, ConnectionPool, new_file, new_in_memory};
use crate::errors::{Result, StoreError};
use crate::migrations::run_migrations;

/// Cloneable pool handle. Repo calls run on tokio's blocking pool so they
/// never stall the async workers.
#[derive(Clone)]
pub struct Database {
    pool: ConnectionPool,
}

impl Database {
    /// Wrap an existing pool.
    pub fn new(pool: ConnectionPool) -> Self {
        Self { pool }
    }

    /// Open (or create) a database and bring its schema up to date.
    ///
    /// `path = None` opens an in-memory database.
    pub fn open(path: Option<&str>, config: &ConnectionConfig) -> Result<Self> {
        let pool = match path {
            Some(p) => new_file(p, config)?,
            None => new_in_memory(config)?,
        };
        {
            let conn = pool.get()?;
            let _ = run_migrations(&conn)?;
        }
        Ok(Self { pool })
    }

    /// In-memory database with migrations applied.
    pub fn in_memory() -> Result<Self> {
        Self::open(None, &ConnectionConfig::default())
    }

    /// The underlying pool.
    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Run `f` with a pooled connection on the blocking pool.
    pub async fn run<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            f(&conn)
        })
        .await
        .map_err(|e| StoreError::Join(e.to_string()))?
    }
}
