//! # counsel-store
//!
//! SQLite storage behind the real-time substrate.
//!
//! - **[`connection`]**: `r2d2` pool with WAL and busy-timeout pragmas
//! - **[`migrations`]**: version-tracked schema, embedded at compile time
//! - **[`repositories`]**: stateless repos, every method takes `&Connection`
//! - **[`Database`]**: pool handle that runs repo calls on the blocking pool
//!
//! Each operation the substrate relies on (single-row upsert, delete, lease)
//! is atomic on its own; callers never hold locks across operations.

#![deny(unsafe_code)]

pub mod connection;
pub mod database;
pub mod errors;
pub mod migrations;
pub mod repositories;

pub use connection::{ConnectionConfig, ConnectionPool, PooledConnection, new_file, new_in_memory};
pub use database::Database;
pub use errors::{Result, StoreError};
pub use migrations::{current_version, latest_version, run_migrations};
pub use repositories::cache::CacheRepo;
pub use repositories::connections::{ConnectionRepo, ConnectionRow};
pub use repositories::queue::{QueueRepo, QueueRow, QueueState};

/// Current time as unix milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
