//! TTL-bounded key/value store.
//!
//! Session records and cached documentation live here. Every entry carries an
//! expiry; an expired entry is indistinguishable from one that never existed.
//! Store failures are surfaced to the caller, never masked by a local cache.

mod memory;
mod sqlite;


use std::time::Duration;

use async_trait::async_trait;
use sessionbus_core::db::DatabaseError;

pub use memory::MemoryStore;
pub use sqlite::{SqliteStore, StoreDatabase};

/// Errors raised by a [`KvStore`].
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backing store cannot be reached (closed, connection lost).
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store query failed: {0}")]
    Query(String),
}

impl From<DatabaseError> for StoreError {
    fn from(e: DatabaseError) -> Self {
        match e {
            DatabaseError::Query(msg) => Self::Query(msg),
            other => Self::Unavailable(other.to_string()),
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        DatabaseError::from(e).into()
    }
}

/// A shared get/set store with per-key expiry.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Value under `key`, or `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Store `value` under `key`, replacing any previous entry, expiring after `ttl`.
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Reset the expiry of a live entry. Returns `false` if there is none.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Remove `key`. Returns `true` if a live entry was removed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Check the store is reachable.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Physically remove expired entries. Returns the count removed.
    async fn purge_expired(&self) -> Result<u64, StoreError>;

    /// Release the backing connection. Later operations fail with
    /// [`StoreError::Unavailable`].
    async fn close(&self);
}

/// Milliseconds in `ttl`, saturating.
pub(crate) fn ttl_millis(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)
}
