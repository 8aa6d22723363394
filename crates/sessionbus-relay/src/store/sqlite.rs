//! `SQLite`-backed [`KvStore`].
//!
//! Several relay processes on one host can share a store file (WAL mode).
//! Expiry uses wall-clock milliseconds in `expires_at`; rows at or past their
//! expiry are invisible and removed by [`KvStore::purge_expired`].

use std::time::Duration;

use async_trait::async_trait;
use sessionbus_core::db::unix_timestamp_millis;
use tracing::info;

use super::{KvStore, StoreError, ttl_millis};

sessionbus_core::define_database!(StoreDatabase, "Store database migrations complete");

/// Key/value store persisted in the `kv_entries` table.
#[derive(Clone)]
pub struct SqliteStore {
    db: StoreDatabase,
}

impl SqliteStore {
    pub const fn new(db: StoreDatabase) -> Self {
        Self { db }
    }

    pub async fn open(path: &std::path::Path) -> Result<Self, StoreError> {
        Ok(Self::new(StoreDatabase::open(path).await?))
    }

    pub async fn open_in_memory() -> Result<Self, StoreError> {
        Ok(Self::new(StoreDatabase::open_in_memory().await?))
    }
}

#[async_trait]
impl KvStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT value FROM kv_entries WHERE key = ? AND expires_at > ?")
                .bind(key)
                .bind(unix_timestamp_millis())
                .fetch_optional(self.db.pool())
                .await?;
        Ok(row.map(|(value,)| value))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let expires_at = unix_timestamp_millis().saturating_add(ttl_millis(ttl));
        sqlx::query(
            "INSERT INTO kv_entries (key, value, expires_at) VALUES (?, ?, ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
        )
        .bind(key)
        .bind(value)
        .bind(expires_at)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let now = unix_timestamp_millis();
        let result =
            sqlx::query("UPDATE kv_entries SET expires_at = ? WHERE key = ? AND expires_at > ?")
                .bind(now.saturating_add(ttl_millis(ttl)))
                .bind(key)
                .bind(now)
                .execute(self.db.pool())
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM kv_entries WHERE key = ? AND expires_at > ?")
            .bind(key)
            .bind(unix_timestamp_millis())
            .execute(self.db.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(self.db.pool()).await?;
        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM kv_entries WHERE expires_at <= ?")
            .bind(unix_timestamp_millis())
            .execute(self.db.pool())
            .await?;
        let removed = result.rows_affected();
        if removed > 0 {
            info!(removed, "Cleaned up expired store entries");
        }
        Ok(removed)
    }

    async fn close(&self) {
        self.db.close().await;
    }
}
