//! Session records in the shared store.
//!
//! A session exists exactly while its record is live. The record expires
//! after the configured TTL unless refreshed; refreshing rewrites it with a
//! new `lastActive` and a fresh TTL.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use sessionbus_core::SessionRecord;
use sessionbus_core::db::unix_timestamp_millis;
use sessionbus_core::naming::session_key;
use tracing::{debug, info};

use crate::error::{RelayError, Result};
use crate::store::KvStore;

/// Store-backed registry of live sessions.
#[derive(Clone)]
pub struct SessionRegistry {
    store: Arc<dyn KvStore>,
    ttl: Duration,
}

impl SessionRegistry {
    pub fn new(store: Arc<dyn KvStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    /// Write a fresh record for `session_id`, replacing any existing one.
    pub async fn create(&self, session_id: &str, metadata: Value) -> Result<SessionRecord> {
        let record = SessionRecord::new(metadata, unix_timestamp_millis());
        self.write(session_id, &record).await?;
        info!(session_id, ttl_secs = self.ttl.as_secs(), "Session registered");
        Ok(record)
    }

    pub async fn exists(&self, session_id: &str) -> Result<bool> {
        Ok(self.store.get(&session_key(session_id)).await?.is_some())
    }

    pub async fn get(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        let Some(text) = self.store.get(&session_key(session_id)).await? else {
            return Ok(None);
        };
        let record = serde_json::from_str(&text).map_err(|e| {
            RelayError::MalformedPayload(format!("session record {session_id}: {e}"))
        })?;
        Ok(Some(record))
    }

    /// Refresh `lastActive` and the TTL. Returns `false` if the session is gone.
    ///
    /// Concurrent touches race as last-writer-wins; each write carries a
    /// full TTL so the outcome is the same either way.
    pub async fn touch(&self, session_id: &str) -> Result<bool> {
        let Some(record) = self.get(session_id).await? else {
            return Ok(false);
        };
        let record = record.touched(unix_timestamp_millis());
        self.write(session_id, &record).await?;
        debug!(session_id, "Session refreshed");
        Ok(true)
    }

    async fn write(&self, session_id: &str, record: &SessionRecord) -> Result<()> {
        let text = serde_json::to_string(record)
            .map_err(|e| RelayError::MalformedPayload(e.to_string()))?;
        self.store
            .set_ex(&session_key(session_id), &text, self.ttl)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::store::MemoryStore;

    fn registry(ttl: Duration) -> (Arc<MemoryStore>, SessionRegistry) {
        let store = Arc::new(MemoryStore::new());
        let registry = SessionRegistry::new(Arc::clone(&store) as Arc<dyn KvStore>, ttl);
        (store, registry)
    }

    #[tokio::test]
    async fn create_then_get() {
        let (_, registry) = registry(Duration::from_secs(1800));
        let created = registry
            .create("s1", json!({"client": "ext"}))
            .await
            .unwrap();

        assert!(registry.exists("s1").await.unwrap());
        let record = registry.get("s1").await.unwrap().unwrap();
        assert_eq!(record, created);
        assert_eq!(record.metadata, json!({"client": "ext"}));
        assert_eq!(record.created, record.last_active);
    }

    #[tokio::test]
    async fn unknown_session_is_absent() {
        let (_, registry) = registry(Duration::from_secs(1800));
        assert!(!registry.exists("nope").await.unwrap());
        assert!(registry.get("nope").await.unwrap().is_none());
        assert!(!registry.touch("nope").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn session_expires_after_ttl() {
        let (_, registry) = registry(Duration::from_secs(1800));
        registry.create("s1", Value::Null).await.unwrap();

        tokio::time::advance(Duration::from_secs(1799)).await;
        assert!(registry.exists("s1").await.unwrap());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!registry.exists("s1").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn touch_extends_ttl() {
        let (_, registry) = registry(Duration::from_secs(1800));
        registry.create("s1", Value::Null).await.unwrap();

        tokio::time::advance(Duration::from_secs(1700)).await;
        assert!(registry.touch("s1").await.unwrap());

        tokio::time::advance(Duration::from_secs(1700)).await;
        assert!(registry.exists("s1").await.unwrap());

        tokio::time::advance(Duration::from_secs(101)).await;
        assert!(!registry.exists("s1").await.unwrap());
    }

    #[tokio::test]
    async fn touch_keeps_creation_time() {
        let (_, registry) = registry(Duration::from_secs(60));
        let created = registry.create("s1", Value::Null).await.unwrap();
        registry.touch("s1").await.unwrap();

        let record = registry.get("s1").await.unwrap().unwrap();
        assert_eq!(record.created, created.created);
        assert!(record.last_active >= created.last_active);
    }

    #[tokio::test]
    async fn corrupt_record_is_malformed() {
        let (store, registry) = registry(Duration::from_secs(60));
        store
            .set_ex("session:s1", "garbage", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(matches!(
            registry.get("s1").await,
            Err(RelayError::MalformedPayload(_))
        ));
    }

    #[tokio::test]
    async fn store_outage_surfaces() {
        let (store, registry) = registry(Duration::from_secs(60));
        store.close().await;
        assert!(matches!(
            registry.exists("s1").await,
            Err(RelayError::BrokerUnavailable(_))
        ));
    }
}
