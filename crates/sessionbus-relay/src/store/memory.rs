//! In-process [`KvStore`].
//!
//! Deadlines are measured on the tokio clock, so tests can drive expiry with
//! a paused runtime and `tokio::time::advance`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

use super::{KvStore, StoreError};

struct Entry {
    value: String,
    deadline: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.deadline > now
    }
}

/// Map-backed store for single-process deployments and tests.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Entry>>,
    closed: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Unavailable("memory store closed".into()));
        }
        Ok(())
    }

    /// Number of entries held, live or not yet purged.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.check_open()?;
        let now = Instant::now();
        Ok(self
            .entries
            .read()
            .await
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.value.clone()))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        self.check_open()?;
        let entry = Entry {
            value: value.to_string(),
            deadline: Instant::now() + ttl,
        };
        self.entries.write().await.insert(key.to_string(), entry);
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.check_open()?;
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        match entries.get_mut(key) {
            Some(entry) if entry.is_live(now) => {
                entry.deadline = now + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.check_open()?;
        let now = Instant::now();
        Ok(self
            .entries
            .write()
            .await
            .remove(key)
            .is_some_and(|e| e.is_live(now)))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check_open()
    }

    async fn purge_expired(&self) -> Result<u64, StoreError> {
        self.check_open()?;
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| e.is_live(now));
        let removed = (before - entries.len()) as u64;
        drop(entries);
        if removed > 0 {
            debug!(removed, "Purged expired memory store entries");
        }
        Ok(removed)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.entries.write().await.clear();
    }
}
