//! TTL cache in front of a [`DocsBackend`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sessionbus_core::naming::docs_key;
use tracing::debug;

use super::{DocsBackend, DocsError, SEARCH_LIMIT, SearchHit, rank_paragraphs};
use crate::store::KvStore;

/// Caches fetched documentation under `docs:<repoId>`.
pub struct CachedDocs<B> {
    inner: B,
    store: Arc<dyn KvStore>,
    ttl: Duration,
}

impl<B: DocsBackend> CachedDocs<B> {
    pub fn new(inner: B, store: Arc<dyn KvStore>, ttl: Duration) -> Self {
        Self { inner, store, ttl }
    }

    pub const fn inner(&self) -> &B {
        &self.inner
    }
}

#[async_trait]
impl<B: DocsBackend> DocsBackend for CachedDocs<B> {
    async fn fetch_docs(&self, repo_id: &str) -> Result<String, DocsError> {
        let key = docs_key(repo_id);
        if let Some(cached) = self.store.get(&key).await? {
            debug!(repo_id, "Documentation cache hit");
            return Ok(cached);
        }
        let content = self.inner.fetch_docs(repo_id).await?;
        self.store.set_ex(&key, &content, self.ttl).await?;
        debug!(repo_id, ttl_secs = self.ttl.as_secs(), "Documentation cached");
        Ok(content)
    }

    async fn search(&self, repo_id: &str, query: &str) -> Result<Vec<SearchHit>, DocsError> {
        let content = self.fetch_docs(repo_id).await?;
        Ok(rank_paragraphs(&content, query, SEARCH_LIMIT))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::store::MemoryStore;

    #[derive(Default)]
    struct CountingDocs {
        fetches: AtomicUsize,
    }

    #[async_trait]
    impl DocsBackend for CountingDocs {
        async fn fetch_docs(&self, repo_id: &str) -> Result<String, DocsError> {
            let n = self.fetches.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(format!("{repo_id} docs v{n}"))
        }

        async fn search(&self, _: &str, _: &str) -> Result<Vec<SearchHit>, DocsError> {
            Ok(Vec::new())
        }
    }

    fn cached(ttl: Duration) -> (Arc<MemoryStore>, CachedDocs<CountingDocs>) {
        let store = Arc::new(MemoryStore::new());
        let docs = CachedDocs::new(
            CountingDocs::default(),
            Arc::clone(&store) as Arc<dyn KvStore>,
            ttl,
        );
        (store, docs)
    }

    #[tokio::test]
    async fn second_fetch_is_served_from_cache() {
        let (store, docs) = cached(Duration::from_secs(3600));
        assert_eq!(docs.fetch_docs("o/r").await.unwrap(), "o/r docs v1");
        assert_eq!(docs.fetch_docs("o/r").await.unwrap(), "o/r docs v1");
        assert_eq!(docs.inner().fetches.load(Ordering::SeqCst), 1);
        assert_eq!(store.get("docs:o/r").await.unwrap().as_deref(), Some("o/r docs v1"));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entry_is_refetched() {
        let (_, docs) = cached(Duration::from_secs(60));
        docs.fetch_docs("o/r").await.unwrap();
        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(docs.fetch_docs("o/r").await.unwrap(), "o/r docs v2");
    }

    #[tokio::test]
    async fn search_uses_cached_content() {
        let (_, docs) = cached(Duration::from_secs(60));
        let hits = docs.search("o/r", "docs").await.unwrap();
        assert_eq!(hits.len(), 1);
        docs.search("o/r", "docs").await.unwrap();
        assert_eq!(docs.inner().fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn store_outage_surfaces() {
        let (store, docs) = cached(Duration::from_secs(60));
        store.close().await;
        assert!(matches!(
            docs.fetch_docs("o/r").await,
            Err(DocsError::Cache(_))
        ));
    }
}
