//! Process-wide store and broker handles.
//!
//! Every request handler in a process shares one store connection and one
//! broker. The `SQLite` backend backs both with the same database file. They are built lazily on first use and can be torn down and
//! rebuilt, which tests rely on.

use std::sync::Arc;

use sessionbus_core::Config;
use sessionbus_core::config::{StoreBackend, default_database_path};
use tokio::sync::Mutex;
use tracing::info;

use crate::broker::{Broker, MemoryBroker, SqliteBroker};
use crate::channel::Channels;
use crate::error::{RelayError, Result};
use crate::registry::SessionRegistry;
use crate::relay::SessionRelay;
use crate::store::{KvStore, MemoryStore, SqliteStore, StoreDatabase};

static SHARED: Mutex<Option<Arc<SharedResources>>> = Mutex::const_new(None);

pub struct SharedResources {
    pub store: Arc<dyn KvStore>,
    pub broker: Arc<dyn Broker>,
    pub relay: SessionRelay,
}

impl SharedResources {
    /// The process-wide instance, built from `config` on first call.
    ///
    /// Later calls return the same instance and ignore `config`.
    pub async fn get_or_init(config: &Config) -> Result<Arc<Self>> {
        let mut shared = SHARED.lock().await;
        if let Some(existing) = shared.as_ref() {
            return Ok(Arc::clone(existing));
        }
        let resources = Arc::new(Self::build(config).await?);
        *shared = Some(Arc::clone(&resources));
        drop(shared);
        info!(backend = ?config.store.backend, "Shared resources initialised");
        Ok(resources)
    }

    /// Tear down the process-wide instance, if any.
    pub async fn shutdown() {
        let taken = SHARED.lock().await.take();
        if let Some(resources) = taken {
            resources.close().await;
            info!("Shared resources released");
        }
    }

    /// Build an independent set of resources (not registered process-wide).
    pub async fn build(config: &Config) -> Result<Self> {
        let (store, broker): (Arc<dyn KvStore>, Arc<dyn Broker>) = match config.store.backend {
            StoreBackend::Memory => (
                Arc::new(MemoryStore::new()),
                Arc::new(MemoryBroker::new(config.relay.broadcast_capacity)),
            ),
            StoreBackend::Sqlite => {
                let path = config
                    .store
                    .database_path
                    .clone()
                    .or_else(default_database_path)
                    .ok_or_else(|| {
                        RelayError::BrokerUnavailable(
                            "no database path configured and no home directory".to_string(),
                        )
                    })?;
                let db = StoreDatabase::open(&path)
                    .await
                    .map_err(|e| RelayError::BrokerUnavailable(e.to_string()))?;
                (
                    Arc::new(SqliteStore::new(db.clone())),
                    Arc::new(SqliteBroker::new(db, &config.store)),
                )
            }
        };
        Ok(Self::from_parts(store, broker, config))
    }

    pub fn from_parts(store: Arc<dyn KvStore>, broker: Arc<dyn Broker>, config: &Config) -> Self {
        let registry = SessionRegistry::new(Arc::clone(&store), config.relay.session_ttl());
        let channels = Channels::new(Arc::clone(&broker));
        let relay = SessionRelay::new(registry, channels, &config.relay);
        Self {
            store,
            broker,
            relay,
        }
    }

    /// Close the broker, then the store.
    pub async fn close(&self) {
        self.broker.shutdown().await;
        self.store.close().await;
    }
}
