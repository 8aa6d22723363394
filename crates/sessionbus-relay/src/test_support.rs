//! Fixtures shared by unit tests across modules.

use std::sync::Arc;

use sessionbus_core::config::RelayConfig;
use sessionbus_core::{Headers, InboundEnvelope};
use serde_json::Value;

use crate::broker::{Broker, MemoryBroker};
use crate::channel::Channels;
use crate::registry::SessionRegistry;
use crate::relay::SessionRelay;
use crate::runtime::RuntimeContext;
use crate::store::{KvStore, MemoryStore};

pub struct Fixture {
    pub store: Arc<MemoryStore>,
    pub broker: Arc<MemoryBroker>,
    pub relay: SessionRelay,
}

pub fn fixture_with(config: &RelayConfig) -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let broker = Arc::new(MemoryBroker::default());
    let registry = SessionRegistry::new(
        Arc::clone(&store) as Arc<dyn KvStore>,
        config.session_ttl(),
    );
    let channels = Channels::new(Arc::clone(&broker) as Arc<dyn Broker>);
    let relay = SessionRelay::new(registry, channels, config);
    Fixture {
        store,
        broker,
        relay,
    }
}

pub fn fixture() -> Fixture {
    fixture_with(&RelayConfig::default())
}

/// Context for a synthetic request `rid` on `sid`.
pub fn context(relay: &SessionRelay, sid: &str, rid: &str) -> RuntimeContext {
    let envelope = InboundEnvelope {
        request_id: rid.to_string(),
        session_id: sid.to_string(),
        url: "/message".to_string(),
        method: "POST".to_string(),
        headers: Headers::new(),
        body: Value::Null,
    };
    RuntimeContext::new(relay, &envelope)
}
