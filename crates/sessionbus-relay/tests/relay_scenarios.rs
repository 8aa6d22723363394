#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};

use sessionbus_core::config::StoreBackend;
use sessionbus_core::naming::response_channel;
use sessionbus_core::{Config, Headers, OutboundEnvelope};
use sessionbus_relay::broker::{Broker, MemoryBroker};
use sessionbus_relay::store::{KvStore, SqliteStore};
use sessionbus_relay::{InboundRequest, RelayError, SharedResources};

async fn sqlite_resources(dir: &tempfile::TempDir) -> (Arc<MemoryBroker>, SharedResources) {
    let store = SqliteStore::open(&dir.path().join("store.db")).await.unwrap();
    let broker = Arc::new(MemoryBroker::default());
    let resources = SharedResources::from_parts(
        Arc::new(store) as Arc<dyn KvStore>,
        Arc::clone(&broker) as Arc<dyn Broker>,
        &Config::default(),
    );
    (broker, resources)
}

#[tokio::test]
async fn ping_pong_over_sqlite_store() {
    let dir = tempfile::tempdir().unwrap();
    let (broker, resources) = sqlite_resources(&dir).await;
    let relay = resources.relay.clone();

    relay.register_session_with_id("abc", Value::Null).await.unwrap();
    let mut handler = relay.attach("abc").await.unwrap();

    let rid = relay
        .enqueue_inbound("abc", "POST", "/tool", Headers::new(), json!({"op": "ping"}))
        .await
        .unwrap();
    let inbound = handler.next().await.unwrap();
    assert_eq!(inbound.request_id, rid);
    assert_eq!(inbound.body, json!({"op": "ping"}));

    let waiter = {
        let relay = relay.clone();
        let rid = rid.clone();
        tokio::spawn(async move {
            relay
                .await_outbound("abc", &rid, Duration::from_millis(5000))
                .await
        })
    };
    while broker.subscriber_count(&response_channel("abc", &rid)) == 0 {
        tokio::task::yield_now().await;
    }

    assert!(
        relay
            .publish_outbound("abc", &rid, 200, r#"{"pong":true}"#)
            .await
            .unwrap()
    );
    let response = waiter.await.unwrap().unwrap();
    assert_eq!(response, OutboundEnvelope::new(200, r#"{"pong":true}"#));

    resources.close().await;
}

#[tokio::test]
async fn sessions_survive_relay_restart_on_shared_file() {
    let dir = tempfile::tempdir().unwrap();
    let (_, first) = sqlite_resources(&dir).await;
    let sid = first.relay.register_session(json!({"n": 1})).await.unwrap();
    first.close().await;

    let (_, second) = sqlite_resources(&dir).await;
    let record = second.relay.session(&sid).await.unwrap().unwrap();
    assert_eq!(record.metadata, json!({"n": 1}));
    second.close().await;
}

#[tokio::test]
async fn two_instances_share_sessions_through_the_store() {
    let dir = tempfile::tempdir().unwrap();
    let (_, a) = sqlite_resources(&dir).await;
    let (_, b) = sqlite_resources(&dir).await;

    let sid = a.relay.register_session(Value::Null).await.unwrap();
    assert!(b.relay.session_exists(&sid).await.unwrap());
    assert!(matches!(
        b.relay
            .enqueue_inbound("never-created", "POST", "/tool", Headers::new(), Value::Null)
            .await,
        Err(RelayError::SessionNotFound(_))
    ));

    a.close().await;
    b.close().await;
}

fn shared_file_config(dir: &tempfile::TempDir) -> Config {
    let mut config = Config::default();
    config.store.backend = StoreBackend::Sqlite;
    config.store.database_path = Some(dir.path().join("store.db"));
    config.store.broker_poll_ms = 5;
    config
}

#[tokio::test]
async fn request_enqueued_on_one_instance_reaches_handler_on_another() {
    let dir = tempfile::tempdir().unwrap();
    let config = shared_file_config(&dir);
    let a = SharedResources::build(&config).await.unwrap();
    let b = SharedResources::build(&config).await.unwrap();

    a.relay.register_session_with_id("abc", Value::Null).await.unwrap();
    let mut handler = b.relay.attach("abc").await.unwrap();

    let rid = a
        .relay
        .enqueue_inbound("abc", "POST", "/tool", Headers::new(), json!({"op": "ping"}))
        .await
        .unwrap();
    let inbound = tokio::time::timeout(Duration::from_secs(2), handler.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(inbound.request_id, rid);
    assert_eq!(inbound.body, json!({"op": "ping"}));

    a.close().await;
    b.close().await;
}

#[tokio::test]
async fn dispatch_round_trips_across_instances() {
    let dir = tempfile::tempdir().unwrap();
    let config = shared_file_config(&dir);
    let a = SharedResources::build(&config).await.unwrap();
    let b = SharedResources::build(&config).await.unwrap();

    a.relay.register_session_with_id("abc", Value::Null).await.unwrap();
    let mut handler = b.relay.attach("abc").await.unwrap();
    let responder = {
        let relay = b.relay.clone();
        tokio::spawn(async move {
            let inbound = handler.next().await.unwrap();
            relay
                .publish_outbound("abc", &inbound.request_id, 200, r#"{"pong":true}"#)
                .await
                .unwrap()
        })
    };

    let request = InboundRequest {
        body: json!({"op": "ping"}),
        ..InboundRequest::default()
    };
    let response = a
        .relay
        .dispatch("abc", request, Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(response, OutboundEnvelope::new(200, r#"{"pong":true}"#));
    assert!(responder.await.unwrap(), "instance A was waiting for the answer");

    a.close().await;
    b.close().await;
}
