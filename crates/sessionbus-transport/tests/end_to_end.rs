//! Polling transport against a live relay host on an ephemeral port.

#![allow(clippy::unwrap_used)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use sessionbus_core::config::TransportConfig;
use sessionbus_core::naming::event_channel;
use sessionbus_core::{Config, OutboundEnvelope, Payload};
use sessionbus_relay::broker::{Broker, MemoryBroker};
use sessionbus_relay::mailbox::Mailboxes;
use sessionbus_relay::server::{AppState, build_router};
use sessionbus_relay::store::{KvStore, MemoryStore};
use sessionbus_relay::worker::WorkerSet;
use sessionbus_relay::{ProtocolRuntime, RuntimeContext, RuntimeError, SessionRelay, SharedResources};
use sessionbus_transport::{PollingTransport, TransportError, TransportState};

/// Echoes requests; `{"event": x}` is pushed to the event channel instead.
struct EchoRuntime;

#[async_trait]
impl ProtocolRuntime for EchoRuntime {
    async fn handle(
        &self,
        ctx: &RuntimeContext,
        message: Payload,
    ) -> Result<Option<Payload>, RuntimeError> {
        if let Some(event) = message.to_value().get("event") {
            ctx.outbox
                .send(&Payload::from(event.clone()))
                .await
                .map_err(|e| RuntimeError::Internal(e.to_string()))?;
            return Ok(None);
        }
        Ok(Some(message))
    }
}

const POLL_HOLD: Duration = Duration::from_millis(300);
const MAILBOX_IDLE: Duration = Duration::from_millis(600);

struct Host {
    base_url: String,
    relay: SessionRelay,
    broker: Arc<MemoryBroker>,
}

async fn spawn_host() -> Host {
    let store = Arc::new(MemoryStore::new());
    let broker = Arc::new(MemoryBroker::default());
    let resources = SharedResources::from_parts(
        store as Arc<dyn KvStore>,
        Arc::clone(&broker) as Arc<dyn Broker>,
        &Config::default(),
    );
    let workers = Arc::new(WorkerSet::new(resources.relay.clone(), Arc::new(EchoRuntime)));
    let mailboxes = Arc::new(Mailboxes::new(resources.relay.clone(), MAILBOX_IDLE));
    let state = AppState {
        relay: resources.relay.clone(),
        workers,
        mailboxes,
        store: Arc::clone(&resources.store),
        poll_hold: POLL_HOLD,
        max_wait: Duration::from_secs(10),
    };
    let router = build_router(state, 64 * 1024);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    Host {
        base_url: format!("http://{addr}"),
        relay: resources.relay,
        broker,
    }
}

fn transport_config(host: &Host) -> TransportConfig {
    TransportConfig {
        base_url: host.base_url.clone(),
        poll_interval_ms: 20,
        poll_timeout_ms: 2_000,
        send_timeout_ms: 5_000,
    }
}

fn collect(t: &PollingTransport) -> Arc<Mutex<Vec<Value>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    t.on_message(move |p| {
        sink.lock().unwrap().push(p.to_value());
        Ok(())
    });
    seen
}

async fn wait_until(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

async fn wait_for_subscribers(broker: &MemoryBroker, channel: &str, want: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while broker.subscriber_count(channel) != want {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn handshake_then_synchronous_exchange() {
    let host = spawn_host().await;
    let t = PollingTransport::connect(transport_config(&host), json!({"client": "e2e"}))
        .await
        .unwrap();
    assert!(host.relay.session_exists(t.session_id()).await.unwrap());

    let seen = collect(&t);
    t.start();
    let reply = t.send(&json!({"op": "ping"})).await.unwrap().unwrap();
    t.stop();

    assert_eq!(reply.to_json(), Some(json!({"op": "ping"})));
    assert_eq!(*seen.lock().unwrap(), vec![json!({"op": "ping"})]);
}

#[tokio::test]
async fn server_events_arrive_through_polling() {
    let host = spawn_host().await;
    let t = PollingTransport::connect(transport_config(&host), json!({}))
        .await
        .unwrap();
    let seen = collect(&t);
    t.start();

    let channel = event_channel(t.session_id());
    wait_for_subscribers(&host.broker, &channel, 1).await;
    assert!(t.send(&json!({"event": {"progress": 50}})).await.unwrap().is_none());

    wait_until(|| !seen.lock().unwrap().is_empty()).await;
    t.stop();
    assert_eq!(seen.lock().unwrap()[0], json!({"progress": 50}));
}

#[tokio::test]
async fn restart_resumes_without_replay() {
    let host = spawn_host().await;
    let t = PollingTransport::connect(transport_config(&host), json!({}))
        .await
        .unwrap();
    let seen = collect(&t);

    t.start();
    tokio::time::sleep(Duration::from_millis(100)).await;
    t.stop();
    assert_eq!(t.state(), TransportState::Stopped);

    // Outlast the in-flight poll and the mailbox idle window.
    tokio::time::sleep(POLL_HOLD + MAILBOX_IDLE + Duration::from_millis(200)).await;
    host.relay
        .publish_event(t.session_id(), &OutboundEnvelope::ok(r#"{"n":"missed"}"#))
        .await
        .unwrap();

    t.start();
    tokio::time::timeout(Duration::from_secs(5), async {
        while seen.lock().unwrap().is_empty() {
            host.relay
                .publish_event(t.session_id(), &OutboundEnvelope::ok(r#"{"n":"after"}"#))
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .unwrap();
    t.stop();

    let seen = seen.lock().unwrap();
    assert!(seen.iter().all(|v| *v == json!({"n": "after"})), "{seen:?}");
}

#[tokio::test]
async fn events_queued_between_polls_all_arrive() {
    let host = spawn_host().await;
    let t = PollingTransport::connect(transport_config(&host), json!({}))
        .await
        .unwrap();
    let seen = collect(&t);

    for n in 0..3 {
        host.relay
            .publish_event(t.session_id(), &OutboundEnvelope::ok(format!(r#"{{"n":{n}}}"#)))
            .await
            .unwrap();
    }
    t.start();
    wait_until(|| seen.lock().unwrap().len() == 3).await;
    t.stop();
    assert_eq!(
        *seen.lock().unwrap(),
        vec![json!({"n": 0}), json!({"n": 1}), json!({"n": 2})]
    );
}

#[tokio::test]
async fn expired_session_is_reported_to_the_sender() {
    let host = spawn_host().await;
    let t = PollingTransport::new(transport_config(&host), "never-created").unwrap();
    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&errors);
    t.on_error(move |e| {
        sink.lock().unwrap().push(e.is_session_not_found());
        Ok(())
    });

    t.start();
    let err = t.send(&json!({"op": "ping"})).await.unwrap_err();
    assert!(matches!(err, TransportError::Status { status: 404, .. }));

    // Polling an unknown session surfaces through the error listeners.
    wait_until(|| !errors.lock().unwrap().is_empty()).await;
    t.stop();
    assert!(errors.lock().unwrap().iter().all(|not_found| *not_found));
}
