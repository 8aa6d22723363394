//! Session workers: the handler side of the relay.
//!
//! A worker attaches to one session's request channel, runs every inbound
//! envelope through a [`ProtocolRuntime`] in arrival order, and publishes
//! the result on the matching response channel. It stops when told to, when
//! the broker closes, or when a periodic liveness check finds the session
//! gone.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde_json::json;
use sessionbus_core::InboundEnvelope;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::relay::SessionRelay;
use crate::runtime::{ProtocolRuntime, RuntimeContext};

/// Interval between session liveness checks.
pub const DEFAULT_LIVENESS_INTERVAL: Duration = Duration::from_secs(60);

/// Handle to a running worker.
pub struct WorkerHandle {
    session_id: String,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
    processed: Arc<AtomicU64>,
}

impl WorkerHandle {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Envelopes handled so far.
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Ask the worker to stop after the envelope it is handling, if any.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Wait for the worker task to end.
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            warn!(session_id = %self.session_id, error = %e, "Worker task failed");
        }
    }
}

pub struct SessionWorker;

impl SessionWorker {
    /// Attach to `session_id` and start serving it.
    ///
    /// The request subscription is live when this returns.
    pub async fn spawn(
        relay: SessionRelay,
        runtime: Arc<dyn ProtocolRuntime>,
        session_id: &str,
        liveness: Duration,
    ) -> Result<WorkerHandle> {
        let mut listener = relay.attach(session_id).await?;
        let (shutdown_tx, mut shutdown) = watch::channel(false);
        let processed = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&processed);
        let sid = session_id.to_string();

        let task = tokio::spawn(async move {
            let mut liveness_timer = tokio::time::interval(liveness);
            liveness_timer.tick().await; // Skip first immediate tick

            loop {
                tokio::select! {
                    envelope = listener.next() => {
                        let Some(envelope) = envelope else {
                            info!(session_id = %sid, "Request channel closed, worker stopping");
                            return;
                        };
                        serve(&relay, runtime.as_ref(), envelope).await;
                        counter.fetch_add(1, Ordering::Relaxed);
                    }
                    _ = liveness_timer.tick() => {
                        match relay.session_exists(&sid).await {
                            Ok(true) => {}
                            Ok(false) => {
                                info!(session_id = %sid, "Session expired, worker stopping");
                                return;
                            }
                            Err(e) => warn!(session_id = %sid, error = %e, "Liveness check failed"),
                        }
                    }
                    _ = shutdown.changed() => {
                        info!(session_id = %sid, "Worker shutting down");
                        return;
                    }
                }
            }
        });

        Ok(WorkerHandle {
            session_id: session_id.to_string(),
            shutdown_tx,
            task,
            processed,
        })
    }
}

async fn serve(relay: &SessionRelay, runtime: &dyn ProtocolRuntime, envelope: InboundEnvelope) {
    let ctx = RuntimeContext::new(relay, &envelope);
    let (status, body) = match runtime.handle(&ctx, envelope.payload()).await {
        Ok(Some(reply)) => (200, reply.into_string()),
        Ok(None) => (202, String::new()),
        Err(e) => {
            warn!(
                session_id = %ctx.session_id,
                request_id = %ctx.request_id,
                error = %e,
                "Runtime rejected request"
            );
            (e.status(), json!({ "error": e.to_string() }).to_string())
        }
    };
    match relay
        .publish_outbound(&ctx.session_id, &ctx.request_id, status, body)
        .await
    {
        Ok(true) => {}
        Ok(false) => debug!(request_id = %ctx.request_id, "Caller gone before response"),
        Err(e) => warn!(request_id = %ctx.request_id, error = %e, "Failed to publish response"),
    }
}

/// At most one worker per session in this process.
pub struct WorkerSet {
    relay: SessionRelay,
    runtime: Arc<dyn ProtocolRuntime>,
    liveness: Duration,
    workers: Mutex<HashMap<String, WorkerHandle>>,
}

impl WorkerSet {
    pub fn new(relay: SessionRelay, runtime: Arc<dyn ProtocolRuntime>) -> Self {
        Self::with_liveness(relay, runtime, DEFAULT_LIVENESS_INTERVAL)
    }

    pub fn with_liveness(
        relay: SessionRelay,
        runtime: Arc<dyn ProtocolRuntime>,
        liveness: Duration,
    ) -> Self {
        Self {
            relay,
            runtime,
            liveness,
            workers: Mutex::new(HashMap::new()),
        }
    }

    /// Start a worker for `session_id` unless one is already running.
    ///
    /// Returns `true` if a worker was started.
    pub async fn ensure(&self, session_id: &str) -> Result<bool> {
        let mut workers = self.workers.lock().await;
        if workers.get(session_id).is_some_and(|w| !w.is_finished()) {
            return Ok(false);
        }
        let handle = SessionWorker::spawn(
            self.relay.clone(),
            Arc::clone(&self.runtime),
            session_id,
            self.liveness,
        )
        .await?;
        workers.insert(session_id.to_string(), handle);
        drop(workers);
        debug!(session_id, "Worker started");
        Ok(true)
    }

    /// Stop the worker for `session_id`. Returns `false` if there was none.
    pub async fn stop(&self, session_id: &str) -> bool {
        let handle = self.workers.lock().await.remove(session_id);
        match handle {
            Some(handle) => {
                handle.stop();
                handle.join().await;
                true
            }
            None => false,
        }
    }

    /// Drop handles of workers that have already ended. Returns the count removed.
    pub async fn reap(&self) -> usize {
        let mut workers = self.workers.lock().await;
        let before = workers.len();
        workers.retain(|_, w| !w.is_finished());
        before - workers.len()
    }

    pub async fn len(&self) -> usize {
        self.workers.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.workers.lock().await.is_empty()
    }

    /// Stop every worker and wait for them to end.
    pub async fn shutdown(&self) {
        let handles: Vec<_> = self.workers.lock().await.drain().map(|(_, h)| h).collect();
        let count = handles.len();
        for handle in &handles {
            handle.stop();
        }
        for handle in handles {
            handle.join().await;
        }
        info!(workers = count, "Workers stopped");
    }
}
