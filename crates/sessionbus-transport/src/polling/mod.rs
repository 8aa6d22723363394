//! Polling transport: a duplex channel emulated with `POST /message` and a
//! fixed-interval `GET /poll` loop.


use std::sync::{Arc, Mutex, PoisonError};

use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::Value;
use sessionbus_core::config::TransportConfig;
use sessionbus_core::{OutboundEnvelope, Payload};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::error::TransportError;
use crate::listeners::{ListenerId, Listeners};
use crate::state::TransportState;

/// Body `GET /poll` answers with when nothing is queued.
const EMPTY_POLL: &str = "[]";

#[derive(Deserialize)]
struct Handshake {
    #[serde(rename = "sessionId")]
    session_id: String,
}

struct Inner {
    http: Client,
    session_id: String,
    message_url: Url,
    poll_url: Url,
    config: TransportConfig,
    state: Mutex<TransportState>,
    timer: Mutex<Option<JoinHandle<()>>>,
    /// Held for the duration of one poll cycle.
    cycle: Arc<AsyncMutex<()>>,
    listeners: Listeners,
}

/// Consumer-side transport bound to one relay session.
///
/// Cheap to clone; clones share state, timer and listeners.
#[derive(Clone)]
pub struct PollingTransport {
    inner: Arc<Inner>,
}

impl PollingTransport {
    /// Build a transport for an existing session. Starts in `Stopped`.
    pub fn new(
        config: TransportConfig,
        session_id: impl Into<String>,
    ) -> Result<Self, TransportError> {
        let session_id = session_id.into();
        let http = build_client()?;
        let message_url = session_url(&config.base_url, "message", &session_id)?;
        let poll_url = session_url(&config.base_url, "poll", &session_id)?;

        Ok(Self {
            inner: Arc::new(Inner {
                http,
                session_id,
                message_url,
                poll_url,
                config,
                state: Mutex::new(TransportState::Stopped),
                timer: Mutex::new(None),
                cycle: Arc::new(AsyncMutex::new(())),
                listeners: Listeners::default(),
            }),
        })
    }

    /// Handshake with the relay (`POST /sessions`) and bind to the new session.
    pub async fn connect(config: TransportConfig, metadata: Value) -> Result<Self, TransportError> {
        let http = build_client()?;
        let url = endpoint(&config.base_url, "sessions")?;
        let resp = http
            .post(url)
            .json(&metadata)
            .timeout(config.send_timeout())
            .send()
            .await?;
        let resp = check_status(resp).await?;
        let handshake: Handshake = resp
            .json()
            .await
            .map_err(|e| TransportError::Malformed(e.to_string()))?;

        info!(session_id = %handshake.session_id, "Session established");
        Self::new(config, handshake.session_id)
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    pub fn state(&self) -> TransportState {
        *self
            .inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a message listener. Listeners run in registration order.
    pub fn on_message<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&Payload) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.inner.listeners.add_message(Arc::new(listener))
    }

    /// Register an error listener. Poll timeouts never reach it.
    pub fn on_error<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&TransportError) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.inner.listeners.add_error(Arc::new(listener))
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.listeners.remove(id)
    }

    /// Start the poll timer. No-op unless `Stopped`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) {
        {
            let mut state = self
                .inner
                .state
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if *state != TransportState::Stopped {
                debug!(state = %*state, "Start ignored");
                return;
            }
            *state = TransportState::Starting;
        }

        let task = tokio::spawn(run_timer(Arc::clone(&self.inner)));
        *self
            .inner
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(task);

        self.inner.set_state(TransportState::Running);
        info!(session_id = %self.inner.session_id, "Polling transport started");
    }

    /// Cancel the poll timer. Idempotent.
    ///
    /// A poll already in flight completes and its listeners still fire.
    pub fn stop(&self) {
        {
            let mut state = self
                .inner
                .state
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if *state == TransportState::Stopped {
                return;
            }
            *state = TransportState::Stopping;
        }

        let timer = self
            .inner
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        // Cycles run in their own tasks, so aborting the timer leaves an
        // in-flight poll alone.
        if let Some(timer) = timer {
            timer.abort();
        }

        self.inner.set_state(TransportState::Stopped);
        info!(session_id = %self.inner.session_id, "Polling transport stopped");
    }

    /// Post one message. A non-empty reply is delivered to message
    /// listeners before this returns, and also handed back to the caller.
    pub async fn send(&self, message: &Value) -> Result<Option<Payload>, TransportError> {
        if !self.state().is_running() {
            return Err(TransportError::NotStarted);
        }

        let resp = self
            .inner
            .http
            .post(self.inner.message_url.clone())
            .json(message)
            .timeout(self.inner.config.send_timeout())
            .send()
            .await?;
        let resp = check_status(resp).await?;
        let text = resp.text().await?;
        if text.is_empty() {
            return Ok(None);
        }

        let payload = Payload::decode(text);
        self.inner.listeners.dispatch_message(&payload);
        Ok(Some(payload))
    }

    /// Run one pull against `GET /poll` without dispatching.
    ///
    /// `Ok(None)` covers both an empty poll and a pull that timed out.
    pub async fn poll_once(&self) -> Result<Option<Payload>, TransportError> {
        self.inner.poll_once().await
    }

    /// Run one full cycle: pull, then fan out to listeners.
    pub async fn poll_cycle(&self) {
        let _guard = self.inner.cycle.lock().await;
        self.inner.poll_cycle().await;
    }
}

impl Inner {
    fn set_state(&self, next: TransportState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = next;
    }

    async fn poll_once(&self) -> Result<Option<Payload>, TransportError> {
        let sent = self
            .http
            .get(self.poll_url.clone())
            .timeout(self.config.poll_timeout())
            .send()
            .await;
        let resp = match sent {
            Ok(resp) => resp,
            Err(e) if e.is_timeout() => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let resp = check_status(resp).await?;
        let text = match resp.text().await {
            Ok(text) => text,
            Err(e) if e.is_timeout() => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let text = text.trim();
        if text.is_empty() || text == EMPTY_POLL {
            return Ok(None);
        }

        let envelope: OutboundEnvelope =
            serde_json::from_str(text).map_err(|e| TransportError::Malformed(e.to_string()))?;
        if envelope.is_empty() {
            return Ok(None);
        }
        Ok(Some(envelope.payload()))
    }

    async fn poll_cycle(&self) {
        match self.poll_once().await {
            Ok(Some(payload)) => {
                let delivered = self.listeners.dispatch_message(&payload);
                debug!(session_id = %self.session_id, delivered, "Poll delivered message");
            }
            Ok(None) => {}
            Err(e) => {
                warn!(session_id = %self.session_id, error = %e, "Poll failed");
                self.listeners.dispatch_error(&e);
            }
        }
    }
}

/// One tick per interval; a tick that finds the previous cycle still in
/// flight is skipped.
async fn run_timer(inner: Arc<Inner>) {
    let mut interval = tokio::time::interval(inner.config.poll_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        interval.tick().await;
        let Ok(guard) = Arc::clone(&inner.cycle).try_lock_owned() else {
            debug!(session_id = %inner.session_id, "Poll still in flight, skipping tick");
            continue;
        };
        let inner = Arc::clone(&inner);
        tokio::spawn(async move {
            inner.poll_cycle().await;
            drop(guard);
        });
    }
}

fn build_client() -> Result<Client, TransportError> {
    // Ignore the error: another component may have installed it first.
    let _ = rustls::crypto::ring::default_provider().install_default();
    Client::builder()
        .user_agent(concat!("sessionbus-transport/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(TransportError::Http)
}

fn endpoint(base_url: &str, path: &str) -> Result<Url, TransportError> {
    let joined = format!("{}/{path}", base_url.trim_end_matches('/'));
    Url::parse(&joined).map_err(|e| TransportError::InvalidUrl(format!("{joined}: {e}")))
}

fn session_url(base_url: &str, path: &str, session_id: &str) -> Result<Url, TransportError> {
    let mut url = endpoint(base_url, path)?;
    url.query_pairs_mut().append_pair("sessionId", session_id);
    Ok(url)
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, TransportError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(TransportError::Status {
        status: status.as_u16(),
        body,
    })
}
