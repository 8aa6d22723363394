//! Session relay: request/response correlation over broker channels.
//!
//! Inbound protocol requests are published on `requests:<sid>`. The handler
//! for that session answers each one on its own `responses:<sid>:<rid>`
//! channel, and the caller that enqueued the request waits there. Nothing is
//! held in process memory between calls, so any relay instance can serve any
//! step of the exchange.

mod pending;


use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sessionbus_core::config::{RefreshPolicy, RelayConfig};
use sessionbus_core::naming::{event_channel, request_channel, response_channel};
use sessionbus_core::{Headers, InboundEnvelope, OutboundEnvelope, SessionRecord};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::channel::{Channels, Listener};
use crate::error::{RelayError, Result};
use crate::registry::SessionRegistry;

pub use pending::PendingResponse;

macro_rules! bump {
    ($counter:ident) => {
        #[cfg(feature = "metrics")]
        sessionbus_core::metrics::relay_instruments()
            .$counter
            .add(1, &[]);
    };
}
pub(crate) use bump;

/// Transport-level description of one inbound protocol request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundRequest {
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub headers: Headers,
    #[serde(default)]
    pub body: Value,
}

fn default_method() -> String {
    "POST".to_string()
}

/// Correlates inbound requests with outbound responses for every session.
#[derive(Clone)]
pub struct SessionRelay {
    registry: SessionRegistry,
    channels: Channels,
    refresh: RefreshPolicy,
    await_timeout: Duration,
}

impl SessionRelay {
    pub fn new(registry: SessionRegistry, channels: Channels, config: &RelayConfig) -> Self {
        Self {
            registry,
            channels,
            refresh: config.refresh_policy,
            await_timeout: config.await_timeout(),
        }
    }

    pub const fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub const fn channels(&self) -> &Channels {
        &self.channels
    }

    /// Default wait used when a caller does not pick its own.
    pub const fn await_timeout(&self) -> Duration {
        self.await_timeout
    }

    /// Create a session under a fresh identifier.
    pub async fn register_session(&self, metadata: Value) -> Result<String> {
        let session_id = Uuid::new_v4().to_string();
        self.registry.create(&session_id, metadata).await?;
        Ok(session_id)
    }

    /// Create (or recreate) a session under a caller-chosen identifier.
    pub async fn register_session_with_id(
        &self,
        session_id: &str,
        metadata: Value,
    ) -> Result<SessionRecord> {
        self.registry.create(session_id, metadata).await
    }

    pub async fn session_exists(&self, session_id: &str) -> Result<bool> {
        self.registry.exists(session_id).await
    }

    pub async fn session(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        self.registry.get(session_id).await
    }

    /// Refresh the session TTL regardless of the refresh policy.
    pub async fn touch(&self, session_id: &str) -> Result<()> {
        if self.registry.touch(session_id).await? {
            Ok(())
        } else {
            Err(RelayError::SessionNotFound(session_id.to_string()))
        }
    }

    /// Verify the session is live, refreshing it if the policy says so.
    async fn admit(&self, session_id: &str) -> Result<()> {
        let live = match self.refresh {
            RefreshPolicy::OnInbound => self.registry.touch(session_id).await?,
            RefreshPolicy::OnHandshake => self.registry.exists(session_id).await?,
        };
        if live {
            Ok(())
        } else {
            debug!(session_id, "Rejected request for unknown session");
            Err(RelayError::SessionNotFound(session_id.to_string()))
        }
    }

    /// Queue a request for the session's handler and return its request ID.
    ///
    /// The caller must already be waiting on the response channel (see
    /// [`Self::prepare_response`]) if it wants to observe a fast reply.
    pub async fn enqueue_inbound(
        &self,
        session_id: &str,
        method: &str,
        url: &str,
        headers: Headers,
        body: Value,
    ) -> Result<String> {
        self.admit(session_id).await?;
        let request_id = Uuid::new_v4().to_string();
        let envelope = InboundEnvelope {
            request_id: request_id.clone(),
            session_id: session_id.to_string(),
            url: url.to_string(),
            method: method.to_string(),
            headers,
            body,
        };
        self.publish_inbound(&envelope).await?;
        Ok(request_id)
    }

    async fn publish_inbound(&self, envelope: &InboundEnvelope) -> Result<()> {
        let receivers = self
            .channels
            .publish(&request_channel(&envelope.session_id), envelope)
            .await?;
        bump!(enqueued);
        if receivers == 0 {
            warn!(
                session_id = %envelope.session_id,
                request_id = %envelope.request_id,
                "No handler attached, request will go unanswered"
            );
        } else {
            debug!(
                session_id = %envelope.session_id,
                request_id = %envelope.request_id,
                receivers,
                "Inbound request published"
            );
        }
        Ok(())
    }

    /// Subscribe to the response channel for `request_id` ahead of time.
    pub async fn prepare_response(
        &self,
        session_id: &str,
        request_id: &str,
    ) -> Result<PendingResponse> {
        let listener = self
            .channels
            .listen::<OutboundEnvelope>(&response_channel(session_id, request_id))
            .await?;
        Ok(PendingResponse::new(session_id, request_id, listener))
    }

    /// Wait for the first response to `request_id`.
    ///
    /// Only responses published after the subscription is established are
    /// seen. The subscription is released on every exit path.
    pub async fn await_outbound(
        &self,
        session_id: &str,
        request_id: &str,
        timeout: Duration,
    ) -> Result<OutboundEnvelope> {
        self.prepare_response(session_id, request_id)
            .await?
            .wait(timeout)
            .await
    }

    /// Publish the handler's answer. Returns `false` if nobody was waiting.
    pub async fn publish_outbound(
        &self,
        session_id: &str,
        request_id: &str,
        status: u16,
        body: impl Into<String>,
    ) -> Result<bool> {
        let envelope = OutboundEnvelope::new(status, body);
        let receivers = self
            .channels
            .publish(&response_channel(session_id, request_id), &envelope)
            .await?;
        if receivers == 0 {
            bump!(dropped);
            debug!(session_id, request_id, "Response dropped, nobody waiting");
            return Ok(false);
        }
        bump!(published);
        debug!(session_id, request_id, status, "Response delivered");
        Ok(true)
    }

    /// Enqueue `request` and wait for its response.
    ///
    /// The response subscription is established before the request is
    /// published, so a handler that answers immediately is never missed.
    pub async fn dispatch(
        &self,
        session_id: &str,
        request: InboundRequest,
        timeout: Duration,
    ) -> Result<OutboundEnvelope> {
        self.admit(session_id).await?;
        let request_id = Uuid::new_v4().to_string();
        let pending = self.prepare_response(session_id, &request_id).await?;
        let envelope = InboundEnvelope {
            request_id,
            session_id: session_id.to_string(),
            url: request.url,
            method: request.method,
            headers: request.headers,
            body: request.body,
        };
        self.publish_inbound(&envelope).await?;
        pending.wait(timeout).await
    }

    /// Attach a handler to the session's request channel.
    pub async fn attach(&self, session_id: &str) -> Result<Listener<InboundEnvelope>> {
        if !self.registry.exists(session_id).await? {
            return Err(RelayError::SessionNotFound(session_id.to_string()));
        }
        let listener = self.channels.listen(&request_channel(session_id)).await?;
        info!(session_id, "Handler attached");
        Ok(listener)
    }

    /// Push a server-initiated message to the session's event channel.
    pub async fn publish_event(
        &self,
        session_id: &str,
        envelope: &OutboundEnvelope,
    ) -> Result<usize> {
        Ok(self
            .channels
            .publish(&event_channel(session_id), envelope)
            .await?)
    }

    /// Listen for server-initiated messages on a live session.
    pub async fn listen_events(&self, session_id: &str) -> Result<Listener<OutboundEnvelope>> {
        if !self.registry.exists(session_id).await? {
            return Err(RelayError::SessionNotFound(session_id.to_string()));
        }
        Ok(self.channels.listen(&event_channel(session_id)).await?)
    }
}
