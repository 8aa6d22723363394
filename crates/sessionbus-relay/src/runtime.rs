//! Protocol runtimes answer inbound requests for one session.
//!
//! The relay never interprets protocol bodies. A [`ProtocolRuntime`] does:
//! it receives each inbound message as a [`Payload`] and returns the reply,
//! or `None` for messages that take no reply (notifications).

use async_trait::async_trait;
use sessionbus_core::{Headers, InboundEnvelope, OutboundEnvelope, Payload};

use crate::error::RelayError;
use crate::relay::SessionRelay;

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// The message was understood but cannot be served.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Runtime failure: {0}")]
    Internal(String),
}

impl RuntimeError {
    /// Status carried by the outbound envelope that reports this error.
    pub const fn status(&self) -> u16 {
        match self {
            Self::InvalidRequest(_) => 400,
            Self::Internal(_) => 500,
        }
    }
}

/// Server-initiated messages for the session, delivered via its event channel.
#[derive(Clone)]
pub struct Outbox {
    relay: SessionRelay,
    session_id: String,
}

impl Outbox {
    pub(crate) fn new(relay: SessionRelay, session_id: &str) -> Self {
        Self {
            relay,
            session_id: session_id.to_string(),
        }
    }

    /// Publish `message` to whoever is polling the session right now.
    pub async fn send(&self, message: &Payload) -> Result<usize, RelayError> {
        self.relay
            .publish_event(&self.session_id, &OutboundEnvelope::ok(message.as_str()))
            .await
    }
}

/// Per-request context handed to a runtime.
pub struct RuntimeContext {
    pub session_id: String,
    pub request_id: String,
    pub method: String,
    pub url: String,
    pub headers: Headers,
    pub outbox: Outbox,
}

impl RuntimeContext {
    pub(crate) fn new(relay: &SessionRelay, envelope: &InboundEnvelope) -> Self {
        Self {
            session_id: envelope.session_id.clone(),
            request_id: envelope.request_id.clone(),
            method: envelope.method.clone(),
            url: envelope.url.clone(),
            headers: envelope.headers.clone(),
            outbox: Outbox::new(relay.clone(), &envelope.session_id),
        }
    }
}

#[async_trait]
pub trait ProtocolRuntime: Send + Sync {
    /// Handle one inbound message. `Ok(None)` means no reply is due.
    async fn handle(
        &self,
        ctx: &RuntimeContext,
        message: Payload,
    ) -> Result<Option<Payload>, RuntimeError>;
}
