//! A response subscription owned by exactly one waiting call.

use std::time::Duration;

use sessionbus_core::OutboundEnvelope;
use tokio::time::timeout;
use tracing::warn;

use super::bump;
use crate::channel::Listener;
use crate::error::{RelayError, Result};

/// Subscribed to `responses:<sid>:<rid>` and waiting for the first answer.
///
/// Consumed by [`PendingResponse::wait`]; dropping it without waiting
/// releases the subscription as well.
pub struct PendingResponse {
    session_id: String,
    request_id: String,
    listener: Listener<OutboundEnvelope>,
}

impl PendingResponse {
    pub(super) fn new(
        session_id: &str,
        request_id: &str,
        listener: Listener<OutboundEnvelope>,
    ) -> Self {
        Self {
            session_id: session_id.to_string(),
            request_id: request_id.to_string(),
            listener,
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// First well-formed response, or [`RelayError::Timeout`].
    ///
    /// Malformed payloads on the channel are skipped while the deadline runs.
    pub async fn wait(mut self, limit: Duration) -> Result<OutboundEnvelope> {
        match timeout(limit, self.listener.next()).await {
            Ok(Some(envelope)) => Ok(envelope),
            Ok(None) => Err(RelayError::BrokerUnavailable(format!(
                "response channel for {} closed",
                self.request_id
            ))),
            Err(_) => {
                bump!(timeouts);
                warn!(
                    session_id = %self.session_id,
                    request_id = %self.request_id,
                    timeout_ms = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                    "Timed out waiting for response"
                );
                Err(RelayError::Timeout {
                    session_id: self.session_id,
                    request_id: self.request_id,
                })
            }
        }
    }

    /// Messages skipped so far because they failed to decode.
    pub fn dropped(&self) -> u64 {
        self.listener.dropped()
    }
}
