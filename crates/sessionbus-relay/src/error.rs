//! Relay error taxonomy.

use crate::broker::BrokerError;
use crate::channel::ChannelError;
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// No live record exists for the session (never created, or expired).
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Timed out waiting for response {request_id} on session {session_id}")]
    Timeout {
        session_id: String,
        request_id: String,
    },

    /// The shared store or broker could not be reached.
    #[error("Backend unavailable: {0}")]
    BrokerUnavailable(String),

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),
}

impl From<StoreError> for RelayError {
    fn from(e: StoreError) -> Self {
        Self::BrokerUnavailable(e.to_string())
    }
}

impl From<BrokerError> for RelayError {
    fn from(e: BrokerError) -> Self {
        Self::BrokerUnavailable(e.to_string())
    }
}

impl From<ChannelError> for RelayError {
    fn from(e: ChannelError) -> Self {
        match e {
            ChannelError::Broker(e) => e.into(),
            ChannelError::Encode(e) => Self::MalformedPayload(e.to_string()),
        }
    }
}

impl From<sessionbus_core::Error> for RelayError {
    fn from(e: sessionbus_core::Error) -> Self {
        Self::MalformedPayload(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
