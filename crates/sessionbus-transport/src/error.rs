//! Transport error types.

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Transport not started")]
    NotStarted,

    #[error("Request timed out")]
    Timeout,

    #[error("HTTP request failed: {0}")]
    Http(#[source] reqwest::Error),

    #[error("Relay returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed message: {0}")]
    Malformed(String),

    #[error("Invalid relay URL: {0}")]
    InvalidUrl(String),
}

impl TransportError {
    /// The relay no longer knows the session; a new handshake is needed.
    pub const fn is_session_not_found(&self) -> bool {
        matches!(self, Self::Status { status: 404, .. })
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else {
            Self::Http(e)
        }
    }
}
