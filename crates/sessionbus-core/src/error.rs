//! Error types for `sessionbus` core library.

use thiserror::Error;

/// Result type alias using `sessionbus` Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for `sessionbus` operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A payload or envelope could not be decoded into the expected shape
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
