//! Error types for the dispatcher client.

use thiserror::Error;

/// Errors that can occur when talking to the dispatcher.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport-level HTTP error (connection refused, timeout, ...).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// The dispatcher answered with an error status.
    #[error("dispatcher returned {status}: {message}")]
    Api { status: u16, message: String },

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}
