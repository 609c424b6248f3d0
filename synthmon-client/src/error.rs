//! Error types for the synthetic-monitoring client.

use thiserror::Error;

/// Errors that can occur when talking to the synthetic-monitoring API.
#[derive(Debug, Error)]
pub enum ClientError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Server returned an error response.
    #[error("API error (status {status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error message from the server.
        message: String,
    },

    /// Failed to deserialize a response body.
    #[error("Failed to deserialize response: {0}")]
    Deserialize(#[from] serde_json::Error),

    /// Invalid base URL provided.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
