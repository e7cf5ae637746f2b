//! Error types for parley-ai

use thiserror::Error;

/// Result type alias using parley-ai Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while talking to a completion endpoint
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Endpoint answered with a non-success status
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Rate limit exceeded
    #[error("Rate limited: retry after {retry_after:?} seconds")]
    RateLimited { retry_after: Option<u64> },

    /// Invalid API key
    #[error("Invalid or missing API key")]
    InvalidApiKey,

    /// Request was aborted before a stream was opened
    #[error("Request aborted")]
    Aborted,

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Create an API error from status and message
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Error::RateLimited { .. } => true,
            Error::Api { status, message } => {
                let msg = message.to_lowercase();
                matches!(status, 500 | 502 | 503 | 504 | 529)
                    || msg.contains("overloaded")
                    || msg.contains("rate limit")
                    || msg.contains("too many requests")
            }
            _ => false,
        }
    }
}
