//! Error types for push transports.

use thiserror::Error;

/// Errors that can occur when handing a notification to a push transport.
#[derive(Debug, Error)]
pub enum PushError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Transport is not configured
    #[error("Transport not configured: {0}")]
    NotConfigured(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The gateway answered with a non-success status
    #[error("Push gateway returned {status}: {body}")]
    Rejected { status: u16, body: String },

    /// Rate limited by the gateway
    #[error("Rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl PushError {
    /// Whether a later attempt could plausibly succeed.
    ///
    /// Configuration problems and 4xx rejections (other than 429) will not
    /// change between attempts.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(_) | Self::RateLimited { .. } | Self::Other(_) => true,
            Self::Rejected { status, .. } => *status >= 500,
            Self::NotConfigured(_) | Self::Serialization(_) => false,
        }
    }
}
