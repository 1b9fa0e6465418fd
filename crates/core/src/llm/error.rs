use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum CompletionError {
    #[error("network error calling completion endpoint: {0}")]
    Network(String),

    #[error("completion request timed out after {0:?}")]
    Timeout(Duration),

    #[error("completion endpoint returned HTTP {status}")]
    Http { status: u16, body: String },

    #[error("failed to decode completion response: {detail}")]
    Decode { detail: String, body: String },
}

impl CompletionError {
    /// Transient failures worth another attempt: transport errors, timeouts, 429 and 5xx.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout(_) => true,
            Self::Http { status, .. } => *status == 429 || (500..600).contains(status),
            Self::Decode { .. } => false,
        }
    }

    pub fn response_body(&self) -> Option<&str> {
        match self {
            Self::Http { body, .. } | Self::Decode { body, .. } => Some(body),
            _ => None,
        }
    }
}
