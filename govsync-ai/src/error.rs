//! Error types for govsync-ai
//!
//! Pipeline-wide failures use [`govsync_common::Error`]. The AI seam has its
//! own error type because the sync engine decides per variant whether a call
//! is retried.

use std::time::Duration;
use thiserror::Error;

/// Failure of one enrichment call
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EnrichmentError {
    /// Provider quota exceeded (HTTP 429)
    #[error("Rate limited by AI provider")]
    RateLimited {
        /// Server-suggested wait, from `Retry-After`
        retry_after: Option<Duration>,
    },

    /// Network failure, timeout or 5xx
    #[error("Transient AI provider failure: {0}")]
    Transient(String),

    /// Response arrived but could not be parsed into the expected shape
    #[error("Invalid AI response: {0}")]
    InvalidResponse(String),

    /// Request refused (non-429 4xx); retrying cannot help
    #[error("AI request rejected: {0}")]
    Rejected(String),
}

impl EnrichmentError {
    /// True when another attempt may succeed
    pub fn is_retryable(&self) -> bool {
        !matches!(self, EnrichmentError::Rejected(_))
    }

    /// Wait requested by the provider, if any
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            EnrichmentError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Short kind label for structured logs
    pub fn kind(&self) -> &'static str {
        match self {
            EnrichmentError::RateLimited { .. } => "rate_limited",
            EnrichmentError::Transient(_) => "transient",
            EnrichmentError::InvalidResponse(_) => "invalid_response",
            EnrichmentError::Rejected(_) => "rejected",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_rejected_is_final() {
        assert!(EnrichmentError::RateLimited { retry_after: None }.is_retryable());
        assert!(EnrichmentError::Transient("timeout".into()).is_retryable());
        assert!(EnrichmentError::InvalidResponse("not json".into()).is_retryable());
        assert!(!EnrichmentError::Rejected("401".into()).is_retryable());
    }

    #[test]
    fn test_retry_after_only_for_rate_limit() {
        let err = EnrichmentError::RateLimited {
            retry_after: Some(Duration::from_secs(3)),
        };
        assert_eq!(err.retry_after(), Some(Duration::from_secs(3)));
        assert_eq!(EnrichmentError::Transient("x".into()).retry_after(), None);
    }
}
