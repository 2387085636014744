//! # Embedding Service Error Types
//!
//! Failures reported by an embedding service, classified the way the ingestion
//! pipeline needs them: throttles lower the request rate and are retried,
//! transient failures are retried, everything else stops the run.

use std::time::Duration;

use thiserror::Error;

/// Error returned by an [`EmbeddingService`](super::EmbeddingService)
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    /// The service asked us to slow down
    #[error("Throttled by embedding service: {message}")]
    Throttled {
        /// Server-provided wait before retrying
        retry_after: Option<Duration>,
        /// Error body or description
        message: String,
    },

    /// Network blip or server-side failure
    #[error("Transient embedding service failure: {0}")]
    Transient(String),

    /// The request did not complete in time
    #[error("Embedding request timed out after {0:?}")]
    Timeout(Duration),

    /// Credentials were rejected
    #[error("Embedding service rejected credentials: {0}")]
    Auth(String),

    /// The service refused the input itself
    #[error("Embedding service rejected input: {0}")]
    InvalidInput(String),

    /// The response could not be used (bad JSON, wrong count, wrong dimension)
    #[error("Malformed embedding response: {0}")]
    MalformedResponse(String),
}

impl ServiceError {
    /// Whether the same request may succeed if sent again
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Throttled { .. } | Self::Transient(_) | Self::Timeout(_)
        )
    }

    /// Whether the failure is a rate-limit signal
    pub fn is_throttle(&self) -> bool {
        matches!(self, Self::Throttled { .. })
    }

    /// Server-provided retry hint, if any
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Throttled { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Classify a free-form provider error message.
    ///
    /// Used for providers that only surface errors as text.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        let mentions = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

        if mentions(&["429", "too many requests", "rate limit", "resource_exhausted", "quota"]) {
            Self::Throttled {
                retry_after: None,
                message,
            }
        } else if mentions(&["401", "403", "unauthorized", "permission denied", "api key"]) {
            Self::Auth(message)
        } else if mentions(&["jsonerror", "responseerror", "deserializ"]) {
            Self::MalformedResponse(message)
        } else if mentions(&["400", "invalid_argument", "invalid argument", "bad request"]) {
            Self::InvalidInput(message)
        } else {
            Self::Transient(message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        let throttled = ServiceError::Throttled {
            retry_after: Some(Duration::from_secs(2)),
            message: "slow down".to_string(),
        };
        assert!(throttled.is_retryable());
        assert!(throttled.is_throttle());
        assert_eq!(throttled.retry_after(), Some(Duration::from_secs(2)));

        assert!(ServiceError::Transient("502".to_string()).is_retryable());
        assert!(ServiceError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(!ServiceError::Auth("bad key".to_string()).is_retryable());
        assert!(!ServiceError::MalformedResponse("count".to_string()).is_retryable());
        assert!(!ServiceError::InvalidInput("too long".to_string()).is_retryable());
    }

    #[test]
    fn test_from_message() {
        assert!(ServiceError::from_message("ProviderError: 429 Too Many Requests").is_throttle());
        assert!(
            ServiceError::from_message("ProviderError: RESOURCE_EXHAUSTED quota exceeded")
                .is_throttle()
        );
        assert!(matches!(
            ServiceError::from_message("ProviderError: API key not valid"),
            ServiceError::Auth(_)
        ));
        assert!(matches!(
            ServiceError::from_message("JsonError: expected value at line 1"),
            ServiceError::MalformedResponse(_)
        ));
        assert!(matches!(
            ServiceError::from_message("HttpError: connection reset by peer"),
            ServiceError::Transient(_)
        ));
    }
}
