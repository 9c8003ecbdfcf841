use canonical::CanonicalError;
use index::CacheError;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by embedding generation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SemanticError {
    /// Configuration is inconsistent (zero dimension, empty model name, ...).
    #[error("invalid semantic config: {0}")]
    InvalidConfig(String),
    /// The text canonicalized to nothing.
    #[error("nothing to embed: input is empty after canonicalization")]
    EmptyInput,
    /// The operation did not finish inside its path's budget.
    #[error("embedding timed out after {0:?}")]
    Timeout(Duration),
    /// The provider asked us to slow down (HTTP 429).
    #[error("provider throttled the request (retry after {retry_after:?})")]
    Throttled { retry_after: Option<Duration> },
    /// Transient provider or network failure (5xx, connection reset, ...).
    #[error("upstream provider error: {0}")]
    Upstream(String),
    /// Non-retryable HTTP failure, typically a 4xx other than 429.
    #[error("http error {status}: {message}")]
    Http { status: u16, message: String },
    /// Provider returned vectors of the wrong width.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    /// The circuit breaker is failing fast.
    #[error("circuit breaker open for provider {0}")]
    CircuitOpen(String),
    #[error("cache error: {0}")]
    Cache(String),
    /// The provider answered with something that is not an embedding list.
    #[error("malformed provider response: {0}")]
    InvalidResponse(String),
}

impl SemanticError {
    /// Transient errors worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SemanticError::Upstream(_) | SemanticError::Throttled { .. } | SemanticError::Timeout(_)
        )
    }

    /// Errors that count against the circuit breaker.
    pub(crate) fn trips_breaker(&self) -> bool {
        matches!(self, SemanticError::Upstream(_) | SemanticError::Timeout(_))
    }

    /// Provider-supplied minimum delay before the next attempt.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            SemanticError::Throttled { retry_after } => *retry_after,
            _ => None,
        }
    }
}

impl From<CanonicalError> for SemanticError {
    fn from(err: CanonicalError) -> Self {
        match err {
            CanonicalError::EmptyInput => SemanticError::EmptyInput,
            CanonicalError::InvalidConfig(msg) => SemanticError::InvalidConfig(msg),
        }
    }
}

impl From<CacheError> for SemanticError {
    fn from(err: CacheError) -> Self {
        SemanticError::Cache(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_are_retryable() {
        assert!(SemanticError::Upstream("502".into()).is_retryable());
        assert!(SemanticError::Throttled { retry_after: None }.is_retryable());
        assert!(SemanticError::Timeout(Duration::from_millis(60)).is_retryable());

        assert!(!SemanticError::EmptyInput.is_retryable());
        assert!(!SemanticError::Http {
            status: 401,
            message: "bad key".into()
        }
        .is_retryable());
        assert!(!SemanticError::DimensionMismatch {
            expected: 384,
            actual: 768
        }
        .is_retryable());
        assert!(!SemanticError::CircuitOpen("http".into()).is_retryable());
    }

    #[test]
    fn throttling_does_not_trip_breaker() {
        assert!(!SemanticError::Throttled { retry_after: None }.trips_breaker());
        assert!(SemanticError::Upstream("reset".into()).trips_breaker());
    }

    #[test]
    fn retry_after_only_from_throttle() {
        let hint = Duration::from_secs(2);
        assert_eq!(
            SemanticError::Throttled {
                retry_after: Some(hint)
            }
            .retry_after(),
            Some(hint)
        );
        assert_eq!(SemanticError::Upstream("x".into()).retry_after(), None);
    }

    #[test]
    fn canonical_errors_convert() {
        let err: SemanticError = CanonicalError::EmptyInput.into();
        assert_eq!(err, SemanticError::EmptyInput);
        let err: SemanticError = CanonicalError::InvalidConfig("version".into()).into();
        assert!(err.to_string().contains("invalid semantic config"));
    }

    #[test]
    fn messages_carry_context() {
        let err = SemanticError::DimensionMismatch {
            expected: 384,
            actual: 12,
        };
        assert!(err.to_string().contains("384"));
        assert!(err.to_string().contains("12"));
    }
}
