use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::resilience::{CircuitBreakerConfig, RateLimitConfig, RetryConfig};
use crate::serde_millis;
use crate::SemanticError;

/// Runtime configuration for the embedding generator.
///
/// # Example
/// ```
/// use semantic::EmbeddingConfig;
/// use std::time::Duration;
///
/// let cfg = EmbeddingConfig::new("text-embedding-3-small", 1536)
///     .with_query_timeout(Duration::from_millis(40));
/// assert!(cfg.validate().is_ok());
/// assert_eq!(cfg.item_timeout, Duration::from_secs(10));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Model tag stored with every vector; must match the provider's.
    pub model: String,
    /// Expected vector width.
    pub dimension: usize,
    /// Budget for one query embedding including retries. Kept below the
    /// 100ms end-to-end query budget.
    #[serde(rename = "query_timeout_ms", with = "serde_millis")]
    pub query_timeout: Duration,
    #[serde(rename = "item_timeout_ms", with = "serde_millis")]
    pub item_timeout: Duration,
    #[serde(rename = "batch_timeout_ms", with = "serde_millis")]
    pub batch_timeout: Duration,
    #[serde(rename = "query_cache_ttl_ms", with = "serde_millis")]
    pub query_cache_ttl: Duration,
    #[serde(rename = "item_cache_ttl_ms", with = "serde_millis")]
    pub item_cache_ttl: Duration,
    pub retry: RetryConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    /// Pace provider calls. `None` disables the limiter.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitConfig>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "stub-embedding-v1".into(),
            dimension: 384,
            query_timeout: Duration::from_millis(60),
            item_timeout: Duration::from_secs(10),
            batch_timeout: Duration::from_secs(30),
            query_cache_ttl: Duration::from_secs(60 * 60),
            item_cache_ttl: Duration::from_secs(24 * 60 * 60),
            retry: RetryConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            rate_limit: None,
        }
    }
}

impl EmbeddingConfig {
    pub fn new(model: impl Into<String>, dimension: usize) -> Self {
        Self {
            model: model.into(),
            dimension,
            ..Self::default()
        }
    }

    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    pub fn with_item_timeout(mut self, timeout: Duration) -> Self {
        self.item_timeout = timeout;
        self
    }

    pub fn with_batch_timeout(mut self, timeout: Duration) -> Self {
        self.batch_timeout = timeout;
        self
    }

    pub fn with_cache_ttls(mut self, query: Duration, item: Duration) -> Self {
        self.query_cache_ttl = query;
        self.item_cache_ttl = item;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_circuit_breaker(mut self, breaker: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = breaker;
        self
    }

    pub fn with_rate_limit(mut self, limit: RateLimitConfig) -> Self {
        self.rate_limit = Some(limit);
        self
    }

    pub fn validate(&self) -> Result<(), SemanticError> {
        if self.model.trim().is_empty() {
            return Err(SemanticError::InvalidConfig("model must be set".into()));
        }
        if self.dimension == 0 {
            return Err(SemanticError::InvalidConfig(
                "dimension must be greater than zero".into(),
            ));
        }
        for (name, value) in [
            ("query_timeout", self.query_timeout),
            ("item_timeout", self.item_timeout),
            ("batch_timeout", self.batch_timeout),
        ] {
            if value.is_zero() {
                return Err(SemanticError::InvalidConfig(format!(
                    "{name} must be greater than zero"
                )));
            }
        }
        if self.retry.max_attempts == 0 {
            return Err(SemanticError::InvalidConfig(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        if let Some(limit) = &self.rate_limit {
            if limit.requests_per_second <= 0.0 || limit.burst_size == 0 {
                return Err(SemanticError::InvalidConfig(
                    "rate_limit needs a positive rate and burst".into(),
                ));
            }
        }
        Ok(())
    }
}
