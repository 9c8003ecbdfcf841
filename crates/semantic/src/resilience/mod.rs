//! Retry, circuit breaking and rate limiting for provider calls.

pub mod circuit_breaker;
pub mod rate_limit;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use rate_limit::{RateLimitConfig, RateLimitStats, TokenBucket};
pub use retry::{execute_with_retry, RetryConfig, RetryResult, Retryable};
