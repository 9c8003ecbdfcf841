//! Exponential backoff for transient provider failures.
//!
//! Only errors that report themselves as retryable are attempted again;
//! everything else returns after the first try. A provider's `Retry-After`
//! hint raises the next delay but never past `max_delay`.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::{Duration, Instant};

use crate::serde_millis;

/// Errors that know whether another attempt could succeed.
pub trait Retryable {
    fn is_retryable(&self) -> bool;

    /// Minimum wait the remote side asked for.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

impl Retryable for crate::SemanticError {
    fn is_retryable(&self) -> bool {
        crate::SemanticError::is_retryable(self)
    }

    fn retry_after(&self) -> Option<Duration> {
        crate::SemanticError::retry_after(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    #[serde(rename = "base_delay_ms", with = "serde_millis")]
    pub base_delay: Duration,
    #[serde(rename = "max_delay_ms", with = "serde_millis")]
    pub max_delay: Duration,
    /// Add 0-50% random jitter to each delay.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn with_max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = max;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before attempt `attempt + 1` (zero-based).
    pub fn delay_for(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        let base = self.base_delay.as_millis() as u64;
        let cap = self.max_delay.as_millis() as u64;
        let exponential = base.saturating_mul(2_u64.saturating_pow(attempt)).min(cap);
        let delay = if self.jitter {
            exponential + fastrand::u64(0..=exponential / 2)
        } else {
            exponential
        };
        let floor = hint.map(|h| h.as_millis() as u64).unwrap_or(0);
        Duration::from_millis(delay.max(floor).min(cap.max(1)))
    }
}

/// Outcome of a retried operation.
#[derive(Debug, Clone)]
pub struct RetryResult<T, E> {
    pub result: Result<T, E>,
    /// Attempts made (1 = no retries needed).
    pub attempts: u32,
    pub total_duration: Duration,
}

impl<T, E> RetryResult<T, E> {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }

    pub fn into_result(self) -> Result<T, E> {
        self.result
    }
}

/// Run `operation` until it succeeds, fails permanently, or attempts run out.
///
/// ```
/// use semantic::resilience::{execute_with_retry, RetryConfig};
/// use semantic::SemanticError;
/// use std::time::Duration;
///
/// # let rt = tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap();
/// # rt.block_on(async {
/// let config = RetryConfig::default().with_base_delay(Duration::from_millis(1));
/// let outcome = execute_with_retry(&config, |attempt| async move {
///     if attempt == 0 {
///         Err(SemanticError::Upstream("502".into()))
///     } else {
///         Ok("vector")
///     }
/// })
/// .await;
/// assert_eq!(outcome.attempts, 2);
/// # });
/// ```
pub async fn execute_with_retry<T, E, F, Fut>(config: &RetryConfig, mut operation: F) -> RetryResult<T, E>
where
    E: Retryable,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let start = Instant::now();
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        match operation(attempt).await {
            Ok(value) => {
                return RetryResult {
                    result: Ok(value),
                    attempts: attempt + 1,
                    total_duration: start.elapsed(),
                }
            }
            Err(error) => {
                let last = attempt + 1 >= max_attempts;
                if last || !error.is_retryable() {
                    return RetryResult {
                        result: Err(error),
                        attempts: attempt + 1,
                        total_duration: start.elapsed(),
                    };
                }
                let delay = config.delay_for(attempt, error.retry_after());
                tracing::debug!(attempt, ?delay, "retrying transient provider failure");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SemanticError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryConfig {
        RetryConfig::default()
            .with_base_delay(Duration::from_millis(1))
            .with_max_delay(Duration::from_millis(5))
            .with_jitter(false)
    }

    #[tokio::test]
    async fn retries_until_success() {
        let calls = AtomicU32::new(0);
        let outcome = execute_with_retry(&fast(), |_| async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(SemanticError::Upstream("503".into()))
            } else {
                Ok(7)
            }
        })
        .await;
        assert!(outcome.succeeded());
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.into_result().unwrap(), 7);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let outcome: RetryResult<(), _> = execute_with_retry(&fast().with_max_attempts(2), |_| async {
            Err(SemanticError::Upstream("reset".into()))
        })
        .await;
        assert!(!outcome.succeeded());
        assert_eq!(outcome.attempts, 2);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let outcome: RetryResult<(), _> = execute_with_retry(&fast(), |_| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(SemanticError::Http {
                status: 401,
                message: "unauthorized".into(),
            })
        })
        .await;
        assert_eq!(outcome.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn delay_grows_and_caps() {
        let config = RetryConfig::default()
            .with_base_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(350))
            .with_jitter(false);
        assert_eq!(config.delay_for(0, None), Duration::from_millis(100));
        assert_eq!(config.delay_for(1, None), Duration::from_millis(200));
        assert_eq!(config.delay_for(2, None), Duration::from_millis(350));
        assert_eq!(config.delay_for(40, None), Duration::from_millis(350));
    }

    #[test]
    fn retry_after_hint_raises_delay_within_cap() {
        let config = RetryConfig::default()
            .with_base_delay(Duration::from_millis(10))
            .with_max_delay(Duration::from_millis(500))
            .with_jitter(false);
        assert_eq!(
            config.delay_for(0, Some(Duration::from_millis(200))),
            Duration::from_millis(200)
        );
        assert_eq!(
            config.delay_for(0, Some(Duration::from_secs(30))),
            Duration::from_millis(500)
        );
    }

    #[test]
    fn jitter_stays_within_half() {
        let config = RetryConfig::default()
            .with_base_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_secs(10));
        for _ in 0..50 {
            let d = config.delay_for(0, None);
            assert!(d >= Duration::from_millis(100) && d <= Duration::from_millis(150));
        }
    }

    #[test]
    fn config_reads_millisecond_fields() {
        let config: RetryConfig =
            serde_json::from_str(r#"{"max_attempts":5,"base_delay_ms":20}"#).unwrap();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.base_delay, Duration::from_millis(20));
        assert_eq!(config.max_delay, RetryConfig::default().max_delay);
    }
}
