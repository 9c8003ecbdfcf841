//! Circuit breaker around the embedding provider.
//!
//! After `failure_threshold` consecutive transient failures the breaker
//! opens and callers fail fast with `CircuitOpen`. Once `reset_timeout`
//! has passed a single probe is let through (half-open); its outcome
//! either closes the breaker or re-opens it for another full timeout.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::serde_millis;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening.
    pub failure_threshold: u32,
    #[serde(rename = "reset_timeout_ms", with = "serde_millis")]
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    /// One probe request is in flight.
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    changed_at: Instant,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
    total_failures: AtomicU64,
    total_successes: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                changed_at: Instant::now(),
            }),
            total_failures: AtomicU64::new(0),
            total_successes: AtomicU64::new(0),
        }
    }

    // A panic while holding the lock leaves the counters in a usable state.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_state(inner: &mut Inner, next: CircuitState) {
        if inner.state != next {
            tracing::warn!(
                event = "circuit.transition",
                from = inner.state.as_str(),
                to = next.as_str(),
                "embedding circuit breaker changed state"
            );
            inner.state = next;
            inner.changed_at = Instant::now();
        }
    }

    /// Whether a request may go to the provider right now.
    pub fn allow_request(&self) -> bool {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open if inner.changed_at.elapsed() >= self.config.reset_timeout => {
                Self::set_state(&mut inner, CircuitState::HalfOpen);
                true
            }
            CircuitState::Open => false,
            // A probe dropped by a caller timeout never reports back.
            CircuitState::HalfOpen if inner.changed_at.elapsed() >= self.config.reset_timeout => {
                inner.changed_at = Instant::now();
                true
            }
            CircuitState::HalfOpen => false,
        }
    }

    pub fn record_success(&self) {
        self.total_successes.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.lock();
        inner.consecutive_failures = 0;
        Self::set_state(&mut inner, CircuitState::Closed);
    }

    pub fn record_failure(&self) {
        self.total_failures.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        match inner.state {
            CircuitState::Closed
                if inner.consecutive_failures >= self.config.failure_threshold.max(1) =>
            {
                Self::set_state(&mut inner, CircuitState::Open);
            }
            CircuitState::HalfOpen => {
                Self::set_state(&mut inner, CircuitState::Open);
            }
            _ => {}
        }
    }

    /// Release a half-open probe whose outcome says nothing about provider
    /// health (for example a permanent 4xx).
    pub fn record_neutral(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen {
            Self::set_state(&mut inner, CircuitState::Closed);
        }
    }

    pub fn current_state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn total_failures(&self) -> u64 {
        self.total_failures.load(Ordering::Relaxed)
    }

    pub fn total_successes(&self) -> u64 {
        self.total_successes.load(Ordering::Relaxed)
    }
}
