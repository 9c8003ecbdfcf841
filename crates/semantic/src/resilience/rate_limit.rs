//! Token bucket limiting calls to the embedding provider.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::serde_millis;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Sustained rate.
    pub requests_per_second: f64,
    /// Requests that may go out back to back.
    pub burst_size: u64,
    /// Longest a caller waits for a token (0 = fail fast).
    #[serde(rename = "max_wait_ms", with = "serde_millis")]
    pub max_wait: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 10.0,
            burst_size: 20,
            max_wait: Duration::from_secs(5),
        }
    }
}

impl RateLimitConfig {
    pub fn with_requests_per_second(mut self, rps: f64) -> Self {
        self.requests_per_second = rps;
        self
    }

    pub fn with_burst_size(mut self, burst: u64) -> Self {
        self.burst_size = burst;
        self
    }

    pub fn with_max_wait(mut self, wait: Duration) -> Self {
        self.max_wait = wait;
        self
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    refilled_at: Instant,
}

#[derive(Debug)]
pub struct TokenBucket {
    config: RateLimitConfig,
    bucket: Mutex<Bucket>,
    total_requests: AtomicU64,
    total_waited: AtomicU64,
    total_rejected: AtomicU64,
}

impl TokenBucket {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            bucket: Mutex::new(Bucket {
                tokens: config.burst_size as f64,
                refilled_at: Instant::now(),
            }),
            total_requests: AtomicU64::new(0),
            total_waited: AtomicU64::new(0),
            total_rejected: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Bucket> {
        self.bucket.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Refill, then take a token if one is there. On a miss returns how long
    /// until the next token arrives.
    fn take(&self) -> Result<(), Duration> {
        let mut bucket = self.lock();
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.refilled_at).as_secs_f64();
        bucket.refilled_at = now;
        bucket.tokens = (bucket.tokens + elapsed * self.config.requests_per_second)
            .min(self.config.burst_size as f64);

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else if self.config.requests_per_second <= 0.0 {
            Err(self.config.max_wait)
        } else {
            let needed = (1.0 - bucket.tokens) / self.config.requests_per_second;
            Err(Duration::from_secs_f64(needed.min(0.1)))
        }
    }

    pub fn try_acquire(&self) -> bool {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if self.take().is_ok() {
            true
        } else {
            self.total_rejected.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Wait up to `max_wait` for a token. `false` when none arrived in time.
    pub async fn acquire(&self) -> bool {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        let start = Instant::now();
        loop {
            match self.take() {
                Ok(()) => {
                    if start.elapsed() > Duration::ZERO {
                        self.total_waited.fetch_add(1, Ordering::Relaxed);
                    }
                    return true;
                }
                Err(wait) => {
                    let remaining = self.config.max_wait.saturating_sub(start.elapsed());
                    if remaining.is_zero() {
                        self.total_rejected.fetch_add(1, Ordering::Relaxed);
                        return false;
                    }
                    tokio::time::sleep(wait.min(remaining)).await;
                }
            }
        }
    }

    pub fn stats(&self) -> RateLimitStats {
        RateLimitStats {
            available_tokens: self.lock().tokens,
            total_requests: self.total_requests.load(Ordering::Relaxed),
            total_waited: self.total_waited.load(Ordering::Relaxed),
            total_rejected: self.total_rejected.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitStats {
    pub available_tokens: f64,
    pub total_requests: u64,
    pub total_waited: u64,
    pub total_rejected: u64,
}

impl RateLimitStats {
    pub fn rejection_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.total_rejected as f64 / self.total_requests as f64
        }
    }
}
