//! TTL cache seam and the clock it reads time from.
//!
//! Cache layers are injected as `Arc<dyn CacheStore>`. Operations are single
//! atomic get/set/delete calls; concurrent writers to one key race and the
//! last write wins, which every caller tolerates.

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by a cache implementation.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),
    #[error("cache value codec error: {0}")]
    Codec(String),
}

/// Source of "now" for TTL accounting and lifecycle timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Hand-driven clock for expiry tests.
///
/// ```
/// use index::{Clock, ManualClock};
/// use std::time::Duration;
///
/// let clock = ManualClock::default();
/// let start = clock.now();
/// clock.advance(Duration::from_secs(90));
/// assert_eq!((clock.now() - start).num_seconds(), 90);
/// ```
#[derive(Debug)]
pub struct ManualClock {
    now: RwLock<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: RwLock::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let by = to_delta(by);
        let mut guard = self.now.write().unwrap_or_else(|p| p.into_inner());
        *guard += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.write().unwrap_or_else(|p| p.into_inner()) = to;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read().unwrap_or_else(|p| p.into_inner())
    }
}

pub(crate) fn to_delta(d: Duration) -> TimeDelta {
    TimeDelta::from_std(d).unwrap_or(TimeDelta::MAX)
}

/// Get/set/delete-with-TTL key-value cache.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError>;
    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Drop expired entries now and return how many went. Stores that expire
    /// entries on their own keep the default.
    async fn purge_expired(&self) -> Result<usize, CacheError> {
        Ok(0)
    }
}

/// Read a JSON-encoded value. A value that no longer decodes counts as a miss.
pub async fn get_json<T: DeserializeOwned>(
    cache: &dyn CacheStore,
    key: &str,
) -> Result<Option<T>, CacheError> {
    match cache.get(key).await? {
        Some(bytes) => Ok(serde_json::from_slice(&bytes).ok()),
        None => Ok(None),
    }
}

/// Write a JSON-encoded value with a TTL.
pub async fn set_json<T: Serialize + Sync>(
    cache: &dyn CacheStore,
    key: &str,
    value: &T,
    ttl: Duration,
) -> Result<(), CacheError> {
    let bytes = serde_json::to_vec(value).map_err(|e| CacheError::Codec(e.to_string()))?;
    cache.set(key, bytes, ttl).await
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Vec<u8>,
    expires_at: DateTime<Utc>,
}

/// Process-local cache on a `DashMap`. Expired entries are dropped lazily on
/// read, or in bulk by [`MemoryCache::drop_expired`], which a long-running
/// process must call periodically.
pub struct MemoryCache {
    entries: DashMap<String, CacheEntry>,
    clock: Arc<dyn Clock>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    /// Entries currently held, expired or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn drop_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        before.saturating_sub(self.entries.len())
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let now = self.clock.now();
        let hit = match self.entries.get(key) {
            Some(entry) if entry.expires_at > now => return Ok(Some(entry.value.clone())),
            Some(_) => true,
            None => false,
        };
        if hit {
            self.entries.remove_if(key, |_, entry| entry.expires_at <= now);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        let expires_at = self
            .clock
            .now()
            .checked_add_signed(to_delta(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.entries
            .insert(key.to_string(), CacheEntry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn purge_expired(&self) -> Result<usize, CacheError> {
        Ok(self.drop_expired())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache_with_clock() -> (MemoryCache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        (MemoryCache::with_clock(clock.clone()), clock)
    }

    #[tokio::test]
    async fn entry_expires_after_ttl() {
        let (cache, clock) = cache_with_clock();
        cache
            .set("k", b"v".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();

        clock.advance(Duration::from_secs(59));
        assert_eq!(cache.get("k").await.unwrap(), Some(b"v".to_vec()));

        clock.advance(Duration::from_secs(1));
        assert_eq!(cache.get("k").await.unwrap(), None);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn delete_evicts_immediately() {
        let (cache, _clock) = cache_with_clock();
        cache
            .set("k", b"v".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();
        cache.delete("k").await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn purge_counts_only_expired() {
        let (cache, clock) = cache_with_clock();
        cache
            .set("short", vec![1], Duration::from_secs(10))
            .await
            .unwrap();
        cache
            .set("long", vec![2], Duration::from_secs(1000))
            .await
            .unwrap();
        clock.advance(Duration::from_secs(11));
        assert_eq!(cache.drop_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(CacheStore::purge_expired(&cache).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn json_helpers_skip_undecodable_values() {
        let (cache, _clock) = cache_with_clock();
        set_json(&cache, "n", &42u32, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(get_json::<u32>(&cache, "n").await.unwrap(), Some(42));

        cache
            .set("bad", b"{".to_vec(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(get_json::<u32>(&cache, "bad").await.unwrap(), None);
    }
}
