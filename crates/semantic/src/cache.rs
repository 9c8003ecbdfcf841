//! Embedding cache layers on top of an injected [`CacheStore`].
//!
//! Vectors are stored as raw little-endian `f32` bytes. A value whose length
//! is not a multiple of four is treated as a miss.

use index::CacheStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::metrics::EmbeddingKind;

#[derive(Clone)]
pub struct EmbeddingCache {
    store: Arc<dyn CacheStore>,
    query_ttl: Duration,
    item_ttl: Duration,
}

impl EmbeddingCache {
    pub fn new(store: Arc<dyn CacheStore>, query_ttl: Duration, item_ttl: Duration) -> Self {
        Self {
            store,
            query_ttl,
            item_ttl,
        }
    }

    /// `embedding:<kind>:<sha256(model_version ":" text)>`.
    pub fn key(kind: EmbeddingKind, model_version: &str, canonical_text: &str) -> String {
        canonical::cache_key(kind.cache_kind(), model_version, canonical_text)
    }

    pub fn ttl(&self, kind: EmbeddingKind) -> Duration {
        match kind {
            EmbeddingKind::Query => self.query_ttl,
            EmbeddingKind::Item | EmbeddingKind::Batch => self.item_ttl,
        }
    }

    /// A cache outage reads as a miss.
    pub async fn get(&self, key: &str) -> Option<Vec<f32>> {
        match self.store.get(key).await {
            Ok(Some(bytes)) if bytes.len() % 4 == 0 && !bytes.is_empty() => {
                Some(bytemuck::pod_collect_to_vec::<u8, f32>(&bytes))
            }
            Ok(_) => None,
            Err(err) => {
                warn!(event = "cache.unavailable", key, error = %err, "embedding cache read failed");
                None
            }
        }
    }

    pub async fn put(&self, kind: EmbeddingKind, key: &str, vector: &[f32]) {
        let bytes = bytemuck::cast_slice::<f32, u8>(vector).to_vec();
        if let Err(err) = self.store.set(key, bytes, self.ttl(kind)).await {
            warn!(event = "cache.unavailable", key, error = %err, "embedding cache write failed");
        }
    }
}
