//! Vector similarity restricted to a candidate set.
//!
//! Ranking reads exactly the candidate ids it is handed, so its cost is
//! O(K) in the candidate width regardless of corpus size. There is no ANN
//! structure and no namespace scan on the query path.

use crate::{CompressionConfig, EmbeddingRecord, IndexBackend, IndexError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A candidate with its similarity to the query, in `[0, 1]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VectorMatch {
    pub id: String,
    pub similarity: f32,
}

/// Namespaced embedding storage.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn upsert(
        &self,
        namespace: &str,
        id: &str,
        record: &EmbeddingRecord,
    ) -> Result<(), IndexError>;

    async fn upsert_batch(
        &self,
        namespace: &str,
        records: &[(String, EmbeddingRecord)],
    ) -> Result<(), IndexError>;

    /// Returns whether a vector was stored for `id`.
    async fn delete(&self, namespace: &str, id: &str) -> Result<bool, IndexError>;

    async fn get(&self, namespace: &str, id: &str) -> Result<Option<EmbeddingRecord>, IndexError>;

    /// Order `candidates` by cosine similarity to `query`.
    ///
    /// Candidates with no vector, a vector of another dimension or a vector
    /// from another model are left out of the result.
    async fn rank_within(
        &self,
        namespace: &str,
        query: &[f32],
        model: &str,
        candidates: &[String],
        limit: usize,
    ) -> Result<Vec<VectorMatch>, IndexError>;

    async fn count(&self, namespace: &str) -> Result<usize, IndexError>;

    async fn drop_namespace(&self, namespace: &str) -> Result<usize, IndexError>;
}

/// Cosine similarity mapped onto `[0, 1]` as `(1 + cos) / 2`.
///
/// A zero vector has no direction and scores the midpoint.
pub fn similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.5;
    }
    let cos = (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0);
    (1.0 + cos) / 2.0
}

/// Vector store on an [`IndexBackend`], one key per vector: `vec/<namespace>/<id>`.
pub struct BackendVectorStore {
    backend: Arc<dyn IndexBackend>,
    compression: CompressionConfig,
    comparisons: AtomicU64,
}

impl BackendVectorStore {
    pub fn new(backend: Arc<dyn IndexBackend>) -> Self {
        Self {
            backend,
            compression: CompressionConfig::default(),
            comparisons: AtomicU64::new(0),
        }
    }

    pub fn with_compression(mut self, compression: CompressionConfig) -> Self {
        self.compression = compression;
        self
    }

    /// Similarity computations performed since creation or the last reset.
    pub fn comparisons(&self) -> u64 {
        self.comparisons.load(Ordering::Relaxed)
    }

    pub fn reset_comparisons(&self) {
        self.comparisons.store(0, Ordering::Relaxed);
    }

    fn prefix(namespace: &str) -> String {
        format!("vec/{namespace}/")
    }

    fn key(namespace: &str, id: &str) -> String {
        format!("vec/{namespace}/{id}")
    }

    fn load(&self, namespace: &str, id: &str) -> Result<Option<EmbeddingRecord>, IndexError> {
        match self.backend.get(&Self::key(namespace, id))? {
            Some(bytes) => Ok(Some(self.compression.decode(&bytes)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl VectorStore for BackendVectorStore {
    async fn upsert(
        &self,
        namespace: &str,
        id: &str,
        record: &EmbeddingRecord,
    ) -> Result<(), IndexError> {
        let bytes = self.compression.encode(record)?;
        self.backend.put(&Self::key(namespace, id), &bytes)
    }

    async fn upsert_batch(
        &self,
        namespace: &str,
        records: &[(String, EmbeddingRecord)],
    ) -> Result<(), IndexError> {
        if records.is_empty() {
            return Ok(());
        }
        let mut entries = Vec::with_capacity(records.len());
        for (id, record) in records {
            entries.push((Self::key(namespace, id), self.compression.encode(record)?));
        }
        self.backend.batch_put(entries)
    }

    async fn delete(&self, namespace: &str, id: &str) -> Result<bool, IndexError> {
        let key = Self::key(namespace, id);
        let existed = self.backend.get(&key)?.is_some();
        if existed {
            self.backend.delete(&key)?;
        }
        Ok(existed)
    }

    async fn get(&self, namespace: &str, id: &str) -> Result<Option<EmbeddingRecord>, IndexError> {
        self.load(namespace, id)
    }

    async fn rank_within(
        &self,
        namespace: &str,
        query: &[f32],
        model: &str,
        candidates: &[String],
        limit: usize,
    ) -> Result<Vec<VectorMatch>, IndexError> {
        let mut ranked = Vec::with_capacity(candidates.len());
        for id in candidates {
            let Some(record) = self.load(namespace, id)? else {
                continue;
            };
            if record.vector.len() != query.len() || record.model != model {
                tracing::trace!(id = %id, namespace, "skipping stale vector");
                continue;
            }
            self.comparisons.fetch_add(1, Ordering::Relaxed);
            ranked.push(VectorMatch {
                id: id.clone(),
                similarity: similarity(query, &record.vector),
            });
        }
        ranked.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| a.id.cmp(&b.id))
        });
        ranked.truncate(limit);
        Ok(ranked)
    }

    async fn count(&self, namespace: &str) -> Result<usize, IndexError> {
        let mut n = 0;
        self.backend.scan_prefix(&Self::prefix(namespace), &mut |_, _| {
            n += 1;
            Ok(())
        })?;
        Ok(n)
    }

    async fn drop_namespace(&self, namespace: &str) -> Result<usize, IndexError> {
        self.backend.delete_prefix(&Self::prefix(namespace))
    }
}
