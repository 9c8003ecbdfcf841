//! Metrics hooks for embedding generation.
//!
//! The crate never talks to a metrics backend itself; the server installs an
//! implementation that forwards to Prometheus.

use std::time::Duration;

/// Which path asked for the vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EmbeddingKind {
    Query,
    Item,
    Batch,
}

impl EmbeddingKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EmbeddingKind::Query => "query",
            EmbeddingKind::Item => "item",
            EmbeddingKind::Batch => "batch",
        }
    }

    /// Cache namespace. Batch vectors are item vectors.
    pub fn cache_kind(self) -> &'static str {
        match self {
            EmbeddingKind::Query => "query",
            EmbeddingKind::Item | EmbeddingKind::Batch => "item",
        }
    }

    /// Layer label used for cache hit/miss counters.
    pub fn cache_layer(self) -> &'static str {
        match self {
            EmbeddingKind::Query => "query_embedding",
            EmbeddingKind::Item | EmbeddingKind::Batch => "item_embedding",
        }
    }
}

pub trait EmbeddingMetrics: Send + Sync {
    /// One provider round trip (including retries) finished.
    fn record_generation(&self, kind: EmbeddingKind, latency: Duration, outcome: &'static str);

    fn record_cache(&self, layer: &'static str, hit: bool);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEmbeddingMetrics;

impl EmbeddingMetrics for NoopEmbeddingMetrics {
    fn record_generation(&self, _kind: EmbeddingKind, _latency: Duration, _outcome: &'static str) {}

    fn record_cache(&self, _layer: &'static str, _hit: bool) {}
}

/// Outcome label for a generation result.
pub fn outcome_label(err: Option<&crate::SemanticError>) -> &'static str {
    use crate::SemanticError::*;
    match err {
        None => "ok",
        Some(Timeout(_)) => "timeout",
        Some(Throttled { .. }) => "throttled",
        Some(CircuitOpen(_)) => "circuit_open",
        Some(DimensionMismatch { .. }) => "dimension_mismatch",
        Some(_) => "error",
    }
}
