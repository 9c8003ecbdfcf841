//! Metrics hooks for the query path.
//!
//! Install a [`SearchMetrics`] implementation with
//! [`HybridSearcher::with_metrics`](crate::HybridSearcher::with_metrics) to
//! record stage latencies, cache behaviour and fallbacks. The server wires a
//! Prometheus-backed implementation once at startup.

use std::time::Duration;

use crate::types::{DegradedReason, SearchMode};

/// Timed sections of one query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Lexical,
    Embedding,
    Rerank,
    Metadata,
    Total,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Lexical => "lexical",
            Stage::Embedding => "embedding",
            Stage::Rerank => "rerank",
            Stage::Metadata => "metadata",
            Stage::Total => "total",
        }
    }
}

pub trait SearchMetrics: Send + Sync {
    fn record_stage(&self, stage: Stage, latency: Duration);

    /// One finished query; `status` is `ok` or an error label.
    fn record_query(&self, mode: SearchMode, status: &'static str, latency: Duration, results: usize);

    fn record_fallback(&self, reason: DegradedReason);

    fn record_cache(&self, layer: &'static str, hit: bool);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSearchMetrics;

impl SearchMetrics for NoopSearchMetrics {
    fn record_stage(&self, _stage: Stage, _latency: Duration) {}

    fn record_query(&self, _mode: SearchMode, _status: &'static str, _latency: Duration, _results: usize) {}

    fn record_fallback(&self, _reason: DegradedReason) {}

    fn record_cache(&self, _layer: &'static str, _hit: bool) {}
}
