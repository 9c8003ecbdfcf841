//! Prometheus bridge for the search, embedding and job metrics hooks.
//!
//! The library crates only see the hook traits. This module forwards every
//! call to the `metrics` facade; `/metrics` renders whatever recorder is
//! installed.

use std::time::Duration;

use hybrid_search::{JobMetrics, SearchMetrics, SearchMode, Stage};
use matcher::DegradedReason;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use semantic::{EmbeddingKind, EmbeddingMetrics};

/// Install the global Prometheus recorder and return a render handle.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PrometheusMetrics;

fn cache_result(hit: bool) -> &'static str {
    if hit {
        "hit"
    } else {
        "miss"
    }
}

impl PrometheusMetrics {
    fn cache(&self, layer: &'static str, hit: bool) {
        counter!("search_cache_requests_total", "layer" => layer, "result" => cache_result(hit))
            .increment(1);
    }

    /// Age of the version the alias points at.
    pub fn record_active_age(&self, index: &str, age_secs: i64) {
        gauge!("search_active_index_age_seconds", "index" => index.to_string())
            .set(age_secs.max(0) as f64);
    }
}

impl SearchMetrics for PrometheusMetrics {
    fn record_stage(&self, stage: Stage, latency: Duration) {
        histogram!("search_stage_duration_ms", "stage" => stage.as_str())
            .record(latency.as_secs_f64() * 1000.0);
    }

    fn record_query(&self, mode: SearchMode, status: &'static str, latency: Duration, results: usize) {
        counter!("search_queries_total", "mode" => mode.as_str(), "status" => status).increment(1);
        histogram!("search_query_duration_ms").record(latency.as_secs_f64() * 1000.0);
        if status == "ok" {
            histogram!("search_results_count").record(results as f64);
            if results == 0 {
                counter!("search_zero_results_total").increment(1);
            }
        }
    }

    fn record_fallback(&self, reason: DegradedReason) {
        counter!("search_fallback_total", "reason" => reason.as_str()).increment(1);
    }

    fn record_cache(&self, layer: &'static str, hit: bool) {
        self.cache(layer, hit);
    }
}

impl EmbeddingMetrics for PrometheusMetrics {
    fn record_generation(&self, kind: EmbeddingKind, latency: Duration, outcome: &'static str) {
        counter!("embedding_generation_total", "kind" => kind.as_str()).increment(1);
        if outcome != "ok" {
            counter!("embedding_generation_errors_total", "kind" => kind.as_str(), "outcome" => outcome)
                .increment(1);
        }
        histogram!("embedding_generation_duration_ms", "kind" => kind.as_str())
            .record(latency.as_secs_f64() * 1000.0);
    }

    fn record_cache(&self, layer: &'static str, hit: bool) {
        self.cache(layer, hit);
    }
}

impl JobMetrics for PrometheusMetrics {
    fn record_job(&self, status: &'static str, duration: Duration) {
        counter!("indexing_jobs_total", "status" => status).increment(1);
        histogram!("indexing_job_duration_seconds").record(duration.as_secs_f64());
    }
}
