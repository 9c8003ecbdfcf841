use crate::config::ServerConfig;
use crate::jobs::RebuildJobs;
use crate::metrics::PrometheusMetrics;
use hybrid_search::{AppConfig, SearchStack, StackError};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Shared application state
#[derive(Clone)]
pub struct ServerState {
    /// Server configuration
    pub config: Arc<ServerConfig>,

    /// Search, indexing, lifecycle and backfill components
    pub stack: SearchStack,

    /// Render handle for `/metrics`; `None` when metrics are disabled
    pub prometheus: Option<PrometheusHandle>,

    /// Set while an admin-triggered backfill runs
    pub backfill_running: Arc<AtomicBool>,

    /// Rebuilds started through the admin API
    pub rebuilds: Arc<RebuildJobs>,

    pub started_at: Instant,
}

impl ServerState {
    /// Build the stack from a pipeline configuration, wiring Prometheus hooks
    /// when a handle is given.
    pub fn new(
        config: ServerConfig,
        pipeline: AppConfig,
        prometheus: Option<PrometheusHandle>,
    ) -> Result<Self, StackError> {
        let mut builder = SearchStack::builder(pipeline);
        if prometheus.is_some() {
            builder = builder
                .search_metrics(Arc::new(PrometheusMetrics))
                .embedding_metrics(Arc::new(PrometheusMetrics));
        }
        Ok(Self::with_stack(config, builder.build()?, prometheus))
    }

    /// Wrap an already built stack.
    pub fn with_stack(
        config: ServerConfig,
        stack: SearchStack,
        prometheus: Option<PrometheusHandle>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            stack,
            prometheus,
            backfill_running: Arc::new(AtomicBool::new(false)),
            rebuilds: Arc::new(RebuildJobs::new()),
            started_at: Instant::now(),
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Claim the admin backfill slot. Returns false if a run is in flight.
    pub fn try_start_backfill(&self) -> bool {
        self.backfill_running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn finish_backfill(&self) {
        self.backfill_running.store(false, Ordering::Release);
    }

    pub fn backfill_in_flight(&self) -> bool {
        self.backfill_running.load(Ordering::Acquire)
    }
}
