//! Periodic background jobs: the embedding backfill and the cache sweep.
//!
//! Both run once at start and then every `interval` until stopped. A stop
//! request cancels a backfill run in flight at its next batch boundary.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use index::CacheStore;
use tracing::{debug, error, info, warn};

use crate::backfill::{BackfillError, BackfillOptions, BackfillProcessor, BackfillStats, CancelHandle};

/// Observer for finished backfill jobs. `status` is `success`, `partial`
/// or `failed`.
pub trait JobMetrics: Send + Sync {
    fn record_job(&self, status: &'static str, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopJobMetrics;

impl JobMetrics for NoopJobMetrics {
    fn record_job(&self, _status: &'static str, _duration: Duration) {}
}

pub const SCHEDULED_JOB: &str = "scheduled-embeddings";

pub struct BackfillScheduler {
    processor: Arc<BackfillProcessor>,
    options: BackfillOptions,
    interval: Duration,
    job: String,
    metrics: Arc<dyn JobMetrics>,
}

impl BackfillScheduler {
    pub fn new(processor: Arc<BackfillProcessor>, options: BackfillOptions, interval: Duration) -> Self {
        Self {
            processor,
            options,
            interval,
            job: SCHEDULED_JOB.to_string(),
            metrics: Arc::new(NoopJobMetrics),
        }
    }

    pub fn with_job(mut self, job: impl Into<String>) -> Self {
        self.job = job.into();
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn JobMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Run a single pass and record its outcome.
    pub async fn run_once(&self, cancel: &CancelHandle) -> Result<BackfillStats, BackfillError> {
        let start = Instant::now();
        let result = self.processor.run(&self.job, &self.options, cancel).await;
        let status = match &result {
            Ok(stats) => stats.outcome(),
            Err(_) => "failed",
        };
        self.metrics.record_job(status, start.elapsed());
        match &result {
            Ok(stats) => info!(
                event = "backfill.scheduled",
                job = %self.job,
                status,
                processed = stats.processed,
                failed = stats.failed,
                "scheduled backfill finished"
            ),
            Err(err) => error!(event = "backfill.scheduled", job = %self.job, error = %err, "scheduled backfill failed"),
        }
        result
    }

    /// Start the loop on the current runtime.
    pub fn spawn(self) -> SchedulerHandle {
        let stop = Arc::new(Notify::new());
        let cancel = CancelHandle::new();
        let task_stop = stop.clone();
        let task_cancel = cancel.clone();

        let task = tokio::spawn(async move {
            info!(interval_secs = self.interval.as_secs(), job = %self.job, "backfill scheduler started");
            let mut ticker = interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut runs = 0usize;
            loop {
                tokio::select! {
                    _ = task_stop.notified() => break,
                    _ = ticker.tick() => {
                        // A failed pass is logged and retried on the next tick.
                        let _ = self.run_once(&task_cancel).await;
                        runs += 1;
                        if task_cancel.is_cancelled() {
                            break;
                        }
                    }
                }
            }
            info!(job = %self.job, runs, "backfill scheduler stopped");
            runs
        });

        SchedulerHandle { stop, cancel, task }
    }
}

/// Sweeps expired entries out of a cache that only expires them on read.
pub struct CachePurger {
    cache: Arc<dyn CacheStore>,
    interval: Duration,
}

impl CachePurger {
    pub fn new(cache: Arc<dyn CacheStore>, interval: Duration) -> Self {
        Self { cache, interval }
    }

    pub fn spawn(self) -> SchedulerHandle {
        let stop = Arc::new(Notify::new());
        let task_stop = stop.clone();

        let task = tokio::spawn(async move {
            let mut ticker = interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut runs = 0usize;
            loop {
                tokio::select! {
                    _ = task_stop.notified() => break,
                    _ = ticker.tick() => {
                        match self.cache.purge_expired().await {
                            Ok(purged) => debug!(event = "cache.purged", purged, "expired cache entries dropped"),
                            Err(err) => warn!(event = "cache.unavailable", error = %err, "cache purge failed"),
                        }
                        runs += 1;
                    }
                }
            }
            runs
        });

        SchedulerHandle {
            stop,
            cancel: CancelHandle::new(),
            task,
        }
    }
}

pub struct SchedulerHandle {
    stop: Arc<Notify>,
    cancel: CancelHandle,
    task: JoinHandle<usize>,
}

impl SchedulerHandle {
    /// Stop the loop and wait for it. Returns how many passes ran.
    pub async fn stop(self) -> usize {
        self.cancel.cancel();
        self.stop.notify_one();
        self.task.await.unwrap_or_default()
    }
}
