//! Embedding backfill.
//!
//! Walks the source of truth in id order, embeds every item that lacks a
//! current-model vector through the batch path, and commits each batch in
//! three steps: embeddings to the item store, vectors to every live
//! namespace, then the cursor. A crash between steps re-processes at most
//! one batch on the next run. An embedding is only stored while the item
//! still has the content it was computed from.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use index::{
    Clock, IndexBackend, IndexCatalog, IndexError, ItemStore, NamespaceSync, SearchableItem,
    VectorStore,
};
use semantic::{EmbeddingGenerator, SemanticError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum BackfillError {
    #[error("invalid backfill options: {0}")]
    InvalidOptions(String),
    /// The provider kept throttling; the cursor still points at the batch
    /// that was refused.
    #[error("provider throttled {retries} times in a row; stopped after {processed} items")]
    Throttled { retries: u32, processed: usize },
    #[error(transparent)]
    Index(#[from] IndexError),
}

/// Options for one backfill run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackfillOptions {
    pub batch_size: usize,
    /// Count what would be processed, write nothing.
    pub dry_run: bool,
    /// Re-embed every item, whatever its model tag.
    pub force: bool,
    pub max_throttle_retries: u32,
    #[serde(rename = "throttle_base_delay_ms", with = "millis")]
    pub throttle_base_delay: Duration,
    #[serde(rename = "throttle_max_delay_ms", with = "millis")]
    pub throttle_max_delay: Duration,
}

impl Default for BackfillOptions {
    fn default() -> Self {
        Self {
            batch_size: 100,
            dry_run: false,
            force: false,
            max_throttle_retries: 5,
            throttle_base_delay: Duration::from_secs(1),
            throttle_max_delay: Duration::from_secs(30),
        }
    }
}

impl BackfillOptions {
    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    pub fn force(mut self) -> Self {
        self.force = true;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_throttle(mut self, retries: u32, base: Duration, max: Duration) -> Self {
        self.max_throttle_retries = retries;
        self.throttle_base_delay = base;
        self.throttle_max_delay = max;
        self
    }

    fn validate(&self) -> Result<(), BackfillError> {
        if self.batch_size == 0 {
            return Err(BackfillError::InvalidOptions(
                "batch_size must be greater than zero".into(),
            ));
        }
        if self.throttle_base_delay > self.throttle_max_delay {
            return Err(BackfillError::InvalidOptions(
                "throttle_base_delay must not exceed throttle_max_delay".into(),
            ));
        }
        Ok(())
    }

    /// Wait before throttle retry `attempt` (1-based), honouring a hint.
    fn throttle_delay(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        let exp = self
            .throttle_base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
        exp.max(hint.unwrap_or_default()).min(self.throttle_max_delay)
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackfillStats {
    /// Items that received a vector.
    pub processed: usize,
    /// Items with nothing to embed.
    pub skipped: usize,
    /// Items marked `embedding_pending` after a failed batch.
    pub failed: usize,
    /// Items updated or deleted between listing and commit. Their new
    /// content is picked up by a later run.
    #[serde(default)]
    pub stale: usize,
    /// Batches committed.
    pub batches: usize,
    /// Items a dry run would process.
    pub pending: usize,
    /// Cursor the run started from, if it resumed.
    pub resumed_from: Option<String>,
    pub completed: bool,
    pub cancelled: bool,
}

impl BackfillStats {
    /// `success`, `partial` or `failed`, for job metrics.
    pub fn outcome(&self) -> &'static str {
        match (self.processed, self.failed) {
            (_, 0) => "success",
            (0, _) => "failed",
            _ => "partial",
        }
    }
}

/// Cooperative cancellation, checked before each batch.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CursorRecord {
    /// Last item id of the last committed batch.
    pub after: String,
    pub updated_at: DateTime<Utc>,
}

/// Persists backfill cursors under `backfill/cursor/<job>`.
#[derive(Clone)]
pub struct CursorStore {
    backend: Arc<dyn IndexBackend>,
}

impl CursorStore {
    pub fn new(backend: Arc<dyn IndexBackend>) -> Self {
        Self { backend }
    }

    fn key(job: &str) -> String {
        format!("backfill/cursor/{job}")
    }

    pub fn load(&self, job: &str) -> Result<Option<CursorRecord>, IndexError> {
        match self.backend.get(&Self::key(job))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn save(&self, job: &str, record: &CursorRecord) -> Result<(), IndexError> {
        let bytes = serde_json::to_vec(record)?;
        self.backend.put(&Self::key(job), &bytes)
    }

    pub fn clear(&self, job: &str) -> Result<(), IndexError> {
        self.backend.delete(&Self::key(job))
    }
}

/// Generates missing embeddings in resumable batches.
pub struct BackfillProcessor {
    index_name: String,
    catalog: IndexCatalog,
    items: Arc<dyn ItemStore>,
    vectors: Arc<dyn VectorStore>,
    embeddings: Arc<EmbeddingGenerator>,
    cursors: CursorStore,
    clock: Arc<dyn Clock>,
}

impl BackfillProcessor {
    pub fn new(
        index_name: impl Into<String>,
        catalog: IndexCatalog,
        items: Arc<dyn ItemStore>,
        vectors: Arc<dyn VectorStore>,
        embeddings: Arc<EmbeddingGenerator>,
        cursors: CursorStore,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            index_name: index_name.into(),
            catalog,
            items,
            vectors,
            embeddings,
            cursors,
            clock,
        }
    }

    pub fn cursors(&self) -> &CursorStore {
        &self.cursors
    }

    /// Run until the source is exhausted, the run is cancelled, or the
    /// provider throttles past `max_throttle_retries`.
    pub async fn run(
        &self,
        job: &str,
        options: &BackfillOptions,
        cancel: &CancelHandle,
    ) -> Result<BackfillStats, BackfillError> {
        options.validate()?;
        let model = self.embeddings.model().to_string();
        let dimension = self.embeddings.dimension();

        if options.dry_run {
            let total = self.items.count().await?;
            let pending = if options.force {
                total
            } else {
                total.saturating_sub(self.items.count_embedded(&model, dimension).await?)
            };
            info!(event = "backfill.dry_run", job, pending, "backfill dry run");
            return Ok(BackfillStats {
                pending,
                ..BackfillStats::default()
            });
        }

        let mut cursor = self.cursors.load(job)?.map(|c| c.after);
        let mut stats = BackfillStats {
            resumed_from: cursor.clone(),
            ..BackfillStats::default()
        };
        info!(event = "backfill.started", job, resumed_from = ?cursor, force = options.force, "backfill started");

        loop {
            if cancel.is_cancelled() {
                stats.cancelled = true;
                info!(event = "backfill.cancelled", job, processed = stats.processed, "backfill cancelled");
                return Ok(stats);
            }

            let batch = if options.force {
                self.items.list_after(cursor.as_deref(), options.batch_size).await?
            } else {
                self.items
                    .list_missing_embeddings(cursor.as_deref(), &model, dimension, options.batch_size)
                    .await?
            };
            let Some(last) = batch.last().map(|item| item.id.clone()) else {
                break;
            };

            self.process_batch(job, &batch, options, &mut stats).await?;
            stats.batches += 1;

            self.cursors.save(
                job,
                &CursorRecord {
                    after: last.clone(),
                    updated_at: self.clock.now(),
                },
            )?;
            cursor = Some(last);
        }

        self.cursors.clear(job)?;
        stats.completed = true;
        info!(
            event = "backfill.completed",
            job,
            processed = stats.processed,
            skipped = stats.skipped,
            stale = stats.stale,
            failed = stats.failed,
            batches = stats.batches,
            "backfill completed"
        );
        Ok(stats)
    }

    async fn process_batch(
        &self,
        job: &str,
        batch: &[SearchableItem],
        options: &BackfillOptions,
        stats: &mut BackfillStats,
    ) -> Result<(), BackfillError> {
        let mut throttled = 0u32;
        let embedded = loop {
            match self.embeddings.embed_batch(batch).await {
                Ok(embedded) => break Some(embedded),
                Err(SemanticError::Throttled { retry_after }) => {
                    throttled += 1;
                    if throttled > options.max_throttle_retries {
                        warn!(event = "backfill.throttled", job, retries = options.max_throttle_retries, "giving up on throttled batch");
                        return Err(BackfillError::Throttled {
                            retries: options.max_throttle_retries,
                            processed: stats.processed,
                        });
                    }
                    let delay = options.throttle_delay(throttled, retry_after);
                    debug!(job, attempt = throttled, delay_ms = delay.as_millis() as u64, "provider throttled, backing off");
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    warn!(event = "backfill.batch_failed", job, items = batch.len(), error = %err, "marking batch pending");
                    break None;
                }
            }
        };

        let Some(embedded) = embedded else {
            let ids: Vec<String> = batch.iter().map(|item| item.id.clone()).collect();
            self.items.mark_pending(&ids).await?;
            stats.failed += ids.len();
            return Ok(());
        };

        // Only embeddings of the text the item still has are kept.
        let snapshot: HashMap<&str, &SearchableItem> =
            batch.iter().map(|item| (item.id.as_str(), item)).collect();
        let mut accepted = Vec::with_capacity(embedded.records.len());
        for (id, record) in &embedded.records {
            let Some(item) = snapshot.get(id.as_str()) else {
                continue;
            };
            if self
                .items
                .save_embedding(id, &item.content_hash, record.clone())
                .await?
            {
                accepted.push((*item).clone().with_embedding(record.clone()));
            } else {
                debug!(job, id = %id, "item changed or was removed while embedding, dropped");
                stats.stale += 1;
            }
        }

        let namespaces = self.catalog.live_namespaces(&self.index_name)?;
        let accepted_count = accepted.len();
        if !namespaces.is_empty() {
            NamespaceSync::new(self.embeddings.model(), self.embeddings.dimension())
                .with_vectors(self.vectors.clone())
                .settle(self.items.as_ref(), &namespaces, accepted)
                .await?;
        }
        stats.processed += accepted_count;
        stats.skipped += embedded.skipped.len();
        debug!(
            job,
            embedded = accepted_count,
            cache_hits = embedded.cache_hits,
            "backfill batch committed"
        );
        Ok(())
    }
}
