//! Index version lifecycle: offline rebuilds, validation, alias swap,
//! rollback and retention.
//!
//! A logical index (`clips`) is served through an alias that points at one
//! physical version (`clips_v3`). Versions move through
//! `BUILDING -> READY -> ACTIVE -> RETIRED`, and a RETIRED version can be
//! made ACTIVE again by a rollback. The alias itself is a single catalog
//! row updated by compare-and-swap, so readers see either the old or the new
//! version and never a mix.
//!
//! ```text
//!  rebuild ──► BUILDING ──validate──► READY ──swap──► ACTIVE ──swap──► RETIRED
//!                 │                                      ▲               │
//!                 └─fail─► discarded                     └───rollback────┘
//! ```

mod catalog;
mod manager;
mod version;

pub use catalog::{IndexCatalog, LockAttempt, LockRecord};
pub use manager::{
    CleanupReport, IndexManager, IndexStatus, RebuildOptions, RebuildReport, SwapOutcome,
    VersionStatus,
};
pub use version::{physical_name, AliasRecord, IndexVersion, VersionState};

use crate::IndexError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors returned by lifecycle operations.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Another operator holds the build lock, or the alias moved underneath us.
    #[error("conflict: {0}")]
    Conflict(String),
    /// A built version failed validation and was discarded.
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid transition for {version}: {from} -> {to}")]
    InvalidTransition {
        version: String,
        from: VersionState,
        to: VersionState,
    },
    #[error(transparent)]
    Backend(#[from] IndexError),
}

/// Lifecycle tuning.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Most recent RETIRED versions kept available for rollback.
    pub keep_retired: usize,
    /// How long a RETIRED version stays rollback-eligible.
    #[serde(with = "duration_secs")]
    pub retention: Duration,
    /// Items per rebuild batch.
    pub batch_size: usize,
    /// Age after which a held build lock may be stolen.
    #[serde(with = "duration_secs")]
    pub lock_stale_after: Duration,
    /// Canary queries run against every freshly built version.
    pub canary_queries: Vec<String>,
    /// Hit limit for canary queries.
    pub canary_limit: usize,
    /// Embedding model whose vectors count as current.
    pub embedding_model: String,
    pub embedding_dimension: usize,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            keep_retired: 2,
            retention: Duration::from_secs(7 * 24 * 3600),
            batch_size: 100,
            lock_stale_after: Duration::from_secs(6 * 3600),
            canary_queries: Vec::new(),
            canary_limit: 10,
            embedding_model: String::new(),
            embedding_dimension: 0,
        }
    }
}

impl LifecycleConfig {
    pub fn with_embedding(mut self, model: impl Into<String>, dimension: usize) -> Self {
        self.embedding_model = model.into();
        self.embedding_dimension = dimension;
        self
    }

    pub fn with_keep_retired(mut self, keep: usize) -> Self {
        self.keep_retired = keep;
        self
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_lock_stale_after(mut self, after: Duration) -> Self {
        self.lock_stale_after = after;
        self
    }

    pub fn with_canary_queries<I, S>(mut self, queries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.canary_queries = queries.into_iter().map(Into::into).collect();
        self
    }

    pub fn validate(&self) -> Result<(), LifecycleError> {
        if self.batch_size == 0 {
            return Err(LifecycleError::Validation(
                "batch_size must be greater than zero".into(),
            ));
        }
        if self.canary_limit == 0 {
            return Err(LifecycleError::Validation(
                "canary_limit must be greater than zero".into(),
            ));
        }
        if self.embedding_model.is_empty() || self.embedding_dimension == 0 {
            return Err(LifecycleError::Validation(
                "embedding model and dimension must be set".into(),
            ));
        }
        Ok(())
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub(super) fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_retention_policy() {
        let cfg = LifecycleConfig::default();
        assert_eq!(cfg.keep_retired, 2);
        assert_eq!(cfg.batch_size, 100);
        assert_eq!(cfg.lock_stale_after, Duration::from_secs(21_600));
    }

    #[test]
    fn validate_requires_embedding_model() {
        let err = LifecycleConfig::default().validate().unwrap_err();
        assert!(err.to_string().contains("embedding model"));
        LifecycleConfig::default()
            .with_embedding("m1", 8)
            .validate()
            .unwrap();
    }
}
