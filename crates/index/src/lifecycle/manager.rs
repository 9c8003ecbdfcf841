use super::catalog::{IndexCatalog, LockAttempt, LockRecord};
use super::{AliasRecord, IndexVersion, LifecycleConfig, LifecycleError, VersionState};
use crate::{Clock, ItemFilters, ItemStore, LexicalIndex, NamespaceSync, VectorStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

/// Options for one rebuild run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RebuildOptions {
    /// Promote the new version as soon as it validates.
    #[serde(default = "default_swap")]
    pub swap_after_build: bool,
    /// Report source counts without building anything.
    #[serde(default)]
    pub dry_run: bool,
    /// Overrides [`LifecycleConfig::batch_size`].
    #[serde(default)]
    pub batch_size: Option<usize>,
    /// Name recorded on the build lock.
    #[serde(default)]
    pub holder: Option<String>,
}

fn default_swap() -> bool {
    true
}

impl Default for RebuildOptions {
    fn default() -> Self {
        Self {
            swap_after_build: true,
            dry_run: false,
            batch_size: None,
            holder: None,
        }
    }
}

impl RebuildOptions {
    pub fn dry_run() -> Self {
        Self {
            dry_run: true,
            ..Self::default()
        }
    }

    pub fn without_swap() -> Self {
        Self {
            swap_after_build: false,
            ..Self::default()
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RebuildReport {
    pub index: String,
    pub version: u32,
    pub physical_name: String,
    pub doc_count: usize,
    pub embedded_count: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub swapped: bool,
    /// RETIRED versions deleted by retention after the swap.
    pub purged: Vec<u32>,
    pub dry_run: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapOutcome {
    pub index: String,
    pub from: Option<u32>,
    pub to: u32,
    pub generation: u64,
    pub purged: Vec<u32>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub index: String,
    pub removed: Vec<u32>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VersionStatus {
    pub version: u32,
    pub physical_name: String,
    pub state: VersionState,
    pub doc_count: usize,
    pub embedded_count: usize,
    pub age_secs: i64,
    pub rollback_eligible: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexStatus {
    pub index: String,
    pub active_version: Option<u32>,
    pub alias_generation: Option<u64>,
    pub active_age_secs: Option<i64>,
    pub building: bool,
    pub versions: Vec<VersionStatus>,
}

/// Releases the build lock when the rebuild ends, however it ends.
struct BuildLockGuard<'a> {
    catalog: &'a IndexCatalog,
    index: String,
    record: LockRecord,
}

impl Drop for BuildLockGuard<'_> {
    fn drop(&mut self) {
        match self.catalog.release_lock(&self.index, &self.record) {
            Ok(true) => tracing::debug!(index = %self.index, "build lock released"),
            Ok(false) => tracing::warn!(
                index = %self.index,
                holder = %self.record.holder,
                "build lock was taken over before release"
            ),
            Err(err) => tracing::warn!(index = %self.index, error = %err, "build lock release failed"),
        }
    }
}

fn validate_name(name: &str) -> Result<(), LifecycleError> {
    if name.is_empty()
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(LifecycleError::Validation(format!(
            "index name {name:?} must be non-empty ASCII alphanumerics, '-' or '_'"
        )));
    }
    Ok(())
}

/// Drives versions of logical indexes through their lifecycle.
pub struct IndexManager {
    catalog: IndexCatalog,
    items: Arc<dyn ItemStore>,
    lexical: Arc<dyn LexicalIndex>,
    vectors: Arc<dyn VectorStore>,
    clock: Arc<dyn Clock>,
    config: LifecycleConfig,
}

impl IndexManager {
    pub fn new(
        catalog: IndexCatalog,
        items: Arc<dyn ItemStore>,
        lexical: Arc<dyn LexicalIndex>,
        vectors: Arc<dyn VectorStore>,
        clock: Arc<dyn Clock>,
        config: LifecycleConfig,
    ) -> Result<Self, LifecycleError> {
        config.validate()?;
        Ok(Self {
            catalog,
            items,
            lexical,
            vectors,
            clock,
            config,
        })
    }

    pub fn catalog(&self) -> &IndexCatalog {
        &self.catalog
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// Build a new version offline, validate it and optionally promote it.
    ///
    /// Returns `Conflict` straight away if another build holds the lock. On
    /// any build or validation failure the new version is discarded and the
    /// ACTIVE version is left untouched.
    pub async fn rebuild(
        &self,
        name: &str,
        options: RebuildOptions,
    ) -> Result<RebuildReport, LifecycleError> {
        validate_name(name)?;
        let started_at = self.clock.now();

        if options.dry_run {
            return self.dry_run_report(name, started_at).await;
        }

        let holder = options
            .holder
            .clone()
            .unwrap_or_else(|| format!("rebuild-{}", started_at.timestamp_millis()));
        let _guard = self.acquire_lock(name, &holder, started_at)?;

        // Under the lock, any BUILDING version is an orphan of a crashed build.
        for orphan in self
            .catalog
            .versions(name)?
            .into_iter()
            .filter(|v| v.state == VersionState::Building)
        {
            tracing::warn!(index = name, version = orphan.version, "discarding orphaned build");
            self.discard(&orphan).await?;
        }

        let number = self.catalog.allocate_version(name)?;
        let mut version = IndexVersion::building(name, number, started_at);
        self.catalog.put_version(&version)?;
        tracing::info!(
            event = "index.transition",
            index = name,
            version = number,
            from = "NONE",
            to = %VersionState::Building,
            "index version transition"
        );

        let batch_size = options.batch_size.unwrap_or(self.config.batch_size).max(1);
        if let Err(err) = self.build_and_validate(&mut version, batch_size).await {
            tracing::error!(
                alert = true,
                index = name,
                version = number,
                error = %err,
                "index rebuild failed, new version discarded"
            );
            if let Err(discard_err) = self.discard(&version).await {
                tracing::warn!(index = name, version = number, error = %discard_err, "discard failed");
            }
            return Err(err);
        }

        version.transition(VersionState::Ready, self.clock.now())?;
        self.catalog.put_version(&version)?;

        let (swapped, purged) = if options.swap_after_build {
            let outcome = self.swap(name, Some(number)).await?;
            (true, outcome.purged)
        } else {
            (false, Vec::new())
        };

        let finished_at = self.clock.now();
        Ok(RebuildReport {
            index: name.to_string(),
            version: number,
            physical_name: version.physical_name.clone(),
            doc_count: version.doc_count,
            embedded_count: version.embedded_count,
            started_at,
            finished_at,
            duration_ms: (finished_at - started_at).num_milliseconds(),
            swapped,
            purged,
            dry_run: false,
        })
    }

    async fn dry_run_report(
        &self,
        name: &str,
        started_at: DateTime<Utc>,
    ) -> Result<RebuildReport, LifecycleError> {
        let doc_count = self.items.count().await?;
        let embedded_count = self
            .items
            .count_embedded(&self.config.embedding_model, self.config.embedding_dimension)
            .await?;
        let version = self.catalog.peek_next_version(name)?;
        let finished_at = self.clock.now();
        Ok(RebuildReport {
            index: name.to_string(),
            version,
            physical_name: super::physical_name(name, version),
            doc_count,
            embedded_count,
            started_at,
            finished_at,
            duration_ms: (finished_at - started_at).num_milliseconds(),
            swapped: false,
            purged: Vec::new(),
            dry_run: true,
        })
    }

    fn acquire_lock(
        &self,
        name: &str,
        holder: &str,
        now: DateTime<Utc>,
    ) -> Result<BuildLockGuard<'_>, LifecycleError> {
        match self
            .catalog
            .try_lock(name, holder, now, self.config.lock_stale_after)?
        {
            LockAttempt::Acquired { record, stolen } => {
                if let Some(stale) = stolen {
                    tracing::warn!(
                        index = name,
                        previous_holder = %stale.holder,
                        acquired_at = %stale.acquired_at,
                        "stole stale build lock"
                    );
                }
                Ok(BuildLockGuard {
                    catalog: &self.catalog,
                    index: name.to_string(),
                    record,
                })
            }
            LockAttempt::Held(existing) => Err(LifecycleError::Conflict(format!(
                "index {name} is already being rebuilt by {} since {}",
                existing.holder, existing.acquired_at
            ))),
        }
    }

    fn sync(&self) -> NamespaceSync {
        NamespaceSync::new(&self.config.embedding_model, self.config.embedding_dimension)
    }

    async fn build_and_validate(
        &self,
        version: &mut IndexVersion,
        batch_size: usize,
    ) -> Result<(), LifecycleError> {
        let namespaces = [version.physical_name.clone()];
        let model = self.config.embedding_model.as_str();
        let dimension = self.config.embedding_dimension;
        let sync = self
            .sync()
            .with_lexical(self.lexical.clone())
            .with_vectors(self.vectors.clone());

        let mut after: Option<String> = None;
        let mut doc_count = 0usize;
        let mut embedded_count = 0usize;
        let mut sampled: Vec<String> = Vec::new();

        loop {
            let batch = self.items.list_after(after.as_deref(), batch_size).await?;
            let full = batch.len() == batch_size;
            let Some(last) = batch.last().map(|item| item.id.clone()) else {
                break;
            };

            // Mutations also write to this BUILDING namespace; settle keeps
            // whichever state the source holds last.
            let written = sync
                .settle(self.items.as_ref(), &namespaces, batch)
                .await?;
            doc_count += written.len();
            embedded_count += written
                .iter()
                .filter(|item| item.has_current_embedding(model, dimension))
                .count();
            if sampled.is_empty() {
                sampled = written
                    .iter()
                    .map(|item| item.title.clone())
                    .filter(|title| !canonical::terms(title).is_empty())
                    .take(3)
                    .collect();
            }

            after = Some(last);
            tracing::debug!(index = %version.index, version = version.version, doc_count, "rebuild batch indexed");
            if !full {
                break;
            }
        }

        let namespace = version.physical_name.clone();
        version.doc_count = doc_count;
        version.embedded_count = embedded_count;
        self.catalog.put_version(version)?;

        self.validate_counts(&namespace).await?;
        let canaries = if self.config.canary_queries.is_empty() {
            sampled
        } else {
            self.config.canary_queries.clone()
        };
        self.run_canaries(&namespace, &canaries).await
    }

    async fn validate_counts(&self, namespace: &str) -> Result<(), LifecycleError> {
        let source = self.items.count().await?;
        let source_embedded = self
            .items
            .count_embedded(&self.config.embedding_model, self.config.embedding_dimension)
            .await?;
        let lexical = self.lexical.count(namespace).await?;
        let vectors = self.vectors.count(namespace).await?;

        if lexical != source {
            return Err(LifecycleError::Validation(format!(
                "{namespace}: lexical count {lexical} does not match source count {source}"
            )));
        }
        if vectors != source_embedded {
            return Err(LifecycleError::Validation(format!(
                "{namespace}: vector count {vectors} does not match embedded source count {source_embedded}"
            )));
        }
        Ok(())
    }

    async fn run_canaries(&self, namespace: &str, queries: &[String]) -> Result<(), LifecycleError> {
        let limit = self.config.canary_limit;
        for query in queries {
            let hits = self
                .lexical
                .search(namespace, query, &ItemFilters::default(), limit)
                .await?;
            if hits.is_empty() {
                return Err(LifecycleError::Validation(format!(
                    "{namespace}: canary query {query:?} returned no results"
                )));
            }
            if hits.len() > limit {
                return Err(LifecycleError::Validation(format!(
                    "{namespace}: canary query {query:?} returned {} hits over limit {limit}",
                    hits.len()
                )));
            }
            if hits.iter().any(|h| !h.score.is_finite()) {
                return Err(LifecycleError::Validation(format!(
                    "{namespace}: canary query {query:?} returned a non-finite score"
                )));
            }
            let unique: HashSet<&str> = hits.iter().map(|h| h.id.as_str()).collect();
            if unique.len() != hits.len() {
                return Err(LifecycleError::Validation(format!(
                    "{namespace}: canary query {query:?} returned duplicate ids"
                )));
            }
        }
        Ok(())
    }

    async fn discard(&self, version: &IndexVersion) -> Result<(), LifecycleError> {
        self.lexical.drop_namespace(&version.physical_name).await?;
        self.vectors.drop_namespace(&version.physical_name).await?;
        self.catalog.delete_version(&version.index, version.version)?;
        tracing::info!(
            event = "index.transition",
            index = %version.index,
            version = version.version,
            from = %version.state,
            to = "DELETED",
            "index version transition"
        );
        Ok(())
    }

    /// Point the alias at a READY version: `version`, or the newest READY one.
    pub async fn swap(
        &self,
        name: &str,
        version: Option<u32>,
    ) -> Result<SwapOutcome, LifecycleError> {
        validate_name(name)?;
        let versions = self.catalog.versions(name)?;
        let target = match version {
            Some(n) => versions
                .iter()
                .find(|v| v.version == n)
                .ok_or_else(|| LifecycleError::NotFound(format!("{name} version {n}")))?,
            None => versions
                .iter()
                .rev()
                .find(|v| v.state == VersionState::Ready)
                .ok_or_else(|| LifecycleError::NotFound(format!("{name} has no READY version")))?,
        };
        if target.state != VersionState::Ready {
            return Err(LifecycleError::InvalidTransition {
                version: target.physical_name.clone(),
                from: target.state,
                to: VersionState::Active,
            });
        }
        self.repoint(name, target).await
    }

    /// Point the alias back at a rollback-eligible RETIRED version.
    pub async fn rollback(
        &self,
        name: &str,
        version: Option<u32>,
    ) -> Result<SwapOutcome, LifecycleError> {
        validate_name(name)?;
        let now = self.clock.now();
        let versions = self.catalog.versions(name)?;
        let eligible = self.rollback_eligible(&versions, now);

        let target = match version {
            Some(n) => {
                let found = versions
                    .iter()
                    .find(|v| v.version == n)
                    .ok_or_else(|| LifecycleError::NotFound(format!("{name} version {n}")))?;
                if !eligible.contains(&n) {
                    return Err(LifecycleError::Validation(format!(
                        "{} ({}) is not rollback-eligible",
                        found.physical_name, found.state
                    )));
                }
                found
            }
            None => {
                let n = eligible.first().ok_or_else(|| {
                    LifecycleError::NotFound(format!("{name} has no rollback-eligible version"))
                })?;
                versions
                    .iter()
                    .find(|v| v.version == *n)
                    .ok_or_else(|| LifecycleError::NotFound(format!("{name} version {n}")))?
            }
        };
        self.repoint(name, target).await
    }

    /// CAS the alias to `target`, then update both version rows.
    async fn repoint(
        &self,
        name: &str,
        target: &IndexVersion,
    ) -> Result<SwapOutcome, LifecycleError> {
        self.rehydrate_lexical(target).await?;
        let now = self.clock.now();
        let mut promoted = target.clone();
        promoted.transition(VersionState::Active, now)?;

        let current = self.catalog.alias(name)?;
        // A racing operator may already have promoted the same target.
        if current.as_ref().is_some_and(|a| a.version == target.version) {
            return Err(LifecycleError::Conflict(format!(
                "alias {name} already points at {}",
                target.physical_name
            )));
        }
        let next = AliasRecord::next(name, current.as_ref(), target.version, now);
        if !self
            .catalog
            .compare_and_swap_alias(name, current.as_ref(), &next)?
        {
            return Err(LifecycleError::Conflict(format!(
                "alias {name} changed concurrently, retry"
            )));
        }
        self.catalog.put_version(&promoted)?;

        let from = current.as_ref().map(|a| a.version);
        if let Some(previous) = from.filter(|v| *v != target.version) {
            if let Some(mut demoted) = self.catalog.version(name, previous)? {
                if demoted.state == VersionState::Active {
                    demoted.transition(VersionState::Retired, now)?;
                    self.catalog.put_version(&demoted)?;
                }
            }
        }

        let purged = self.enforce_retention(name).await?;
        Ok(SwapOutcome {
            index: name.to_string(),
            from,
            to: target.version,
            generation: next.generation,
            purged,
        })
    }

    /// Refill `target`'s lexical namespace from the source when it is empty.
    ///
    /// Lexical namespaces live in process memory, so a version built before
    /// a restart comes back with its vectors but without lexical entries.
    async fn rehydrate_lexical(&self, target: &IndexVersion) -> Result<(), LifecycleError> {
        let namespaces = [target.physical_name.clone()];
        if self.lexical.count(&namespaces[0]).await? > 0 || self.items.count().await? == 0 {
            return Ok(());
        }
        tracing::warn!(
            index = %target.index,
            version = target.version,
            "lexical namespace is empty, refilling from source before repoint"
        );
        let sync = self.sync().with_lexical(self.lexical.clone());
        let batch_size = self.config.batch_size.max(1);
        let mut after: Option<String> = None;
        let mut restored = 0usize;
        loop {
            let batch = self.items.list_after(after.as_deref(), batch_size).await?;
            let full = batch.len() == batch_size;
            let Some(last) = batch.last().map(|item| item.id.clone()) else {
                break;
            };
            restored += sync
                .settle(self.items.as_ref(), &namespaces, batch)
                .await?
                .len();
            after = Some(last);
            if !full {
                break;
            }
        }
        tracing::info!(index = %target.index, version = target.version, restored, "lexical namespace refilled");
        Ok(())
    }

    /// RETIRED versions a rollback may target, most recently retired first.
    fn rollback_eligible(&self, versions: &[IndexVersion], now: DateTime<Utc>) -> Vec<u32> {
        let retention = crate::cache::to_delta(self.config.retention);
        self.recent_retired(versions)
            .into_iter()
            .filter(|v| v.retired_at.is_some_and(|at| now - at <= retention))
            .map(|v| v.version)
            .collect()
    }

    fn recent_retired<'v>(&self, versions: &'v [IndexVersion]) -> Vec<&'v IndexVersion> {
        let mut retired: Vec<&IndexVersion> = versions
            .iter()
            .filter(|v| v.state == VersionState::Retired)
            .collect();
        retired.sort_by(|a, b| {
            b.retired_at
                .cmp(&a.retired_at)
                .then_with(|| b.version.cmp(&a.version))
        });
        retired.truncate(self.config.keep_retired);
        retired
    }

    /// Delete RETIRED versions beyond the `keep_retired` most recent.
    async fn enforce_retention(&self, name: &str) -> Result<Vec<u32>, LifecycleError> {
        let versions = self.catalog.versions(name)?;
        let keep: HashSet<u32> = self
            .recent_retired(&versions)
            .iter()
            .map(|v| v.version)
            .collect();
        let mut purged = Vec::new();
        for version in versions
            .iter()
            .filter(|v| v.state == VersionState::Retired && !keep.contains(&v.version))
        {
            self.discard(version).await?;
            purged.push(version.version);
        }
        Ok(purged)
    }

    /// Remove RETIRED versions that can no longer be rolled back to, and
    /// BUILDING versions that no live lock covers.
    pub async fn cleanup(&self, name: &str) -> Result<CleanupReport, LifecycleError> {
        validate_name(name)?;
        let now = self.clock.now();
        let versions = self.catalog.versions(name)?;
        let eligible: HashSet<u32> = self.rollback_eligible(&versions, now).into_iter().collect();
        let build_live = self
            .catalog
            .lock(name)?
            .is_some_and(|lock| !lock.is_stale(now, self.config.lock_stale_after));

        let mut removed = Vec::new();
        for version in &versions {
            let doomed = match version.state {
                VersionState::Retired => !eligible.contains(&version.version),
                VersionState::Building => !build_live,
                VersionState::Ready | VersionState::Active => false,
            };
            if doomed {
                self.discard(version).await?;
                removed.push(version.version);
            }
        }
        Ok(CleanupReport {
            index: name.to_string(),
            removed,
        })
    }

    pub fn status(&self, name: &str) -> Result<IndexStatus, LifecycleError> {
        validate_name(name)?;
        let now = self.clock.now();
        let alias = self.catalog.alias(name)?;
        let versions = self.catalog.versions(name)?;
        if alias.is_none() && versions.is_empty() {
            return Err(LifecycleError::NotFound(format!("index {name}")));
        }
        let eligible: HashSet<u32> = self.rollback_eligible(&versions, now).into_iter().collect();

        let active_age_secs = alias.as_ref().and_then(|a| {
            versions
                .iter()
                .find(|v| v.version == a.version)
                .and_then(|v| v.activated_at)
                .map(|at| (now - at).num_seconds().max(0))
        });
        Ok(IndexStatus {
            index: name.to_string(),
            active_version: alias.as_ref().map(|a| a.version),
            alias_generation: alias.as_ref().map(|a| a.generation),
            active_age_secs,
            building: versions.iter().any(|v| v.state == VersionState::Building),
            versions: versions
                .iter()
                .map(|v| VersionStatus {
                    version: v.version,
                    physical_name: v.physical_name.clone(),
                    state: v.state,
                    doc_count: v.doc_count,
                    embedded_count: v.embedded_count,
                    age_secs: v.age_secs(now),
                    rollback_eligible: eligible.contains(&v.version),
                })
                .collect(),
        })
    }

    pub fn status_all(&self) -> Result<Vec<IndexStatus>, LifecycleError> {
        self.catalog
            .index_names()?
            .iter()
            .map(|name| self.status(name))
            .collect()
    }
}
