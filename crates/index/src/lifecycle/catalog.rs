//! Catalog rows in the KV backend.
//!
//! ```text
//! lifecycle/alias/<name>              AliasRecord       (CAS)
//! lifecycle/version/<name>/<N:010>   IndexVersion
//! lifecycle/lock/<name>               LockRecord        (CAS)
//! lifecycle/seq/<name>                last allocated N  (CAS)
//! ```
//!
//! Rows are JSON so an operator can read them with any KV tool. Version
//! numbers are zero-padded so key order is numeric order.

use super::{AliasRecord, IndexVersion, VersionState};
use crate::{IndexBackend, IndexError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

const ALIAS_PREFIX: &str = "lifecycle/alias/";
const VERSION_PREFIX: &str = "lifecycle/version/";
const LOCK_PREFIX: &str = "lifecycle/lock/";
const SEQ_PREFIX: &str = "lifecycle/seq/";

/// Holder of a per-index build lock.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    pub holder: String,
    pub acquired_at: DateTime<Utc>,
}

impl LockRecord {
    pub fn is_stale(&self, now: DateTime<Utc>, stale_after: Duration) -> bool {
        now - self.acquired_at >= crate::cache::to_delta(stale_after)
    }
}

/// Outcome of a lock attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LockAttempt {
    Acquired {
        record: LockRecord,
        /// The stale lock this acquisition replaced.
        stolen: Option<LockRecord>,
    },
    Held(LockRecord),
}

/// Typed access to the lifecycle rows.
#[derive(Clone)]
pub struct IndexCatalog {
    backend: Arc<dyn IndexBackend>,
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, IndexError> {
    Ok(serde_json::to_vec(value)?)
}

fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, IndexError> {
    Ok(serde_json::from_slice(bytes)?)
}

impl IndexCatalog {
    pub fn new(backend: Arc<dyn IndexBackend>) -> Self {
        Self { backend }
    }

    fn alias_key(name: &str) -> String {
        format!("{ALIAS_PREFIX}{name}")
    }

    fn version_prefix(name: &str) -> String {
        format!("{VERSION_PREFIX}{name}/")
    }

    fn version_key(name: &str, version: u32) -> String {
        format!("{VERSION_PREFIX}{name}/{version:010}")
    }

    fn lock_key(name: &str) -> String {
        format!("{LOCK_PREFIX}{name}")
    }

    fn seq_key(name: &str) -> String {
        format!("{SEQ_PREFIX}{name}")
    }

    pub fn alias(&self, name: &str) -> Result<Option<AliasRecord>, IndexError> {
        self.backend
            .get(&Self::alias_key(name))?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    /// Physical namespace the alias points at, if any.
    pub fn active_namespace(&self, name: &str) -> Result<Option<String>, IndexError> {
        Ok(self.alias(name)?.map(|a| a.physical_name))
    }

    /// Namespaces a write to `name` must reach: the ACTIVE one first, then
    /// every BUILDING or READY version still waiting for a swap.
    pub fn live_namespaces(&self, name: &str) -> Result<Vec<String>, IndexError> {
        let mut namespaces: Vec<String> = self.active_namespace(name)?.into_iter().collect();
        for version in self.versions(name)? {
            let pending = matches!(version.state, VersionState::Building | VersionState::Ready);
            if pending && !namespaces.contains(&version.physical_name) {
                namespaces.push(version.physical_name);
            }
        }
        Ok(namespaces)
    }

    /// Replace the alias only if it still equals `expected`.
    pub fn compare_and_swap_alias(
        &self,
        name: &str,
        expected: Option<&AliasRecord>,
        next: &AliasRecord,
    ) -> Result<bool, IndexError> {
        let expected = expected.map(encode).transpose()?;
        self.backend
            .compare_and_put(&Self::alias_key(name), expected.as_deref(), &encode(next)?)
    }

    /// All versions of `name` in ascending version order.
    pub fn versions(&self, name: &str) -> Result<Vec<IndexVersion>, IndexError> {
        let mut out = Vec::new();
        self.backend
            .scan_prefix(&Self::version_prefix(name), &mut |_, bytes| {
                out.push(decode(bytes)?);
                Ok(())
            })?;
        Ok(out)
    }

    pub fn version(&self, name: &str, version: u32) -> Result<Option<IndexVersion>, IndexError> {
        self.backend
            .get(&Self::version_key(name, version))?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    pub fn put_version(&self, version: &IndexVersion) -> Result<(), IndexError> {
        self.backend.put(
            &Self::version_key(&version.index, version.version),
            &encode(version)?,
        )
    }

    pub fn delete_version(&self, name: &str, version: u32) -> Result<(), IndexError> {
        self.backend.delete(&Self::version_key(name, version))
    }

    /// Number the next build will get. Never reused, even after deletes.
    pub fn peek_next_version(&self, name: &str) -> Result<u32, IndexError> {
        Ok(self.last_allocated(name)?.map(|(n, _)| n + 1).unwrap_or(1))
    }

    fn last_allocated(&self, name: &str) -> Result<Option<(u32, Vec<u8>)>, IndexError> {
        match self.backend.get(&Self::seq_key(name))? {
            Some(bytes) => Ok(Some((decode(&bytes)?, bytes))),
            None => Ok(None),
        }
    }

    /// Reserve the next version number.
    pub fn allocate_version(&self, name: &str) -> Result<u32, IndexError> {
        for _ in 0..16 {
            let current = self.last_allocated(name)?;
            let next = current.as_ref().map(|(n, _)| n + 1).unwrap_or(1);
            let expected = current.as_ref().map(|(_, raw)| raw.as_slice());
            if self
                .backend
                .compare_and_put(&Self::seq_key(name), expected, &encode(&next)?)?
            {
                return Ok(next);
            }
        }
        Err(IndexError::Conflict(format!(
            "version sequence for {name} is contended"
        )))
    }

    /// Every index name with an alias or at least one version.
    pub fn index_names(&self) -> Result<Vec<String>, IndexError> {
        let mut names = BTreeSet::new();
        self.backend.scan_prefix(ALIAS_PREFIX, &mut |key, _| {
            names.insert(key[ALIAS_PREFIX.len()..].to_string());
            Ok(())
        })?;
        self.backend.scan_prefix(VERSION_PREFIX, &mut |key, _| {
            if let Some((name, _)) = key[VERSION_PREFIX.len()..].split_once('/') {
                names.insert(name.to_string());
            }
            Ok(())
        })?;
        Ok(names.into_iter().collect())
    }

    pub fn lock(&self, name: &str) -> Result<Option<LockRecord>, IndexError> {
        self.backend
            .get(&Self::lock_key(name))?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    /// Take the build lock, stealing it when the current holder is stale.
    pub fn try_lock(
        &self,
        name: &str,
        holder: &str,
        now: DateTime<Utc>,
        stale_after: Duration,
    ) -> Result<LockAttempt, IndexError> {
        let key = Self::lock_key(name);
        let record = LockRecord {
            holder: holder.to_string(),
            acquired_at: now,
        };
        let fresh = encode(&record)?;

        let current_raw = self.backend.get(&key)?;
        let current = current_raw
            .as_deref()
            .map(decode::<LockRecord>)
            .transpose()?;
        match current {
            None => {
                if self.backend.compare_and_put(&key, None, &fresh)? {
                    Ok(LockAttempt::Acquired {
                        record,
                        stolen: None,
                    })
                } else {
                    self.held_by_current(name)
                }
            }
            Some(existing) if existing.is_stale(now, stale_after) => {
                if self
                    .backend
                    .compare_and_put(&key, current_raw.as_deref(), &fresh)?
                {
                    Ok(LockAttempt::Acquired {
                        record,
                        stolen: Some(existing),
                    })
                } else {
                    self.held_by_current(name)
                }
            }
            Some(existing) => Ok(LockAttempt::Held(existing)),
        }
    }

    fn held_by_current(&self, name: &str) -> Result<LockAttempt, IndexError> {
        match self.lock(name)? {
            Some(holder) => Ok(LockAttempt::Held(holder)),
            None => Err(IndexError::Conflict(format!(
                "build lock for {name} changed hands during acquisition"
            ))),
        }
    }

    /// Release a lock this caller holds. `false` if someone else holds it now.
    pub fn release_lock(&self, name: &str, record: &LockRecord) -> Result<bool, IndexError> {
        self.backend
            .compare_and_delete(&Self::lock_key(name), &encode(record)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryBackend;

    fn catalog() -> IndexCatalog {
        IndexCatalog::new(Arc::new(InMemoryBackend::new()))
    }

    #[test]
    fn alias_cas_rejects_stale_expectation() {
        let catalog = catalog();
        let now = Utc::now();
        let first = AliasRecord::next("clips", None, 1, now);
        assert!(catalog.compare_and_swap_alias("clips", None, &first).unwrap());

        let second = AliasRecord::next("clips", Some(&first), 2, now);
        assert!(catalog
            .compare_and_swap_alias("clips", Some(&first), &second)
            .unwrap());

        // A writer still holding `first` loses.
        let racing = AliasRecord::next("clips", Some(&first), 3, now);
        assert!(!catalog
            .compare_and_swap_alias("clips", Some(&first), &racing)
            .unwrap());
        assert_eq!(catalog.alias("clips").unwrap(), Some(second));
        assert_eq!(
            catalog.active_namespace("clips").unwrap().as_deref(),
            Some("clips_v2")
        );
    }

    #[test]
    fn versions_list_in_numeric_order() {
        let catalog = catalog();
        let now = Utc::now();
        for n in [10, 2, 1] {
            catalog
                .put_version(&IndexVersion::building("clips", n, now))
                .unwrap();
        }
        catalog
            .put_version(&IndexVersion::building("clips2", 1, now))
            .unwrap();
        let listed: Vec<u32> = catalog
            .versions("clips")
            .unwrap()
            .iter()
            .map(|v| v.version)
            .collect();
        assert_eq!(listed, vec![1, 2, 10]);
        assert_eq!(
            catalog.version("clips", 2).unwrap().unwrap().state,
            VersionState::Building
        );
        assert_eq!(catalog.index_names().unwrap(), vec!["clips", "clips2"]);
    }

    #[test]
    fn live_namespaces_cover_active_and_unswapped_versions() {
        let catalog = catalog();
        let now = Utc::now();
        assert!(catalog.live_namespaces("clips").unwrap().is_empty());

        let mut retired = IndexVersion::building("clips", 1, now);
        retired.state = VersionState::Retired;
        let mut active = IndexVersion::building("clips", 2, now);
        active.state = VersionState::Active;
        let mut ready = IndexVersion::building("clips", 3, now);
        ready.state = VersionState::Ready;
        let building = IndexVersion::building("clips", 4, now);
        for version in [&retired, &active, &ready, &building] {
            catalog.put_version(version).unwrap();
        }
        let alias = AliasRecord::next("clips", None, 2, now);
        assert!(catalog.compare_and_swap_alias("clips", None, &alias).unwrap());

        assert_eq!(
            catalog.live_namespaces("clips").unwrap(),
            vec!["clips_v2", "clips_v3", "clips_v4"]
        );
    }

    #[test]
    fn version_numbers_are_never_reused() {
        let catalog = catalog();
        assert_eq!(catalog.peek_next_version("clips").unwrap(), 1);
        assert_eq!(catalog.allocate_version("clips").unwrap(), 1);
        assert_eq!(catalog.allocate_version("clips").unwrap(), 2);
        catalog.delete_version("clips", 2).unwrap();
        assert_eq!(catalog.allocate_version("clips").unwrap(), 3);
    }

    #[test]
    fn lock_is_exclusive_until_stale() {
        let catalog = catalog();
        let now = Utc::now();
        let stale_after = Duration::from_secs(3600);

        let LockAttempt::Acquired { record, stolen } =
            catalog.try_lock("clips", "a", now, stale_after).unwrap()
        else {
            panic!("first lock should succeed");
        };
        assert!(stolen.is_none());

        let later = now + chrono::TimeDelta::minutes(10);
        assert!(matches!(
            catalog.try_lock("clips", "b", later, stale_after).unwrap(),
            LockAttempt::Held(_)
        ));

        let much_later = now + chrono::TimeDelta::hours(2);
        let LockAttempt::Acquired { record: b, stolen } =
            catalog.try_lock("clips", "b", much_later, stale_after).unwrap()
        else {
            panic!("stale lock should be stolen");
        };
        assert_eq!(stolen, Some(record.clone()));

        // The original holder can no longer release it.
        assert!(!catalog.release_lock("clips", &record).unwrap());
        assert!(catalog.release_lock("clips", &b).unwrap());
        assert!(catalog.lock("clips").unwrap().is_none());
    }
}
