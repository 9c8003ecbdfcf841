use crate::IndexError;
use std::collections::BTreeMap;
use std::sync::RwLock;

/// Key-value storage backend underneath every persistent store in this crate.
///
/// Keys are `/`-separated paths (`vec/clips_v3/item-1`, `lifecycle/alias/clips`)
/// so prefix scans double as namespace listings.
pub trait IndexBackend: Send + Sync {
    /// Insert or update a key-value pair.
    fn put(&self, key: &str, value: &[u8]) -> Result<(), IndexError>;
    /// Retrieve a value by key.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, IndexError>;
    /// Delete a key-value pair. Deleting a missing key is not an error.
    fn delete(&self, key: &str) -> Result<(), IndexError>;
    /// Insert or update multiple key-value pairs in one write.
    fn batch_put(&self, entries: Vec<(String, Vec<u8>)>) -> Result<(), IndexError>;
    /// Visit every `(key, value)` whose key starts with `prefix`, in key order.
    fn scan_prefix(
        &self,
        prefix: &str,
        visitor: &mut dyn FnMut(&str, &[u8]) -> Result<(), IndexError>,
    ) -> Result<(), IndexError>;
    /// Remove every key starting with `prefix`. Returns how many were removed.
    fn delete_prefix(&self, prefix: &str) -> Result<usize, IndexError>;
    /// Single-key compare-and-swap.
    ///
    /// Writes `value` only if the current value equals `expected` (`None`
    /// meaning "absent"). Returns whether the write happened. The comparison
    /// and the write are one atomic step.
    fn compare_and_put(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        value: &[u8],
    ) -> Result<bool, IndexError>;
    /// Single-key compare-and-delete, the release half of a CAS-held lock.
    fn compare_and_delete(&self, key: &str, expected: &[u8]) -> Result<bool, IndexError>;
    /// Flush any buffered writes to the backend.
    fn flush(&self) -> Result<(), IndexError> {
        Ok(())
    }
}

/// Configuration for selecting and building a backend.
///
/// ```
/// use index::BackendConfig;
///
/// let config = BackendConfig::in_memory();
/// let config = BackendConfig::redb("/data/search.redb");
/// ```
#[derive(Clone, Debug, Default, PartialEq)]
pub enum BackendConfig {
    /// Redb file at `path`. Requires the `backend-redb` feature (on by default).
    Redb { path: String },
    /// In-memory ordered map, for tests and ephemeral deployments.
    #[default]
    InMemory,
}

impl BackendConfig {
    pub fn in_memory() -> Self {
        BackendConfig::InMemory
    }

    pub fn redb<P: Into<String>>(path: P) -> Self {
        BackendConfig::Redb { path: path.into() }
    }

    /// Build the backend described by this configuration.
    pub fn build(&self) -> Result<Box<dyn IndexBackend>, IndexError> {
        match self {
            BackendConfig::InMemory => Ok(Box::new(InMemoryBackend::new())),
            BackendConfig::Redb { path } => {
                #[cfg(feature = "backend-redb")]
                {
                    Ok(Box::new(RedbBackend::open(path)?))
                }
                #[cfg(not(feature = "backend-redb"))]
                {
                    let _ = path;
                    Err(IndexError::backend("redb backend disabled at compile time"))
                }
            }
        }
    }
}

/// An in-memory backend using a `RwLock` around a `BTreeMap`.
///
/// The ordered map gives prefix scans in key order, matching redb.
pub struct InMemoryBackend {
    records: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
        }
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.records.read().map(|g| g.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl IndexBackend for InMemoryBackend {
    fn put(&self, key: &str, value: &[u8]) -> Result<(), IndexError> {
        self.records
            .write()
            .map_err(|_| IndexError::backend("poisoned lock"))?
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, IndexError> {
        let guard = self
            .records
            .read()
            .map_err(|_| IndexError::backend("poisoned lock"))?;
        Ok(guard.get(key).cloned())
    }

    fn delete(&self, key: &str) -> Result<(), IndexError> {
        self.records
            .write()
            .map_err(|_| IndexError::backend("poisoned lock"))?
            .remove(key);
        Ok(())
    }

    fn batch_put(&self, entries: Vec<(String, Vec<u8>)>) -> Result<(), IndexError> {
        // One write lock for the whole batch.
        let mut guard = self
            .records
            .write()
            .map_err(|_| IndexError::backend("poisoned lock"))?;
        for (key, value) in entries {
            guard.insert(key, value);
        }
        Ok(())
    }

    fn scan_prefix(
        &self,
        prefix: &str,
        visitor: &mut dyn FnMut(&str, &[u8]) -> Result<(), IndexError>,
    ) -> Result<(), IndexError> {
        let guard = self
            .records
            .read()
            .map_err(|_| IndexError::backend("poisoned lock"))?;
        for (key, value) in guard.range(prefix.to_string()..) {
            if !key.starts_with(prefix) {
                break;
            }
            visitor(key, value)?;
        }
        Ok(())
    }

    fn delete_prefix(&self, prefix: &str) -> Result<usize, IndexError> {
        let mut guard = self
            .records
            .write()
            .map_err(|_| IndexError::backend("poisoned lock"))?;
        let doomed: Vec<String> = guard
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &doomed {
            guard.remove(key);
        }
        Ok(doomed.len())
    }

    fn compare_and_put(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        value: &[u8],
    ) -> Result<bool, IndexError> {
        let mut guard = self
            .records
            .write()
            .map_err(|_| IndexError::backend("poisoned lock"))?;
        if guard.get(key).map(Vec::as_slice) != expected {
            return Ok(false);
        }
        guard.insert(key.to_string(), value.to_vec());
        Ok(true)
    }

    fn compare_and_delete(&self, key: &str, expected: &[u8]) -> Result<bool, IndexError> {
        let mut guard = self
            .records
            .write()
            .map_err(|_| IndexError::backend("poisoned lock"))?;
        if guard.get(key).map(Vec::as_slice) != Some(expected) {
            return Ok(false);
        }
        guard.remove(key);
        Ok(true)
    }
}

#[cfg(feature = "backend-redb")]
pub mod redb;

#[cfg(feature = "backend-redb")]
pub use self::redb::RedbBackend;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_scan_is_ordered_and_bounded() {
        let backend = InMemoryBackend::new();
        backend.put("vec/a_v1/2", b"two").unwrap();
        backend.put("vec/a_v1/1", b"one").unwrap();
        backend.put("vec/a_v10/1", b"other").unwrap();
        backend.put("vec/b_v1/1", b"b").unwrap();

        let mut keys = Vec::new();
        backend
            .scan_prefix("vec/a_v1/", &mut |key, _| {
                keys.push(key.to_string());
                Ok(())
            })
            .unwrap();
        assert_eq!(keys, vec!["vec/a_v1/1", "vec/a_v1/2"]);
    }

    #[test]
    fn delete_prefix_leaves_neighbours() {
        let backend = InMemoryBackend::new();
        backend.put("vec/a_v1/1", b"1").unwrap();
        backend.put("vec/a_v1/2", b"2").unwrap();
        backend.put("vec/a_v2/1", b"3").unwrap();

        assert_eq!(backend.delete_prefix("vec/a_v1/").unwrap(), 2);
        assert_eq!(backend.len(), 1);
        assert!(backend.get("vec/a_v2/1").unwrap().is_some());
    }

    #[test]
    fn compare_and_put_only_writes_on_match() {
        let backend = InMemoryBackend::new();
        assert!(backend.compare_and_put("k", None, b"v1").unwrap());
        assert!(!backend.compare_and_put("k", None, b"v2").unwrap());
        assert!(!backend.compare_and_put("k", Some(b"stale"), b"v2").unwrap());
        assert!(backend.compare_and_put("k", Some(b"v1"), b"v2").unwrap());
        assert_eq!(backend.get("k").unwrap(), Some(b"v2".to_vec()));
    }

    #[test]
    fn compare_and_delete_requires_current_value() {
        let backend = InMemoryBackend::new();
        backend.put("lock", b"holder-a").unwrap();
        assert!(!backend.compare_and_delete("lock", b"holder-b").unwrap());
        assert!(backend.compare_and_delete("lock", b"holder-a").unwrap());
        assert!(backend.get("lock").unwrap().is_none());
    }

    #[test]
    fn in_memory_config_builds() {
        let backend = BackendConfig::in_memory().build().unwrap();
        backend.put("x", b"y").unwrap();
        assert_eq!(backend.get("x").unwrap(), Some(b"y".to_vec()));
    }
}
