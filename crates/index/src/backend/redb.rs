//! Redb (Rust embedded database) backend.
//!
//! Every write runs in its own write transaction. Redb serializes write
//! transactions, which is what makes [`IndexBackend::compare_and_put`] atomic
//! here: the read, the comparison and the insert happen inside one
//! transaction that no other writer can interleave with.
//!
//! ```yaml
//! index:
//!   backend:
//!     redb:
//!       path: "/data/search.redb"
//! ```

use crate::{IndexBackend, IndexError};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use std::path::Path;
use std::sync::Arc;

const SEARCH_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("search_data");

/// Persistent backend on a single redb table.
pub struct RedbBackend {
    db: Arc<Database>,
}

fn backend_err<E: std::fmt::Display>(e: E) -> IndexError {
    IndexError::backend(e)
}

impl RedbBackend {
    /// Open or create a database at `path`.
    ///
    /// ```no_run
    /// use index::RedbBackend;
    ///
    /// let backend = RedbBackend::open("/tmp/search.redb").unwrap();
    /// ```
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, IndexError> {
        let db = Database::create(path).map_err(backend_err)?;

        // Opening the table inside a write transaction creates it.
        let write_txn = db.begin_write().map_err(backend_err)?;
        {
            let _table = write_txn.open_table(SEARCH_TABLE).map_err(backend_err)?;
        }
        write_txn.commit().map_err(backend_err)?;

        Ok(Self { db: Arc::new(db) })
    }

    fn matching_keys(&self, prefix: &str) -> Result<Vec<String>, IndexError> {
        let mut keys = Vec::new();
        self.scan_prefix(prefix, &mut |key, _| {
            keys.push(key.to_string());
            Ok(())
        })?;
        Ok(keys)
    }
}

impl IndexBackend for RedbBackend {
    fn put(&self, key: &str, value: &[u8]) -> Result<(), IndexError> {
        let write_txn = self.db.begin_write().map_err(backend_err)?;
        {
            let mut table = write_txn.open_table(SEARCH_TABLE).map_err(backend_err)?;
            table.insert(key, value).map_err(backend_err)?;
        }
        write_txn.commit().map_err(backend_err)?;
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, IndexError> {
        let read_txn = self.db.begin_read().map_err(backend_err)?;
        let table = read_txn.open_table(SEARCH_TABLE).map_err(backend_err)?;
        let value = table.get(key).map_err(backend_err)?;
        Ok(value.map(|v| v.value().to_vec()))
    }

    fn delete(&self, key: &str) -> Result<(), IndexError> {
        let write_txn = self.db.begin_write().map_err(backend_err)?;
        {
            let mut table = write_txn.open_table(SEARCH_TABLE).map_err(backend_err)?;
            table.remove(key).map_err(backend_err)?;
        }
        write_txn.commit().map_err(backend_err)?;
        Ok(())
    }

    fn batch_put(&self, entries: Vec<(String, Vec<u8>)>) -> Result<(), IndexError> {
        let write_txn = self.db.begin_write().map_err(backend_err)?;
        {
            let mut table = write_txn.open_table(SEARCH_TABLE).map_err(backend_err)?;
            for (key, value) in entries {
                table
                    .insert(key.as_str(), value.as_slice())
                    .map_err(backend_err)?;
            }
        }
        write_txn.commit().map_err(backend_err)?;
        Ok(())
    }

    fn scan_prefix(
        &self,
        prefix: &str,
        visitor: &mut dyn FnMut(&str, &[u8]) -> Result<(), IndexError>,
    ) -> Result<(), IndexError> {
        let read_txn = self.db.begin_read().map_err(backend_err)?;
        let table = read_txn.open_table(SEARCH_TABLE).map_err(backend_err)?;

        for item in table.range(prefix..).map_err(backend_err)? {
            let (key, value) = item.map_err(backend_err)?;
            let key = key.value();
            if !key.starts_with(prefix) {
                break;
            }
            visitor(key, value.value())?;
        }
        Ok(())
    }

    fn delete_prefix(&self, prefix: &str) -> Result<usize, IndexError> {
        let keys = self.matching_keys(prefix)?;
        if keys.is_empty() {
            return Ok(0);
        }
        let write_txn = self.db.begin_write().map_err(backend_err)?;
        {
            let mut table = write_txn.open_table(SEARCH_TABLE).map_err(backend_err)?;
            for key in &keys {
                table.remove(key.as_str()).map_err(backend_err)?;
            }
        }
        write_txn.commit().map_err(backend_err)?;
        Ok(keys.len())
    }

    fn compare_and_put(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        value: &[u8],
    ) -> Result<bool, IndexError> {
        let write_txn = self.db.begin_write().map_err(backend_err)?;
        let swapped = {
            let mut table = write_txn.open_table(SEARCH_TABLE).map_err(backend_err)?;
            let current = table
                .get(key)
                .map_err(backend_err)?
                .map(|v| v.value().to_vec());
            if current.as_deref() == expected {
                table.insert(key, value).map_err(backend_err)?;
                true
            } else {
                false
            }
        };
        if swapped {
            write_txn.commit().map_err(backend_err)?;
        } else {
            write_txn.abort().map_err(backend_err)?;
        }
        Ok(swapped)
    }

    fn compare_and_delete(&self, key: &str, expected: &[u8]) -> Result<bool, IndexError> {
        let write_txn = self.db.begin_write().map_err(backend_err)?;
        let removed = {
            let mut table = write_txn.open_table(SEARCH_TABLE).map_err(backend_err)?;
            let current = table
                .get(key)
                .map_err(backend_err)?
                .map(|v| v.value().to_vec());
            if current.as_deref() == Some(expected) {
                table.remove(key).map_err(backend_err)?;
                true
            } else {
                false
            }
        };
        if removed {
            write_txn.commit().map_err(backend_err)?;
        } else {
            write_txn.abort().map_err(backend_err)?;
        }
        Ok(removed)
    }

    fn flush(&self) -> Result<(), IndexError> {
        // Commits are durable on return.
        Ok(())
    }
}
