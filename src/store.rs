//! Counter store backend abstraction.
//!
//! The counting engine needs a key-value store with hash semantics: atomic
//! per-field increment, field get/remove, and key enumeration by prefix.
//! Production deployments back this with a shared cache server; the
//! in-process [`MemoryBackend`] is the default wiring and the test
//! substrate. A small shared version counter rides on the same store so
//! read-through metadata caches can invalidate across processes.

use std::collections::HashMap;

use dashmap::DashMap;

/// Backend failures. Callers in the counting path recover from these
/// locally (fail soft); the lock store surfaces them.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("backend connection error: {0}")]
    Connection(String),

    #[error("backend protocol error: {0}")]
    Protocol(String),
}

/// Key-value store with atomic hash operations
pub trait CounterBackend: Send + Sync {
    /// Atomically add `by` to `field` under `key`, returning the new value.
    /// Creates the hash and/or field as needed.
    fn hash_increment(&self, key: &str, field: &str, by: i64) -> Result<i64, StoreError>;

    /// Current value of `field` under `key`, `None` if absent
    fn hash_get(&self, key: &str, field: &str) -> Result<Option<i64>, StoreError>;

    /// Number of fields under `key` (0 if the key is absent)
    fn hash_len(&self, key: &str) -> Result<u64, StoreError>;

    /// Remove `field` under `key`; true if it existed
    fn hash_remove(&self, key: &str, field: &str) -> Result<bool, StoreError>;

    /// All (field, value) pairs under `key`
    fn hash_all(&self, key: &str) -> Result<Vec<(String, i64)>, StoreError>;

    /// Delete whole keys, returning how many existed
    fn delete(&self, keys: &[String]) -> Result<u64, StoreError>;

    /// All keys starting with `prefix`
    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
}

/// In-process backend over a concurrent map. Each hash is guarded by its
/// map shard, so per-key operations are atomic.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    hashes: DashMap<String, HashMap<String, i64>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CounterBackend for MemoryBackend {
    fn hash_increment(&self, key: &str, field: &str, by: i64) -> Result<i64, StoreError> {
        let mut hash = self.hashes.entry(key.to_string()).or_default();
        let value = hash.entry(field.to_string()).or_insert(0);
        *value += by;
        Ok(*value)
    }

    fn hash_get(&self, key: &str, field: &str) -> Result<Option<i64>, StoreError> {
        Ok(self
            .hashes
            .get(key)
            .and_then(|hash| hash.get(field).copied()))
    }

    fn hash_len(&self, key: &str) -> Result<u64, StoreError> {
        Ok(self.hashes.get(key).map_or(0, |hash| hash.len() as u64))
    }

    fn hash_remove(&self, key: &str, field: &str) -> Result<bool, StoreError> {
        Ok(self
            .hashes
            .get_mut(key)
            .map_or(false, |mut hash| hash.remove(field).is_some()))
    }

    fn hash_all(&self, key: &str) -> Result<Vec<(String, i64)>, StoreError> {
        Ok(self.hashes.get(key).map_or_else(Vec::new, |hash| {
            hash.iter().map(|(f, v)| (f.clone(), *v)).collect()
        }))
    }

    fn delete(&self, keys: &[String]) -> Result<u64, StoreError> {
        let mut removed = 0;
        for key in keys {
            if self.hashes.remove(key).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .hashes
            .iter()
            .map(|entry| entry.key().clone())
            .filter(|key| key.starts_with(prefix))
            .collect())
    }
}
