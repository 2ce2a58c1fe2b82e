//! In-memory counter store.
//!
//! Not durable. Used by tests, benchmarks and dry runs, and as the reference
//! behavior for the persistent backend.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use serde_json::Value;

use crate::storage::traits::{CounterStore, StorageError};

fn lock_err(context: &'static str) -> StorageError {
    StorageError::Backend(format!("poisoned lock: {context}"))
}

/// Thread-safe map-backed store.
#[derive(Debug)]
pub struct InMemoryCounterStore {
    data: RwLock<Option<HashMap<String, Value>>>,
    writes: AtomicU64,
}

impl Default for InMemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCounterStore {
    /// Create an open, empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: RwLock::new(Some(HashMap::new())),
            writes: AtomicU64::new(0),
        }
    }

    /// Number of successful `set` calls since creation.
    #[must_use]
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Number of keys held.
    pub fn len(&self) -> Result<usize, StorageError> {
        let guard = self.data.read().map_err(|_| lock_err("memory.len"))?;
        guard.as_ref().map(HashMap::len).ok_or(StorageError::Closed)
    }

    /// Whether the store holds no keys.
    pub fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.len()? == 0)
    }
}

impl CounterStore for InMemoryCounterStore {
    fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
        let mut guard = self.data.write().map_err(|_| lock_err("memory.set"))?;
        let map = guard.as_mut().ok_or(StorageError::Closed)?;
        map.insert(key.to_string(), value);
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        let guard = self.data.read().map_err(|_| lock_err("memory.get"))?;
        let map = guard.as_ref().ok_or(StorageError::Closed)?;
        Ok(map.get(key).cloned())
    }

    fn close(&self) -> Result<(), StorageError> {
        let mut guard = self.data.write().map_err(|_| lock_err("memory.close"))?;
        guard.take();
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.data.read().map(|g| g.is_some()).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::CounterStoreExt;

    #[test]
    fn test_set_get_overwrite() {
        let store = InMemoryCounterStore::new();
        store.set_count("alpha", 1).unwrap();
        store.set_count("alpha", 2).unwrap();
        assert_eq!(store.get_count("alpha").unwrap(), Some(2));
        assert_eq!(store.get("missing").unwrap(), None);
        assert_eq!(store.writes(), 2);
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn test_close_is_idempotent() {
        let store = InMemoryCounterStore::new();
        assert!(store.is_open());
        store.close().unwrap();
        store.close().unwrap();
        assert!(!store.is_open());
        assert!(matches!(store.set_count("a", 1), Err(StorageError::Closed)));
        assert!(matches!(store.get("a"), Err(StorageError::Closed)));
    }

    #[test]
    fn test_get_count_rejects_non_integer() {
        let store = InMemoryCounterStore::new();
        store.set("alpha", Value::from("nope")).unwrap();
        assert!(matches!(
            store.get_count("alpha"),
            Err(StorageError::Corrupted { .. })
        ));
    }
}
