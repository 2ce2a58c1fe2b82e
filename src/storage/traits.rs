//! Abstract counter store contract.
//!
//! A counter store is a flat string-keyed map of JSON values. Two key
//! namespaces share it: tracked keywords map to their integer count, and
//! source-assigned event ids map to the raw matched payload.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum StorageError {
    /// The handle was closed, or never opened.
    #[error("store is closed")]
    Closed,

    /// Another process holds the store lock.
    #[error("store at '{path}' is locked by another process")]
    Locked {
        path: String,
    },

    /// Filesystem failure.
    #[error("I/O error while {context}: {message}")]
    Io {
        context: &'static str,
        message: String,
    },

    /// On-disk data failed validation.
    #[error("store is corrupted: {message}")]
    Corrupted {
        message: String,
    },

    /// Value could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Backend error.
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    pub(crate) fn io(context: &'static str, err: &std::io::Error) -> Self {
        Self::Io {
            context,
            message: err.to_string(),
        }
    }
}

/// Durable key/value storage for counts and matched events.
///
/// Implementations must make `close` idempotent: the session calls it on
/// every exit path, including ones where the store is already closed.
pub trait CounterStore: Send + Sync {
    /// Write `value` under `key`, overwriting any previous value.
    fn set(&self, key: &str, value: Value) -> Result<(), StorageError>;

    /// Read the value under `key`.
    fn get(&self, key: &str) -> Result<Option<Value>, StorageError>;

    /// Flush and release the handle. A no-op when already closed.
    fn close(&self) -> Result<(), StorageError>;

    /// Whether the handle still accepts reads and writes.
    fn is_open(&self) -> bool;
}

/// Typed helpers over [`CounterStore`].
pub trait CounterStoreExt: CounterStore {
    /// Store a keyword count.
    fn set_count(&self, keyword: &str, count: u64) -> Result<(), StorageError> {
        self.set(keyword, Value::from(count))
    }

    /// Read a keyword count. Non-integer values are reported as corruption.
    fn get_count(&self, keyword: &str) -> Result<Option<u64>, StorageError> {
        match self.get(keyword)? {
            None => Ok(None),
            Some(v) => v.as_u64().map(Some).ok_or_else(|| StorageError::Corrupted {
                message: format!("counter '{keyword}' holds a non-integer value: {v}"),
            }),
        }
    }

    /// Store any serializable value.
    fn set_json<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        let v = serde_json::to_value(value).map_err(|e| StorageError::Serialization(e.to_string()))?;
        self.set(key, v)
    }

    /// Read and deserialize a value.
    fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        self.get(key)?
            .map(|v| serde_json::from_value(v).map_err(|e| StorageError::Serialization(e.to_string())))
            .transpose()
    }
}

impl<T: CounterStore + ?Sized> CounterStoreExt for T {}

#[cfg(test)]
mod tests {
    use super::*;

    // Compile-time test: ensure the trait is object-safe
    fn _assert_counter_store_object_safe(_: &dyn CounterStore) {}

    #[test]
    fn test_storage_error_display() {
        let err = StorageError::Locked {
            path: "/tmp/db".to_string(),
        };
        assert!(err.to_string().contains("/tmp/db"));

        let err = StorageError::io(
            "opening log",
            &std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(err.to_string().contains("opening log"));
        assert!(err.to_string().contains("denied"));
    }
}
