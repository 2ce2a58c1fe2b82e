//! Persistent storage backend for tagrace.
//!
//! This module provides durable, crash-safe counter storage with:
//! - An append-only log replayed on open
//! - File locking so one session owns a store at a time
//! - CRC32 checksums for corruption detection
//! - Snapshot compaction once the log grows past a threshold
//!
//! # Layout
//!
//! ```text
//! <store path>/
//! ├── .lock          exclusive advisory lock
//! └── counters.wal   [MAGIC][VERSION][record]...
//! ```

mod codec;
mod file_lock;
mod store;
mod wal;

pub use file_lock::FileLock;
pub use store::PersistentCounterStore;
pub use wal::{WalEntry, WalEntryKind, WriteAheadLog};

use std::path::Path;

use crate::error::{ConfigurationError, RaceResult};

/// Configuration for persistent storage.
#[derive(Debug, Clone)]
pub struct PersistentConfig {
    /// Maximum log size before compaction (bytes).
    pub max_log_size: u64,
    /// Whether to fsync after every write (slower but safer).
    pub sync_on_write: bool,
}

impl Default for PersistentConfig {
    fn default() -> Self {
        Self {
            max_log_size: 16 * 1024 * 1024, // 16 MB
            sync_on_write: true,
        }
    }
}

impl PersistentConfig {
    /// Smallest accepted compaction threshold.
    pub const MIN_LOG_SIZE: u64 = 4 * 1024;

    pub fn validate(self) -> Result<Self, ConfigurationError> {
        if self.max_log_size < Self::MIN_LOG_SIZE {
            return Err(ConfigurationError::InvalidLogSize {
                min: Self::MIN_LOG_SIZE,
                actual: self.max_log_size,
            });
        }
        Ok(self)
    }
}

/// Open or create a persistent counter store at the given path.
///
/// # Arguments
/// * `path` - Directory to store the counter files
/// * `config` - Optional configuration (uses defaults if None)
///
/// # Errors
/// - If the configuration is invalid
/// - If the path cannot be created or accessed
/// - If another process holds the lock
/// - If log replay fails due to corruption
///
/// # Example
/// ```rust,ignore
/// use tagrace::storage::{open_store, CounterStoreExt};
///
/// let store = open_store("./database.db", None)?;
/// store.set_count("rust", 1)?;
/// ```
pub fn open_store(
    path: impl AsRef<Path>,
    config: Option<PersistentConfig>,
) -> RaceResult<PersistentCounterStore> {
    let cfg = config.unwrap_or_default().validate()?;
    Ok(PersistentCounterStore::open(path.as_ref(), cfg)?)
}
