//! Durable counter store.
//!
//! An in-memory index serves reads; every write goes to the log first. The
//! store directory holds the lock file and `counters.wal`.
//!
//! The index holds every key, raw matched payloads included, for as long as
//! the store is open, and opening replays all of them. Memory use therefore
//! grows with the number of matched events kept under the path. The directory
//! lock admits one process at a time; a second session on the same path
//! fails with `StorageError::Locked`.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::storage::traits::{CounterStore, StorageError};

use super::file_lock::FileLock;
use super::wal::{WalEntryKind, WriteAheadLog};
use super::PersistentConfig;

const LOG_FILE: &str = "counters.wal";

fn lock_err(context: &'static str) -> StorageError {
    StorageError::Backend(format!("poisoned lock: {context}"))
}

#[derive(Debug)]
struct OpenState {
    _lock: FileLock,
    wal: WriteAheadLog,
    index: HashMap<String, Value>,
    /// Log size right after the last compaction.
    compacted_size: u64,
}

impl OpenState {
    /// Compact once the log passes the configured limit and has at least
    /// doubled since the last snapshot or failed attempt.
    fn maybe_compact(&mut self, max_log_size: u64) -> Result<(), StorageError> {
        let size = self.wal.size_bytes()?;
        if size <= max_log_size || size <= self.compacted_size.saturating_mul(2) {
            return Ok(());
        }
        // A failed attempt waits for the next doubling too.
        self.compacted_size = size;
        compact_state(self)
    }
}

/// Log-backed [`CounterStore`].
#[derive(Debug)]
pub struct PersistentCounterStore {
    dir: PathBuf,
    config: PersistentConfig,
    state: Mutex<Option<OpenState>>,
}

impl PersistentCounterStore {
    /// Open or create the store in directory `dir`.
    ///
    /// # Errors
    /// - `Io` if the directory cannot be created
    /// - `Locked` if another process has the store open
    /// - `Corrupted` if the log fails validation
    pub fn open(dir: &Path, config: PersistentConfig) -> Result<Self, StorageError> {
        fs::create_dir_all(dir).map_err(|e| StorageError::io("creating store directory", &e))?;

        let lock = FileLock::acquire(dir)?;
        let (wal, entries) = WriteAheadLog::open(&dir.join(LOG_FILE), config.sync_on_write)?;

        let mut index = HashMap::new();
        let replayed = entries.len();
        for entry in entries {
            match entry.kind {
                WalEntryKind::Set { key, value } => {
                    index.insert(key, value);
                }
                WalEntryKind::Compacted { entries } => {
                    index = entries.into_iter().collect();
                }
            }
        }

        info!(
            path = %dir.display(),
            records = replayed,
            keys = index.len(),
            "Counter store opened"
        );

        Ok(Self {
            dir: dir.to_path_buf(),
            config,
            state: Mutex::new(Some(OpenState {
                _lock: lock,
                wal,
                index,
                compacted_size: 0,
            })),
        })
    }

    /// Directory holding the store files.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Number of keys currently stored.
    pub fn len(&self) -> Result<usize, StorageError> {
        let guard = self.state.lock().map_err(|_| lock_err("persistent.len"))?;
        guard.as_ref().map(|s| s.index.len()).ok_or(StorageError::Closed)
    }

    /// Whether the store holds no keys.
    pub fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.len()? == 0)
    }

    /// Rewrite the log as a single snapshot record.
    pub fn compact(&self) -> Result<(), StorageError> {
        let mut guard = self.state.lock().map_err(|_| lock_err("persistent.compact"))?;
        let state = guard.as_mut().ok_or(StorageError::Closed)?;
        compact_state(state)
    }
}

fn compact_state(state: &mut OpenState) -> Result<(), StorageError> {
    let snapshot: BTreeMap<String, Value> = state
        .index
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    let keys = snapshot.len();
    state.wal.compact(snapshot)?;
    state.compacted_size = state.wal.size_bytes()?;
    info!(
        path = %state.wal.path().display(),
        keys,
        bytes = state.compacted_size,
        "Counter log compacted"
    );
    Ok(())
}

impl CounterStore for PersistentCounterStore {
    fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
        let mut guard = self.state.lock().map_err(|_| lock_err("persistent.set"))?;
        let state = guard.as_mut().ok_or(StorageError::Closed)?;

        state.wal.append(WalEntryKind::Set {
            key: key.to_string(),
            value: value.clone(),
        })?;
        state.index.insert(key.to_string(), value);

        // The record is durable at this point; compaction is housekeeping.
        if let Err(e) = state.maybe_compact(self.config.max_log_size) {
            warn!(path = %self.dir.display(), error = %e, "Counter log compaction failed");
        }
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        let guard = self.state.lock().map_err(|_| lock_err("persistent.get"))?;
        let state = guard.as_ref().ok_or(StorageError::Closed)?;
        Ok(state.index.get(key).cloned())
    }

    fn close(&self) -> Result<(), StorageError> {
        let mut guard = self.state.lock().map_err(|_| lock_err("persistent.close"))?;
        let Some(mut state) = guard.take() else {
            debug!(path = %self.dir.display(), "Counter store already closed");
            return Ok(());
        };
        let sequence = state.wal.current_sequence();
        let synced = state.wal.sync();
        drop(state);
        info!(path = %self.dir.display(), sequence, "Counter store closed");
        synced
    }

    fn is_open(&self) -> bool {
        self.state.lock().map(|g| g.is_some()).unwrap_or(false)
    }
}

impl Drop for PersistentCounterStore {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.state.lock() {
            if let Some(state) = guard.as_mut() {
                let _ = state.wal.sync();
            }
        }
    }
}
