//! Append-only counter log.
//!
//! Every `set` becomes one record. Opening the log replays it; a record torn
//! by a crash mid-write is cut off so later appends start from a clean
//! boundary. Compaction replaces the whole file with a single snapshot
//! record through a temp file and an atomic rename.
//!
//! # File Format
//! ```text
//! [MAGIC: 4 bytes][VERSION: 1 byte]
//! [RECORD 1: codec-framed WalEntry]
//! [RECORD 2: codec-framed WalEntry]
//! ...
//! ```

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Seek, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::storage::StorageError;

use super::codec;

/// A single log record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalEntry {
    /// Monotonically increasing sequence number.
    pub sequence: u64,
    /// When this record was written.
    pub timestamp: DateTime<Utc>,
    /// The mutation.
    pub kind: WalEntryKind,
}

/// The mutation carried by a record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
#[allow(missing_docs)]
pub enum WalEntryKind {
    /// One key written.
    Set { key: String, value: Value },
    /// Full snapshot written by compaction; replaces all prior state.
    Compacted { entries: BTreeMap<String, Value> },
}

/// Writer half of the counter log.
#[derive(Debug)]
pub struct WriteAheadLog {
    path: PathBuf,
    writer: BufWriter<File>,
    sequence: u64,
    sync_on_write: bool,
}

impl WriteAheadLog {
    /// Open or create the log at `path`, returning it with every intact
    /// record in write order.
    ///
    /// # Errors
    /// - `Corrupted` on a bad header or a record failing its checksum
    /// - `Io` on filesystem failure
    pub fn open(path: &Path, sync_on_write: bool) -> Result<(Self, Vec<WalEntry>), StorageError> {
        let existing_len = match fs::metadata(path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == ErrorKind::NotFound => 0,
            Err(e) => return Err(StorageError::io("reading log metadata", &e)),
        };

        if existing_len > 0 && existing_len < codec::HEADER_LEN {
            return Err(StorageError::Corrupted {
                message: format!(
                    "{}: {existing_len} bytes is shorter than the log header",
                    path.display()
                ),
            });
        }

        let entries = if existing_len > 0 {
            let (entries, valid_end) = replay(path, existing_len)?;
            if valid_end < existing_len {
                warn!(
                    path = %path.display(),
                    valid_end,
                    file_len = existing_len,
                    "Discarding torn record at end of counter log"
                );
                let file = OpenOptions::new()
                    .write(true)
                    .open(path)
                    .map_err(|e| StorageError::io("opening log for repair", &e))?;
                file.set_len(valid_end)
                    .map_err(|e| StorageError::io("truncating torn record", &e))?;
                file.sync_all()
                    .map_err(|e| StorageError::io("syncing repaired log", &e))?;
            }
            entries
        } else {
            write_fresh(path, &[])?;
            Vec::new()
        };

        let sequence = entries.last().map_or(0, |e| e.sequence);
        let writer = open_append(path)?;

        Ok((
            Self {
                path: path.to_path_buf(),
                writer,
                sequence,
                sync_on_write,
            },
            entries,
        ))
    }

    /// Append a record. Returns its sequence number.
    pub fn append(&mut self, kind: WalEntryKind) -> Result<u64, StorageError> {
        let candidate = self.sequence + 1;
        let entry = WalEntry {
            sequence: candidate,
            timestamp: Utc::now(),
            kind,
        };
        let encoded = codec::encode(&entry).map_err(|e| StorageError::Serialization(e.to_string()))?;

        self.writer
            .write_all(&encoded)
            .map_err(|e| StorageError::io("appending to log", &e))?;
        self.writer
            .flush()
            .map_err(|e| StorageError::io("flushing log", &e))?;
        if self.sync_on_write {
            self.writer
                .get_ref()
                .sync_data()
                .map_err(|e| StorageError::io("syncing log", &e))?;
        }

        self.sequence = candidate;
        Ok(candidate)
    }

    /// Replace the log with one snapshot record.
    ///
    /// The snapshot is written to a sibling temp file, synced, and renamed
    /// over the log, so a crash leaves either the old or the new file. The
    /// writer for the new file is opened before the rename; on any error the
    /// current writer keeps appending to the current log.
    pub fn compact(&mut self, entries: BTreeMap<String, Value>) -> Result<(), StorageError> {
        self.writer
            .flush()
            .map_err(|e| StorageError::io("flushing log before compaction", &e))?;

        let candidate = self.sequence + 1;
        let snapshot = WalEntry {
            sequence: candidate,
            timestamp: Utc::now(),
            kind: WalEntryKind::Compacted { entries },
        };

        let tmp_path = self.path.with_extension("wal.compact");
        write_fresh(&tmp_path, &[snapshot])?;
        let writer = match open_append(&tmp_path) {
            Ok(writer) => writer,
            Err(e) => {
                let _ = fs::remove_file(&tmp_path);
                return Err(e);
            }
        };
        if let Err(e) = fs::rename(&tmp_path, &self.path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(StorageError::io("renaming compacted log", &e));
        }

        // The handle follows the renamed file.
        self.writer = writer;
        self.sequence = candidate;
        Ok(())
    }

    /// Flush buffered bytes and sync them to disk.
    pub fn sync(&mut self) -> Result<(), StorageError> {
        self.writer
            .flush()
            .map_err(|e| StorageError::io("flushing log", &e))?;
        self.writer
            .get_ref()
            .sync_all()
            .map_err(|e| StorageError::io("syncing log", &e))
    }

    /// Sequence number of the last record.
    #[must_use]
    pub const fn current_sequence(&self) -> u64 {
        self.sequence
    }

    /// Current size of the log file in bytes.
    pub fn size_bytes(&self) -> Result<u64, StorageError> {
        fs::metadata(&self.path)
            .map(|m| m.len())
            .map_err(|e| StorageError::io("reading log size", &e))
    }

    /// Path of the log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Read all intact records. Returns them with the byte offset just past the
/// last one.
fn replay(path: &Path, file_len: u64) -> Result<(Vec<WalEntry>, u64), StorageError> {
    let file = File::open(path).map_err(|e| StorageError::io("opening log for replay", &e))?;
    let mut reader = BufReader::new(file);

    codec::read_header(&mut reader).map_err(|e| StorageError::Corrupted {
        message: format!("{}: {e}", path.display()),
    })?;

    let mut entries = Vec::new();
    let mut valid_end = codec::HEADER_LEN;
    while valid_end < file_len {
        match codec::decode::<WalEntry>(&mut reader) {
            Ok(entry) => {
                entries.push(entry);
                valid_end = reader
                    .stream_position()
                    .map_err(|e| StorageError::io("reading log position", &e))?;
            }
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
            Err(e) => {
                return Err(StorageError::Corrupted {
                    message: format!(
                        "{} at record {}: {e}",
                        path.display(),
                        entries.len() + 1
                    ),
                })
            }
        }
    }

    Ok((entries, valid_end))
}

/// Create or truncate `path` with a header and the given records, synced.
fn write_fresh(path: &Path, entries: &[WalEntry]) -> Result<(), StorageError> {
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .map_err(|e| StorageError::io("creating log", &e))?;

    let mut writer = BufWriter::new(file);
    codec::write_header(&mut writer).map_err(|e| StorageError::io("writing log header", &e))?;
    for entry in entries {
        let encoded = codec::encode(entry).map_err(|e| StorageError::Serialization(e.to_string()))?;
        writer
            .write_all(&encoded)
            .map_err(|e| StorageError::io("writing log record", &e))?;
    }
    writer
        .flush()
        .map_err(|e| StorageError::io("flushing new log", &e))?;
    writer
        .get_ref()
        .sync_all()
        .map_err(|e| StorageError::io("syncing new log", &e))
}

fn open_append(path: &Path) -> Result<BufWriter<File>, StorageError> {
    OpenOptions::new()
        .append(true)
        .open(path)
        .map(BufWriter::new)
        .map_err(|e| StorageError::io("opening log for append", &e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn set(key: &str, value: u64) -> WalEntryKind {
        WalEntryKind::Set {
            key: key.to_string(),
            value: Value::from(value),
        }
    }

    #[test]
    fn test_append_and_replay() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("counters.wal");

        {
            let (mut wal, entries) = WriteAheadLog::open(&path, false).unwrap();
            assert!(entries.is_empty());
            wal.append(set("alpha", 1)).unwrap();
            wal.append(set("alpha", 2)).unwrap();
            assert_eq!(wal.current_sequence(), 2);
        }

        let (wal, entries) = WriteAheadLog::open(&path, false).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(wal.current_sequence(), 2);
        assert!(matches!(
            &entries[1].kind,
            WalEntryKind::Set { key, value } if key == "alpha" && value == &Value::from(2u64)
        ));
    }

    #[test]
    fn test_torn_tail_is_cut_and_appends_continue() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("counters.wal");

        {
            let (mut wal, _) = WriteAheadLog::open(&path, true).unwrap();
            wal.append(set("alpha", 1)).unwrap();
            wal.append(set("alpha", 2)).unwrap();
        }
        let len = fs::metadata(&path).unwrap().len();
        OpenOptions::new()
            .write(true)
            .open(&path)
            .unwrap()
            .set_len(len - 3)
            .unwrap();

        {
            let (mut wal, entries) = WriteAheadLog::open(&path, true).unwrap();
            assert_eq!(entries.len(), 1);
            wal.append(set("beta", 1)).unwrap();
        }

        let (_, entries) = WriteAheadLog::open(&path, true).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].sequence, 2);
    }

    #[test]
    fn test_failed_compaction_keeps_appending_to_the_log() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("counters.wal");
        // a directory in the temp file's place makes the snapshot write fail
        fs::create_dir(path.with_extension("wal.compact")).unwrap();

        {
            let (mut wal, _) = WriteAheadLog::open(&path, false).unwrap();
            wal.append(set("alpha", 1)).unwrap();
            let mut snapshot = BTreeMap::new();
            snapshot.insert("alpha".to_string(), Value::from(1u64));
            assert!(wal.compact(snapshot).is_err());
            wal.append(set("alpha", 2)).unwrap();
        }

        let (wal, entries) = WriteAheadLog::open(&path, false).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(wal.current_sequence(), 2);
        assert!(matches!(entries[0].kind, WalEntryKind::Set { .. }));
    }

    #[test]
    fn test_short_existing_file_is_corrupted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("counters.wal");
        fs::write(&path, b"TRC").unwrap();

        let err = WriteAheadLog::open(&path, false).unwrap_err();
        assert!(matches!(err, StorageError::Corrupted { .. }));
        assert_eq!(fs::read(&path).unwrap(), b"TRC");
    }

    #[test]
    fn test_empty_existing_file_is_initialized() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("counters.wal");
        fs::write(&path, b"").unwrap();

        let (wal, entries) = WriteAheadLog::open(&path, false).unwrap();
        assert!(entries.is_empty());
        assert_eq!(wal.size_bytes().unwrap(), codec::HEADER_LEN);
    }

    #[test]
    fn test_compact_replaces_history() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("counters.wal");

        let (mut wal, _) = WriteAheadLog::open(&path, false).unwrap();
        for i in 1..=50 {
            wal.append(set("alpha", i)).unwrap();
        }
        let before = wal.size_bytes().unwrap();

        let mut snapshot = BTreeMap::new();
        snapshot.insert("alpha".to_string(), Value::from(50u64));
        wal.compact(snapshot).unwrap();
        assert!(wal.size_bytes().unwrap() < before);
        wal.append(set("alpha", 51)).unwrap();
        drop(wal);

        let (wal, entries) = WriteAheadLog::open(&path, false).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(matches!(entries[0].kind, WalEntryKind::Compacted { .. }));
        assert_eq!(wal.current_sequence(), 52);
    }
}
