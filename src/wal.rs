//! Write-ahead log for crash recovery.
//!
//! Every mutation appends one record here, durably, before it is considered
//! applied. The log holds only mutations since the last snapshot; a snapshot
//! write truncates it. On startup the log is replayed over the loaded
//! snapshot to reconstruct the pre-crash table.

use crate::error::Result;
use crate::types::{Document, Query};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

/// One logged mutation.
///
/// Update and delete records store the original query, not the documents it
/// matched; replay re-derives the match set by evaluating the query against
/// the table as reconstructed so far. That is only correct because records
/// are replayed in strict file order.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum WalRecord {
    Insert { data: Document },
    Update { query: Query, patch: Document },
    Delete { query: Query },
}

/// Append-only mutation log, one JSON record per line.
///
/// There is no framing or checksumming beyond the newline separation: a
/// record torn by a crash mid-append corrupts at most its own line, which
/// replay skips.
pub struct WriteAheadLog {
    /// Path to the log file.
    path: PathBuf,

    /// Append handle, kept open for the life of the store.
    file: Mutex<File>,
}

impl WriteAheadLog {
    /// Open the log at `path`, creating it empty if absent.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&path)?;

        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// Append one record and fsync it.
    ///
    /// The record is written as a single complete line in one write call, so
    /// concurrent readers and crash recovery never see it interleaved with
    /// another record. Returns only once the bytes are durable.
    pub fn append(&self, record: &WalRecord) -> Result<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let mut file = self.file.lock();
        file.write_all(&line)?;
        file.sync_all()?;
        Ok(())
    }

    /// Read every record currently in the log, in file order.
    ///
    /// Each non-empty line is parsed independently; a line that fails to
    /// parse (typically a torn final line from a crash mid-append) is skipped
    /// and counted, and the remaining lines are still returned.
    pub fn read_records(&self) -> Result<(Vec<WalRecord>, usize)> {
        // Lossy decoding: a crash can tear a line mid-character, and that
        // must cost one line, not the whole log.
        let bytes = std::fs::read(&self.path)?;
        let contents = String::from_utf8_lossy(&bytes);

        let mut records = Vec::new();
        let mut skipped = 0;
        for (number, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<WalRecord>(line) {
                Ok(record) => records.push(record),
                Err(err) => {
                    warn!("skipping unreadable log line {}: {}", number + 1, err);
                    skipped += 1;
                }
            }
        }

        Ok((records, skipped))
    }

    /// Truncate the log to empty (called after a successful snapshot).
    pub fn clear(&self) -> Result<()> {
        let file = self.file.lock();
        file.set_len(0)?;
        file.sync_all()?;
        Ok(())
    }

    /// Size of the log file in bytes.
    pub fn len(&self) -> Result<u64> {
        Ok(self.file.lock().metadata()?.len())
    }

    /// Whether the log holds no records.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn insert_record(value: serde_json::Value) -> WalRecord {
        WalRecord::Insert {
            data: value.as_object().unwrap().clone(),
        }
    }

    #[test]
    fn test_append_and_read() {
        let dir = TempDir::new().unwrap();
        let wal = WriteAheadLog::open(dir.path().join("store.json.wal")).unwrap();

        wal.append(&insert_record(json!({"id": "1", "a": 1}))).unwrap();
        wal.append(&WalRecord::Update {
            query: json!({"id": "1"}).as_object().unwrap().clone(),
            patch: json!({"a": 2}).as_object().unwrap().clone(),
        })
        .unwrap();
        wal.append(&WalRecord::Delete {
            query: json!({"id": "1"}).as_object().unwrap().clone(),
        })
        .unwrap();

        let (records, skipped) = wal.read_records().unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(skipped, 0);
        assert!(matches!(records[0], WalRecord::Insert { .. }));
        assert!(matches!(records[1], WalRecord::Update { .. }));
        assert!(matches!(records[2], WalRecord::Delete { .. }));
    }

    #[test]
    fn test_records_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.json.wal");

        {
            let wal = WriteAheadLog::open(&path).unwrap();
            wal.append(&insert_record(json!({"id": "1"}))).unwrap();
        }

        let wal = WriteAheadLog::open(&path).unwrap();
        let (records, _) = wal.read_records().unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_torn_line_is_skipped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.json.wal");

        let wal = WriteAheadLog::open(&path).unwrap();
        wal.append(&insert_record(json!({"id": "1"}))).unwrap();
        wal.append(&insert_record(json!({"id": "2"}))).unwrap();

        // Simulate a crash mid-append: a truncated record on the last line.
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(b"{\"op\":\"insert\",\"data\":{\"id").unwrap();
        }

        let (records, skipped) = wal.read_records().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(skipped, 1);
    }

    #[test]
    fn test_garbage_line_does_not_poison_followers() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.json.wal");

        std::fs::write(
            &path,
            "not json at all\n{\"op\":\"insert\",\"data\":{\"id\":\"1\"}}\n",
        )
        .unwrap();

        let wal = WriteAheadLog::open(&path).unwrap();
        let (records, skipped) = wal.read_records().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(skipped, 1);
    }

    #[test]
    fn test_clear() {
        let dir = TempDir::new().unwrap();
        let wal = WriteAheadLog::open(dir.path().join("store.json.wal")).unwrap();

        wal.append(&insert_record(json!({"id": "1"}))).unwrap();
        assert!(!wal.is_empty().unwrap());

        wal.clear().unwrap();
        assert!(wal.is_empty().unwrap());
        let (records, skipped) = wal.read_records().unwrap();
        assert!(records.is_empty());
        assert_eq!(skipped, 0);

        // The handle keeps appending correctly after truncation.
        wal.append(&insert_record(json!({"id": "2"}))).unwrap();
        let (records, _) = wal.read_records().unwrap();
        assert_eq!(records.len(), 1);
    }
}
