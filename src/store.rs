//! Store handle tying the table, log, and scheduler together.

use crate::error::Result;
use crate::scheduler::FlushScheduler;
use crate::snapshot;
use crate::table;
use crate::types::{Document, Mutation, Query, QueryOptions, RecoveryReport};
use crate::wal::{WalRecord, WriteAheadLog};
use parking_lot::RwLock;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Store configuration.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Path of the primary file. The log and temp files live next to it as
    /// `<path>.wal` and `<path>.tmp`.
    pub path: PathBuf,

    /// Quiet period between a mutation and the snapshot write it schedules.
    /// Requests arriving inside the window coalesce into one write.
    pub debounce: Duration,
}

impl StoreConfig {
    /// Configuration with the default debounce window.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./store.json"),
            debounce: Duration::from_millis(5),
        }
    }
}

/// Shared state between the store handle and the flusher thread.
pub(crate) struct StoreInner {
    /// Path of the primary file.
    path: PathBuf,

    /// The authoritative live table.
    ///
    /// Mutations hold the write lock across the log append and the in-memory
    /// change, so no reader sees one without the other. The flusher holds the
    /// read lock across the snapshot write and the log truncation, so a
    /// mutation can never slip a record into the log that the just-written
    /// snapshot misses.
    documents: RwLock<Vec<Document>>,

    /// Write-ahead log of mutations since the last snapshot.
    wal: WriteAheadLog,

    /// Mutation counter; the flusher's dirty flag.
    version: AtomicU64,

    /// Completed snapshot writes.
    flushes: AtomicU64,
}

impl StoreInner {
    pub(crate) fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    /// Write a snapshot of the current table and truncate the log.
    ///
    /// Returns the table version the snapshot covers. If the truncation
    /// fails the snapshot stays valid on disk and the error goes to the
    /// caller, which may retry.
    pub(crate) fn flush(&self) -> Result<u64> {
        let documents = self.documents.read();
        let version = self.version();
        snapshot::write(&self.path, &documents)?;
        self.wal.clear()?;
        drop(documents);

        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(version)
    }
}

/// An open document store.
///
/// One handle owns one file; handles to different files coexist freely.
/// Opening the same file from more than one process (or twice in one
/// process) is not supported and not detected.
///
/// ## Example
///
/// ```ignore
/// use docstore::{Store, StoreConfig, QueryOptions};
/// use serde_json::json;
///
/// let store = Store::open(StoreConfig::new("./data.json"))?;
///
/// let id = store.insert(json!({"name": "x", "score": 5}).as_object().unwrap().clone())?;
/// let hits = store.query(
///     json!({"score": {"$gt": 3}}).as_object().unwrap(),
///     &QueryOptions::default(),
/// );
/// store.commit()?;
/// ```
pub struct Store {
    inner: Arc<StoreInner>,
    scheduler: FlushScheduler,
    recovery: RecoveryReport,
}

impl Store {
    /// Open a store, running recovery before any operation is accepted.
    ///
    /// Recovery loads the snapshot (missing file: empty table; unreadable
    /// file: empty table plus a flagged [`RecoveryReport`]), then replays the
    /// write-ahead log over it in file order. The log is left in place; the
    /// next snapshot write folds it in and truncates it.
    pub fn open(config: StoreConfig) -> Result<Self> {
        let (mut documents, snapshot_reset) = snapshot::load(&config.path);

        let wal = WriteAheadLog::open(snapshot::sibling_path(&config.path, ".wal"))?;
        let (records, skipped_records) = wal.read_records()?;
        let replayed_records = records.len();
        for record in records {
            table::apply_record(&mut documents, record);
        }
        if replayed_records > 0 {
            debug!(
                "replayed {} log records over snapshot {}",
                replayed_records,
                config.path.display()
            );
        }

        let inner = Arc::new(StoreInner {
            path: config.path,
            documents: RwLock::new(documents),
            wal,
            // Replayed records count as unflushed mutations, so a recovered
            // table is dirty until the first snapshot write.
            version: AtomicU64::new(replayed_records as u64),
            flushes: AtomicU64::new(0),
        });
        let scheduler = FlushScheduler::spawn(Arc::clone(&inner), config.debounce);

        Ok(Self {
            inner,
            scheduler,
            recovery: RecoveryReport {
                snapshot_reset,
                replayed_records,
                skipped_records,
            },
        })
    }

    /// What startup recovery found.
    pub fn recovery(&self) -> &RecoveryReport {
        &self.recovery
    }

    // --- Mutations ---

    /// Insert a document, returning its identifier.
    ///
    /// A missing, null, or empty `id` field is filled with a generated UUID;
    /// an explicit `id` is preserved as-is. Identifier uniqueness is NOT
    /// enforced: inserting two documents with the same `id` stores both, and
    /// queries on that `id` return both.
    pub fn insert(&self, mut document: Document) -> Result<Value> {
        let id = ensure_id(&mut document);
        self.apply(WalRecord::Insert { data: document })?;
        Ok(id)
    }

    /// Shallow-merge `patch` into every document matching `query`, returning
    /// the number of documents touched. Patched keys are replaced wholesale;
    /// other keys are untouched.
    pub fn update(&self, query: &Query, patch: &Document) -> Result<usize> {
        self.apply(WalRecord::Update {
            query: query.clone(),
            patch: patch.clone(),
        })
    }

    /// Delete every document matching `query`, returning the number removed.
    pub fn delete(&self, query: &Query) -> Result<usize> {
        self.apply(WalRecord::Delete {
            query: query.clone(),
        })
    }

    /// Combined mutation surface.
    ///
    /// Mirrors the convention of dynamic callers where the second argument is
    /// absent ([`Mutation::Insert`]: `criteria` becomes a new document), null
    /// ([`Mutation::Delete`]: remove all matching `criteria`), or a mapping
    /// ([`Mutation::Patch`]: merge into all matching `criteria`). Returns the
    /// new identifier for inserts, `None` otherwise.
    pub fn mutate(&self, criteria: Document, mutation: Mutation) -> Result<Option<Value>> {
        match mutation {
            Mutation::Insert => self.insert(criteria).map(Some),
            Mutation::Delete => self.delete(&criteria).map(|_| None),
            Mutation::Patch(patch) => self.update(&criteria, &patch).map(|_| None),
        }
    }

    /// Log a mutation, apply it to the table, and schedule a snapshot.
    ///
    /// The log append and the table change happen under one write lock, so a
    /// concurrent read sees either both or neither. The mutation is only
    /// reported successful once the log record is durable; the snapshot
    /// itself is debounced.
    fn apply(&self, record: WalRecord) -> Result<usize> {
        let affected = {
            let mut documents = self.inner.documents.write();
            self.inner.wal.append(&record)?;
            let affected = table::apply_record(&mut documents, record);
            self.inner.version.fetch_add(1, Ordering::SeqCst);
            affected
        };
        self.scheduler.persist()?;
        Ok(affected)
    }

    // --- Reads ---

    /// Filter the table by `query`, then apply sort/skip/limit options.
    ///
    /// Pure read over the in-memory table; results are in insertion order
    /// unless a sort is requested.
    pub fn query(&self, query: &Query, options: &QueryOptions) -> Vec<Document> {
        let documents = self.inner.documents.read();
        table::select(&documents, query, options)
    }

    /// Number of documents in the table.
    pub fn len(&self) -> usize {
        self.inner.documents.read().len()
    }

    /// Whether the table holds no documents.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Completed snapshot writes since open. Burst mutations inside one
    /// debounce window all land in a single write.
    pub fn flush_count(&self) -> u64 {
        self.inner.flushes.load(Ordering::SeqCst)
    }

    // --- Persistence ---

    /// Force a snapshot write and wait for it.
    ///
    /// On return, every mutation issued before this call is durable in the
    /// primary file and the log is empty. On failure the in-memory table is
    /// still correct; retry once the underlying condition clears.
    pub fn commit(&self) -> Result<()> {
        self.scheduler.commit()
    }

    // --- Bulk access ---

    /// Snapshot of the whole table, for export.
    pub fn documents(&self) -> Vec<Document> {
        self.inner.documents.read().clone()
    }

    /// Replace the whole table, for bulk import.
    ///
    /// Commits synchronously: the log describes mutations against the old
    /// table, so the replacement is only consistent once it is snapshotted
    /// and the log truncated.
    pub fn replace_documents(&self, documents: Vec<Document>) -> Result<()> {
        {
            let mut table = self.inner.documents.write();
            *table = documents;
            self.inner.version.fetch_add(1, Ordering::SeqCst);
        }
        self.commit()
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        self.scheduler.shutdown();
    }
}

/// Fill in a generated identifier unless the document carries a usable one.
fn ensure_id(document: &mut Document) -> Value {
    let usable = match document.get("id") {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.is_empty(),
        Some(_) => true,
    };

    if !usable {
        let generated = Value::String(uuid::Uuid::new_v4().to_string());
        document.insert("id".to_string(), generated);
    }

    document
        .get("id")
        .cloned()
        .unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ensure_id_generates_when_missing() {
        let mut document = json!({"name": "x"}).as_object().unwrap().clone();
        let id = ensure_id(&mut document);
        let id = id.as_str().unwrap();
        assert!(!id.is_empty());
        assert_eq!(document["id"], json!(id));
    }

    #[test]
    fn test_ensure_id_replaces_null_and_empty() {
        let mut document = json!({"id": null}).as_object().unwrap().clone();
        assert!(ensure_id(&mut document).is_string());

        let mut document = json!({"id": ""}).as_object().unwrap().clone();
        let id = ensure_id(&mut document);
        assert!(!id.as_str().unwrap().is_empty());
    }

    #[test]
    fn test_ensure_id_preserves_explicit_ids() {
        let mut document = json!({"id": "chosen"}).as_object().unwrap().clone();
        assert_eq!(ensure_id(&mut document), json!("chosen"));

        // Non-string identifiers are legal and kept as-is.
        let mut document = json!({"id": 7}).as_object().unwrap().clone();
        assert_eq!(ensure_id(&mut document), json!(7));
    }
}
