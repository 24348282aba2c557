//! Core types for the document store.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One record in the store: a field/value mapping carrying an `id` field.
///
/// Documents are loosely structured; values are arbitrary JSON (strings,
/// numbers, booleans, null, nested mappings and sequences). Dates are
/// represented as ISO-8601 strings and coerced during query evaluation.
pub type Document = serde_json::Map<String, Value>;

/// A query: field name to either a literal (equality) or an operator object
/// such as `{"$gt": 3}`.
pub type Query = serde_json::Map<String, Value>;

/// Sort direction for a query option key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// Read options for [`Store::query`](crate::Store::query).
///
/// Sort keys apply in order: the first key with differing values wins, ties
/// fall through to the next key and finally to table (insertion) order.
#[derive(Clone, Debug, Default)]
pub struct QueryOptions {
    /// Maximum number of documents to return.
    pub limit: Option<usize>,

    /// Number of matching documents to skip before collecting results.
    pub skip: usize,

    /// Sort keys with their directions, highest priority first.
    pub sort: Option<Vec<(String, SortDirection)>>,
}

impl QueryOptions {
    /// Sort by a single key.
    pub fn sorted_by(key: impl Into<String>, direction: SortDirection) -> Self {
        Self {
            sort: Some(vec![(key.into(), direction)]),
            ..Default::default()
        }
    }
}

/// Mutation applied through the combined [`Store::mutate`](crate::Store::mutate)
/// surface.
///
/// This is the typed rendering of the dynamic convention where a second
/// argument is absent (insert the criteria as a new document), `null` (delete
/// all matching), or a mapping (patch-merge into all matching).
#[derive(Clone, Debug)]
pub enum Mutation {
    /// Insert the criteria document as a new document.
    Insert,
    /// Delete every document matching the criteria.
    Delete,
    /// Shallow-merge the given fields into every document matching the
    /// criteria.
    Patch(Document),
}

/// Outcome of the startup recovery procedure.
///
/// Produced once by [`Store::open`](crate::Store::open) and kept on the
/// handle. A `snapshot_reset` of `true` means the primary file existed but
/// could not be parsed and the table was started empty; the unreadable file
/// is left on disk until the next snapshot overwrites it.
#[derive(Clone, Debug, Default)]
pub struct RecoveryReport {
    /// The primary file was present but unreadable and was discarded.
    pub snapshot_reset: bool,

    /// Log records applied over the snapshot.
    pub replayed_records: usize,

    /// Log lines that failed to parse and were skipped.
    pub skipped_records: usize,
}
