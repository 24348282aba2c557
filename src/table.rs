//! Document table operations.
//!
//! The table is an insertion-ordered sequence of documents. Live mutations
//! and log replay go through the same [`apply_record`] path, which is what
//! makes replaying a query-bearing record against a reconstructed table
//! equivalent to the original mutation.

use crate::matcher::matches;
use crate::types::{Document, Query, QueryOptions, SortDirection};
use crate::wal::WalRecord;
use serde_json::Value;
use std::cmp::Ordering;

/// Apply one logged mutation to the table, returning the number of documents
/// affected.
pub(crate) fn apply_record(documents: &mut Vec<Document>, record: WalRecord) -> usize {
    match record {
        WalRecord::Insert { data } => {
            documents.push(data);
            1
        }
        WalRecord::Update { query, patch } => {
            let mut affected = 0;
            for document in documents.iter_mut() {
                if matches(document, &query) {
                    merge(document, &patch);
                    affected += 1;
                }
            }
            affected
        }
        WalRecord::Delete { query } => {
            let before = documents.len();
            documents.retain(|document| !matches(document, &query));
            before - documents.len()
        }
    }
}

/// Shallow-merge `patch` into `document`: patched keys are replaced wholesale,
/// all other keys are untouched.
pub(crate) fn merge(document: &mut Document, patch: &Document) {
    for (key, value) in patch {
        document.insert(key.clone(), value.clone());
    }
}

/// Filter, sort, and window the table. Pure read.
pub(crate) fn select(documents: &[Document], query: &Query, options: &QueryOptions) -> Vec<Document> {
    let mut results: Vec<Document> = documents
        .iter()
        .filter(|document| matches(document, query))
        .cloned()
        .collect();

    if let Some(sort) = &options.sort {
        // Stable sort: documents that compare equal on every key keep their
        // table order.
        results.sort_by(|a, b| compare_documents(a, b, sort));
    }

    results
        .into_iter()
        .skip(options.skip)
        .take(options.limit.unwrap_or(usize::MAX))
        .collect()
}

fn compare_documents(a: &Document, b: &Document, sort: &[(String, SortDirection)]) -> Ordering {
    for (key, direction) in sort {
        let ordering = compare_fields(a.get(key), b.get(key));
        if ordering != Ordering::Equal {
            return match direction {
                SortDirection::Ascending => ordering,
                SortDirection::Descending => ordering.reverse(),
            };
        }
    }
    Ordering::Equal
}

/// Field ordering for sort keys. Values of different kinds (or missing
/// fields) compare equal, falling through to the next key or to table order.
fn compare_fields(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(a)), Some(Value::Number(b))) => {
            match (a.as_f64(), b.as_f64()) {
                (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
                _ => Ordering::Equal,
            }
        }
        (Some(Value::String(a)), Some(Value::String(b))) => a.cmp(b),
        (Some(Value::Bool(a)), Some(Value::Bool(b))) => a.cmp(b),
        _ => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: serde_json::Value) -> Document {
        value.as_object().unwrap().clone()
    }

    fn table(values: serde_json::Value) -> Vec<Document> {
        values
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_object().unwrap().clone())
            .collect()
    }

    #[test]
    fn test_insert_appends() {
        let mut documents = Vec::new();
        let affected = apply_record(
            &mut documents,
            WalRecord::Insert {
                data: doc(json!({"id": "1", "a": 1})),
            },
        );
        assert_eq!(affected, 1);
        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0]["a"], 1);
    }

    #[test]
    fn test_update_merges_without_replacing() {
        let mut documents = table(json!([{"id": "1", "a": 1, "b": 2}]));
        let affected = apply_record(
            &mut documents,
            WalRecord::Update {
                query: doc(json!({"id": "1"})),
                patch: doc(json!({"b": 3})),
            },
        );
        assert_eq!(affected, 1);
        assert_eq!(documents[0], doc(json!({"id": "1", "a": 1, "b": 3})));
    }

    #[test]
    fn test_update_touches_every_match() {
        let mut documents = table(json!([
            {"id": "1", "group": "x", "n": 0},
            {"id": "2", "group": "y", "n": 0},
            {"id": "3", "group": "x", "n": 0},
        ]));
        let affected = apply_record(
            &mut documents,
            WalRecord::Update {
                query: doc(json!({"group": "x"})),
                patch: doc(json!({"n": 1})),
            },
        );
        assert_eq!(affected, 2);
        assert_eq!(documents[0]["n"], 1);
        assert_eq!(documents[1]["n"], 0);
        assert_eq!(documents[2]["n"], 1);
    }

    #[test]
    fn test_delete_removes_all_matches() {
        let mut documents = table(json!([
            {"id": "1", "group": "x"},
            {"id": "2", "group": "y"},
            {"id": "3", "group": "x"},
        ]));
        let affected = apply_record(
            &mut documents,
            WalRecord::Delete {
                query: doc(json!({"group": "x"})),
            },
        );
        assert_eq!(affected, 2);
        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0]["id"], "2");

        let remaining = select(&documents, &doc(json!({"group": "x"})), &QueryOptions::default());
        assert!(remaining.is_empty());
    }

    #[test]
    fn test_select_preserves_table_order() {
        let documents = table(json!([
            {"id": "1", "n": 3},
            {"id": "2", "n": 1},
            {"id": "3", "n": 2},
        ]));
        let results = select(&documents, &doc(json!({})), &QueryOptions::default());
        let ids: Vec<_> = results.iter().map(|d| d["id"].clone()).collect();
        assert_eq!(ids, vec![json!("1"), json!("2"), json!("3")]);
    }

    #[test]
    fn test_select_sorts_ascending_and_descending() {
        let documents = table(json!([
            {"id": "1", "n": 3},
            {"id": "2", "n": 1},
            {"id": "3", "n": 2},
        ]));

        let asc = select(
            &documents,
            &doc(json!({})),
            &QueryOptions::sorted_by("n", SortDirection::Ascending),
        );
        let ns: Vec<_> = asc.iter().map(|d| d["n"].clone()).collect();
        assert_eq!(ns, vec![json!(1), json!(2), json!(3)]);

        let desc = select(
            &documents,
            &doc(json!({})),
            &QueryOptions::sorted_by("n", SortDirection::Descending),
        );
        let ns: Vec<_> = desc.iter().map(|d| d["n"].clone()).collect();
        assert_eq!(ns, vec![json!(3), json!(2), json!(1)]);
    }

    #[test]
    fn test_select_first_differing_key_wins() {
        let documents = table(json!([
            {"id": "1", "group": "b", "n": 1},
            {"id": "2", "group": "a", "n": 2},
            {"id": "3", "group": "a", "n": 1},
        ]));

        let results = select(
            &documents,
            &doc(json!({})),
            &QueryOptions {
                sort: Some(vec![
                    ("group".to_string(), SortDirection::Ascending),
                    ("n".to_string(), SortDirection::Ascending),
                ]),
                ..Default::default()
            },
        );
        let ids: Vec<_> = results.iter().map(|d| d["id"].clone()).collect();
        assert_eq!(ids, vec![json!("3"), json!("2"), json!("1")]);
    }

    #[test]
    fn test_select_ties_keep_table_order() {
        let documents = table(json!([
            {"id": "1", "n": 1},
            {"id": "2", "n": 1},
            {"id": "3", "n": 0},
        ]));
        let results = select(
            &documents,
            &doc(json!({})),
            &QueryOptions::sorted_by("n", SortDirection::Ascending),
        );
        let ids: Vec<_> = results.iter().map(|d| d["id"].clone()).collect();
        assert_eq!(ids, vec![json!("3"), json!("1"), json!("2")]);
    }

    #[test]
    fn test_select_skip_and_limit() {
        let documents = table(json!([
            {"id": "1"}, {"id": "2"}, {"id": "3"}, {"id": "4"},
        ]));

        let window = select(
            &documents,
            &doc(json!({})),
            &QueryOptions {
                skip: 1,
                limit: Some(2),
                ..Default::default()
            },
        );
        let ids: Vec<_> = window.iter().map(|d| d["id"].clone()).collect();
        assert_eq!(ids, vec![json!("2"), json!("3")]);

        // Windowing past the end is empty, not an error.
        let past = select(
            &documents,
            &doc(json!({})),
            &QueryOptions {
                skip: 10,
                ..Default::default()
            },
        );
        assert!(past.is_empty());
    }

    #[test]
    fn test_select_filters_with_operators() {
        let documents = table(json!([
            {"id": "1", "n": 1},
            {"id": "2", "n": 5},
            {"id": "3", "n": 9},
        ]));
        let results = select(
            &documents,
            &doc(json!({"n": {"$gt": 2, "$lt": 9}})),
            &QueryOptions::default(),
        );
        assert_eq!(results.len(), 1);
        assert_eq!(results[0]["id"], "2");
    }
}
