//! Query predicate evaluation.
//!
//! One matcher serves both live queries and log replay, so replayed
//! update/delete records re-derive their match sets with exactly the
//! semantics the original mutation used.

use crate::types::{Document, Query};
use serde_json::Value;
use std::cmp::Ordering;

/// Evaluate a query against a document.
///
/// Every key in the query must match (conjunction); an empty query matches
/// any document. A JSON-object condition is treated as a set of operators
/// (`$gt`, `$lt`, `$gte`, `$lte`, `$ne`, `$in`, `$nin`, `$regex`), anything
/// else as a literal equality test. Unrecognized operators fail closed so a
/// record written by a newer version excludes rather than crashes during
/// replay.
pub fn matches(document: &Document, query: &Query) -> bool {
    query.iter().all(|(field, condition)| {
        let value = document.get(field);
        match condition {
            Value::Object(operators) => operators
                .iter()
                .all(|(op, operand)| eval_operator(value, op, operand)),
            literal => value == Some(literal),
        }
    })
}

fn eval_operator(value: Option<&Value>, op: &str, operand: &Value) -> bool {
    match op {
        "$gt" => compare(value, operand).is_some_and(|ord| ord == Ordering::Greater),
        "$lt" => compare(value, operand).is_some_and(|ord| ord == Ordering::Less),
        "$gte" => compare(value, operand).is_some_and(|ord| ord != Ordering::Less),
        "$lte" => compare(value, operand).is_some_and(|ord| ord != Ordering::Greater),
        "$ne" => !coerced_eq(value, operand),
        "$in" => membership(value, operand),
        "$nin" => operand.is_array() && !membership(value, operand),
        "$regex" => regex_match(value, operand),
        // Unknown operator: fail closed.
        _ => false,
    }
}

/// A value reduced to something orderable: epoch milliseconds for dates and
/// plain numbers, text otherwise.
enum Comparable<'a> {
    Number(f64),
    Text(&'a str),
}

fn coerce(value: &Value) -> Option<Comparable<'_>> {
    match value {
        Value::Number(n) => n.as_f64().map(Comparable::Number),
        Value::String(s) => Some(
            parse_epoch_millis(s)
                .map(Comparable::Number)
                .unwrap_or(Comparable::Text(s)),
        ),
        _ => None,
    }
}

/// Ordering between a document value and an operand, with date coercion on
/// both sides. `None` when either side is missing or the kinds are not
/// mutually comparable; ordering operators then fail closed.
fn compare(value: Option<&Value>, operand: &Value) -> Option<Ordering> {
    match (coerce(value?)?, coerce(operand)?) {
        (Comparable::Number(a), Comparable::Number(b)) => a.partial_cmp(&b),
        (Comparable::Text(a), Comparable::Text(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// Equality under date coercion where both sides coerce, structural equality
/// otherwise. A missing document value equals nothing.
fn coerced_eq(value: Option<&Value>, operand: &Value) -> bool {
    let Some(value) = value else { return false };
    match (coerce(value), coerce(operand)) {
        (Some(Comparable::Number(a)), Some(Comparable::Number(b))) => a == b,
        _ => value == operand,
    }
}

/// `$in`/`$nin` membership: the (possibly date-coerced) document value tested
/// against each element of the operand sequence. Operand elements are taken
/// as written; a non-array operand never matches.
fn membership(value: Option<&Value>, operand: &Value) -> bool {
    let Some(candidates) = operand.as_array() else {
        return false;
    };
    let Some(value) = value else { return false };

    match coerce(value) {
        Some(Comparable::Number(v)) => candidates
            .iter()
            .any(|c| c.as_f64().is_some_and(|n| n == v)),
        _ => candidates.iter().any(|c| c == value),
    }
}

fn regex_match(value: Option<&Value>, operand: &Value) -> bool {
    let (Some(Value::String(text)), Value::String(pattern)) = (value, operand) else {
        return false;
    };
    regex::Regex::new(pattern)
        .map(|re| re.is_match(text))
        .unwrap_or(false)
}

/// Parse a string as a date, returning epoch milliseconds.
///
/// Accepts RFC 3339, `YYYY-MM-DDTHH:MM:SS[.fff]` (taken as UTC), and bare
/// `YYYY-MM-DD` (midnight UTC).
fn parse_epoch_millis(text: &str) -> Option<f64> {
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(text) {
        return Some(dt.timestamp_millis() as f64);
    }
    if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(dt.and_utc().timestamp_millis() as f64);
    }
    if let Ok(date) = chrono::NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        let midnight = date.and_hms_opt(0, 0, 0)?;
        return Some(midnight.and_utc().timestamp_millis() as f64);
    }
    None
}
