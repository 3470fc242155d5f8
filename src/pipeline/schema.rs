//! Output schema validation for processed documents.
//!
//! Validation works on the serialised JSON form so it checks exactly what
//! gets written to disk. [`validate_value`] collects every violation with a
//! path-qualified message; [`validate_document`] is the boolean shortcut.

use crate::output::ProcessedDocument;
use chrono::DateTime;
use serde_json::{Map, Value};

const STATUSES: [&str; 3] = ["success", "partial", "failed"];

/// `true` when the document has no schema violations.
pub fn validate_document(document: &ProcessedDocument) -> bool {
    document_violations(document).is_empty()
}

/// Every schema violation in `document`.
pub fn document_violations(document: &ProcessedDocument) -> Vec<String> {
    match serde_json::to_value(document) {
        Ok(value) => validate_value(&value),
        Err(e) => vec![format!("document could not be serialised: {e}")],
    }
}

/// Every schema violation in a serialised document.
pub fn validate_value(value: &Value) -> Vec<String> {
    let mut v = Violations::default();

    let Some(root) = value.as_object() else {
        v.push("", "document must be an object");
        return v.0;
    };

    match root.get("metadata").and_then(Value::as_object) {
        Some(metadata) => check_metadata(metadata, &mut v),
        None => v.push("metadata", "must be an object"),
    }

    match root.get("content").and_then(Value::as_object) {
        Some(content) => {
            if !content.get("originalText").is_some_and(Value::is_string) {
                v.push("content.originalText", "must be a string");
            }
            match content.get("analysis").and_then(Value::as_object) {
                Some(analysis) => check_analysis(analysis, &mut v),
                None => v.push("content.analysis", "must be an object"),
            }
        }
        None => v.push("content", "must be an object"),
    }

    let status_ok = root
        .get("status")
        .and_then(Value::as_str)
        .is_some_and(|s| STATUSES.contains(&s));
    if !status_ok {
        v.push("status", "must be one of success, partial, failed");
    }

    v.0
}

#[derive(Default)]
struct Violations(Vec<String>);

impl Violations {
    fn push(&mut self, path: &str, message: &str) {
        if path.is_empty() {
            self.0.push(message.to_string());
        } else {
            self.0.push(format!("{path} {message}"));
        }
    }
}

fn is_non_empty_string(value: Option<&Value>) -> bool {
    value
        .and_then(Value::as_str)
        .is_some_and(|s| !s.trim().is_empty())
}

fn is_count(value: Option<&Value>) -> bool {
    value.is_some_and(Value::is_u64)
}

// ── Metadata ─────────────────────────────────────────────────────────────────

fn check_metadata(metadata: &Map<String, Value>, v: &mut Violations) {
    if !is_non_empty_string(metadata.get("sourceFile")) {
        v.push("metadata.sourceFile", "must be a non-empty string");
    }
    let timestamp_ok = metadata
        .get("processedAt")
        .and_then(Value::as_str)
        .is_some_and(|s| DateTime::parse_from_rfc3339(s).is_ok());
    if !timestamp_ok {
        v.push("metadata.processedAt", "must be an ISO-8601 timestamp");
    }
    if !is_count(metadata.get("textLength")) {
        v.push("metadata.textLength", "must be a non-negative integer");
    }
    if !is_count(metadata.get("processingTimeMs")) {
        v.push("metadata.processingTimeMs", "must be a non-negative integer");
    }
}

// ── Analysis ─────────────────────────────────────────────────────────────────

fn check_analysis(analysis: &Map<String, Value>, v: &mut Violations) {
    if analysis.contains_key("records") {
        check_record_set(analysis, v);
    } else {
        if !is_non_empty_string(analysis.get("kind")) {
            v.push("kind", "must be a non-empty string");
        }
        if !analysis.get("summary").is_some_and(Value::is_string) {
            v.push("summary", "must be a string");
        }
        if !analysis.get("extractedData").is_some_and(Value::is_object) {
            v.push("extractedData", "must be an object");
        }
    }
}

fn check_record_set(analysis: &Map<String, Value>, v: &mut Violations) {
    let Some(records) = analysis.get("records").and_then(Value::as_array) else {
        v.push("records", "must be an array");
        return;
    };

    match analysis.get("totalRecords").and_then(Value::as_u64) {
        Some(total) if total as usize == records.len() => {}
        Some(total) => v.push(
            "totalRecords",
            &format!("must equal the number of records ({} != {})", total, records.len()),
        ),
        None => v.push("totalRecords", "must be a non-negative integer"),
    }

    for (i, record) in records.iter().enumerate() {
        check_record(&format!("records[{i}]"), record, v);
    }
}

fn check_record(path: &str, record: &Value, v: &mut Violations) {
    let Some(record) = record.as_object() else {
        v.push(path, "must be an object");
        return;
    };

    for field in ["id", "homeTeam", "awayTeam"] {
        if !is_non_empty_string(record.get(field)) {
            v.push(&format!("{path}.{field}"), "must be a non-empty string");
        }
    }
    for field in ["date", "time", "country", "league"] {
        if !record.get(field).is_some_and(Value::is_string) {
            v.push(&format!("{path}.{field}"), "must be a string");
        }
    }
    if !record.get("round").is_some_and(|r| r.is_i64() || r.is_u64()) {
        v.push(&format!("{path}.round"), "must be an integer");
    }

    match record.get("odds").and_then(Value::as_array) {
        Some(odds) => {
            for (j, entry) in odds.iter().enumerate() {
                check_odds_entry(&format!("{path}.odds[{j}]"), entry, v);
            }
        }
        None => v.push(&format!("{path}.odds"), "must be an array"),
    }

    match record.get("markets").and_then(Value::as_array) {
        Some(markets) => {
            for (j, market) in markets.iter().enumerate() {
                check_market(&format!("{path}.markets[{j}]"), market, v);
            }
        }
        None => v.push(&format!("{path}.markets"), "must be an array"),
    }
}

fn check_odds_entry(path: &str, entry: &Value, v: &mut Violations) {
    let Some(entry) = entry.as_object() else {
        v.push(path, "must be an object");
        return;
    };
    if !is_non_empty_string(entry.get("id")) {
        v.push(&format!("{path}.id"), "must be a non-empty string");
    }
    for field in ["home", "draw", "away"] {
        if !entry.get(field).is_some_and(Value::is_number) {
            v.push(&format!("{path}.{field}"), "must be a number");
        }
    }
}

fn check_market(path: &str, market: &Value, v: &mut Violations) {
    let Some(market) = market.as_object() else {
        v.push(path, "must be an object");
        return;
    };
    if !is_non_empty_string(market.get("id")) {
        v.push(&format!("{path}.id"), "must be a non-empty string");
    }
    if !is_non_empty_string(market.get("name")) {
        v.push(&format!("{path}.name"), "must be a non-empty string");
    }
    match market.get("odds").and_then(Value::as_array) {
        Some(odds) => {
            if !odds.iter().all(Value::is_number) {
                v.push(&format!("{path}.odds"), "must contain only numbers");
            }
        }
        None => v.push(&format!("{path}.odds"), "must be an array"),
    }
}
