//! Result mapping: raw model JSON → [`ProcessedDocument`].
//!
//! Model output is duck-typed. The only structural probe is whether the top
//! level carries an array under `records` or `matches`:
//!
//! * yes → [`Analysis::Records`], every element sanitised field by field
//! * no  → [`Analysis::Generic`], the payload kept under `extractedData`
//!
//! Each logical field is looked up through an ordered list of candidate keys,
//! so `homeTeam`, `home_team` and `team1` all land in the same place.
//!
//! ## Drop vs. default
//!
//! A record missing either team is dropped. A non-object odds entry or a
//! market without a name is dropped from its record. Everything else is
//! coerced: non-strings become `""`, non-numbers become `0`, missing arrays
//! become empty.

use crate::error::{ErrorCode, ErrorDetails, ProcessingStep};
use crate::output::{
    Analysis, DocumentContent, DocumentMetadata, DocumentStatus, ExtractedRecordSet,
    GenericAnalysis, Market, OddsEntry, ProcessedDocument, Record,
};
use crate::pipeline::schema;
use serde_json::{json, Map, Value};
use std::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

/// Analysis kind given to payloads that could not be parsed.
pub const MALFORMED_KIND: &str = "malformed";

const RECORD_LIST_KEYS: &[&str] = &["records", "matches"];

const ID_KEYS: &[&str] = &["id", "matchId", "match_id"];
const HOME_TEAM_KEYS: &[&str] = &["homeTeam", "home_team", "team1", "home"];
const AWAY_TEAM_KEYS: &[&str] = &["awayTeam", "away_team", "team2", "away"];
const DATE_KEYS: &[&str] = &["date", "matchDate", "match_date"];
const TIME_KEYS: &[&str] = &["time", "kickoff", "matchTime", "match_time"];
const COUNTRY_KEYS: &[&str] = &["country", "region"];
const LEAGUE_KEYS: &[&str] = &["league", "competition", "tournament"];
const ROUND_KEYS: &[&str] = &["round", "matchday", "roundNumber", "round_number"];
const ODDS_KEYS: &[&str] = &["odds", "oddsEntries", "odds_entries"];
const MARKETS_KEYS: &[&str] = &["markets", "bettingMarkets", "additionalMarkets"];

const ODDS_HOME_KEYS: &[&str] = &["home", "homeWin", "1"];
const ODDS_DRAW_KEYS: &[&str] = &["draw", "x", "X"];
const ODDS_AWAY_KEYS: &[&str] = &["away", "awayWin", "2"];

const MARKET_NAME_KEYS: &[&str] = &["name", "market", "type"];
const MARKET_ODDS_KEYS: &[&str] = &["odds", "values", "prices"];

/// Identifiers for entities the model left unnamed.
///
/// One v7 UUID (timestamp + random) per mapping call plus a sequence number,
/// so ids never collide within a call.
struct IdGenerator {
    run: String,
    next: u64,
}

impl IdGenerator {
    fn new() -> Self {
        Self {
            run: Uuid::now_v7().simple().to_string(),
            next: 0,
        }
    }

    fn next(&mut self, prefix: &str) -> String {
        self.next += 1;
        format!("{}_{}_{}", prefix, self.run, self.next)
    }
}

/// Maps raw inference output onto the document schema.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResultMapper;

impl ResultMapper {
    pub fn new() -> Self {
        Self
    }

    /// Map a parsed model response into a document.
    ///
    /// Fails with `VALIDATION_FAILED` at the mapping step when the text is
    /// empty or the payload is `null`; otherwise always produces a document.
    pub fn map(
        &self,
        source_file: &str,
        original_text: &str,
        raw: &Value,
    ) -> Result<ProcessedDocument, ErrorDetails> {
        let start = Instant::now();

        if original_text.trim().is_empty() {
            return Err(ErrorDetails::new(
                ErrorCode::ValidationFailed,
                ProcessingStep::Mapping,
                "Original text must be a non-empty string",
            )
            .with_detail("file", source_file));
        }
        if raw.is_null() {
            return Err(ErrorDetails::new(
                ErrorCode::ValidationFailed,
                ProcessingStep::Mapping,
                "Analysis payload is missing",
            )
            .with_detail("file", source_file));
        }

        let analysis = match record_list(raw) {
            Some(items) => {
                let mut ids = IdGenerator::new();
                let records: Vec<Record> = items
                    .iter()
                    .filter_map(|item| map_record(item, &mut ids))
                    .collect();
                let dropped = items.len() - records.len();
                if dropped > 0 {
                    debug!("{}: dropped {} invalid record(s)", source_file, dropped);
                }
                Analysis::Records(ExtractedRecordSet::new(records))
            }
            None => Analysis::Generic(generic_analysis(raw)),
        };

        let mut metadata = DocumentMetadata::new(source_file, original_text.chars().count());
        metadata.processing_time_ms = start.elapsed().as_millis() as u64;

        Ok(ProcessedDocument {
            metadata,
            content: DocumentContent {
                original_text: original_text.to_string(),
                analysis,
            },
            status: DocumentStatus::Success,
        })
    }

    /// Degraded path for a payload that could not be mapped.
    ///
    /// Accepts any value, `null` included. The result is a generic analysis of
    /// kind `"malformed"` with `status: partial`.
    pub fn map_malformed(&self, source_file: &str, original_text: &str, raw: &Value) -> ProcessedDocument {
        warn!("{}: using malformed-response fallback", source_file);
        let summary = match raw {
            Value::String(s) => truncate_summary(s),
            Value::Null => "No analysis payload".to_string(),
            _ => "Analysis payload did not match the record schema".to_string(),
        };
        ProcessedDocument {
            metadata: DocumentMetadata::new(source_file, original_text.chars().count()),
            content: DocumentContent {
                original_text: original_text.to_string(),
                analysis: Analysis::Generic(GenericAnalysis {
                    kind: MALFORMED_KIND.to_string(),
                    summary,
                    extracted_data: wrap_raw(raw),
                }),
            },
            status: DocumentStatus::Partial,
        }
    }

    /// `true` when the document passes schema validation.
    pub fn validate(&self, document: &ProcessedDocument) -> bool {
        schema::validate_document(document)
    }

    /// Every schema violation in the document, path-qualified.
    pub fn validate_detailed(&self, document: &ProcessedDocument) -> Vec<String> {
        schema::document_violations(document)
    }
}

fn record_list(raw: &Value) -> Option<&Vec<Value>> {
    let obj = raw.as_object()?;
    RECORD_LIST_KEYS
        .iter()
        .find_map(|key| obj.get(*key).and_then(Value::as_array))
}

fn generic_analysis(raw: &Value) -> GenericAnalysis {
    match raw.as_object() {
        Some(obj) => GenericAnalysis {
            kind: obj
                .get("type")
                .or_else(|| obj.get("kind"))
                .and_then(Value::as_str)
                .filter(|s| !s.trim().is_empty())
                .unwrap_or("generic")
                .to_string(),
            summary: text(obj.get("summary")),
            extracted_data: obj.clone(),
        },
        None => GenericAnalysis {
            kind: "generic".to_string(),
            summary: String::new(),
            extracted_data: wrap_raw(raw),
        },
    }
}

fn wrap_raw(raw: &Value) -> Map<String, Value> {
    match raw {
        Value::Object(obj) => obj.clone(),
        other => {
            let mut map = Map::new();
            map.insert("raw".to_string(), other.clone());
            map
        }
    }
}

fn truncate_summary(s: &str) -> String {
    const MAX: usize = 200;
    match s.char_indices().nth(MAX) {
        Some((cut, _)) => format!("{}...", &s[..cut]),
        None => s.to_string(),
    }
}

// ── Field lookup and coercion ────────────────────────────────────────────────

/// First non-null value among the candidate keys.
fn lookup<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| obj.get(*key))
        .find(|v| !v.is_null())
}

fn text(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.trim().to_string(),
        _ => String::new(),
    }
}

/// Identifiers may arrive as numbers.
fn identifier(value: Option<&Value>) -> Option<String> {
    let id = match value? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!id.is_empty()).then_some(id)
}

fn number(value: Option<&Value>) -> f64 {
    let n = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    n.filter(|n| n.is_finite()).unwrap_or(0.0)
}

fn integer(value: Option<&Value>) -> i64 {
    match value {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64))
            .unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse::<i64>().unwrap_or(0),
        _ => 0,
    }
}

/// An array field; a lone object counts as a one-element array.
fn list(value: Option<&Value>) -> Vec<&Value> {
    match value {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(obj @ Value::Object(_)) => vec![obj],
        _ => Vec::new(),
    }
}

// ── Element mapping ──────────────────────────────────────────────────────────

fn map_record(item: &Value, ids: &mut IdGenerator) -> Option<Record> {
    let obj = item.as_object()?;

    let home_team = text(lookup(obj, HOME_TEAM_KEYS));
    let away_team = text(lookup(obj, AWAY_TEAM_KEYS));
    if home_team.is_empty() || away_team.is_empty() {
        return None;
    }

    let odds = list(lookup(obj, ODDS_KEYS))
        .into_iter()
        .filter_map(|entry| map_odds_entry(entry, ids))
        .collect();
    let markets = list(lookup(obj, MARKETS_KEYS))
        .into_iter()
        .filter_map(|market| map_market(market, ids))
        .collect();

    Some(Record {
        id: identifier(lookup(obj, ID_KEYS)).unwrap_or_else(|| ids.next("match")),
        home_team,
        away_team,
        date: text(lookup(obj, DATE_KEYS)),
        time: text(lookup(obj, TIME_KEYS)),
        country: text(lookup(obj, COUNTRY_KEYS)),
        league: text(lookup(obj, LEAGUE_KEYS)),
        round: integer(lookup(obj, ROUND_KEYS)),
        odds,
        markets,
    })
}

fn map_odds_entry(entry: &Value, ids: &mut IdGenerator) -> Option<OddsEntry> {
    let obj = entry.as_object()?;
    Some(OddsEntry {
        id: identifier(obj.get("id")).unwrap_or_else(|| ids.next("odds")),
        home: number(lookup(obj, ODDS_HOME_KEYS)),
        draw: number(lookup(obj, ODDS_DRAW_KEYS)),
        away: number(lookup(obj, ODDS_AWAY_KEYS)),
    })
}

fn map_market(market: &Value, ids: &mut IdGenerator) -> Option<Market> {
    let obj = market.as_object()?;
    let name = text(lookup(obj, MARKET_NAME_KEYS));
    if name.is_empty() {
        return None;
    }
    let odds = match lookup(obj, MARKET_ODDS_KEYS) {
        Some(Value::Array(items)) => items.iter().map(|v| number(Some(v))).collect(),
        Some(single @ (Value::Number(_) | Value::String(_))) => vec![number(Some(single))],
        _ => Vec::new(),
    };
    Some(Market {
        id: identifier(obj.get("id")).unwrap_or_else(|| ids.next("market")),
        name,
        odds,
    })
}

/// Build the partial-result warning for a mapping failure that was absorbed.
pub(crate) fn degraded_warning(code: ErrorCode, step: ProcessingStep, message: &str, file: &str) -> ErrorDetails {
    ErrorDetails::new(code, step, message).with_details(json!({ "file": file, "degraded": true }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    const TEXT: &str = "Premier League round 27\nArsenal v Chelsea 1.85 3.40 4.20";

    fn map(raw: Value) -> ProcessedDocument {
        ResultMapper::new().map("week27.pdf", TEXT, &raw).unwrap()
    }

    fn records(doc: &ProcessedDocument) -> &[Record] {
        doc.content.analysis.records().expect("structured analysis")
    }

    #[test]
    fn maps_canonical_record() {
        let doc = map(json!({"matches": [{
            "id": "m1",
            "homeTeam": "Arsenal",
            "awayTeam": "Chelsea",
            "date": "2024-03-02",
            "time": "15:00",
            "country": "England",
            "league": "Premier League",
            "round": 27,
            "odds": [{"id": "o1", "home": 1.85, "draw": 3.4, "away": 4.2}],
            "markets": [{"id": "k1", "name": "Over 2.5", "odds": [1.9, 1.95]}]
        }]}));

        assert_eq!(doc.status, DocumentStatus::Success);
        assert_eq!(doc.metadata.source_file, "week27.pdf");
        assert_eq!(doc.metadata.text_length, TEXT.chars().count());
        let r = &records(&doc)[0];
        assert_eq!(r.id, "m1");
        assert_eq!(r.round, 27);
        assert_eq!(r.odds[0].draw, 3.4);
        assert_eq!(r.markets[0].odds, vec![1.9, 1.95]);
        assert!(ResultMapper::new().validate(&doc));
    }

    #[test]
    fn accepts_aliased_field_names() {
        let doc = map(json!({"records": [{
            "match_id": 42,
            "team1": "Inter",
            "team2": "Milan",
            "kickoff": "20:45",
            "competition": "Serie A",
            "matchday": "12",
            "oddsEntries": [{"homeWin": "2.10", "X": 3.2, "awayWin": 3.5}],
            "bettingMarkets": [{"market": "BTTS", "prices": ["1.70", 2.05]}]
        }]}));

        let r = &records(&doc)[0];
        assert_eq!(r.id, "42");
        assert_eq!(r.home_team, "Inter");
        assert_eq!(r.away_team, "Milan");
        assert_eq!(r.time, "20:45");
        assert_eq!(r.league, "Serie A");
        assert_eq!(r.round, 12);
        assert_eq!(r.odds[0].home, 2.10);
        assert_eq!(r.odds[0].draw, 3.2);
        assert_eq!(r.markets[0].name, "BTTS");
        assert_eq!(r.markets[0].odds, vec![1.70, 2.05]);
    }

    #[test]
    fn drops_invalid_records_and_keeps_valid_ones() {
        let doc = map(json!({"matches": [
            {"homeTeam": "A", "awayTeam": "B"},
            {"homeTeam": "  ", "awayTeam": "B"},
            {"homeTeam": "C"},
            "not an object",
            {"homeTeam": "E", "awayTeam": "F"},
            {"homeTeam": 7, "awayTeam": "G"}
        ]}));

        let set = match &doc.content.analysis {
            Analysis::Records(set) => set,
            other => panic!("expected records, got {other:?}"),
        };
        assert_eq!(set.records.len(), 2);
        assert_eq!(set.total_records, 2);
        assert_eq!(set.records[1].home_team, "E");
    }

    #[test]
    fn coerces_fields_with_defaults() {
        let doc = map(json!({"matches": [{
            "homeTeam": "A",
            "awayTeam": "B",
            "date": 20240302,
            "country": null,
            "round": "first",
            "odds": [{"home": "n/a", "draw": null}]
        }]}));

        let r = &records(&doc)[0];
        assert_eq!(r.date, "");
        assert_eq!(r.country, "");
        assert_eq!(r.round, 0);
        assert!(r.markets.is_empty());
        assert_eq!(r.odds[0].home, 0.0);
        assert_eq!(r.odds[0].draw, 0.0);
        assert_eq!(r.odds[0].away, 0.0);
    }

    #[test]
    fn malformed_nested_entries_are_dropped_not_the_record() {
        let doc = map(json!({"matches": [{
            "homeTeam": "A",
            "awayTeam": "B",
            "odds": [1.5, {"home": 1.5, "draw": 3.0, "away": 5.0}, "x"],
            "markets": [{"odds": [1.1]}, {"name": "Handicap -1", "odds": 2.2}, null]
        }]}));

        let r = &records(&doc)[0];
        assert_eq!(r.odds.len(), 1);
        assert_eq!(r.markets.len(), 1);
        assert_eq!(r.markets[0].odds, vec![2.2]);
    }

    #[test]
    fn generated_ids_are_unique_within_a_call() {
        let items: Vec<Value> = (0..50)
            .map(|_| json!({"homeTeam": "A", "awayTeam": "B", "odds": [{"home": 1.0}], "markets": [{"name": "m"}]}))
            .collect();
        let doc = map(json!({ "matches": items }));

        let mut seen = HashSet::new();
        for r in records(&doc) {
            assert!(seen.insert(r.id.clone()));
            assert!(seen.insert(r.odds[0].id.clone()));
            assert!(seen.insert(r.markets[0].id.clone()));
        }
        assert_eq!(seen.len(), 150);
        assert!(records(&doc)[0].id.starts_with("match_"));
    }

    #[test]
    fn object_without_record_list_becomes_generic() {
        let doc = map(json!({"type": "invoice", "summary": "An invoice", "total": 12.5}));
        match &doc.content.analysis {
            Analysis::Generic(g) => {
                assert_eq!(g.kind, "invoice");
                assert_eq!(g.summary, "An invoice");
                assert_eq!(g.extracted_data["total"], json!(12.5));
            }
            other => panic!("expected generic, got {other:?}"),
        }
        assert_eq!(doc.status, DocumentStatus::Success);
    }

    #[test]
    fn non_array_records_field_is_generic() {
        let doc = map(json!({"records": "none"}));
        assert!(matches!(doc.content.analysis, Analysis::Generic(_)));
    }

    #[test]
    fn empty_record_list_is_structured() {
        let doc = map(json!({"records": []}));
        assert_eq!(records(&doc).len(), 0);
        assert!(ResultMapper::new().validate(&doc));
    }

    #[test]
    fn rejects_empty_text_and_null_payload() {
        let mapper = ResultMapper::new();

        let err = mapper.map("a.pdf", "   ", &json!({"records": []})).unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationFailed);
        assert_eq!(err.step, ProcessingStep::Mapping);

        let err = mapper.map("a.pdf", TEXT, &Value::Null).unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationFailed);
        assert_eq!(err.file(), Some("a.pdf"));
    }

    #[test]
    fn malformed_path_is_partial() {
        let mapper = ResultMapper::new();
        for raw in [json!("I found nothing"), Value::Null, json!([1, 2]), json!({"weird": true})] {
            let doc = mapper.map_malformed("a.pdf", TEXT, &raw);
            assert_eq!(doc.status, DocumentStatus::Partial);
            match &doc.content.analysis {
                Analysis::Generic(g) => assert_eq!(g.kind, MALFORMED_KIND),
                other => panic!("expected generic, got {other:?}"),
            }
            assert!(mapper.validate(&doc), "{raw} should validate");
        }
    }

    #[test]
    fn validate_detailed_lists_violations() {
        let mapper = ResultMapper::new();
        let mut doc = map(json!({"matches": [{"homeTeam": "A", "awayTeam": "B"}]}));
        if let Analysis::Records(set) = &mut doc.content.analysis {
            set.total_records = 5;
            set.records[0].away_team = String::new();
        }
        let violations = mapper.validate_detailed(&doc);
        assert_eq!(violations.len(), 2);
        assert!(!mapper.validate(&doc));
    }
}
