//! Output types: the per-document result and the structured records it carries.
//!
//! Every conversion produces exactly one [`ConversionResult`]. On the wire it
//! is a flat object discriminated by a boolean:
//!
//! ```json
//! { "success": true,  "document": { "metadata": …, "content": …, "status": "success" } }
//! { "success": false, "error":    { "code": "INVALID_INPUT", "step": "VALIDATION", … } }
//! ```
//!
//! A successful result may still carry an `error` when the document was
//! produced on a degraded path (`status: "partial"`).

use crate::error::ErrorDetails;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// The outcome of converting one document. Immutable once returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "WireResult", try_from = "WireResult")]
pub enum ConversionResult {
    Success {
        document: Box<ProcessedDocument>,
        /// Recoverable error absorbed while producing a partial document.
        warning: Option<ErrorDetails>,
    },
    Failure {
        error: ErrorDetails,
    },
}

/// Three-way classification callers can branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Partial,
    Failed,
}

impl ConversionResult {
    pub fn success(document: ProcessedDocument) -> Self {
        ConversionResult::Success {
            document: Box::new(document),
            warning: None,
        }
    }

    pub fn partial(document: ProcessedDocument, warning: Option<ErrorDetails>) -> Self {
        ConversionResult::Success {
            document: Box::new(document),
            warning,
        }
    }

    pub fn failure(error: ErrorDetails) -> Self {
        ConversionResult::Failure { error }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ConversionResult::Success { .. })
    }

    pub fn outcome(&self) -> Outcome {
        match self {
            ConversionResult::Success { document, .. } => match document.status {
                DocumentStatus::Success => Outcome::Success,
                DocumentStatus::Partial => Outcome::Partial,
                DocumentStatus::Failed => Outcome::Failed,
            },
            ConversionResult::Failure { .. } => Outcome::Failed,
        }
    }

    pub fn document(&self) -> Option<&ProcessedDocument> {
        match self {
            ConversionResult::Success { document, .. } => Some(document),
            ConversionResult::Failure { .. } => None,
        }
    }

    /// The failure error, or the warning attached to a partial document.
    pub fn error(&self) -> Option<&ErrorDetails> {
        match self {
            ConversionResult::Success { warning, .. } => warning.as_ref(),
            ConversionResult::Failure { error } => Some(error),
        }
    }

    /// Identifier of the input file this result belongs to, if known.
    pub fn source_file(&self) -> Option<&str> {
        match self {
            ConversionResult::Success { document, .. } => Some(&document.metadata.source_file),
            ConversionResult::Failure { error } => error.file(),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct WireResult {
    success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    document: Option<ProcessedDocument>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<ErrorDetails>,
}

impl From<ConversionResult> for WireResult {
    fn from(result: ConversionResult) -> Self {
        match result {
            ConversionResult::Success { document, warning } => WireResult {
                success: true,
                document: Some(*document),
                error: warning,
            },
            ConversionResult::Failure { error } => WireResult {
                success: false,
                document: None,
                error: Some(error),
            },
        }
    }
}

impl TryFrom<WireResult> for ConversionResult {
    type Error = String;

    fn try_from(wire: WireResult) -> Result<Self, Self::Error> {
        match (wire.success, wire.document, wire.error) {
            (true, Some(document), warning) => Ok(ConversionResult::Success {
                document: Box::new(document),
                warning,
            }),
            (false, _, Some(error)) => Ok(ConversionResult::Failure { error }),
            (true, None, _) => Err("successful result is missing 'document'".to_string()),
            (false, _, None) => Err("failed result is missing 'error'".to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Success,
    Partial,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedDocument {
    pub metadata: DocumentMetadata,
    pub content: DocumentContent,
    pub status: DocumentStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMetadata {
    /// File name of the original input.
    pub source_file: String,
    pub processed_at: DateTime<Utc>,
    /// Length of the extracted text in characters.
    pub text_length: usize,
    /// Wall-clock time from pipeline entry to completion.
    pub processing_time_ms: u64,
    /// Free-form extras (file size, model, attempts, …).
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl DocumentMetadata {
    pub fn new(source_file: impl Into<String>, text_length: usize) -> Self {
        Self {
            source_file: source_file.into(),
            processed_at: Utc::now(),
            text_length,
            processing_time_ms: 0,
            extra: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentContent {
    /// Extracted text, verbatim.
    pub original_text: String,
    pub analysis: Analysis,
}

/// Either structured records or a generic fallback.
///
/// Untagged: the two shapes have disjoint required fields, so the
/// structural probe on deserialisation is unambiguous.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Analysis {
    Records(ExtractedRecordSet),
    Generic(GenericAnalysis),
}

impl Analysis {
    pub fn records(&self) -> Option<&[Record]> {
        match self {
            Analysis::Records(set) => Some(&set.records),
            Analysis::Generic(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedRecordSet {
    pub records: Vec<Record>,
    pub total_records: usize,
}

impl ExtractedRecordSet {
    /// Build a set whose `total_records` always equals `records.len()`.
    pub fn new(records: Vec<Record>) -> Self {
        let total_records = records.len();
        Self {
            records,
            total_records,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenericAnalysis {
    pub kind: String,
    pub summary: String,
    pub extracted_data: Map<String, Value>,
}

/// One extracted match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub id: String,
    pub home_team: String,
    pub away_team: String,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub time: String,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub league: String,
    #[serde(default)]
    pub round: i64,
    #[serde(default)]
    pub odds: Vec<OddsEntry>,
    #[serde(default)]
    pub markets: Vec<Market>,
}

/// 1X2 prices for a match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OddsEntry {
    pub id: String,
    #[serde(default)]
    pub home: f64,
    #[serde(default)]
    pub draw: f64,
    #[serde(default)]
    pub away: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Market {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub odds: Vec<f64>,
}
