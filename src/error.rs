//! Error types for the edgequake-pdf2records library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`Pdf2RecordsError`]: **Fatal**: the pipeline cannot be set up at all
//!   (invalid configuration, provider not configured, output directory not
//!   writable). Returned as `Err(Pdf2RecordsError)` from constructors and
//!   persistence helpers.
//!
//! * [`ErrorDetails`]: **Per-document**: one file failed (bad header,
//!   inference timeout, unusable output) but the batch carries on. Stored
//!   inside [`crate::output::ConversionResult`] so callers inspect failures as
//!   data rather than losing a whole batch to one bad file.
//!
//! Every [`ErrorDetails`] carries an [`ErrorCode`] and the [`ProcessingStep`]
//! that produced it. Callers branch on those tags, never on message text.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-pdf2records library.
///
/// Document-level failures use [`ErrorDetails`] and are stored in
/// [`crate::output::ConversionResult`] rather than propagated here.
#[derive(Debug, Error)]
pub enum Pdf2RecordsError {
    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Inference errors ──────────────────────────────────────────────────
    /// The configured provider could not be constructed (missing API key etc.).
    #[error("Inference provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write an output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A result could not be serialised to JSON.
    #[error("Failed to serialise result: {0}")]
    Serialization(#[from] serde_json::Error),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Closed set of per-document failure codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    FileNotFound,
    InvalidInput,
    ExtractionFailed,
    InferenceServiceUnavailable,
    InferenceFailed,
    MappingFailed,
    ValidationFailed,
    ConfigurationError,
    Unknown,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::FileNotFound => "FILE_NOT_FOUND",
            ErrorCode::InvalidInput => "INVALID_INPUT",
            ErrorCode::ExtractionFailed => "EXTRACTION_FAILED",
            ErrorCode::InferenceServiceUnavailable => "INFERENCE_SERVICE_UNAVAILABLE",
            ErrorCode::InferenceFailed => "INFERENCE_FAILED",
            ErrorCode::MappingFailed => "MAPPING_FAILED",
            ErrorCode::ValidationFailed => "VALIDATION_FAILED",
            ErrorCode::ConfigurationError => "CONFIGURATION_ERROR",
            ErrorCode::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pipeline stages in execution order.
///
/// The derived `Ord` follows declaration order, so `VALIDATION < EXTRACTION <
/// INFERENCE < MAPPING < OUTPUT_VALIDATION`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessingStep {
    Validation,
    Extraction,
    Inference,
    Mapping,
    OutputValidation,
}

impl ProcessingStep {
    pub const ALL: [ProcessingStep; 5] = [
        ProcessingStep::Validation,
        ProcessingStep::Extraction,
        ProcessingStep::Inference,
        ProcessingStep::Mapping,
        ProcessingStep::OutputValidation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStep::Validation => "VALIDATION",
            ProcessingStep::Extraction => "EXTRACTION",
            ProcessingStep::Inference => "INFERENCE",
            ProcessingStep::Mapping => "MAPPING",
            ProcessingStep::OutputValidation => "OUTPUT_VALIDATION",
        }
    }
}

impl fmt::Display for ProcessingStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A non-fatal error for a single document.
///
/// Always attached to failed results; optionally attached to partial results
/// when a recoverable error was absorbed on the way.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[error("[{code}] {step}: {message}")]
pub struct ErrorDetails {
    pub code: ErrorCode,
    pub message: String,
    pub step: ProcessingStep,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ErrorDetails {
    /// Create an error stamped with the current time.
    pub fn new(code: ErrorCode, step: ProcessingStep, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            step,
            timestamp: Utc::now(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Merge a key into `details`, turning it into an object if needed.
    pub fn with_detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        match self.details {
            Some(Value::Object(ref mut map)) => {
                map.insert(key.to_string(), value.into());
            }
            Some(other) => {
                let mut map = serde_json::Map::new();
                map.insert("context".to_string(), other);
                map.insert(key.to_string(), value.into());
                self.details = Some(Value::Object(map));
            }
            None => {
                let mut map = serde_json::Map::new();
                map.insert(key.to_string(), value.into());
                self.details = Some(Value::Object(map));
            }
        }
        self
    }

    /// The `details.file` entry, if the error was tagged with its source.
    pub fn file(&self) -> Option<&str> {
        self.details.as_ref()?.get("file")?.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn error_details_display() {
        let e = ErrorDetails::new(
            ErrorCode::InvalidInput,
            ProcessingStep::Validation,
            "File is empty",
        );
        let msg = e.to_string();
        assert!(msg.contains("INVALID_INPUT"), "got: {msg}");
        assert!(msg.contains("VALIDATION"), "got: {msg}");
        assert!(msg.contains("File is empty"), "got: {msg}");
    }

    #[test]
    fn codes_serialise_screaming_snake() {
        let v = serde_json::to_value(ErrorCode::InferenceServiceUnavailable).unwrap();
        assert_eq!(v, json!("INFERENCE_SERVICE_UNAVAILABLE"));
        let v = serde_json::to_value(ProcessingStep::OutputValidation).unwrap();
        assert_eq!(v, json!("OUTPUT_VALIDATION"));
        for code in [ErrorCode::FileNotFound, ErrorCode::Unknown, ErrorCode::MappingFailed] {
            assert_eq!(serde_json::to_value(code).unwrap(), json!(code.as_str()));
        }
    }

    #[test]
    fn steps_are_ordered() {
        let mut sorted = ProcessingStep::ALL;
        sorted.sort();
        assert_eq!(sorted, ProcessingStep::ALL);
        assert!(ProcessingStep::Validation < ProcessingStep::OutputValidation);
    }

    #[test]
    fn with_detail_builds_object() {
        let e = ErrorDetails::new(ErrorCode::Unknown, ProcessingStep::Mapping, "x")
            .with_detail("file", "a.pdf")
            .with_detail("attempts", 2);
        assert_eq!(e.file(), Some("a.pdf"));
        assert_eq!(e.details.as_ref().unwrap()["attempts"], json!(2));
    }

    #[test]
    fn with_detail_wraps_non_object() {
        let e = ErrorDetails::new(ErrorCode::Unknown, ProcessingStep::Mapping, "x")
            .with_details(json!(["v1", "v2"]))
            .with_detail("file", "b.pdf");
        let details = e.details.unwrap();
        assert_eq!(details["context"], json!(["v1", "v2"]));
        assert_eq!(details["file"], json!("b.pdf"));
    }

    #[test]
    fn config_error_display() {
        let e = Pdf2RecordsError::InvalidConfig("concurrency must be 1–50, got 0".into());
        assert!(e.to_string().contains("concurrency"));
    }
}
