//! # edgequake-pdf2records
//!
//! Turn PDF fixture lists and betting sheets into structured, validated
//! match records using a Large Language Model.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Validate  existence, extension, size, %PDF signature
//!  ├─ 2. Extract   page text via pdfium (CPU-bound, spawn_blocking) + cleanup
//!  ├─ 3. Infer     Ollama / OpenAI / Anthropic / … with timeout + retries
//!  ├─ 4. Map       duck-typed JSON → records, or a generic fallback
//!  └─ 5. Check     schema validation; degrade to a partial result on failure
//! ```
//!
//! Every document yields exactly one [`ConversionResult`], success or
//! failure; per-document problems are data, never `Err`. Batches run
//! directory-wide under a concurrency cap via [`BatchRunner`], and every
//! stage reports into a shared [`MetricsCollector`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_pdf2records::{BatchRunner, MetricsCollector, Pipeline, PipelineConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Local Ollama at http://localhost:11434 by default
//!     let config = PipelineConfig::builder().model("llama3.1").concurrency(4).build()?;
//!     let metrics = Arc::new(MetricsCollector::new());
//!     let pipeline = Arc::new(Pipeline::from_config(&config, Arc::clone(&metrics))?);
//!
//!     let results = BatchRunner::from_config(pipeline, &config)
//!         .process_batch(&config.source_dir)
//!         .await;
//!     for result in &results {
//!         println!("{}", serde_json::to_string_pretty(result)?);
//!     }
//!     eprintln!("{}", metrics.summary());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdf2records` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-pdf2records = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod batch;
pub mod config;
pub mod convert;
pub mod error;
pub mod metrics;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use batch::BatchRunner;
pub use config::{PipelineConfig, PipelineConfigBuilder};
pub use convert::{write_result, Pipeline};
pub use error::{ErrorCode, ErrorDetails, Pdf2RecordsError, ProcessingStep};
pub use metrics::{InferenceOutcome, MetricsCollector, MetricsSnapshot, RecentStats};
pub use output::{
    Analysis, ConversionResult, DocumentContent, DocumentMetadata, DocumentStatus,
    ExtractedRecordSet, GenericAnalysis, Market, OddsEntry, Outcome, ProcessedDocument, Record,
};
pub use pipeline::backend::{
    BackendError, InferenceBackend, InferenceRequest, InferenceResponse, OllamaBackend,
    ProviderBackend,
};
pub use pipeline::extract::{ParseError, PdfParser, PdfiumParser, TextExtractor};
pub use pipeline::inference::{AnalysisResult, FailureKind, InferenceClient, InferenceFailure};
pub use pipeline::mapper::ResultMapper;
pub use progress::{BatchProgressCallback, NoopProgressCallback, ProgressCallback};
pub use stream::ResultStream;
