//! Pipeline orchestrator: one document in, one [`ConversionResult`] out.
//!
//! ```text
//! START → VALIDATION → EXTRACTION → INFERENCE → MAPPING → OUTPUT_VALIDATION → SUCCESS
//!              │            │            │           │              │
//!              └────────────┴────────────┴───────────┴──────────────┴──────→ FAILED
//! ```
//!
//! Transitions are linear. Each stage returns its failure as an
//! [`ErrorDetails`] already tagged with code and step; a panic anywhere in a
//! stage is caught at the boundary and reported as `UNKNOWN` / `VALIDATION`.
//! [`Pipeline::convert`] never returns `Err` and never unwinds.
//!
//! Mapping problems degrade instead of failing: a payload that cannot be
//! mapped, or a mapped document that fails schema validation, becomes a
//! `partial` document on the malformed path with the absorbed error attached.

use crate::config::PipelineConfig;
use crate::error::{ErrorCode, ErrorDetails, Pdf2RecordsError, ProcessingStep};
use crate::metrics::MetricsCollector;
use crate::output::{ConversionResult, DocumentStatus, ProcessedDocument};
use crate::pipeline::backend::{resolve_backend, InferenceBackend};
use crate::pipeline::extract::{display_name, untagged_failure, PdfParser, PdfiumParser, TextExtractor};
use crate::pipeline::inference::{InferenceClient, InferenceSettings};
use crate::pipeline::mapper::{degraded_warning, ResultMapper};
use futures::FutureExt;
use serde_json::{json, Value};
use std::any::Any;
use std::io::Write;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Converts single documents. Cheap to share behind an `Arc`.
pub struct Pipeline {
    extractor: TextExtractor,
    inference: InferenceClient,
    mapper: ResultMapper,
    metrics: Arc<MetricsCollector>,
}

impl Pipeline {
    /// Assemble a pipeline from explicit collaborators.
    pub fn new(
        config: &PipelineConfig,
        parser: Arc<dyn PdfParser>,
        backend: Arc<dyn InferenceBackend>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            extractor: TextExtractor::new(parser, config.max_file_size_bytes, config.max_text_length),
            inference: InferenceClient::new(
                backend,
                InferenceSettings::from_config(config),
                Arc::clone(&metrics),
            ),
            mapper: ResultMapper::new(),
            metrics,
        }
    }

    /// Assemble a pipeline with pdfium and the configured inference backend.
    ///
    /// # Errors
    /// Returns `Err` when the configuration is invalid or the provider cannot
    /// be constructed.
    pub fn from_config(
        config: &PipelineConfig,
        metrics: Arc<MetricsCollector>,
    ) -> Result<Self, Pdf2RecordsError> {
        config.validate()?;
        let backend = resolve_backend(config)?;
        info!("Using inference backend {}", backend.name());
        Ok(Self::new(config, Arc::new(PdfiumParser), backend, metrics))
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    pub fn extractor(&self) -> &TextExtractor {
        &self.extractor
    }

    pub fn inference(&self) -> &InferenceClient {
        &self.inference
    }

    pub fn mapper(&self) -> &ResultMapper {
        &self.mapper
    }

    /// Whether the inference service is reachable (cached).
    pub async fn test_connection(&self) -> bool {
        self.inference.test_connection().await
    }

    /// Convert one PDF file.
    pub async fn convert(&self, path: impl AsRef<Path>) -> ConversionResult {
        let path = path.as_ref();
        let start = Instant::now();
        info!("Starting conversion: {}", path.display());

        let result = match AssertUnwindSafe(self.run(path, start)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                let msg = panic_message(panic.as_ref());
                error!("{}: conversion panicked: {}", path.display(), msg);
                ConversionResult::failure(untagged_failure(
                    path,
                    format!("Unexpected error during conversion: {msg}"),
                ))
            }
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        if let Some(err) = result.error() {
            self.metrics.record_error(err.code, err.step);
        }
        let text_length = result.document().map_or(0, |d| d.metadata.text_length);
        self.metrics
            .record_conversion(result.outcome(), duration_ms, text_length);

        match &result {
            ConversionResult::Success { document, .. } => info!(
                "Conversion complete: {} ({:?}, {} chars, {}ms)",
                document.metadata.source_file, document.status, text_length, duration_ms
            ),
            ConversionResult::Failure { error } => warn!(
                "Conversion failed: {} ({}ms): {}",
                path.display(),
                duration_ms,
                error
            ),
        }
        result
    }

    /// Convert PDF bytes held in memory.
    ///
    /// The bytes go to a managed temporary file that is removed on return;
    /// `name` replaces the temporary file name in the result.
    pub async fn convert_bytes(&self, bytes: &[u8], name: &str) -> ConversionResult {
        let tmp = tempfile::Builder::new()
            .prefix("pdf2records-")
            .suffix(".pdf")
            .tempfile()
            .and_then(|mut tmp| tmp.write_all(bytes).map(|_| tmp));
        let tmp = match tmp {
            Ok(tmp) => tmp,
            Err(e) => {
                return ConversionResult::failure(untagged_failure(
                    Path::new(name),
                    format!("Failed to stage bytes in a temporary file: {e}"),
                ))
            }
        };
        // `tmp` is dropped (and the file deleted) when `convert` returns
        let result = self.convert(tmp.path()).await;
        rename_source(result, name)
    }

    async fn run(&self, path: &Path, start: Instant) -> ConversionResult {
        let name = display_name(path);

        // ── Step 1: Validate input ───────────────────────────────────────
        let stage = Instant::now();
        let validated = self.extractor.validate(path).await;
        self.finish_stage(ProcessingStep::Validation, stage);
        let file = match validated {
            Ok(file) => file,
            Err(e) => return ConversionResult::failure(e),
        };

        // ── Step 2: Extract text ─────────────────────────────────────────
        let stage = Instant::now();
        let extracted = self.extractor.extract_text(path).await;
        self.finish_stage(ProcessingStep::Extraction, stage);
        let extracted = match extracted {
            Ok(extracted) => extracted,
            Err(e) => return ConversionResult::failure(e),
        };

        // ── Step 3: Inference ────────────────────────────────────────────
        let stage = Instant::now();
        let analysis = self.inference.analyze(&extracted.text).await;
        self.finish_stage(ProcessingStep::Inference, stage);
        let raw = match analysis.result {
            Ok(raw) => raw,
            Err(failure) => {
                return ConversionResult::failure(
                    failure.to_error_details().with_detail("file", name.as_str()),
                )
            }
        };

        // ── Step 4: Map to schema ────────────────────────────────────────
        let stage = Instant::now();
        // Text is non-empty after step 2 and objects are never null, so the
        // mapper's own input guard only trips for direct callers.
        let mapped = if raw.is_object() {
            self.mapper
                .map(&name, &extracted.text, &raw)
                .map_err(|e| e.message)
        } else {
            Err("Inference response is not a JSON object".to_string())
        };
        let (mut document, mut warning) = match mapped {
            Ok(document) => (document, None),
            Err(message) => {
                warn!("{}: mapping failed, degrading: {}", name, message);
                (
                    self.mapper.map_malformed(&name, &extracted.text, &raw),
                    Some(degraded_warning(
                        ErrorCode::MappingFailed,
                        ProcessingStep::Mapping,
                        &message,
                        &name,
                    )),
                )
            }
        };
        self.finish_stage(ProcessingStep::Mapping, stage);

        // ── Step 5: Validate output ──────────────────────────────────────
        let stage = Instant::now();
        let violations = self.mapper.validate_detailed(&document);
        if !violations.is_empty() {
            warn!(
                "{}: output failed schema validation ({} violations), degrading",
                name,
                violations.len()
            );
            let validation_error = ErrorDetails::new(
                ErrorCode::ValidationFailed,
                ProcessingStep::OutputValidation,
                format!("Output failed schema validation: {}", violations.join("; ")),
            )
            .with_details(json!({ "file": name, "violations": violations }));

            let payload = serde_json::to_value(&document.content.analysis).unwrap_or(Value::Null);
            document = self.mapper.map_malformed(&name, &extracted.text, &payload);
            if !self.mapper.validate(&document) {
                self.finish_stage(ProcessingStep::OutputValidation, stage);
                return ConversionResult::failure(validation_error);
            }
            warning = Some(validation_error);
        }
        self.finish_stage(ProcessingStep::OutputValidation, stage);

        // ── Step 6: Finalise metadata ────────────────────────────────────
        let extra = &mut document.metadata.extra;
        extra.insert("fileSizeBytes".to_string(), json!(file.size_bytes));
        extra.insert("inferenceAttempts".to_string(), json!(analysis.attempts));
        extra.insert("inferenceDurationMs".to_string(), json!(analysis.duration_ms));
        extra.insert("backend".to_string(), json!(self.inference.backend_name()));
        extra.insert(
            "truncated".to_string(),
            json!(extracted.truncated || analysis.truncated),
        );
        document.metadata.processing_time_ms = start.elapsed().as_millis() as u64;

        match document.status {
            DocumentStatus::Success => ConversionResult::success(document),
            _ => ConversionResult::partial(document, warning),
        }
    }

    fn finish_stage(&self, step: ProcessingStep, stage: Instant) {
        let ms = stage.elapsed().as_millis() as u64;
        debug!("Stage {} took {}ms", step, ms);
        self.metrics.record_stage(step, ms);
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn rename_source(result: ConversionResult, name: &str) -> ConversionResult {
    match result {
        ConversionResult::Success { mut document, warning } => {
            document.metadata.source_file = name.to_string();
            ConversionResult::Success {
                document,
                warning: warning.map(|w| w.with_detail("file", name)),
            }
        }
        ConversionResult::Failure { error } => ConversionResult::Failure {
            error: error.with_detail("file", name),
        },
    }
}

/// Write a result to `<output_dir>/<stem>.json`, plus `<stem>.txt` with the
/// extracted text when `write_sidecar` is set and a document exists.
///
/// Failed results are written too. Uses atomic write (temp file + rename)
/// to prevent partial files. Returns the JSON path.
pub async fn write_result(
    result: &ConversionResult,
    output_dir: impl AsRef<Path>,
    write_sidecar: bool,
) -> Result<PathBuf, Pdf2RecordsError> {
    let output_dir = output_dir.as_ref();
    tokio::fs::create_dir_all(output_dir)
        .await
        .map_err(|e| Pdf2RecordsError::OutputWriteFailed {
            path: output_dir.to_path_buf(),
            source: e,
        })?;

    let stem = output_stem(result);
    let json_path = output_dir.join(format!("{stem}.json"));
    let body = serde_json::to_vec_pretty(result)?;
    write_atomic(&json_path, &body).await?;

    if write_sidecar {
        if let Some(document) = result.document() {
            let txt_path = output_dir.join(format!("{stem}.txt"));
            write_atomic(&txt_path, document.content.original_text.as_bytes()).await?;
        }
    }

    debug!("Wrote {}", json_path.display());
    Ok(json_path)
}

fn output_stem(result: &ConversionResult) -> String {
    result
        .source_file()
        .and_then(|f| Path::new(f).file_stem())
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "result".to_string())
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), Pdf2RecordsError> {
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    tokio::fs::write(&tmp_path, bytes)
        .await
        .map_err(|e| Pdf2RecordsError::OutputWriteFailed {
            path: path.to_path_buf(),
            source: e,
        })?;

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Pdf2RecordsError::OutputWriteFailed {
            path: path.to_path_buf(),
            source: e,
        })
}

/// Convenience accessor used by callers that only need the records.
pub fn document_records(document: &ProcessedDocument) -> usize {
    document.content.analysis.records().map_or(0, <[_]>::len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::{Analysis, Outcome};
    use crate::pipeline::backend::{BackendError, InferenceRequest, InferenceResponse};
    use crate::pipeline::extract::ParseError;
    use crate::pipeline::mapper::MALFORMED_KIND;
    use async_trait::async_trait;

    struct StubParser;

    impl PdfParser for StubParser {
        fn parse(&self, bytes: &[u8]) -> Result<String, ParseError> {
            let text = String::from_utf8_lossy(bytes).into_owned();
            if text.contains("PANIC") {
                panic!("parser exploded");
            }
            Ok(text.trim_start_matches("%PDF-1.4").to_string())
        }
    }

    struct FixedBackend(&'static str);

    #[async_trait]
    impl InferenceBackend for FixedBackend {
        async fn complete(&self, _request: &InferenceRequest) -> Result<InferenceResponse, BackendError> {
            Ok(InferenceResponse {
                content: self.0.to_string(),
            })
        }

        async fn health_check(&self) -> Result<(), BackendError> {
            Ok(())
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    fn pipeline(response: &'static str) -> Pipeline {
        let config = PipelineConfig::builder().retry_attempts(1).build().unwrap();
        Pipeline::new(
            &config,
            Arc::new(StubParser),
            Arc::new(FixedBackend(response)),
            Arc::new(MetricsCollector::new()),
        )
    }

    fn write_pdf(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("%PDF-1.4\n{body}")).unwrap();
        path
    }

    const ONE_MATCH: &str = r#"{"matches": [{"homeTeam": "Arsenal", "awayTeam": "Chelsea", "round": 27}]}"#;

    #[tokio::test]
    async fn converts_document_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_pdf(dir.path(), "week27.pdf", "Arsenal v Chelsea");
        let pipeline = pipeline(ONE_MATCH);

        let result = pipeline.convert(&path).await;

        assert_eq!(result.outcome(), Outcome::Success);
        let doc = result.document().unwrap();
        assert_eq!(doc.metadata.source_file, "week27.pdf");
        assert_eq!(doc.content.original_text, "Arsenal v Chelsea");
        assert_eq!(document_records(doc), 1);
        assert_eq!(doc.metadata.extra["inferenceAttempts"], json!(1));
        assert_eq!(doc.metadata.extra["backend"], json!("fixed"));

        let m = pipeline.metrics().metrics();
        assert_eq!(m.conversions.successful, 1);
        for step in ProcessingStep::ALL {
            assert_eq!(m.stages[&step].count, 1, "{step}");
        }
    }

    #[tokio::test]
    async fn validation_failure_stops_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.pdf");
        std::fs::write(&path, b"").unwrap();
        let pipeline = pipeline(ONE_MATCH);

        let result = pipeline.convert(&path).await;

        let err = result.error().unwrap();
        assert!(!result.is_success());
        assert_eq!(err.code, ErrorCode::InvalidInput);
        assert_eq!(err.step, ProcessingStep::Validation);
        let m = pipeline.metrics().metrics();
        assert_eq!(m.errors.by_code[&ErrorCode::InvalidInput], 1);
        assert!(!m.stages.contains_key(&ProcessingStep::Extraction));
    }

    #[tokio::test]
    async fn non_object_response_degrades_to_partial() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_pdf(dir.path(), "odd.pdf", "Arsenal v Chelsea");
        let pipeline = pipeline("\"no fixtures found\"");

        let result = pipeline.convert(&path).await;

        assert_eq!(result.outcome(), Outcome::Partial);
        assert!(result.is_success());
        let doc = result.document().unwrap();
        match &doc.content.analysis {
            Analysis::Generic(g) => assert_eq!(g.kind, MALFORMED_KIND),
            other => panic!("expected generic, got {other:?}"),
        }
        let warning = result.error().unwrap();
        assert_eq!(warning.code, ErrorCode::MappingFailed);
        assert_eq!(warning.step, ProcessingStep::Mapping);
        assert_eq!(warning.message, "Inference response is not a JSON object");
        assert_eq!(warning.file(), Some("odd.pdf"));
    }

    #[tokio::test]
    async fn panic_is_contained() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_pdf(dir.path(), "boom.pdf", "PANIC");
        let pipeline = pipeline(ONE_MATCH);

        let result = pipeline.convert(&path).await;

        // spawn_blocking surfaces the parser panic as a join error
        let err = result.error().unwrap();
        assert!(!result.is_success());
        assert_eq!(err.step, ProcessingStep::Extraction);
        assert_eq!(err.code, ErrorCode::ExtractionFailed);
    }

    #[test]
    fn panic_payloads_are_readable() {
        let p: Box<dyn Any + Send> = Box::new("static message");
        assert_eq!(panic_message(p.as_ref()), "static message");
        let p: Box<dyn Any + Send> = Box::new(String::from("owned message"));
        assert_eq!(panic_message(p.as_ref()), "owned message");
        let p: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(p.as_ref()), "unknown panic");
    }

    #[tokio::test]
    async fn convert_bytes_reports_given_name() {
        let pipeline = pipeline(ONE_MATCH);

        let result = pipeline
            .convert_bytes(b"%PDF-1.4\nArsenal v Chelsea", "upload.pdf")
            .await;
        assert_eq!(result.source_file(), Some("upload.pdf"));
        assert!(result.is_success());

        let result = pipeline.convert_bytes(b"not a pdf at all", "junk.pdf").await;
        assert_eq!(result.source_file(), Some("junk.pdf"));
        assert_eq!(result.error().unwrap().code, ErrorCode::InvalidInput);
    }

    #[tokio::test]
    async fn write_result_persists_json_and_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_pdf(dir.path(), "week27.pdf", "Arsenal v Chelsea");
        let pipeline = pipeline(ONE_MATCH);
        let result = pipeline.convert(&path).await;

        let out = dir.path().join("out");
        let json_path = write_result(&result, &out, true).await.unwrap();

        assert_eq!(json_path, out.join("week27.json"));
        let parsed: ConversionResult =
            serde_json::from_slice(&std::fs::read(&json_path).unwrap()).unwrap();
        assert_eq!(parsed, result);
        let sidecar = std::fs::read_to_string(out.join("week27.txt")).unwrap();
        assert_eq!(sidecar, "Arsenal v Chelsea");
        assert!(!out.join("week27.json.tmp").exists());
    }

    #[tokio::test]
    async fn write_result_persists_failures() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(ONE_MATCH);
        let result = pipeline.convert(dir.path().join("missing.pdf")).await;

        let json_path = write_result(&result, dir.path(), true).await.unwrap();

        assert_eq!(json_path, dir.path().join("missing.json"));
        assert!(!dir.path().join("missing.txt").exists());
        let v: Value = serde_json::from_slice(&std::fs::read(&json_path).unwrap()).unwrap();
        assert_eq!(v["success"], json!(false));
        assert_eq!(v["error"]["code"], json!("FILE_NOT_FOUND"));
    }
}
