//! Batch runner: convert every PDF in a directory under a concurrency cap.
//!
//! Files are discovered, sorted, and split into consecutive groups of
//! `concurrency` files. Groups run one after another; the files inside a
//! group run concurrently. Results come back in discovery order no matter
//! which file finishes first.
//!
//! Nothing here returns `Err`. A directory that cannot be listed becomes a
//! single synthetic failure result, and each file's failure (panics
//! included) stays in that file's result.

use crate::config::PipelineConfig;
use crate::convert::Pipeline;
use crate::error::{ErrorCode, ErrorDetails, ProcessingStep};
use crate::output::ConversionResult;
use crate::pipeline::extract::{display_name, is_pdf_path, untagged_failure};
use crate::progress::ProgressCallback;
use futures::future::join_all;
use futures::FutureExt;
use serde_json::json;
use std::io;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Runs conversions over many files. Cheap to clone.
#[derive(Clone)]
pub struct BatchRunner {
    pipeline: Arc<Pipeline>,
    concurrency: usize,
    progress: Option<ProgressCallback>,
}

impl BatchRunner {
    /// `concurrency` below 1 is treated as 1.
    pub fn new(pipeline: Arc<Pipeline>, concurrency: usize) -> Self {
        Self {
            pipeline,
            concurrency: concurrency.max(1),
            progress: None,
        }
    }

    /// Runner using the concurrency and progress callback from `config`.
    pub fn from_config(pipeline: Arc<Pipeline>, config: &PipelineConfig) -> Self {
        Self {
            progress: config.progress_callback.clone(),
            ..Self::new(pipeline, config.concurrency)
        }
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn progress_callback(&self) -> Option<&ProgressCallback> {
        self.progress.as_ref()
    }

    /// PDF files directly inside `dir`, sorted by path.
    ///
    /// Matching is on the extension, case-insensitively. Subdirectories are
    /// not descended into.
    pub async fn discover(&self, dir: impl AsRef<Path>) -> Result<Vec<PathBuf>, ErrorDetails> {
        let dir = dir.as_ref();
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .map_err(|e| listing_failure(dir, &e))?;

        let mut files = Vec::new();
        loop {
            match entries.next_entry().await {
                Ok(Some(entry)) => {
                    let path = entry.path();
                    if !is_pdf_path(&path) {
                        continue;
                    }
                    match tokio::fs::metadata(&path).await {
                        Ok(meta) if meta.is_file() => files.push(path),
                        Ok(_) => debug!("Skipping non-file entry {}", path.display()),
                        Err(e) => warn!("Skipping {}: {}", path.display(), e),
                    }
                }
                Ok(None) => break,
                Err(e) => return Err(listing_failure(dir, &e)),
            }
        }

        files.sort();
        debug!("Discovered {} PDF file(s) in {}", files.len(), dir.display());
        Ok(files)
    }

    /// Convert every PDF in `dir`.
    ///
    /// Returns one result per discovered file, `[]` for a directory without
    /// PDFs, or a single failure when the directory cannot be listed.
    pub async fn process_batch(&self, dir: impl AsRef<Path>) -> Vec<ConversionResult> {
        let dir = dir.as_ref();
        info!("Starting batch: {}", dir.display());
        match self.discover(dir).await {
            Ok(files) => self.process_files(files).await,
            Err(err) => {
                warn!("Cannot list {}: {}", dir.display(), err);
                self.pipeline.metrics().record_error(err.code, err.step);
                vec![ConversionResult::failure(err)]
            }
        }
    }

    /// Convert an explicit list of files, in the given order.
    pub async fn process_files(&self, files: Vec<PathBuf>) -> Vec<ConversionResult> {
        let started = Instant::now();
        let total = files.len();
        if let Some(ref cb) = self.progress {
            cb.on_batch_start(total);
        }

        let mut results = Vec::with_capacity(total);
        for (group_index, group) in files.chunks(self.concurrency).enumerate() {
            let offset = group_index * self.concurrency;
            debug!(
                "Batch group {}: files {}..{} of {}",
                group_index + 1,
                offset + 1,
                offset + group.len(),
                total
            );
            results.extend(self.run_group(offset, group, total).await);
        }

        let successes = results.iter().filter(|r| r.is_success()).count();
        self.finish_batch(total, successes, started);
        results
    }

    /// Convert one group concurrently; results are in input order.
    pub(crate) async fn run_group(
        &self,
        offset: usize,
        group: &[PathBuf],
        total: usize,
    ) -> Vec<ConversionResult> {
        join_all(
            group
                .iter()
                .enumerate()
                .map(|(i, path)| self.convert_one(offset + i, total, path)),
        )
        .await
    }

    async fn convert_one(&self, index: usize, total: usize, path: &Path) -> ConversionResult {
        let attempt = AssertUnwindSafe(async {
            if let Some(ref cb) = self.progress {
                cb.on_document_start(index, total, path);
            }
            let result = self.pipeline.convert(path).await;
            if let Some(ref cb) = self.progress {
                cb.on_document_complete(index, total, &result);
            }
            result
        });
        match attempt.catch_unwind().await {
            Ok(result) => result,
            Err(_) => {
                warn!("{}: progress callback panicked", path.display());
                ConversionResult::failure(untagged_failure(
                    path,
                    "Unexpected error while processing document",
                ))
            }
        }
    }

    pub(crate) fn finish_batch(&self, total: usize, successes: usize, started: Instant) {
        let duration_ms = started.elapsed().as_millis() as u64;
        self.pipeline
            .metrics()
            .record_batch(total, successes, duration_ms);
        if let Some(ref cb) = self.progress {
            cb.on_batch_complete(total, successes);
        }
        info!(
            "Batch complete: {}/{} succeeded in {}ms",
            successes, total, duration_ms
        );
    }
}

fn listing_failure(dir: &Path, e: &io::Error) -> ErrorDetails {
    let code = match e.kind() {
        io::ErrorKind::NotFound => ErrorCode::FileNotFound,
        io::ErrorKind::NotADirectory => ErrorCode::InvalidInput,
        _ => ErrorCode::Unknown,
    };
    ErrorDetails::new(
        code,
        ProcessingStep::Validation,
        format!("Cannot list directory '{}': {}", dir.display(), e),
    )
    .with_details(json!({
        "file": display_name(dir),
        "directory": dir.display().to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricsCollector;
    use crate::pipeline::backend::{BackendError, InferenceBackend, InferenceRequest, InferenceResponse};
    use crate::pipeline::extract::{ParseError, PdfParser};
    use async_trait::async_trait;

    struct StubParser;

    impl PdfParser for StubParser {
        fn parse(&self, bytes: &[u8]) -> Result<String, ParseError> {
            Ok(String::from_utf8_lossy(bytes.get(8..).unwrap_or_default()).into_owned())
        }
    }

    struct EmptyBackend;

    #[async_trait]
    impl InferenceBackend for EmptyBackend {
        async fn complete(&self, _request: &InferenceRequest) -> Result<InferenceResponse, BackendError> {
            Ok(InferenceResponse {
                content: r#"{"records": []}"#.to_string(),
            })
        }

        async fn health_check(&self) -> Result<(), BackendError> {
            Ok(())
        }

        fn name(&self) -> &str {
            "empty"
        }
    }

    /// Panics on any document whose text mentions BOOM.
    struct PanickyBackend;

    #[async_trait]
    impl InferenceBackend for PanickyBackend {
        async fn complete(&self, request: &InferenceRequest) -> Result<InferenceResponse, BackendError> {
            if request.user_prompt.contains("BOOM") {
                panic!("backend blew up");
            }
            EmptyBackend.complete(request).await
        }

        async fn health_check(&self) -> Result<(), BackendError> {
            Ok(())
        }

        fn name(&self) -> &str {
            "panicky"
        }
    }

    fn runner_with(backend: Arc<dyn InferenceBackend>, concurrency: usize) -> BatchRunner {
        let config = PipelineConfig::builder().build().unwrap();
        let pipeline = Pipeline::new(
            &config,
            Arc::new(StubParser),
            backend,
            Arc::new(MetricsCollector::new()),
        );
        BatchRunner::new(Arc::new(pipeline), concurrency)
    }

    fn runner(concurrency: usize) -> BatchRunner {
        runner_with(Arc::new(EmptyBackend), concurrency)
    }

    fn outcomes(results: &[ConversionResult]) -> Vec<Option<(ErrorCode, ProcessingStep)>> {
        results
            .iter()
            .map(|r| r.error().map(|e| (e.code, e.step)))
            .collect()
    }

    #[tokio::test]
    async fn discovery_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.pdf", "A.PDF", "notes.txt", "c.Pdf"] {
            std::fs::write(dir.path().join(name), b"%PDF-1.4\nx").unwrap();
        }
        std::fs::create_dir(dir.path().join("nested.pdf")).unwrap();

        let files = runner(2).discover(dir.path()).await.unwrap();
        let names: Vec<String> = files.iter().map(|p| display_name(p)).collect();
        assert_eq!(names, vec!["A.PDF", "b.pdf", "c.Pdf"]);
    }

    #[tokio::test]
    async fn missing_directory_is_one_failure() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner(2);

        let results = runner.process_batch(dir.path().join("nope")).await;

        assert_eq!(results.len(), 1);
        let err = results[0].error().unwrap();
        assert_eq!(err.code, ErrorCode::FileNotFound);
        assert_eq!(err.step, ProcessingStep::Validation);
        assert_eq!(runner.pipeline().metrics().metrics().batches.total_batches, 0);
    }

    #[tokio::test]
    async fn file_instead_of_directory_is_one_failure() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.pdf");
        std::fs::write(&file, b"%PDF-1.4\nx").unwrap();

        let results = runner(2).process_batch(&file).await;

        assert_eq!(results.len(), 1);
        assert!(!results[0].is_success());
    }

    #[tokio::test]
    async fn zero_concurrency_is_clamped() {
        assert_eq!(runner(0).concurrency(), 1);
    }

    #[derive(Default)]
    struct Recorder {
        events: std::sync::Mutex<Vec<String>>,
    }

    impl crate::progress::BatchProgressCallback for Recorder {
        fn on_batch_start(&self, total_files: usize) {
            self.events.lock().unwrap().push(format!("start {total_files}"));
        }

        fn on_document_complete(&self, index: usize, _total: usize, result: &ConversionResult) {
            self.events
                .lock()
                .unwrap()
                .push(format!("done {index} {}", result.is_success()));
        }

        fn on_batch_complete(&self, total_files: usize, success_count: usize) {
            self.events
                .lock()
                .unwrap()
                .push(format!("end {success_count}/{total_files}"));
        }
    }

    #[tokio::test]
    async fn progress_callbacks_fire_per_document() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.pdf"), b"%PDF-1.4\nArsenal v Chelsea").unwrap();
        std::fs::write(dir.path().join("b.pdf"), b"").unwrap();
        let recorder = Arc::new(Recorder::default());

        runner(1)
            .with_progress(recorder.clone())
            .process_batch(dir.path())
            .await;

        let events = recorder.events.lock().unwrap().clone();
        assert_eq!(
            events,
            vec!["start 2", "done 0 true", "done 1 false", "end 1/2"]
        );
    }

    #[tokio::test]
    async fn panicking_conversion_is_isolated_within_its_group() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.pdf"), b"%PDF-1.4\nArsenal v Chelsea").unwrap();
        std::fs::write(dir.path().join("b.pdf"), b"%PDF-1.4\nBOOM v Chelsea").unwrap();
        std::fs::write(dir.path().join("c.pdf"), b"%PDF-1.4\nLyon v Nice").unwrap();
        let runner = runner_with(Arc::new(PanickyBackend), 3);

        let results = runner.process_batch(dir.path()).await;

        assert_eq!(
            outcomes(&results),
            vec![None, Some((ErrorCode::Unknown, ProcessingStep::Validation)), None]
        );
        let err = results[1].error().unwrap();
        assert_eq!(err.file(), Some("b.pdf"));
        assert!(err.message.contains("backend blew up"), "{}", err.message);

        let m = runner.pipeline().metrics().metrics();
        assert_eq!(m.conversions.total, 3);
        assert_eq!(m.conversions.failed, 1);
        assert_eq!(m.errors.by_code.get(&ErrorCode::Unknown), Some(&1));
        assert!((m.batches.average_success_rate - 2.0 / 3.0).abs() < 1e-9);
    }

    /// Panics when the second document completes.
    struct PanickingCallback;

    impl crate::progress::BatchProgressCallback for PanickingCallback {
        fn on_document_complete(&self, index: usize, _total: usize, _result: &ConversionResult) {
            if index == 1 {
                panic!("progress display crashed");
            }
        }
    }

    #[tokio::test]
    async fn panicking_progress_callback_fails_only_its_document() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a.pdf", "b.pdf", "c.pdf"] {
            std::fs::write(dir.path().join(name), b"%PDF-1.4\nArsenal v Chelsea").unwrap();
        }

        let results = runner(3)
            .with_progress(Arc::new(PanickingCallback))
            .process_batch(dir.path())
            .await;

        assert_eq!(
            outcomes(&results),
            vec![None, Some((ErrorCode::Unknown, ProcessingStep::Validation)), None]
        );
        assert_eq!(results[1].source_file(), Some("b.pdf"));
    }

    #[tokio::test]
    async fn batch_metrics_are_recorded() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.pdf"), b"%PDF-1.4\nArsenal v Chelsea").unwrap();
        std::fs::write(dir.path().join("b.pdf"), b"").unwrap();
        let runner = runner(4);

        let results = runner.process_batch(dir.path()).await;

        assert_eq!(results.len(), 2);
        let b = runner.pipeline().metrics().metrics().batches;
        assert_eq!(b.total_batches, 1);
        assert_eq!(b.total_files, 2);
        assert!((b.average_success_rate - 0.5).abs() < 1e-9);
    }
}
