//! Progress-callback trait for per-document batch events.
//!
//! Inject an [`Arc<dyn BatchProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to receive
//! events as the batch runner works through a directory.
//!
//! # Example
//!
//! ```rust
//! use edgequake_pdf2records::{BatchProgressCallback, ConversionResult, PipelineConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     failed: AtomicUsize,
//! }
//!
//! impl BatchProgressCallback for CountingCallback {
//!     fn on_document_complete(&self, _index: usize, _total: usize, result: &ConversionResult) {
//!         if !result.is_success() {
//!             self.failed.fetch_add(1, Ordering::SeqCst);
//!         }
//!     }
//! }
//!
//! let config = PipelineConfig::builder()
//!     .progress_callback(Arc::new(CountingCallback { failed: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use crate::output::ConversionResult;
use std::path::Path;
use std::sync::Arc;

/// Called by the batch runner as it processes each document.
///
/// Documents within a group run concurrently, so `on_document_start` and
/// `on_document_complete` may interleave across documents. Implementations
/// must protect shared mutable state (`Mutex`, atomics). All methods default
/// to no-ops.
pub trait BatchProgressCallback: Send + Sync {
    /// Called once after the directory listing, before any conversion.
    fn on_batch_start(&self, total_files: usize) {
        let _ = total_files;
    }

    /// Called when a document enters the pipeline. `index` is 0-based.
    fn on_document_start(&self, index: usize, total_files: usize, path: &Path) {
        let _ = (index, total_files, path);
    }

    /// Called with the final result of a document, success or not.
    fn on_document_complete(&self, index: usize, total_files: usize, result: &ConversionResult) {
        let _ = (index, total_files, result);
    }

    /// Called once after every document has a result.
    fn on_batch_complete(&self, total_files: usize, success_count: usize) {
        let _ = (total_files, success_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl BatchProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn BatchProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorCode, ErrorDetails, ProcessingStep};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct TrackingCallback {
        starts: AtomicUsize,
        completes: AtomicUsize,
        failures: AtomicUsize,
        batch_total: AtomicUsize,
        batch_ok: AtomicUsize,
    }

    impl BatchProgressCallback for TrackingCallback {
        fn on_batch_start(&self, total_files: usize) {
            self.batch_total.store(total_files, Ordering::SeqCst);
        }

        fn on_document_start(&self, _index: usize, _total: usize, _path: &Path) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_document_complete(&self, _index: usize, _total: usize, result: &ConversionResult) {
            self.completes.fetch_add(1, Ordering::SeqCst);
            if !result.is_success() {
                self.failures.fetch_add(1, Ordering::SeqCst);
            }
        }

        fn on_batch_complete(&self, _total_files: usize, success_count: usize) {
            self.batch_ok.store(success_count, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        let failed = ConversionResult::failure(ErrorDetails::new(
            ErrorCode::Unknown,
            ProcessingStep::Validation,
            "boom",
        ));
        cb.on_batch_start(2);
        cb.on_document_start(0, 2, Path::new("a.pdf"));
        cb.on_document_complete(0, 2, &failed);
        cb.on_batch_complete(2, 0);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();
        let failed = ConversionResult::failure(ErrorDetails::new(
            ErrorCode::InvalidInput,
            ProcessingStep::Validation,
            "empty file",
        ));

        tracker.on_batch_start(2);
        tracker.on_document_start(0, 2, Path::new("a.pdf"));
        tracker.on_document_start(1, 2, Path::new("b.pdf"));
        tracker.on_document_complete(0, 2, &failed);
        tracker.on_document_complete(1, 2, &failed);
        tracker.on_batch_complete(2, 0);

        assert_eq!(tracker.batch_total.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.starts.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.completes.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.failures.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.batch_ok.load(Ordering::SeqCst), 0);
    }
}
