//! Text extraction: validate a PDF on disk and pull its text out.
//!
//! Validation is fail-fast and ordered: existence/readability, extension,
//! size bounds, then the `%PDF` magic bytes. Each failure is tagged
//! [`ProcessingStep::Validation`]; everything after that (reading, parsing,
//! empty output) is tagged [`ProcessingStep::Extraction`].
//!
//! The parse itself goes through the [`PdfParser`] trait. [`PdfiumParser`] is
//! the production implementation; it wraps the pdfium C++ library, which is
//! not async-safe, so [`TextExtractor`] always calls the parser inside
//! `spawn_blocking`.

use crate::error::{ErrorCode, ErrorDetails, ProcessingStep};
use crate::pipeline::postprocess::clean_text;
use pdfium_render::prelude::*;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

/// Extension accepted by the extractor, compared case-insensitively.
pub const PDF_EXTENSION: &str = "pdf";

const PDF_MAGIC: &[u8; 4] = b"%PDF";

/// Errors raised by a [`PdfParser`].
#[derive(Debug, Clone, Error)]
pub enum ParseError {
    #[error("PDF is encrypted and requires a password")]
    PasswordRequired,

    #[error("PDF is corrupt: {0}")]
    Corrupt(String),

    /// The parsing library itself could not be loaded.
    #[error("PDF backend unavailable: {0}")]
    BackendUnavailable(String),
}

/// Turns raw PDF bytes into raw text.
///
/// Called from a blocking thread; implementations may do CPU-heavy work.
pub trait PdfParser: Send + Sync {
    fn parse(&self, bytes: &[u8]) -> Result<String, ParseError>;
}

/// [`PdfParser`] backed by pdfium.
///
/// Binds to the library named by `PDFIUM_LIB_PATH` when set, otherwise to the
/// system library.
#[derive(Debug, Default, Clone)]
pub struct PdfiumParser;

impl PdfiumParser {
    fn bind() -> Result<Pdfium, ParseError> {
        let bindings = match std::env::var("PDFIUM_LIB_PATH") {
            Ok(path) if !path.is_empty() => Pdfium::bind_to_library(path),
            _ => Pdfium::bind_to_system_library(),
        }
        .map_err(|e| ParseError::BackendUnavailable(format!("{:?}", e)))?;
        Ok(Pdfium::new(bindings))
    }
}

impl PdfParser for PdfiumParser {
    fn parse(&self, bytes: &[u8]) -> Result<String, ParseError> {
        let pdfium = Self::bind()?;

        let document = pdfium.load_pdf_from_byte_slice(bytes, None).map_err(|e| {
            let err_str = format!("{:?}", e);
            if err_str.contains("Password") || err_str.contains("password") {
                ParseError::PasswordRequired
            } else {
                ParseError::Corrupt(err_str)
            }
        })?;

        let mut text = String::new();
        for (idx, page) in document.pages().iter().enumerate() {
            let page_text = page
                .text()
                .map_err(|e| ParseError::Corrupt(format!("page {}: {:?}", idx + 1, e)))?;
            text.push_str(&page_text.all());
            text.push('\n');
        }
        Ok(text)
    }
}

/// A file that passed validation.
#[derive(Debug, Clone)]
pub struct FileInfo {
    pub path: PathBuf,
    pub file_name: String,
    pub size_bytes: u64,
}

/// Cleaned text pulled from a document.
#[derive(Debug, Clone)]
pub struct ExtractedText {
    pub text: String,
    /// Character count of `text`.
    pub char_count: usize,
    /// Whether `text` was cut to the configured maximum length.
    pub truncated: bool,
}

/// Validates input files and extracts their text.
pub struct TextExtractor {
    parser: Arc<dyn PdfParser>,
    max_file_size_bytes: u64,
    max_text_length: usize,
}

impl TextExtractor {
    pub fn new(parser: Arc<dyn PdfParser>, max_file_size_bytes: u64, max_text_length: usize) -> Self {
        Self {
            parser,
            max_file_size_bytes,
            max_text_length,
        }
    }

    /// Validate `path`, returning the first failure found.
    pub async fn validate(&self, path: &Path) -> Result<FileInfo, ErrorDetails> {
        let file_name = display_name(path);
        let fail = |code: ErrorCode, message: String| {
            ErrorDetails::new(code, ProcessingStep::Validation, message)
                .with_detail("file", file_name.clone())
        };

        let metadata = tokio::fs::metadata(path).await.map_err(|e| {
            fail(
                ErrorCode::FileNotFound,
                format!("File not found or not readable: '{}' ({})", path.display(), e),
            )
        })?;
        if !metadata.is_file() {
            return Err(fail(
                ErrorCode::FileNotFound,
                format!("Not a regular file: '{}'", path.display()),
            ));
        }
        let mut file = tokio::fs::File::open(path).await.map_err(|e| {
            fail(
                ErrorCode::FileNotFound,
                format!("File is not readable: '{}' ({})", path.display(), e),
            )
        })?;

        if !is_pdf_path(path) {
            return Err(fail(
                ErrorCode::InvalidInput,
                format!("Unsupported file extension: '{}' (expected .pdf)", path.display()),
            ));
        }

        let size_bytes = metadata.len();
        if size_bytes == 0 {
            return Err(fail(
                ErrorCode::InvalidInput,
                format!("File is empty: '{}'", path.display()),
            ));
        }
        if size_bytes > self.max_file_size_bytes {
            return Err(fail(
                ErrorCode::InvalidInput,
                format!(
                    "File is too large: {} bytes (limit {} bytes)",
                    size_bytes, self.max_file_size_bytes
                ),
            )
            .with_detail("sizeBytes", size_bytes));
        }

        let mut magic = [0u8; 4];
        let read = file.read_exact(&mut magic).await;
        if read.is_err() || &magic != PDF_MAGIC {
            return Err(fail(
                ErrorCode::InvalidInput,
                format!("File is not a valid PDF: '{}'", path.display()),
            ));
        }

        debug!("Validated {} ({} bytes)", path.display(), size_bytes);
        Ok(FileInfo {
            path: path.to_path_buf(),
            file_name,
            size_bytes,
        })
    }

    /// `true` when [`validate`](Self::validate) would succeed.
    pub async fn is_valid(&self, path: &Path) -> bool {
        self.validate(path).await.is_ok()
    }

    /// Read, parse and clean the document's text.
    ///
    /// Text that is empty after cleaning is an error: a scanned PDF with no
    /// text layer parses fine but gives the model nothing to work with.
    pub async fn extract_text(&self, path: &Path) -> Result<ExtractedText, ErrorDetails> {
        let file_name = display_name(path);
        let fail = |message: String| {
            ErrorDetails::new(ErrorCode::ExtractionFailed, ProcessingStep::Extraction, message)
                .with_detail("file", file_name.clone())
        };

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| fail(format!("Failed to read '{}': {}", path.display(), e)))?;

        let parser = Arc::clone(&self.parser);
        let raw = tokio::task::spawn_blocking(move || parser.parse(&bytes))
            .await
            .map_err(|e| fail(format!("Parser task panicked: {}", e)))?
            .map_err(|e| fail(e.to_string()).with_detail("reason", e.to_string()))?;

        let mut text = clean_text(&raw);
        if text.is_empty() {
            return Err(fail(format!(
                "No text could be extracted from '{}'",
                path.display()
            )));
        }

        let mut truncated = false;
        if let Some((cut, _)) = text.char_indices().nth(self.max_text_length) {
            warn!(
                "{}: extracted text exceeds {} characters, truncating",
                file_name, self.max_text_length
            );
            text.truncate(cut);
            truncated = true;
        }

        let char_count = text.chars().count();
        debug!("Extracted {} characters from {}", char_count, file_name);
        Ok(ExtractedText {
            text,
            char_count,
            truncated,
        })
    }

    /// Whether the file starts with the `%PDF` signature.
    pub async fn has_valid_header(&self, path: &Path) -> bool {
        has_pdf_header(path).await
    }
}

/// Whether the file at `path` starts with the `%PDF` signature.
pub async fn has_pdf_header(path: &Path) -> bool {
    let Ok(mut file) = tokio::fs::File::open(path).await else {
        return false;
    };
    let mut magic = [0u8; 4];
    let read = file.read_exact(&mut magic).await;
    read.is_ok() && &magic == PDF_MAGIC
}

/// Whether `path` carries the `.pdf` extension, case-insensitively.
pub fn is_pdf_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(PDF_EXTENSION))
}

/// File name used to identify a document in results and logs.
pub fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Build a failure for a panic or other untagged error.
pub(crate) fn untagged_failure(path: &Path, message: impl Into<String>) -> ErrorDetails {
    ErrorDetails::new(ErrorCode::Unknown, ProcessingStep::Validation, message)
        .with_details(json!({ "file": display_name(path) }))
}
