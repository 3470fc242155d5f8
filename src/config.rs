//! Configuration types for the PDF-to-records pipeline.
//!
//! All pipeline behaviour is controlled through [`PipelineConfig`], built via
//! its [`PipelineConfigBuilder`]. `build()` range-checks every field and the
//! cross-field constraints; an invalid combination is a fatal
//! [`Pdf2RecordsError::InvalidConfig`] and the process must not start.

use crate::error::Pdf2RecordsError;
use crate::pipeline::backend::InferenceBackend;
use crate::progress::ProgressCallback;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

pub const MAX_CONCURRENCY: usize = 50;
pub const MAX_TIMEOUT_MS: u64 = 5 * 60 * 1000;
pub const MIN_TIMEOUT_MS: u64 = 1000;
pub const MAX_RETRY_ATTEMPTS: u32 = 10;
pub const MAX_RETRY_DELAY_MS: u64 = 60_000;
pub const MAX_HEALTH_CHECK_TTL_MS: u64 = 60 * 60 * 1000;
pub const MIN_TEXT_LENGTH: usize = 100;
pub const MAX_FILE_SIZE_LIMIT: u64 = 500 * 1024 * 1024;

const LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

/// Configuration for the conversion pipeline.
///
/// Built via [`PipelineConfig::builder()`] or using
/// [`PipelineConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_pdf2records::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .model("llama3.1")
///     .concurrency(4)
///     .retry_attempts(2)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Inference provider: "ollama", "auto", or any edgequake-llm provider
    /// name ("openai", "anthropic", "gemini", …). Default: "ollama".
    pub provider_name: String,

    /// Base URL of the inference service (Ollama only). Default: `http://localhost:11434`.
    pub host: String,

    /// Model identifier passed to the provider. Default: "llama3.1".
    pub model: String,

    /// Pre-constructed backend. Takes precedence over `provider_name`.
    pub backend: Option<Arc<dyn InferenceBackend>>,

    /// Sampling temperature. Default: 0.1.
    ///
    /// Extraction should be faithful to the document, not creative.
    pub temperature: f32,

    /// Maximum tokens the model may generate per document. Default: 4096.
    pub max_tokens: usize,

    /// Hard timeout for one inference attempt, in milliseconds. Default: 30 000.
    pub timeout_ms: u64,

    /// Attempts per document before giving up. Default: 3. Zero still makes one attempt.
    pub retry_attempts: u32,

    /// Fixed delay between attempts, in milliseconds. Default: 1 000.
    pub retry_delay_ms: u64,

    /// How long a connectivity check result is reused, in milliseconds. Default: 60 000.
    pub health_check_ttl_ms: u64,

    /// Extracted text beyond this many characters is truncated. Default: 100 000.
    pub max_text_length: usize,

    /// Characters of text sent to the model per document. Default: 4 000.
    ///
    /// Longer text is truncated with an ellipsis marker, not chunked.
    pub chunk_size: usize,

    /// Largest accepted input file, in bytes. Default: 50 MiB.
    pub max_file_size_bytes: u64,

    /// Documents converted concurrently within a batch group. Default: 5.
    pub concurrency: usize,

    /// Directory scanned by batch mode. Default: `./input`.
    pub source_dir: PathBuf,

    /// Directory results are written to. Default: `./output`.
    pub output_dir: PathBuf,

    /// Also write the extracted text next to each JSON result. Default: false.
    pub write_text_sidecar: bool,

    /// Log filter level. Default: "info".
    pub log_level: String,

    /// Custom system prompt. If None, uses the built-in default.
    pub system_prompt: Option<String>,

    /// Batch progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            provider_name: "ollama".to_string(),
            host: "http://localhost:11434".to_string(),
            model: "llama3.1".to_string(),
            backend: None,
            temperature: 0.1,
            max_tokens: 4096,
            timeout_ms: 30_000,
            retry_attempts: 3,
            retry_delay_ms: 1000,
            health_check_ttl_ms: 60_000,
            max_text_length: 100_000,
            chunk_size: 4000,
            max_file_size_bytes: 50 * 1024 * 1024,
            concurrency: 5,
            source_dir: PathBuf::from("./input"),
            output_dir: PathBuf::from("./output"),
            write_text_sidecar: false,
            log_level: "info".to_string(),
            system_prompt: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("provider_name", &self.provider_name)
            .field("host", &self.host)
            .field("model", &self.model)
            .field("backend", &self.backend.as_ref().map(|b| b.name().to_string()))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("timeout_ms", &self.timeout_ms)
            .field("retry_attempts", &self.retry_attempts)
            .field("retry_delay_ms", &self.retry_delay_ms)
            .field("health_check_ttl_ms", &self.health_check_ttl_ms)
            .field("max_text_length", &self.max_text_length)
            .field("chunk_size", &self.chunk_size)
            .field("max_file_size_bytes", &self.max_file_size_bytes)
            .field("concurrency", &self.concurrency)
            .field("source_dir", &self.source_dir)
            .field("output_dir", &self.output_dir)
            .field("write_text_sidecar", &self.write_text_sidecar)
            .field("log_level", &self.log_level)
            .field("progress_callback", &self.progress_callback.as_ref().map(|_| "<dyn BatchProgressCallback>"))
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    /// Check every field and cross-field constraint.
    pub fn validate(&self) -> Result<(), Pdf2RecordsError> {
        let invalid = |msg: String| Err(Pdf2RecordsError::InvalidConfig(msg));

        if self.backend.is_none() {
            if self.provider_name.trim().is_empty() {
                return invalid("provider name must not be empty".into());
            }
            if self.model.trim().is_empty() {
                return invalid("model must not be empty".into());
            }
            if self.provider_name == "ollama"
                && !(self.host.starts_with("http://") || self.host.starts_with("https://"))
            {
                return invalid(format!(
                    "host must be an http:// or https:// URL, got '{}'",
                    self.host
                ));
            }
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return invalid(format!("temperature must be 0.0–2.0, got {}", self.temperature));
        }
        if self.max_tokens == 0 {
            return invalid("max_tokens must be ≥ 1".into());
        }
        if !(MIN_TIMEOUT_MS..=MAX_TIMEOUT_MS).contains(&self.timeout_ms) {
            return invalid(format!(
                "timeout must be {MIN_TIMEOUT_MS}–{MAX_TIMEOUT_MS}ms, got {}",
                self.timeout_ms
            ));
        }
        if self.retry_attempts > MAX_RETRY_ATTEMPTS {
            return invalid(format!(
                "retry attempts must be 0–{MAX_RETRY_ATTEMPTS}, got {}",
                self.retry_attempts
            ));
        }
        if self.retry_delay_ms > MAX_RETRY_DELAY_MS {
            return invalid(format!(
                "retry delay must be ≤ {MAX_RETRY_DELAY_MS}ms, got {}",
                self.retry_delay_ms
            ));
        }
        if self.health_check_ttl_ms > MAX_HEALTH_CHECK_TTL_MS {
            return invalid(format!(
                "health check TTL must be ≤ {MAX_HEALTH_CHECK_TTL_MS}ms, got {}",
                self.health_check_ttl_ms
            ));
        }
        if self.max_text_length < MIN_TEXT_LENGTH {
            return invalid(format!(
                "max text length must be ≥ {MIN_TEXT_LENGTH}, got {}",
                self.max_text_length
            ));
        }
        if self.chunk_size < MIN_TEXT_LENGTH || self.chunk_size > self.max_text_length {
            return invalid(format!(
                "chunk size must be {MIN_TEXT_LENGTH}–{} (max text length), got {}",
                self.max_text_length, self.chunk_size
            ));
        }
        if self.max_file_size_bytes == 0 || self.max_file_size_bytes > MAX_FILE_SIZE_LIMIT {
            return invalid(format!(
                "max file size must be 1–{MAX_FILE_SIZE_LIMIT} bytes, got {}",
                self.max_file_size_bytes
            ));
        }
        if self.concurrency == 0 || self.concurrency > MAX_CONCURRENCY {
            return invalid(format!(
                "concurrency must be 1–{MAX_CONCURRENCY}, got {}",
                self.concurrency
            ));
        }
        if self.source_dir.as_os_str().is_empty() || self.output_dir.as_os_str().is_empty() {
            return invalid("source and output directories must not be empty".into());
        }
        if !LOG_LEVELS.contains(&self.log_level.as_str()) {
            return invalid(format!(
                "log level must be one of {}, got '{}'",
                LOG_LEVELS.join("/"),
                self.log_level
            ));
        }
        Ok(())
    }
}

/// Builder for [`PipelineConfig`].
///
/// Setters store values as given; range checks happen once in [`build`](Self::build).
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = name.into();
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into().trim_end_matches('/').to_string();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn backend(mut self, backend: Arc<dyn InferenceBackend>) -> Self {
        self.config.backend = Some(backend);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t;
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.config.timeout_ms = ms;
        self
    }

    pub fn retry_attempts(mut self, n: u32) -> Self {
        self.config.retry_attempts = n;
        self
    }

    pub fn retry_delay_ms(mut self, ms: u64) -> Self {
        self.config.retry_delay_ms = ms;
        self
    }

    pub fn health_check_ttl_ms(mut self, ms: u64) -> Self {
        self.config.health_check_ttl_ms = ms;
        self
    }

    pub fn max_text_length(mut self, n: usize) -> Self {
        self.config.max_text_length = n;
        self
    }

    pub fn chunk_size(mut self, n: usize) -> Self {
        self.config.chunk_size = n;
        self
    }

    pub fn max_file_size_bytes(mut self, n: u64) -> Self {
        self.config.max_file_size_bytes = n;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n;
        self
    }

    pub fn source_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.source_dir = dir.into();
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    pub fn write_text_sidecar(mut self, v: bool) -> Self {
        self.config.write_text_sidecar = v;
        self
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.log_level = level.into().to_lowercase();
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, Pdf2RecordsError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = PipelineConfig::builder().build().unwrap();
        assert_eq!(config.concurrency, 5);
        assert_eq!(config.retry_attempts, 3);
        assert_eq!(config.health_check_ttl_ms, 60_000);
        assert_eq!(config.provider_name, "ollama");
    }

    #[test]
    fn concurrency_out_of_range_rejected() {
        assert!(PipelineConfig::builder().concurrency(0).build().is_err());
        assert!(PipelineConfig::builder().concurrency(51).build().is_err());
        assert!(PipelineConfig::builder().concurrency(50).build().is_ok());
    }

    #[test]
    fn timeout_capped_at_five_minutes() {
        assert!(PipelineConfig::builder().timeout_ms(300_000).build().is_ok());
        let err = PipelineConfig::builder().timeout_ms(300_001).build().unwrap_err();
        assert!(err.to_string().contains("timeout"), "got: {err}");
        assert!(PipelineConfig::builder().timeout_ms(10).build().is_err());
    }

    #[test]
    fn chunk_size_must_fit_max_text_length() {
        let err = PipelineConfig::builder()
            .max_text_length(1000)
            .chunk_size(2000)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("chunk size"), "got: {err}");
    }

    #[test]
    fn host_must_be_http_url() {
        assert!(PipelineConfig::builder().host("localhost:11434").build().is_err());
        let config = PipelineConfig::builder()
            .host("http://gpu-box:11434/")
            .build()
            .unwrap();
        assert_eq!(config.host, "http://gpu-box:11434");
    }

    #[test]
    fn log_level_checked() {
        assert!(PipelineConfig::builder().log_level("DEBUG").build().is_ok());
        assert!(PipelineConfig::builder().log_level("loud").build().is_err());
    }

    #[test]
    fn retry_bounds() {
        assert!(PipelineConfig::builder().retry_attempts(0).build().is_ok());
        assert!(PipelineConfig::builder().retry_attempts(11).build().is_err());
        assert!(PipelineConfig::builder().retry_delay_ms(60_001).build().is_err());
    }

    #[test]
    fn temperature_bounds() {
        assert!(PipelineConfig::builder().temperature(-0.1).build().is_err());
        assert!(PipelineConfig::builder().temperature(2.0).build().is_ok());
    }
}
