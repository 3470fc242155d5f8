//! Inference client: prompt building, connectivity gate, retries and
//! response parsing around an [`InferenceBackend`].
//!
//! This module never returns `Err` for a document. Every call produces an
//! [`AnalysisResult`] carrying either the parsed JSON value or a classified
//! [`InferenceFailure`], together with the elapsed time and attempt count.
//!
//! ## Retry Strategy
//!
//! Each attempt races the backend call against `timeout`. A failed or
//! timed-out attempt is followed by a fixed `retry_delay` sleep, but only when
//! another attempt remains. The connectivity check runs once up front and
//! never consumes an attempt; its result is cached for `health_check_ttl`
//! across concurrent documents.
//!
//! All timing uses the tokio clock, so tests run with a paused clock.

use crate::config::PipelineConfig;
use crate::error::{ErrorCode, ErrorDetails, ProcessingStep};
use crate::metrics::{InferenceOutcome, MetricsCollector};
use crate::pipeline::backend::{BackendError, InferenceBackend, InferenceRequest};
use crate::pipeline::postprocess::strip_code_fences;
use crate::prompts::{build_user_prompt, DEFAULT_SYSTEM_PROMPT};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

/// Retry, timeout and prompt settings for the client.
#[derive(Debug, Clone)]
pub struct InferenceSettings {
    pub system_prompt: String,
    pub chunk_size: usize,
    pub timeout: Duration,
    /// Attempts per request; 0 is treated as 1.
    pub retry_attempts: u32,
    pub retry_delay: Duration,
    pub health_check_ttl: Duration,
}

impl InferenceSettings {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            system_prompt: config
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            chunk_size: config.chunk_size,
            timeout: Duration::from_millis(config.timeout_ms),
            retry_attempts: config.retry_attempts,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            health_check_ttl: Duration::from_millis(config.health_check_ttl_ms),
        }
    }

    fn max_attempts(&self) -> u32 {
        self.retry_attempts.max(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Empty or whitespace-only text; no request was sent.
    EmptyInput,
    /// The connectivity check failed; no attempt was made.
    Unavailable,
    /// Attempts exhausted, the last one timed out.
    Timeout,
    /// Attempts exhausted, the last one failed for any other reason.
    Connection,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::EmptyInput => "empty_input",
            FailureKind::Unavailable => "unavailable",
            FailureKind::Timeout => "timeout",
            FailureKind::Connection => "connection",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InferenceFailure {
    pub kind: FailureKind,
    pub message: String,
    pub attempts: u32,
}

impl InferenceFailure {
    /// Convert into a per-document error tagged with the inference step.
    pub fn to_error_details(&self) -> ErrorDetails {
        let code = match self.kind {
            FailureKind::EmptyInput => ErrorCode::InvalidInput,
            FailureKind::Unavailable => ErrorCode::InferenceServiceUnavailable,
            FailureKind::Timeout | FailureKind::Connection => ErrorCode::InferenceFailed,
        };
        ErrorDetails::new(code, ProcessingStep::Inference, self.message.clone())
            .with_detail("kind", self.kind.as_str())
            .with_detail("attempts", self.attempts)
    }
}

/// Outcome of one [`InferenceClient::analyze`] call.
#[derive(Debug, Clone)]
pub struct AnalysisResult {
    pub result: Result<Value, InferenceFailure>,
    /// Wall-clock time of the whole call, retries and delays included.
    pub duration_ms: u64,
    /// Backend calls made.
    pub attempts: u32,
    /// Whether the prompt text was cut to the chunk size.
    pub truncated: bool,
}

/// Client for the inference service, shared by every conversion.
pub struct InferenceClient {
    backend: Arc<dyn InferenceBackend>,
    settings: InferenceSettings,
    metrics: Arc<MetricsCollector>,
    health: Mutex<Option<(Instant, bool)>>,
    /// Held while a health probe is in flight so concurrent misses share it.
    refresh: tokio::sync::Mutex<()>,
}

impl InferenceClient {
    pub fn new(
        backend: Arc<dyn InferenceBackend>,
        settings: InferenceSettings,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            backend,
            settings,
            metrics,
            health: Mutex::new(None),
            refresh: tokio::sync::Mutex::new(()),
        }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn settings(&self) -> &InferenceSettings {
        &self.settings
    }

    fn cached_health(&self) -> Option<bool> {
        let cache = self.health.lock().unwrap_or_else(|p| p.into_inner());
        match *cache {
            Some((checked_at, reachable)) if checked_at.elapsed() < self.settings.health_check_ttl => {
                Some(reachable)
            }
            _ => None,
        }
    }

    /// Whether the inference service is reachable.
    ///
    /// The answer, positive or negative, is reused for the configured TTL.
    /// Concurrent callers that miss the cache wait for a single probe, which
    /// is bounded by the per-attempt timeout.
    pub async fn test_connection(&self) -> bool {
        if let Some(reachable) = self.cached_health() {
            debug!("{}: health cache hit ({})", self.backend.name(), reachable);
            return reachable;
        }

        let _refresh = self.refresh.lock().await;
        if let Some(reachable) = self.cached_health() {
            debug!("{}: health refreshed by another caller ({})", self.backend.name(), reachable);
            return reachable;
        }

        let reachable = match timeout(self.settings.timeout, self.backend.health_check()).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!("{}: health check failed: {}", self.backend.name(), e);
                false
            }
            Err(_) => {
                warn!(
                    "{}: health check timed out after {}ms",
                    self.backend.name(),
                    self.settings.timeout.as_millis()
                );
                false
            }
        };

        let mut cache = self.health.lock().unwrap_or_else(|p| p.into_inner());
        *cache = Some((Instant::now(), reachable));
        reachable
    }

    /// Drop the cached connectivity result.
    pub fn invalidate_health_cache(&self) {
        let mut cache = self.health.lock().unwrap_or_else(|p| p.into_inner());
        *cache = None;
    }

    /// Send `text` to the model and parse its answer.
    pub async fn analyze(&self, text: &str) -> AnalysisResult {
        let start = Instant::now();

        if text.trim().is_empty() {
            return self.fail(
                start,
                FailureKind::EmptyInput,
                "Cannot analyse empty text".to_string(),
                0,
                false,
            );
        }

        if !self.test_connection().await {
            return self.fail(
                start,
                FailureKind::Unavailable,
                format!("Inference service '{}' is not reachable", self.backend.name()),
                0,
                false,
            );
        }

        let (user_prompt, truncated) = build_user_prompt(text, self.settings.chunk_size);
        if truncated {
            warn!(
                "Document text exceeds chunk size of {} characters, truncating prompt",
                self.settings.chunk_size
            );
        }
        let request = InferenceRequest {
            system_prompt: self.settings.system_prompt.clone(),
            user_prompt,
        };

        let max_attempts = self.settings.max_attempts();
        let mut last_err: Option<BackendError> = None;

        for attempt in 1..=max_attempts {
            match timeout(self.settings.timeout, self.backend.complete(&request)).await {
                Ok(Ok(response)) => {
                    let value = parse_response(&response.content);
                    let duration_ms = start.elapsed().as_millis() as u64;
                    info!(
                        "{}: response received on attempt {}/{} in {}ms",
                        self.backend.name(),
                        attempt,
                        max_attempts,
                        duration_ms
                    );
                    self.metrics
                        .record_inference(InferenceOutcome::Success, duration_ms, attempt);
                    return AnalysisResult {
                        result: Ok(value),
                        duration_ms,
                        attempts: attempt,
                        truncated,
                    };
                }
                Ok(Err(e)) => {
                    warn!("Inference attempt {}/{} failed: {}", attempt, max_attempts, e);
                    last_err = Some(e);
                }
                Err(_) => {
                    let ms = self.settings.timeout.as_millis() as u64;
                    warn!("Inference attempt {}/{} timed out after {}ms", attempt, max_attempts, ms);
                    last_err = Some(BackendError::Timeout(ms));
                }
            }

            if attempt < max_attempts {
                debug!("Retrying in {}ms", self.settings.retry_delay.as_millis());
                sleep(self.settings.retry_delay).await;
            }
        }

        let err = last_err.unwrap_or_else(|| BackendError::Service("Unknown error".to_string()));
        let kind = if err.is_timeout() {
            FailureKind::Timeout
        } else {
            FailureKind::Connection
        };
        self.fail(
            start,
            kind,
            format!(
                "Inference retry attempts exhausted after {} attempts: {}",
                max_attempts, err
            ),
            max_attempts,
            truncated,
        )
    }

    fn fail(
        &self,
        start: Instant,
        kind: FailureKind,
        message: String,
        attempts: u32,
        truncated: bool,
    ) -> AnalysisResult {
        let duration_ms = start.elapsed().as_millis() as u64;
        let outcome = match kind {
            FailureKind::EmptyInput => InferenceOutcome::Rejected,
            FailureKind::Timeout => InferenceOutcome::Timeout,
            FailureKind::Unavailable | FailureKind::Connection => InferenceOutcome::ConnectionFailure,
        };
        self.metrics.record_inference(outcome, duration_ms, attempts);
        AnalysisResult {
            result: Err(InferenceFailure {
                kind,
                message,
                attempts,
            }),
            duration_ms,
            attempts,
            truncated,
        }
    }
}

/// Parse a model response into a JSON value.
///
/// 1. Strip an outer code fence and parse strictly.
/// 2. Otherwise parse the outermost `{ … }` span embedded in prose.
/// 3. Otherwise return an empty record set.
///
/// A top-level array is taken as the record list. Scalars parse through
/// unchanged and are left for the malformed path downstream.
pub fn parse_response(content: &str) -> Value {
    let body = strip_code_fences(content);

    if let Ok(value) = serde_json::from_str::<Value>(&body) {
        return match value {
            Value::Array(items) => json!({ "records": items }),
            other => other,
        };
    }

    if let (Some(open), Some(close)) = (body.find('{'), body.rfind('}')) {
        if open < close {
            if let Ok(value) = serde_json::from_str::<Value>(&body[open..=close]) {
                debug!("Recovered JSON object embedded in prose response");
                return value;
            }
        }
    }

    warn!(
        "Inference response is not valid JSON ({} chars), using empty record set",
        content.len()
    );
    json!({ "records": [] })
}
