//! Inference backends: the opaque chat-completion endpoint behind the client.
//!
//! The client in [`crate::pipeline::inference`] owns retries, timeouts and
//! health caching; a backend only knows how to send one request. Two
//! implementations ship:
//!
//! * [`OllamaBackend`]: a local or remote Ollama server over HTTP.
//! * [`ProviderBackend`]: any `edgequake_llm` provider (OpenAI, Anthropic,
//!   Gemini, Azure, …).
//!
//! Tests substitute their own implementation of [`InferenceBackend`].

use crate::config::PipelineConfig;
use crate::error::Pdf2RecordsError;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// One chat-completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceRequest {
    pub system_prompt: String,
    pub user_prompt: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InferenceResponse {
    pub content: String,
}

/// Errors raised by a backend for a single request.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("request timed out after {0}ms")]
    Timeout(u64),

    #[error("connection failed: {0}")]
    Connection(String),

    /// The service answered but refused or failed the request.
    #[error("service error: {0}")]
    Service(String),
}

impl BackendError {
    /// Whether this error should be classified as a timeout.
    ///
    /// Provider errors arrive as text, so a message mentioning a timeout
    /// counts too.
    pub fn is_timeout(&self) -> bool {
        match self {
            BackendError::Timeout(_) => true,
            BackendError::Connection(msg) | BackendError::Service(msg) => {
                let msg = msg.to_lowercase();
                msg.contains("timeout") || msg.contains("timed out")
            }
        }
    }
}

/// A chat-completion service.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Send one request. No retries, no timeout: the caller handles both.
    async fn complete(&self, request: &InferenceRequest) -> Result<InferenceResponse, BackendError>;

    /// Cheap reachability probe.
    async fn health_check(&self) -> Result<(), BackendError>;

    /// Human-readable backend name for logs and metadata.
    fn name(&self) -> &str;
}

// ── Ollama ───────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: Vec<OllamaMessage<'a>>,
    stream: bool,
    format: &'a str,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: usize,
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    message: OllamaResponseMessage,
}

#[derive(Deserialize)]
struct OllamaResponseMessage {
    content: String,
}

/// Backend for the Ollama HTTP API.
pub struct OllamaBackend {
    host: String,
    model: String,
    temperature: f32,
    max_tokens: usize,
    client: reqwest::Client,
    name: String,
}

impl OllamaBackend {
    pub fn new(
        host: impl Into<String>,
        model: impl Into<String>,
        temperature: f32,
        max_tokens: usize,
    ) -> Result<Self, Pdf2RecordsError> {
        let host = host.into().trim_end_matches('/').to_string();
        let model = model.into();
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| Pdf2RecordsError::InvalidConfig(format!("HTTP client: {e}")))?;
        Ok(Self {
            name: format!("ollama/{model}"),
            host,
            model,
            temperature,
            max_tokens,
            client,
        })
    }
}

fn map_reqwest_error(e: reqwest::Error) -> BackendError {
    if e.is_timeout() {
        BackendError::Timeout(0)
    } else if e.is_connect() {
        BackendError::Connection(e.to_string())
    } else {
        BackendError::Service(e.to_string())
    }
}

#[async_trait]
impl InferenceBackend for OllamaBackend {
    async fn complete(&self, request: &InferenceRequest) -> Result<InferenceResponse, BackendError> {
        let url = format!("{}/api/chat", self.host);
        let body = OllamaChatRequest {
            model: &self.model,
            messages: vec![
                OllamaMessage {
                    role: "system",
                    content: &request.system_prompt,
                },
                OllamaMessage {
                    role: "user",
                    content: &request.user_prompt,
                },
            ],
            stream: false,
            format: "json",
            options: OllamaOptions {
                temperature: self.temperature,
                num_predict: self.max_tokens,
            },
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(BackendError::Service(format!("HTTP {}: {}", status, text)));
        }

        let parsed: OllamaChatResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Service(format!("invalid response body: {e}")))?;
        debug!("{}: {} chars returned", self.name, parsed.message.content.len());
        Ok(InferenceResponse {
            content: parsed.message.content,
        })
    }

    async fn health_check(&self) -> Result<(), BackendError> {
        let url = format!("{}/api/tags", self.host);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(BackendError::Connection(format!(
                "health check returned HTTP {}",
                response.status()
            )))
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// ── edgequake-llm providers ──────────────────────────────────────────────────

/// Backend wrapping any [`LLMProvider`].
pub struct ProviderBackend {
    provider: Arc<dyn LLMProvider>,
    temperature: f32,
    max_tokens: usize,
    name: String,
}

impl ProviderBackend {
    pub fn new(
        provider: Arc<dyn LLMProvider>,
        name: impl Into<String>,
        temperature: f32,
        max_tokens: usize,
    ) -> Self {
        Self {
            provider,
            temperature,
            max_tokens,
            name: name.into(),
        }
    }

    fn classify(message: String) -> BackendError {
        let lower = message.to_lowercase();
        if lower.contains("timeout") || lower.contains("timed out") {
            BackendError::Timeout(0)
        } else if lower.contains("connect") || lower.contains("network") || lower.contains("dns") {
            BackendError::Connection(message)
        } else {
            BackendError::Service(message)
        }
    }
}

#[async_trait]
impl InferenceBackend for ProviderBackend {
    async fn complete(&self, request: &InferenceRequest) -> Result<InferenceResponse, BackendError> {
        let messages = vec![
            ChatMessage::system(&request.system_prompt),
            ChatMessage::user(&request.user_prompt),
        ];
        let options = CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        };
        let response = self
            .provider
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| Self::classify(format!("{}", e)))?;
        debug!(
            "{}: {} input tokens, {} output tokens",
            self.name, response.prompt_tokens, response.completion_tokens
        );
        Ok(InferenceResponse {
            content: response.content,
        })
    }

    /// Hosted providers expose no free status endpoint; a one-token
    /// completion stands in for one.
    async fn health_check(&self) -> Result<(), BackendError> {
        let messages = vec![ChatMessage::user("ping")];
        let options = CompletionOptions {
            max_tokens: Some(1),
            ..Default::default()
        };
        self.provider
            .chat(&messages, Some(&options))
            .await
            .map(|_| ())
            .map_err(|e| Self::classify(format!("{}", e)))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Resolve the inference backend, from most-specific to least-specific.
///
/// 1. **Pre-built backend** (`config.backend`): used as-is.
/// 2. **Ollama** (`provider_name == "ollama"`): HTTP client against `config.host`.
/// 3. **Named provider**: [`ProviderFactory::create_llm_provider`] reads the
///    matching API key (`OPENAI_API_KEY`, …) from the environment.
/// 4. **Auto** (`provider_name == "auto"`): [`ProviderFactory::from_env`]
///    picks the first provider with credentials available.
pub fn resolve_backend(config: &PipelineConfig) -> Result<Arc<dyn InferenceBackend>, Pdf2RecordsError> {
    if let Some(ref backend) = config.backend {
        return Ok(Arc::clone(backend));
    }

    match config.provider_name.as_str() {
        "ollama" => Ok(Arc::new(OllamaBackend::new(
            &config.host,
            &config.model,
            config.temperature,
            config.max_tokens,
        )?)),
        "auto" => {
            let (provider, _embedding) =
                ProviderFactory::from_env().map_err(|e| Pdf2RecordsError::ProviderNotConfigured {
                    provider: "auto".to_string(),
                    hint: format!(
                        "No inference provider could be auto-detected from environment.\n\
                        Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or use --provider ollama.\n\
                        Error: {}",
                        e
                    ),
                })?;
            Ok(Arc::new(ProviderBackend::new(
                provider,
                "auto",
                config.temperature,
                config.max_tokens,
            )))
        }
        name => {
            let provider = ProviderFactory::create_llm_provider(name, &config.model).map_err(|e| {
                Pdf2RecordsError::ProviderNotConfigured {
                    provider: name.to_string(),
                    hint: format!("{e}"),
                }
            })?;
            Ok(Arc::new(ProviderBackend::new(
                provider,
                format!("{name}/{}", config.model),
                config.temperature,
                config.max_tokens,
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_classification() {
        assert!(BackendError::Timeout(500).is_timeout());
        assert!(BackendError::Connection("operation timed out".into()).is_timeout());
        assert!(BackendError::Service("Gateway Timeout".into()).is_timeout());
        assert!(!BackendError::Connection("connection refused".into()).is_timeout());
    }

    #[test]
    fn provider_error_classification() {
        assert!(matches!(
            ProviderBackend::classify("request timed out".into()),
            BackendError::Timeout(_)
        ));
        assert!(matches!(
            ProviderBackend::classify("failed to connect to api.openai.com".into()),
            BackendError::Connection(_)
        ));
        assert!(matches!(
            ProviderBackend::classify("invalid api key".into()),
            BackendError::Service(_)
        ));
    }

    #[test]
    fn ollama_backend_normalises_host() {
        let backend = OllamaBackend::new("http://localhost:11434/", "llama3.1", 0.1, 256).unwrap();
        assert_eq!(backend.host, "http://localhost:11434");
        assert_eq!(backend.name(), "ollama/llama3.1");
    }

    #[test]
    fn ollama_request_shape() {
        let body = OllamaChatRequest {
            model: "llama3.1",
            messages: vec![OllamaMessage {
                role: "user",
                content: "hi",
            }],
            stream: false,
            format: "json",
            options: OllamaOptions {
                temperature: 0.1,
                num_predict: 64,
            },
        };
        let v = serde_json::to_value(&body).unwrap();
        assert_eq!(v["stream"], serde_json::json!(false));
        assert_eq!(v["format"], serde_json::json!("json"));
        assert_eq!(v["options"]["num_predict"], serde_json::json!(64));
        assert_eq!(v["messages"][0]["role"], serde_json::json!("user"));
    }

    #[test]
    fn resolve_prefers_prebuilt_backend() {
        let backend: Arc<dyn InferenceBackend> =
            Arc::new(OllamaBackend::new("http://gpu:11434", "qwen2.5", 0.1, 128).unwrap());
        let config = PipelineConfig::builder()
            .provider_name("openai")
            .backend(Arc::clone(&backend))
            .build()
            .unwrap();
        let resolved = resolve_backend(&config).unwrap();
        assert_eq!(resolved.name(), "ollama/qwen2.5");
    }

    #[test]
    fn resolve_ollama_by_name() {
        let config = PipelineConfig::builder().model("mistral").build().unwrap();
        let resolved = resolve_backend(&config).unwrap();
        assert_eq!(resolved.name(), "ollama/mistral");
    }
}
