//! Completion provider integrations

mod ollama;
mod openai_compat;

use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;

use crate::config::{generation::DEFAULT_MODEL, Config, RequestConfig};

pub use ollama::OllamaProvider;
pub use openai_compat::{OpenAICompatConfig, OpenAICompatProvider, OPENAI_BASE_URL};

#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: StatusCode, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Completion returned no answer")]
    NoAnswer,
}

impl CompletionError {
    /// Whether re-submitting the same request might succeed
    pub fn is_transient(&self) -> bool {
        match self {
            CompletionError::RequestFailed(e) => {
                e.is_timeout() || e.is_connect() || e.status().map_or(false, is_retryable_status)
            }
            CompletionError::Api { status, .. } => is_retryable_status(*status),
            CompletionError::NoAnswer => true,
            _ => false,
        }
    }
}

/// Rate limiting and server-side failures
fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// A fully rendered request for the completion service
#[derive(Debug, Clone)]
pub struct CompletionRequest<'a> {
    pub prompt: &'a str,
    pub params: &'a RequestConfig,
    /// Opaque correlation tag, e.g. `chat_turn[3]`
    pub tag: &'a str,
}

/// What came back from the service
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletionResult {
    pub answers: Vec<String>,
}

impl CompletionResult {
    pub fn single(answer: impl Into<String>) -> Self {
        Self {
            answers: vec![answer.into()],
        }
    }

    pub fn top_answer(&self) -> Option<&str> {
        self.answers.first().map(String::as_str)
    }
}

/// The text-generation capability the conversation engine delegates to
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, request: CompletionRequest<'_>) -> Result<CompletionResult, CompletionError>;
}

/// Completion backend selectable on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ProviderKind {
    /// OpenAI or any server with an OpenAI-compatible `/completions` endpoint
    #[value(name = "openai")]
    OpenAI,
    /// A local Ollama server
    Ollama,
}

impl ProviderKind {
    /// Model used when neither `--model` nor the generation file names one
    pub fn default_model(self) -> &'static str {
        match self {
            ProviderKind::OpenAI => DEFAULT_MODEL,
            ProviderKind::Ollama => "llama3.2",
        }
    }
}

pub enum Provider {
    OpenAICompat(OpenAICompatProvider),
    Ollama(OllamaProvider),
}

impl Provider {
    pub fn from_kind(kind: ProviderKind, config: &Config) -> Result<Self, CompletionError> {
        match kind {
            ProviderKind::OpenAI => {
                let is_hosted = config.openai_base_url.trim_end_matches('/') == OPENAI_BASE_URL;
                let provider_config = match config.openai_api_key.clone() {
                    Some(api_key) => OpenAICompatConfig {
                        base_url: config.openai_base_url.clone(),
                        api_key: Some(api_key),
                        organization: config.openai_org_id.clone(),
                        ..OpenAICompatConfig::default()
                    },
                    // Local servers usually run without a key
                    None if !is_hosted => OpenAICompatConfig::local(config.openai_base_url.clone()),
                    None => {
                        return Err(CompletionError::NotConfigured(
                            "OPENAI_API_KEY is not set".into(),
                        ))
                    }
                };
                Ok(Provider::OpenAICompat(OpenAICompatProvider::new(provider_config)?))
            }
            ProviderKind::Ollama => Ok(Provider::Ollama(OllamaProvider::new(config.ollama_url.clone()))),
        }
    }
}

#[async_trait]
impl CompletionService for Provider {
    async fn complete(&self, request: CompletionRequest<'_>) -> Result<CompletionResult, CompletionError> {
        match self {
            Provider::OpenAICompat(p) => p.complete(request).await,
            Provider::Ollama(p) => p.complete(request).await,
        }
    }
}
