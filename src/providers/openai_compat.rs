//! OpenAI-compatible text completions provider
//!
//! Talks to any server implementing the legacy `/completions` endpoint:
//! - OpenAI (api.openai.com)
//! - vLLM (local server)
//! - LM Studio (local server)
//! - LocalAI (local server)
//!
//! # Configuration
//!
//! ```text
//! OPENAI_API_KEY=sk-...
//! OPENAI_ORG_ID=org-...           # optional
//! OPENAI_BASE_URL=http://localhost:8000/v1   # optional, defaults to OpenAI
//! ```

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{CompletionError, CompletionRequest, CompletionResult, CompletionService};

/// Completion request body
#[derive(Debug, Serialize)]
struct TextCompletionRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    logit_bias: &'a BTreeMap<String, i32>,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    stop: &'a [String],
}

/// Completion response body
#[derive(Debug, Deserialize)]
struct TextCompletionResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    text: String,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

/// Error response from API
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

/// Public OpenAI endpoint
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI-compatible provider configuration
#[derive(Debug, Clone)]
pub struct OpenAICompatConfig {
    /// Base URL for the API (e.g., https://api.openai.com/v1)
    pub base_url: String,
    /// API key (optional for local servers)
    pub api_key: Option<String>,
    /// Optional organization ID (OpenAI)
    pub organization: Option<String>,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for OpenAICompatConfig {
    fn default() -> Self {
        Self {
            base_url: OPENAI_BASE_URL.to_string(),
            api_key: None,
            organization: None,
            timeout_secs: 120,
        }
    }
}

impl OpenAICompatConfig {
    /// Create config for a local server (vLLM, LM Studio, etc.)
    pub fn local(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            organization: None,
            timeout_secs: 300, // Local inference can be slower
        }
    }
}

/// OpenAI-compatible API provider
pub struct OpenAICompatProvider {
    config: OpenAICompatConfig,
    client: Client,
}

impl OpenAICompatProvider {
    pub fn new(config: OpenAICompatConfig) -> Result<Self, CompletionError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { config, client })
    }

    fn endpoint(&self) -> String {
        format!("{}/completions", self.config.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl CompletionService for OpenAICompatProvider {
    async fn complete(&self, request: CompletionRequest<'_>) -> Result<CompletionResult, CompletionError> {
        let params = request.params;
        let body = TextCompletionRequest {
            model: &params.model,
            prompt: request.prompt,
            temperature: params.temperature,
            max_tokens: params.max_tokens,
            logit_bias: &params.logit_bias,
            stop: &params.stop,
        };

        tracing::debug!(tag = request.tag, model = %params.model, "Sending completion request");

        let mut req_builder = self.client.post(self.endpoint());

        if let Some(ref api_key) = self.config.api_key {
            req_builder = req_builder.bearer_auth(api_key);
        }

        // OpenAI specific
        if let Some(ref org) = self.config.organization {
            req_builder = req_builder.header("OpenAI-Organization", org);
        }

        let response = req_builder.json(&body).send().await?;

        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorResponse>(&text)
                .map(|e| e.error.message)
                .unwrap_or(text);
            return Err(CompletionError::Api { status, message });
        }

        parse_completion(&text)
    }
}

fn parse_completion(body: &str) -> Result<CompletionResult, CompletionError> {
    let completion: TextCompletionResponse = serde_json::from_str(body).map_err(|e| {
        CompletionError::InvalidResponse(format!("Failed to parse response: {} - Body: {}", e, body))
    })?;

    if let Some(usage) = &completion.usage {
        tracing::debug!(
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            "Completion usage"
        );
    }

    if completion.choices.is_empty() {
        return Err(CompletionError::NoAnswer);
    }

    let answers = completion
        .choices
        .into_iter()
        .inspect(|c| tracing::trace!(finish_reason = ?c.finish_reason, "Choice"))
        .map(|c| c.text)
        .collect();

    Ok(CompletionResult { answers })
}
