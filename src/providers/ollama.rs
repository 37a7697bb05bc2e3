//! Ollama provider implementation

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{CompletionError, CompletionRequest, CompletionResult, CompletionService};

pub struct OllamaProvider {
    client: Client,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    /// Send the prompt verbatim, without the model's chat template
    raw: bool,
    stream: bool,
    options: GenerateOptions<'a>,
}

#[derive(Debug, Serialize)]
struct GenerateOptions<'a> {
    temperature: f32,
    num_predict: u32,
    stop: &'a [String],
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
}

fn generate_request<'a>(request: &CompletionRequest<'a>) -> GenerateRequest<'a> {
    let params = request.params;
    // logit_bias has no Ollama equivalent; the stop list covers newlines
    GenerateRequest {
        model: &params.model,
        prompt: request.prompt,
        raw: true,
        stream: false,
        options: GenerateOptions {
            temperature: params.temperature,
            num_predict: params.max_tokens,
            stop: &params.stop,
        },
    }
}

impl OllamaProvider {
    pub fn new(base_url: String) -> Self {
        Self {
            client: Client::new(),
            base_url,
        }
    }
}

#[async_trait]
impl CompletionService for OllamaProvider {
    async fn complete(&self, request: CompletionRequest<'_>) -> Result<CompletionResult, CompletionError> {
        let body = generate_request(&request);

        tracing::debug!(tag = request.tag, model = body.model, "Sending Ollama generate request");

        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url.trim_end_matches('/')))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await?;
            let message = serde_json::from_str::<ErrorResponse>(&text)
                .map(|e| e.error)
                .unwrap_or(text);
            return Err(CompletionError::Api { status, message });
        }

        let generated: GenerateResponse = response.json().await?;

        Ok(CompletionResult::single(generated.response))
    }
}
