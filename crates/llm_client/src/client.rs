use std::time::Duration;

use async_trait::async_trait;
use common::config::ProviderKind;
use reqwest::Client;
use serde_json::json;
use tracing::debug;

use crate::types::{AnalysisPrompt, ProviderError};

const GITHUB_MODELS_URL: &str = "https://models.inference.ai.azure.com";
const OPENAI_API_URL: &str = "https://api.openai.com/v1";
const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";

/// Capability shared by every model backend: prompt in, text out.
#[async_trait]
pub trait AnalysisBackend: Send + Sync {
    async fn attempt(&self, model: &str, prompt: &AnalysisPrompt) -> Result<String, ProviderError>;
}

fn build_http(timeout: Duration) -> Result<Client, ProviderError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ProviderError::Api(format!("failed to build HTTP client: {e}")))
}

fn map_send_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout
    } else {
        ProviderError::Api(e.to_string())
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let body = common::body_excerpt(&body).to_string();
    if status.as_u16() == 429 {
        return Err(ProviderError::RateLimited(body));
    }
    Err(ProviderError::HttpStatus {
        status: status.as_u16(),
        body,
    })
}

// ── OpenAI-compatible chat completions ────────────────────────────────

/// Chat-completions client. Serves both GitHub Models and OpenAI.
pub struct ChatCompletionsClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl ChatCompletionsClient {
    pub fn new(base_url: &str, api_key: String, timeout: Duration) -> Result<Self, ProviderError> {
        Ok(Self {
            client: build_http(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    pub fn github(api_key: String, timeout: Duration) -> Result<Self, ProviderError> {
        Self::new(GITHUB_MODELS_URL, api_key, timeout)
    }

    pub fn openai(api_key: String, timeout: Duration) -> Result<Self, ProviderError> {
        Self::new(OPENAI_API_URL, api_key, timeout)
    }

    fn extract_content(body: &serde_json::Value) -> Result<&str, ProviderError> {
        body.get("choices")
            .and_then(|c| c.as_array())
            .and_then(|choices| choices.first())
            .and_then(|choice| choice["message"]["content"].as_str())
            .ok_or_else(|| ProviderError::Api("missing choices[0].message.content".into()))
    }

    pub async fn complete(&self, model: &str, prompt: &AnalysisPrompt) -> Result<String, ProviderError> {
        let payload = json!({
            "model": model,
            "temperature": prompt.temperature,
            "max_tokens": prompt.max_tokens,
            "messages": [
                { "role": "system", "content": prompt.system },
                { "role": "user", "content": prompt.user }
            ]
        });

        debug!("chat completion request: model={} base={}", model, self.base_url);

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(map_send_error)?;

        let body: serde_json::Value = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::Api(e.to_string()))?;

        Ok(Self::extract_content(&body)?.to_string())
    }
}

// ── Anthropic messages ────────────────────────────────────────────────

pub struct AnthropicClient {
    client: Client,
    url: String,
    api_key: String,
}

impl AnthropicClient {
    pub fn new(api_key: String, timeout: Duration) -> Result<Self, ProviderError> {
        Self::with_url(ANTHROPIC_API_URL, api_key, timeout)
    }

    pub fn with_url(url: &str, api_key: String, timeout: Duration) -> Result<Self, ProviderError> {
        Ok(Self {
            client: build_http(timeout)?,
            url: url.to_string(),
            api_key,
        })
    }

    fn extract_text_content(body: &serde_json::Value) -> Result<&str, ProviderError> {
        let content_arr = body
            .get("content")
            .and_then(|c| c.as_array())
            .ok_or_else(|| ProviderError::Api("missing or invalid 'content' field".into()))?;

        content_arr
            .iter()
            .find(|item| item["type"] == "text")
            .and_then(|item| item["text"].as_str())
            .ok_or_else(|| ProviderError::Api("missing 'text' content".into()))
    }

    pub async fn complete(&self, model: &str, prompt: &AnalysisPrompt) -> Result<String, ProviderError> {
        let payload = json!({
            "model": model,
            "max_tokens": prompt.max_tokens,
            "temperature": prompt.temperature,
            "system": prompt.system,
            "messages": [
                { "role": "user", "content": prompt.user }
            ]
        });

        debug!("anthropic messages request: model={}", model);

        let response = self
            .client
            .post(&self.url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(map_send_error)?;

        let body: serde_json::Value = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::Api(e.to_string()))?;

        Ok(Self::extract_text_content(&body)?.to_string())
    }
}

// ── Closed adapter set ────────────────────────────────────────────────

/// The provider adapters the gateway can be configured with.
pub enum ProviderAdapter {
    OpenAiCompatible(ChatCompletionsClient),
    Anthropic(AnthropicClient),
    /// Provider listed in the chain without a credential.
    Unconfigured(ProviderKind),
}

impl ProviderAdapter {
    /// Build the adapter for `kind`; an empty credential yields `Unconfigured`.
    pub fn for_provider(
        kind: ProviderKind,
        credential: &str,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let credential = credential.trim();
        if credential.is_empty() {
            return Ok(ProviderAdapter::Unconfigured(kind));
        }
        let key = credential.to_string();
        Ok(match kind {
            ProviderKind::Github => {
                ProviderAdapter::OpenAiCompatible(ChatCompletionsClient::github(key, timeout)?)
            }
            ProviderKind::Openai => {
                ProviderAdapter::OpenAiCompatible(ChatCompletionsClient::openai(key, timeout)?)
            }
            ProviderKind::Anthropic => ProviderAdapter::Anthropic(AnthropicClient::new(key, timeout)?),
        })
    }
}

#[async_trait]
impl AnalysisBackend for ProviderAdapter {
    async fn attempt(&self, model: &str, prompt: &AnalysisPrompt) -> Result<String, ProviderError> {
        match self {
            ProviderAdapter::OpenAiCompatible(client) => client.complete(model, prompt).await,
            ProviderAdapter::Anthropic(client) => client.complete(model, prompt).await,
            ProviderAdapter::Unconfigured(kind) => Err(ProviderError::NotConfigured(kind.as_str())),
        }
    }
}
