//! Anthropic (Claude) messages API client with image blocks

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

use super::traits::{
    CompletionRequest, CompletionResponse, LLMProvider, ProviderError, ProviderResult,
};
use crate::runner::rate_limiter::RateLimiter;

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
pub const API_KEY_ENV: &str = "ANTHROPIC_API_KEY";
const DEFAULT_MODEL: &str = "claude-sonnet-4-5-20250929";
const API_VERSION: &str = "2023-06-01";

/// Anthropic API client
pub struct AnthropicClient {
    api_key: String,
    base_url: String,
    http_client: Client,
    rate_limiter: Arc<RateLimiter>,
    default_model: String,
}

impl AnthropicClient {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            http_client: Client::new(),
            rate_limiter: Arc::new(RateLimiter::new(60, 100_000)),
            default_model: DEFAULT_MODEL.to_string(),
        }
    }

    /// Create from the `ANTHROPIC_API_KEY` environment variable
    pub fn from_env() -> ProviderResult<Self> {
        Self::from_env_var(API_KEY_ENV)
    }

    pub fn from_env_var(var: &str) -> ProviderResult<Self> {
        let api_key = std::env::var(var)
            .map_err(|_| ProviderError::Config(format!("{} not set", var)))?;
        Ok(Self::new(api_key))
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_rate_limits(mut self, rpm: u32, tpm: u32) -> Self {
        self.rate_limiter = Arc::new(RateLimiter::new(rpm, tpm));
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }
}

#[derive(Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Serialize)]
struct AnthropicMessage {
    role: String,
    content: Vec<RequestBlock>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RequestBlock {
    Image { source: ImageSource },
    Text { text: String },
}

#[derive(Serialize)]
struct ImageSource {
    #[serde(rename = "type")]
    source_type: &'static str,
    media_type: String,
    data: String,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<ContentBlock>,
    model: String,
    stop_reason: Option<String>,
    usage: Usage,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    content_type: String,
    text: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Deserialize)]
struct AnthropicError {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

fn build_messages(request: &CompletionRequest) -> Vec<AnthropicMessage> {
    let last_user = request.messages.iter().rposition(|m| m.role == "user");

    request
        .messages
        .iter()
        .enumerate()
        .filter(|(_, m)| m.role != "system")
        .map(|(idx, m)| {
            let mut content = Vec::new();
            if Some(idx) == last_user {
                content.extend(request.images.iter().map(|img| RequestBlock::Image {
                    source: ImageSource {
                        source_type: "base64",
                        media_type: img.media_type.clone(),
                        data: img.to_base64(),
                    },
                }));
            }
            content.push(RequestBlock::Text {
                text: m.content.clone(),
            });
            AnthropicMessage {
                role: m.role.clone(),
                content,
            }
        })
        .collect()
}

#[async_trait]
impl LLMProvider for AnthropicClient {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    async fn complete(&self, request: &CompletionRequest) -> ProviderResult<CompletionResponse> {
        self.rate_limiter.wait_for_token_capacity(request.max_tokens).await;
        self.rate_limiter.acquire().await;

        let start = Instant::now();

        let system_prompt = request.system_prompt.clone().or_else(|| {
            request
                .messages
                .iter()
                .find(|m| m.role == "system")
                .map(|m| m.content.clone())
        });

        let body = AnthropicRequest {
            model: request
                .model
                .clone()
                .unwrap_or_else(|| self.default_model.clone()),
            max_tokens: request.max_tokens,
            messages: build_messages(request),
            system: system_prompt,
            temperature: request.temperature,
        };

        let response = self
            .http_client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let latency_ms = start.elapsed().as_millis() as u64;
        let status = response.status();

        if status == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(60)
                * 1000;
            return Err(ProviderError::RateLimited {
                retry_after_ms: retry_after,
            });
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<AnthropicError>(&body)
                .map(|e| e.error.message)
                .unwrap_or_else(|_| format!("HTTP {}: {}", status.as_u16(), body));
            if status == 401 || status == 403 {
                return Err(ProviderError::Config(format!(
                    "Anthropic auth error ({}): {}",
                    status.as_u16(),
                    message
                )));
            }
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let api_response: AnthropicResponse = response.json().await?;

        self.rate_limiter
            .record_tokens(api_response.usage.input_tokens + api_response.usage.output_tokens)
            .await;

        let stop_reason = api_response.stop_reason.unwrap_or_else(|| "unknown".to_string());
        if stop_reason == "refusal" {
            return Err(ProviderError::Blocked("model refused the request".to_string()));
        }

        let content = api_response
            .content
            .iter()
            .filter(|block| block.content_type == "text")
            .filter_map(|block| block.text.as_deref())
            .collect::<Vec<_>>()
            .join("");

        Ok(CompletionResponse {
            content,
            model: api_response.model,
            input_tokens: api_response.usage.input_tokens,
            output_tokens: api_response.usage.output_tokens,
            finish_reason: stop_reason,
            latency_ms,
        })
    }

    fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }
}
