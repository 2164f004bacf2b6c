//! OpenRouter client (OpenAI-compatible chat completions with image input)

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

use super::traits::{
    CompletionRequest, CompletionResponse, LLMProvider, Message, ProviderError, ProviderResult,
};
use crate::runner::rate_limiter::RateLimiter;

pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const API_KEY_ENV: &str = "OPENROUTER_API_KEY";
const DEFAULT_MODEL: &str = "google/gemini-2.5-flash";

/// OpenRouter API client. One client serves every model id routed through it.
pub struct OpenRouterClient {
    api_key: String,
    base_url: String,
    http_client: Client,
    rate_limiter: Arc<RateLimiter>,
    default_model: String,
}

impl OpenRouterClient {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            http_client: Client::new(),
            rate_limiter: Arc::new(RateLimiter::new(60, 1_000_000)),
            default_model: DEFAULT_MODEL.to_string(),
        }
    }

    /// Create from the `OPENROUTER_API_KEY` environment variable
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
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: ChatContent,
}

#[derive(Serialize)]
#[serde(untagged)]
enum ChatContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
}

impl From<&Message> for ChatMessage {
    fn from(msg: &Message) -> Self {
        Self {
            role: msg.role.clone(),
            content: ChatContent::Text(msg.content.clone()),
        }
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    #[serde(default)]
    message: Option<ResponseMessage>,
    finish_reason: Option<String>,
    #[serde(default)]
    error: Option<ErrorDetail>,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    /// Reasoning models sometimes return only this field
    #[serde(default)]
    reasoning: Option<String>,
}

#[derive(Deserialize, Default)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    message: String,
    #[serde(default)]
    code: Option<serde_json::Value>,
}

/// Build the wire messages; images ride on the last user message, before its text
fn build_messages(request: &CompletionRequest) -> Vec<ChatMessage> {
    let mut messages: Vec<ChatMessage> = Vec::new();

    if let Some(system) = &request.system_prompt {
        messages.push(ChatMessage::from(&Message::system(system.clone())));
    }

    let last_user = request.messages.iter().rposition(|m| m.role == "user");

    for (idx, msg) in request.messages.iter().enumerate() {
        if Some(idx) == last_user && !request.images.is_empty() {
            let mut parts: Vec<ContentPart> = request
                .images
                .iter()
                .map(|img| ContentPart::ImageUrl {
                    image_url: ImageUrl { url: img.data_url() },
                })
                .collect();
            parts.push(ContentPart::Text {
                text: msg.content.clone(),
            });
            messages.push(ChatMessage {
                role: msg.role.clone(),
                content: ChatContent::Parts(parts),
            });
        } else {
            messages.push(msg.into());
        }
    }

    messages
}

#[async_trait]
impl LLMProvider for OpenRouterClient {
    fn name(&self) -> &str {
        "openrouter"
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    async fn complete(&self, request: &CompletionRequest) -> ProviderResult<CompletionResponse> {
        self.rate_limiter.wait_for_token_capacity(request.max_tokens).await;
        self.rate_limiter.acquire().await;

        let start = Instant::now();

        let model = request
            .model
            .clone()
            .unwrap_or_else(|| self.default_model.clone());

        let body = ChatRequest {
            model: model.clone(),
            messages: build_messages(request),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        tracing::info!(
            "Starting request: model={}, images={}, max_tokens={}",
            model,
            request.images.len(),
            request.max_tokens
        );

        let response = self
            .http_client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
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
            let message = match serde_json::from_str::<ErrorEnvelope>(&body) {
                Ok(envelope) => envelope.error.message,
                Err(_) => format!("HTTP {}: {}", status.as_u16(), body),
            };

            // 401/403 are auth errors, not worth retrying
            if status == 401 || status == 403 {
                return Err(ProviderError::Config(format!(
                    "OpenRouter auth error ({}): {}",
                    status.as_u16(),
                    message
                )));
            }

            return Err(ProviderError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body = response.text().await?;
        tracing::debug!("Response preview: {}", preview(&body, 500));

        let api_response: ChatResponse = serde_json::from_str(&body)
            .map_err(|e| ProviderError::Parse(format!("invalid response body: {}", e)))?;

        let usage = api_response.usage.unwrap_or_default();
        self.rate_limiter
            .record_tokens(usage.prompt_tokens + usage.completion_tokens)
            .await;

        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Parse("No choices in response".to_string()))?;

        if let Some(error) = choice.error {
            let code = error
                .code
                .map(|c| c.to_string().trim_matches('"').to_string())
                .unwrap_or_else(|| "unknown".to_string());
            tracing::error!("Model returned error: code={}, message={}", code, error.message);
            return Err(ProviderError::Api {
                status: code.parse().unwrap_or(502),
                message: format!("Model error ({}): {}", code, error.message),
            });
        }

        let finish_reason = choice.finish_reason.unwrap_or_else(|| "unknown".to_string());
        if finish_reason == "content_filter" {
            return Err(ProviderError::Blocked(
                "response withheld by content filter".to_string(),
            ));
        }

        let content = match choice.message {
            Some(ResponseMessage { content: Some(c), .. }) if !c.is_empty() => c,
            Some(ResponseMessage { reasoning: Some(r), .. }) if !r.is_empty() => {
                tracing::info!("Using reasoning field as content (length={} chars)", r.len());
                r
            }
            _ => String::new(),
        };

        tracing::info!(
            "Success: model={}, content_length={} chars, elapsed={}ms",
            model,
            content.len(),
            latency_ms
        );

        Ok(CompletionResponse {
            content,
            model: api_response.model.unwrap_or(model),
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            finish_reason,
            latency_ms,
        })
    }

    fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }
}

fn preview(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ImageAttachment;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> OpenRouterClient {
        OpenRouterClient::new("test-key".to_string()).with_base_url(server.uri())
    }

    fn request_with_image() -> CompletionRequest {
        CompletionRequest::new(vec![Message::user("Solve it")], 128)
            .with_model("vendor/vision-model")
            .with_temperature(0.0)
            .with_images(vec![ImageAttachment::new("image/png", b"png".to_vec())])
    }

    #[test]
    fn test_images_precede_text_on_last_user_message() {
        let messages = build_messages(&request_with_image().with_system("be terse"));
        let value = serde_json::to_value(&messages).unwrap();

        assert_eq!(value[0]["role"], "system");
        assert_eq!(value[0]["content"], "be terse");
        assert_eq!(value[1]["content"][0]["type"], "image_url");
        assert_eq!(
            value[1]["content"][0]["image_url"]["url"],
            "data:image/png;base64,cG5n"
        );
        assert_eq!(value[1]["content"][1]["type"], "text");
        assert_eq!(value[1]["content"][1]["text"], "Solve it");
    }

    #[tokio::test]
    async fn test_successful_completion() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("Authorization", "Bearer test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "model": "vendor/vision-model",
                "choices": [{
                    "message": {"role": "assistant", "content": "Question 1a: 42 kN"},
                    "finish_reason": "stop"
                }],
                "usage": {"prompt_tokens": 900, "completion_tokens": 12}
            })))
            .mount(&server)
            .await;

        let response = client_for(&server).complete(&request_with_image()).await.unwrap();
        assert_eq!(response.content, "Question 1a: 42 kN");
        assert_eq!(response.finish_reason, "stop");
        assert_eq!(response.input_tokens, 900);
        assert_eq!(response.output_tokens, 12);
        assert!(!response.hit_length_limit());
    }

    #[tokio::test]
    async fn test_reasoning_fallback_and_length_finish() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{
                    "message": {"content": "", "reasoning": "thinking out loud"},
                    "finish_reason": "length"
                }]
            })))
            .mount(&server)
            .await;

        let response = client_for(&server).complete(&request_with_image()).await.unwrap();
        assert_eq!(response.content, "thinking out loud");
        assert_eq!(response.model, "vendor/vision-model");
        assert!(response.hit_length_limit());
    }

    #[tokio::test]
    async fn test_rate_limit_maps_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "2"))
            .mount(&server)
            .await;

        let err = client_for(&server).complete(&request_with_image()).await.unwrap_err();
        assert!(matches!(err, ProviderError::RateLimited { retry_after_ms: 2000 }));
    }

    #[tokio::test]
    async fn test_choice_error_and_content_filter() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{
                    "message": {"content": null},
                    "finish_reason": "error",
                    "error": {"message": "upstream overloaded", "code": 503}
                }]
            })))
            .mount(&server)
            .await;

        let err = client_for(&server).complete(&request_with_image()).await.unwrap_err();
        match err {
            ProviderError::Api { status, message } => {
                assert_eq!(status, 503);
                assert!(message.contains("upstream overloaded"));
            }
            other => panic!("unexpected error: {other}"),
        }

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"content": ""}, "finish_reason": "content_filter"}]
            })))
            .mount(&server)
            .await;

        let err = client_for(&server).complete(&request_with_image()).await.unwrap_err();
        assert!(matches!(err, ProviderError::Blocked(_)));
    }

    #[tokio::test]
    async fn test_auth_error_is_config() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": {"message": "No auth credentials found", "code": 401}
            })))
            .mount(&server)
            .await;

        let err = client_for(&server).complete(&request_with_image()).await.unwrap_err();
        assert!(matches!(err, ProviderError::Config(_)));
        assert!(!err.is_retryable());
    }
}
