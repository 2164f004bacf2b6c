//! Provider trait definitions for LLM API clients

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

use crate::runner::rate_limiter::RateLimiter;

/// A message in a conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }
}

/// An image sent alongside the last user message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAttachment {
    /// MIME type, e.g. `image/png`
    pub media_type: String,
    pub data: Vec<u8>,
}

impl ImageAttachment {
    pub fn new(media_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            media_type: media_type.into(),
            data,
        }
    }

    /// Read an image from disk, inferring the media type from the extension
    pub fn from_path(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path)?;
        Ok(Self::new(media_type_for(path), data))
    }

    pub fn to_base64(&self) -> String {
        B64.encode(&self.data)
    }

    /// `data:` URL form used by OpenAI-compatible APIs
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.media_type, self.to_base64())
    }
}

/// Media type for a supported image file extension (defaults to PNG)
pub fn media_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        _ => "image/png",
    }
}

/// Request for a completion from an LLM provider
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: Option<String>,
    pub messages: Vec<Message>,
    /// Images attached to the final user message, in order
    pub images: Vec<ImageAttachment>,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
    pub system_prompt: Option<String>,
}

impl CompletionRequest {
    pub fn new(messages: Vec<Message>, max_tokens: u32) -> Self {
        Self {
            model: None,
            messages,
            images: Vec::new(),
            max_tokens,
            temperature: None,
            system_prompt: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temp: f32) -> Self {
        self.temperature = Some(temp);
        self
    }

    pub fn with_images(mut self, images: Vec<ImageAttachment>) -> Self {
        self.images = images;
        self
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system_prompt = Some(system.into());
        self
    }
}

/// Response from an LLM provider
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: String,
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub finish_reason: String,
    pub latency_ms: u64,
}

impl CompletionResponse {
    /// Whether generation stopped on the output token cap
    pub fn hit_length_limit(&self) -> bool {
        matches!(self.finish_reason.as_str(), "length" | "max_tokens")
    }
}

/// Error types for provider operations
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Rate limited: retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("Timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Blocked by provider: {0}")]
    Blocked(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ProviderError {
    /// Transient failures worth another attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Http(_)
            | ProviderError::RateLimited { .. }
            | ProviderError::Timeout { .. } => true,
            ProviderError::Api { status, .. } => *status >= 500,
            ProviderError::Blocked(_) | ProviderError::Parse(_) | ProviderError::Config(_) => false,
        }
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Trait for LLM providers
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Get the provider name (e.g., "openrouter", "anthropic")
    fn name(&self) -> &str;

    /// Get the default model for this provider
    fn default_model(&self) -> &str;

    /// Send a completion request
    async fn complete(&self, request: &CompletionRequest) -> ProviderResult<CompletionResponse>;

    /// Get the rate limiter for this provider
    fn rate_limiter(&self) -> &Arc<RateLimiter>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_type_from_extension() {
        assert_eq!(media_type_for(Path::new("1.png")), "image/png");
        assert_eq!(media_type_for(Path::new("1.1.JPG")), "image/jpeg");
        assert_eq!(media_type_for(Path::new("scan.webp")), "image/webp");
        assert_eq!(media_type_for(Path::new("noext")), "image/png");
    }

    #[test]
    fn test_data_url() {
        let img = ImageAttachment::new("image/png", b"abc".to_vec());
        assert_eq!(img.data_url(), "data:image/png;base64,YWJj");
    }

    #[test]
    fn test_retryable_errors() {
        assert!(ProviderError::RateLimited { retry_after_ms: 10 }.is_retryable());
        assert!(ProviderError::Api { status: 503, message: String::new() }.is_retryable());
        assert!(!ProviderError::Api { status: 400, message: String::new() }.is_retryable());
        assert!(!ProviderError::Blocked("safety".into()).is_retryable());
        assert!(!ProviderError::Config("no key".into()).is_retryable());
    }
}
