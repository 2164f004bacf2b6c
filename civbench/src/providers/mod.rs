//! LLM Provider implementations

pub mod anthropic;
pub mod openrouter;
pub mod traits;

pub use anthropic::AnthropicClient;
pub use openrouter::OpenRouterClient;
pub use traits::{
    media_type_for, CompletionRequest, CompletionResponse, ImageAttachment, LLMProvider, Message,
    ProviderError, ProviderResult,
};

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::{Config, ProviderConfig};

/// Provider clients by configured name
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, Arc<dyn LLMProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, provider: Arc<dyn LLMProvider>) {
        self.providers.insert(name.into(), provider);
    }

    pub fn with(mut self, name: impl Into<String>, provider: Arc<dyn LLMProvider>) -> Self {
        self.insert(name, provider);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn LLMProvider>> {
        self.providers.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        self.providers.keys().map(String::as_str).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

/// Build one provider client from its config section
pub fn create_provider(name: &str, pc: &ProviderConfig) -> ProviderResult<Arc<dyn LLMProvider>> {
    match pc.name.to_lowercase().as_str() {
        "openrouter" => {
            let var = pc.api_key_env.as_deref().unwrap_or(openrouter::API_KEY_ENV);
            let mut client = OpenRouterClient::from_env_var(var)?.with_rate_limits(pc.rpm, pc.tpm);
            if let Some(url) = &pc.base_url {
                client = client.with_base_url(url);
            }
            Ok(Arc::new(client))
        }
        "anthropic" | "claude" => {
            let var = pc.api_key_env.as_deref().unwrap_or(anthropic::API_KEY_ENV);
            let mut client = AnthropicClient::from_env_var(var)?.with_rate_limits(pc.rpm, pc.tpm);
            if let Some(url) = &pc.base_url {
                client = client.with_base_url(url);
            }
            Ok(Arc::new(client))
        }
        other => Err(ProviderError::Config(format!(
            "Unknown provider type '{}' for [providers.{}]",
            other, name
        ))),
    }
}

/// Create every enabled provider whose API key is available.
/// Providers that cannot be created are logged and left out.
pub fn create_providers_with_config(config: &Config) -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    for (name, pc) in &config.providers {
        if !pc.enabled {
            tracing::debug!("Provider {} is disabled", name);
            continue;
        }
        match create_provider(name, pc) {
            Ok(provider) => registry.insert(name.clone(), provider),
            Err(e) => tracing::warn!("Provider {} unavailable: {}", name, e),
        }
    }
    registry
}
