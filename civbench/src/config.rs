//! Configuration management for the benchmark harness
//!
//! Loads paths, provider settings, the collection plan and the grading run
//! configuration from a TOML file and provides runtime access.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::grading::GradingConfig;

/// Default instruction sent with every assignment image
pub const DEFAULT_ANSWERING_PROMPT: &str = "You are a civil engineering student with perfect grades completing an assignment.

Please answer ALL questions shown in the image carefully and thoroughly. Show your work, reasoning, and calculations.

Provide clear, precise answers with appropriate units. Format your response with clear question labels (e.g., \"Question 1a:\", \"Question 2:\") so answers can be easily identified.";

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default = "default_providers")]
    pub providers: BTreeMap<String, ProviderConfig>,
    #[serde(default)]
    pub collection: CollectionConfig,
    #[serde(default)]
    pub grading: GradingConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
}

/// Filesystem layout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_images_dir")]
    pub images_dir: PathBuf,
    #[serde(default = "default_ground_truth_dir")]
    pub ground_truth_dir: PathBuf,
    #[serde(default = "default_responses_dir")]
    pub responses_dir: PathBuf,
    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,
    /// Per-grade detail files with the grader's raw reply
    #[serde(default = "default_grades_dir")]
    pub grades_dir: PathBuf,
}

impl PathsConfig {
    /// The append-only grade log
    pub fn grade_log(&self) -> PathBuf {
        self.results_dir.join("grades.jsonl")
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            images_dir: default_images_dir(),
            ground_truth_dir: default_ground_truth_dir(),
            responses_dir: default_responses_dir(),
            results_dir: default_results_dir(),
            grades_dir: default_grades_dir(),
        }
    }
}

/// Provider-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Override the API base URL
    #[serde(default)]
    pub base_url: Option<String>,
    /// Environment variable holding the API key
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Requests per minute
    #[serde(default = "default_rpm")]
    pub rpm: u32,
    /// Tokens per minute
    #[serde(default = "default_tpm")]
    pub tpm: u32,
}

/// A model under test and the provider that serves it
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelTarget {
    #[serde(default = "default_provider_name")]
    pub provider: String,
    pub model: String,
}

impl ModelTarget {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
        }
    }
}

/// What to collect: models × assignments × trials
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionConfig {
    #[serde(default = "default_models")]
    pub models: Vec<ModelTarget>,
    #[serde(default = "default_assignments")]
    pub assignments: Vec<u32>,
    #[serde(default = "default_trials")]
    pub trials: u32,
    #[serde(default = "default_answer_max_tokens")]
    pub max_output_tokens: u32,
    #[serde(default = "default_answer_temperature")]
    pub temperature: f32,
    #[serde(default = "default_answering_prompt")]
    pub prompt: String,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            models: default_models(),
            assignments: default_assignments(),
            trials: default_trials(),
            max_output_tokens: default_answer_max_tokens(),
            temperature: default_answer_temperature(),
            prompt: default_answering_prompt(),
        }
    }
}

/// Execution settings shared by collection and grading batches
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    #[serde(default = "default_parallel_requests")]
    pub parallel_requests: usize,
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            parallel_requests: default_parallel_requests(),
            retry_count: default_retry_count(),
            retry_delay_ms: default_retry_delay_ms(),
            max_retry_delay_ms: default_max_retry_delay_ms(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

// Default value functions
fn default_true() -> bool { true }
fn default_rpm() -> u32 { 60 }
fn default_tpm() -> u32 { 1_000_000 }
fn default_provider_name() -> String { "openrouter".to_string() }
fn default_images_dir() -> PathBuf { PathBuf::from("data/images") }
fn default_ground_truth_dir() -> PathBuf { PathBuf::from("data/ground_truth") }
fn default_responses_dir() -> PathBuf { PathBuf::from("responses") }
fn default_results_dir() -> PathBuf { PathBuf::from("results") }
fn default_grades_dir() -> PathBuf { PathBuf::from("grades") }
fn default_assignments() -> Vec<u32> { vec![1, 2, 4, 5, 6, 7] }
fn default_trials() -> u32 { 1 }
fn default_answer_max_tokens() -> u32 { 50_000 }
fn default_answer_temperature() -> f32 { 1.0 }
fn default_answering_prompt() -> String { DEFAULT_ANSWERING_PROMPT.to_string() }
fn default_parallel_requests() -> usize { 10 }
fn default_retry_count() -> u32 { 2 }
fn default_retry_delay_ms() -> u64 { 1000 }
fn default_max_retry_delay_ms() -> u64 { 60_000 }
fn default_timeout_ms() -> u64 { 120_000 }

fn default_models() -> Vec<ModelTarget> {
    [
        "anthropic/claude-sonnet-4.5",
        "anthropic/claude-opus-4.1",
        "openai/gpt-5",
        "google/gemini-2.5-pro",
        "x-ai/grok-4",
        "qwen/qwen3-vl-235b-a22b-instruct",
    ]
    .into_iter()
    .map(|m| ModelTarget::new("openrouter", m))
    .collect()
}

fn default_providers() -> BTreeMap<String, ProviderConfig> {
    let mut providers = BTreeMap::new();
    providers.insert(
        "openrouter".to_string(),
        ProviderConfig {
            name: "openrouter".to_string(),
            enabled: true,
            base_url: None,
            api_key_env: None,
            rpm: 120,
            tpm: 2_000_000,
        },
    );
    providers.insert(
        "anthropic".to_string(),
        ProviderConfig {
            name: "anthropic".to_string(),
            enabled: true,
            base_url: None,
            api_key_env: None,
            rpm: default_rpm(),
            tpm: 450_000,
        },
    );
    providers
}

const CONFIG_PATHS: [&str; 2] = ["config/civbench.toml", "civbench/config/civbench.toml"];

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from an explicit path, the default locations, or fall back to defaults
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            let config = Self::from_file(path)?;
            tracing::info!("Loaded configuration from {}", path.display());
            return Ok(config);
        }

        for path in CONFIG_PATHS {
            if Path::new(path).exists() {
                let config = Self::from_file(path)?;
                tracing::info!("Loaded configuration from {}", path);
                return Ok(config);
            }
        }

        tracing::info!("Using default configuration");
        Ok(Self::default())
    }

    /// Save configuration to a TOML file
    pub fn save_toml<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))?;
        fs::write(path, content).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.grading.validate()?;

        if self.collection.trials == 0 {
            return Err(ConfigError::Invalid("collection.trials must be at least 1".into()));
        }
        if self.runner.parallel_requests == 0 {
            return Err(ConfigError::Invalid(
                "runner.parallel_requests must be at least 1".into(),
            ));
        }
        for (key, provider) in &self.providers {
            if provider.rpm == 0 || provider.tpm == 0 {
                return Err(ConfigError::Invalid(format!(
                    "providers.{}: rpm and tpm must be at least 1",
                    key
                )));
            }
        }
        for target in &self.collection.models {
            if !self.providers.contains_key(&target.provider) {
                return Err(ConfigError::Invalid(format!(
                    "model {} refers to unknown provider {}",
                    target.model, target.provider
                )));
            }
        }
        if !self.providers.contains_key(&self.grading.provider) {
            return Err(ConfigError::Invalid(format!(
                "grading.provider {} is not configured",
                self.grading.provider
            )));
        }
        Ok(())
    }

    /// Get enabled providers
    pub fn enabled_providers(&self) -> Vec<&ProviderConfig> {
        self.providers.values().filter(|p| p.enabled).collect()
    }

    /// Get a specific provider config
    pub fn get_provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.get(name)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            paths: PathsConfig::default(),
            providers: default_providers(),
            collection: CollectionConfig::default(),
            grading: GradingConfig::default(),
            runner: RunnerConfig::default(),
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
