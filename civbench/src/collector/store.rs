//! Persisted responses: one pretty JSON file per (model, trial, assignment)

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Outcome of one collection attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionStatus {
    #[default]
    Success,
    Error,
    Timeout,
    RateLimited,
    Blocked,
    Empty,
    Truncated,
}

impl CollectionStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, CollectionStatus::Success)
    }
}

impl fmt::Display for CollectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CollectionStatus::Success => "success",
            CollectionStatus::Error => "error",
            CollectionStatus::Timeout => "timeout",
            CollectionStatus::RateLimited => "rate_limited",
            CollectionStatus::Blocked => "blocked",
            CollectionStatus::Empty => "empty",
            CollectionStatus::Truncated => "truncated",
        };
        write!(f, "{}", s)
    }
}

/// Token usage reported by the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default, alias = "prompt_tokens")]
    pub input_tokens: u32,
    #[serde(default, alias = "completion_tokens")]
    pub output_tokens: u32,
}

/// A model's answer to one assignment in one trial.
///
/// `success` implies a non-empty `answer`; failures carry `answer = None`
/// and an `error` reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(alias = "model_id")]
    pub model: String,
    #[serde(default)]
    pub provider: String,
    #[serde(alias = "trial_num")]
    pub trial: u32,
    #[serde(alias = "assignment_num")]
    pub assignment: u32,
    #[serde(default)]
    pub answer: Option<String>,
    pub success: bool,
    #[serde(default)]
    pub status: CollectionStatus,
    #[serde(default)]
    pub error: Option<String>,
    /// Text received before the output cap was hit; never graded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partial_answer: Option<String>,
    #[serde(default)]
    pub finish_reason: Option<String>,
    #[serde(default)]
    pub usage: Option<Usage>,
    #[serde(default)]
    pub latency_ms: Option<u64>,
    /// Expected labels the answer never mentions
    #[serde(default)]
    pub missing_labels: Vec<String>,
    #[serde(default)]
    pub timestamp: String,
}

impl Response {
    /// Records written without a `status` default to success; a failed
    /// one is re-labelled as an error so status and flag agree.
    fn reconciled(mut self) -> Self {
        if !self.success && self.status.is_success() {
            self.status = CollectionStatus::Error;
        }
        self
    }

    pub fn success(
        model: impl Into<String>,
        provider: impl Into<String>,
        trial: u32,
        assignment: u32,
        answer: impl Into<String>,
    ) -> Self {
        Self {
            model: model.into(),
            provider: provider.into(),
            trial,
            assignment,
            answer: Some(answer.into()),
            success: true,
            status: CollectionStatus::Success,
            error: None,
            partial_answer: None,
            finish_reason: None,
            usage: None,
            latency_ms: None,
            missing_labels: Vec::new(),
            timestamp: chrono::Local::now().to_rfc3339(),
        }
    }

    pub fn failure(
        model: impl Into<String>,
        provider: impl Into<String>,
        trial: u32,
        assignment: u32,
        status: CollectionStatus,
        error: impl Into<String>,
    ) -> Self {
        Self {
            model: model.into(),
            provider: provider.into(),
            trial,
            assignment,
            answer: None,
            success: false,
            status,
            error: Some(error.into()),
            partial_answer: None,
            finish_reason: None,
            usage: None,
            latency_ms: None,
            missing_labels: Vec::new(),
            timestamp: chrono::Local::now().to_rfc3339(),
        }
    }

    /// The answer text, only when the response was collected successfully
    pub fn gradable_answer(&self) -> Option<&str> {
        if !self.success {
            return None;
        }
        self.answer
            .as_deref()
            .filter(|text| !text.trim().is_empty())
    }
}

/// Error type for response persistence
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid record file {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Directory-name form of a model id
pub fn model_slug(model: &str) -> String {
    model.replace(['/', ':'], "_")
}

/// Filesystem store rooted at the responses directory
#[derive(Debug, Clone)]
pub struct ResponseStore {
    root: PathBuf,
}

impl ResponseStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, model: &str, trial: u32, assignment: u32) -> PathBuf {
        self.root
            .join(model_slug(model))
            .join(format!("trial_{}", trial))
            .join(format!("assignment_{}_answer.json", assignment))
    }

    /// Write a response, replacing any previous record for the same target
    pub fn save(&self, response: &Response) -> Result<PathBuf, StoreError> {
        let path = self.path(&response.model, response.trial, response.assignment);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let json = serde_json::to_string_pretty(response).map_err(|source| StoreError::Json {
            path: path.clone(),
            source,
        })?;
        std::fs::write(&path, json).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;
        tracing::debug!("Saved response to {}", path.display());
        Ok(path)
    }

    /// Load one response; `Ok(None)` when nothing has been stored yet
    pub fn load(
        &self,
        model: &str,
        trial: u32,
        assignment: u32,
    ) -> Result<Option<Response>, StoreError> {
        let path = self.path(model, trial, assignment);
        if !path.exists() {
            return Ok(None);
        }
        read_response(&path).map(Some)
    }

    /// Every stored response, ordered by model, trial, assignment.
    /// Unreadable files are logged and skipped.
    pub fn load_all(&self) -> Result<Vec<Response>, StoreError> {
        let mut responses = Vec::new();
        for model_dir in sorted_dirs(&self.root)? {
            for trial_dir in sorted_dirs(&model_dir)? {
                let is_trial = trial_dir
                    .file_name()
                    .map(|n| n.to_string_lossy().starts_with("trial_"))
                    .unwrap_or(false);
                if !is_trial {
                    continue;
                }
                let entries = std::fs::read_dir(&trial_dir).map_err(|source| StoreError::Io {
                    path: trial_dir.clone(),
                    source,
                })?;
                for entry in entries.flatten() {
                    let path = entry.path();
                    let is_answer = path
                        .file_name()
                        .map(|n| n.to_string_lossy().ends_with("_answer.json"))
                        .unwrap_or(false);
                    if !is_answer {
                        continue;
                    }
                    match read_response(&path) {
                        Ok(response) => responses.push(response),
                        Err(e) => tracing::warn!("Skipping {}: {}", path.display(), e),
                    }
                }
            }
        }
        responses.sort_by(|a, b| {
            (&a.model, a.trial, a.assignment).cmp(&(&b.model, b.trial, b.assignment))
        });
        Ok(responses)
    }
}

fn read_response(path: &Path) -> Result<Response, StoreError> {
    let content = std::fs::read_to_string(path).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let response: Response = serde_json::from_str(&content).map_err(|source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(response.reconciled())
}

fn sorted_dirs(dir: &Path) -> Result<Vec<PathBuf>, StoreError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(StoreError::Io {
                path: dir.to_path_buf(),
                source,
            })
        }
    };
    let mut dirs: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    dirs.sort();
    Ok(dirs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_layout() {
        let store = ResponseStore::new("responses");
        assert_eq!(
            store.path("openai/gpt-5", 0, 4),
            PathBuf::from("responses/openai_gpt-5/trial_0/assignment_4_answer.json")
        );
        assert_eq!(model_slug("qwen/qwen3:free"), "qwen_qwen3_free");
    }

    #[test]
    fn test_save_load_and_walk() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResponseStore::new(dir.path());

        let ok = Response::success("x-ai/grok-4", "openrouter", 0, 2, "Question 1a: 12 kN");
        let failed = Response::failure(
            "anthropic/claude-opus-4.1",
            "openrouter",
            1,
            1,
            CollectionStatus::Timeout,
            "Timeout after 120000ms",
        );
        store.save(&ok).unwrap();
        store.save(&failed).unwrap();

        assert_eq!(store.load("x-ai/grok-4", 0, 2).unwrap(), Some(ok.clone()));
        assert_eq!(store.load("x-ai/grok-4", 0, 3).unwrap(), None);

        let all = store.load_all().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].model, "anthropic/claude-opus-4.1");
        assert!(!all[0].success);
        assert!(all[0].answer.is_none());
        assert_eq!(all[0].gradable_answer(), None);
        assert_eq!(all[1].gradable_answer(), Some("Question 1a: 12 kN"));
    }

    #[test]
    fn test_loads_legacy_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("legacy.json");
        std::fs::write(
            &path,
            r#"{
  "model_id": "openai/gpt-5",
  "assignment_num": 4,
  "trial_num": 0,
  "timestamp": "2025-10-01T12:00:00",
  "success": true,
  "answer": "Question 1: 42 kN",
  "usage": {"prompt_tokens": 1200, "completion_tokens": 800, "total_tokens": 2000}
}"#,
        )
        .unwrap();

        let response = read_response(&path).unwrap();
        assert_eq!(response.model, "openai/gpt-5");
        assert_eq!(response.assignment, 4);
        assert_eq!(response.status, CollectionStatus::Success);
        assert_eq!(response.usage.unwrap().output_tokens, 800);
        assert!(response.missing_labels.is_empty());
    }

    #[test]
    fn test_legacy_failure_loads_as_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("legacy_failed.json");
        std::fs::write(
            &path,
            r#"{
  "model_id": "x-ai/grok-4",
  "assignment_num": 2,
  "trial_num": 1,
  "timestamp": "2025-10-01T12:00:00",
  "success": false,
  "answer": null,
  "error": "Request timed out"
}"#,
        )
        .unwrap();

        let response = read_response(&path).unwrap();
        assert!(!response.success);
        assert_eq!(response.status, CollectionStatus::Error);
        assert!(response.gradable_answer().is_none());
    }
}
