//! Per-grade detail files: the log line plus the grader's raw reply and usage

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::record::GradeRecord;
use crate::collector::{model_slug, StoreError, Usage};
use crate::providers::CompletionResponse;

/// Everything known about one grading call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeDetail {
    #[serde(flatten)]
    pub record: GradeRecord,
    /// Grader text exactly as received; absent when the call failed
    #[serde(default)]
    pub grade_response: Option<String>,
    #[serde(default)]
    pub usage: Option<Usage>,
    #[serde(default)]
    pub finish_reason: Option<String>,
    #[serde(default)]
    pub latency_ms: Option<u64>,
}

impl GradeDetail {
    pub fn new(record: GradeRecord) -> Self {
        Self {
            record,
            grade_response: None,
            usage: None,
            finish_reason: None,
            latency_ms: None,
        }
    }

    pub fn with_completion(mut self, completion: &CompletionResponse) -> Self {
        self.grade_response = Some(completion.content.clone());
        self.usage = Some(Usage {
            input_tokens: completion.input_tokens,
            output_tokens: completion.output_tokens,
        });
        self.finish_reason = Some(completion.finish_reason.clone());
        self.latency_ms = Some(completion.latency_ms);
        self
    }
}

/// Filesystem store rooted at the grades directory.
///
/// Layout: `{grader}/{tested model}/trial_{t}/assignment_{a}_grade_{g}.json`.
#[derive(Debug, Clone)]
pub struct GradeStore {
    root: PathBuf,
}

impl GradeStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(
        &self,
        grader_model: &str,
        tested_model: &str,
        trial: u32,
        assignment: u32,
        grade_num: u32,
    ) -> PathBuf {
        self.root
            .join(model_slug(grader_model))
            .join(model_slug(tested_model))
            .join(format!("trial_{}", trial))
            .join(format!("assignment_{}_grade_{}.json", assignment, grade_num))
    }

    fn path_for(&self, record: &GradeRecord) -> PathBuf {
        self.path(
            &record.grader_model,
            &record.tested_model,
            record.trial,
            record.assignment,
            record.grade_num,
        )
    }

    /// Write one detail file, replacing an earlier one for the same grade
    pub fn save(&self, detail: &GradeDetail) -> Result<PathBuf, StoreError> {
        let path = self.path_for(&detail.record);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let json = serde_json::to_string_pretty(detail).map_err(|source| StoreError::Json {
            path: path.clone(),
            source,
        })?;
        std::fs::write(&path, json).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }

    pub fn load(
        &self,
        grader_model: &str,
        tested_model: &str,
        trial: u32,
        assignment: u32,
        grade_num: u32,
    ) -> Result<Option<GradeDetail>, StoreError> {
        let path = self.path(grader_model, tested_model, trial, assignment, grade_num);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|source| StoreError::Json { path, source })
    }
}
