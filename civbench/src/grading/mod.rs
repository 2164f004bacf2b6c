//! Grading: prompt, strict verdict parsing, scoring and the grade record

pub mod grader;
pub mod prompt;
pub mod record;
pub mod scoring;
pub mod store;
pub mod verdict;

pub use grader::{Grader, NOT_COLLECTED};
pub use prompt::build_grading_prompt;
pub use record::GradeRecord;
pub use scoring::{score_verdicts, ScoreBreakdown, VerdictSummary};
pub use store::{GradeDetail, GradeStore};
pub use verdict::{extract_json, parse_verdict_sheet, ParseOutcome, Verdict, VerdictSheet};

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// Settings for one grading run, passed to each [`Grader`].
///
/// Temperature defaults to 0 (deterministic). Anything else must be opted
/// into with `randomized = true`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradingConfig {
    /// Provider that serves the grading model
    #[serde(default = "default_grading_provider")]
    pub provider: String,
    #[serde(default = "default_grader_model")]
    pub grader_model: String,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default)]
    pub randomized: bool,
    #[serde(default = "default_grader_max_tokens")]
    pub max_output_tokens: u32,
    #[serde(default = "default_grades_per_response")]
    pub grades_per_response: u32,
}

fn default_grading_provider() -> String {
    "openrouter".to_string()
}

fn default_grader_model() -> String {
    "google/gemini-2.5-flash".to_string()
}

fn default_grader_max_tokens() -> u32 {
    2048
}

fn default_grades_per_response() -> u32 {
    5
}

impl Default for GradingConfig {
    fn default() -> Self {
        Self {
            provider: default_grading_provider(),
            grader_model: default_grader_model(),
            temperature: 0.0,
            randomized: false,
            max_output_tokens: default_grader_max_tokens(),
            grades_per_response: default_grades_per_response(),
        }
    }
}

impl GradingConfig {
    /// Switch to randomized grading at the given temperature
    pub fn randomized(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self.randomized = true;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::Invalid(format!(
                "grading.temperature {} is outside 0.0..=2.0",
                self.temperature
            )));
        }
        if self.temperature != 0.0 && !self.randomized {
            return Err(ConfigError::Invalid(format!(
                "grading.temperature {} is non-deterministic; set grading.randomized = true to allow it",
                self.temperature
            )));
        }
        if self.grades_per_response == 0 {
            return Err(ConfigError::Invalid(
                "grading.grades_per_response must be at least 1".into(),
            ));
        }
        if self.max_output_tokens == 0 {
            return Err(ConfigError::Invalid(
                "grading.max_output_tokens must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
