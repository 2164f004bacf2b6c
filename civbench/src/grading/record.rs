//! One line of the grade log

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::scoring::{ScoreBreakdown, VerdictSummary};
use super::verdict::Verdict;

/// A single grading of one response.
///
/// Every field beyond the identifiers is optional on read so that older log
/// lines load unchanged; absent values default to null or empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeRecord {
    #[serde(default)]
    pub grader_model: String,
    pub tested_model: String,
    pub assignment: u32,
    #[serde(default)]
    pub trial: u32,
    #[serde(default)]
    pub grade_num: u32,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub total_correct: Option<u32>,
    #[serde(default)]
    pub total_questions: Option<u32>,
    #[serde(default)]
    pub questions: IndexMap<String, Verdict>,
    #[serde(default)]
    pub summary: VerdictSummary,
    pub success: bool,

    /// Sampling temperature the grader was called with
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub total_questions_expected: Option<u32>,
    #[serde(default)]
    pub missing_questions: Vec<String>,
    #[serde(default)]
    pub truncated: bool,
    #[serde(default)]
    pub expected_score: Option<f64>,
    #[serde(default)]
    pub error: Option<String>,
    /// Grader output kept when it could not be parsed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<String>,
}

impl GradeRecord {
    /// A record with identifiers filled in and no result yet
    pub fn new(
        grader_model: impl Into<String>,
        tested_model: impl Into<String>,
        assignment: u32,
        trial: u32,
        grade_num: u32,
    ) -> Self {
        Self {
            grader_model: grader_model.into(),
            tested_model: tested_model.into(),
            assignment,
            trial,
            grade_num,
            timestamp: chrono::Local::now().to_rfc3339(),
            score: None,
            total_correct: None,
            total_questions: None,
            questions: IndexMap::new(),
            summary: VerdictSummary::default(),
            success: false,
            temperature: None,
            total_questions_expected: None,
            missing_questions: Vec::new(),
            truncated: false,
            expected_score: None,
            error: None,
            raw_response: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_expected(mut self, expected: u32) -> Self {
        self.total_questions_expected = Some(expected);
        self
    }

    /// Fill in a successful grading
    pub fn scored(mut self, questions: IndexMap<String, Verdict>, breakdown: ScoreBreakdown) -> Self {
        self.success = true;
        self.score = Some(breakdown.score);
        self.expected_score = Some(breakdown.expected_score);
        self.total_correct = Some(breakdown.summary.correct);
        self.total_questions = Some(breakdown.total_questions);
        self.total_questions_expected = Some(breakdown.total_questions_expected);
        self.summary = breakdown.summary;
        self.missing_questions = breakdown.missing_questions;
        self.truncated = breakdown.truncated;
        self.questions = questions;
        self
    }

    /// Mark the grading as failed; verdicts stay empty
    pub fn failed(mut self, error: impl Into<String>, raw_response: Option<String>) -> Self {
        self.success = false;
        self.error = Some(error.into());
        self.raw_response = raw_response;
        self.questions.clear();
        self.summary = VerdictSummary::default();
        self.score = None;
        self.expected_score = None;
        self.total_correct = None;
        self.total_questions = None;
        self
    }

    /// Number of sub-questions the grader returned
    pub fn returned_count(&self) -> usize {
        self.questions.len()
    }

    /// Verdicts exist for every answer-key label
    pub fn covers_answer_key(&self) -> bool {
        !self.truncated && self.missing_questions.is_empty()
    }
}
