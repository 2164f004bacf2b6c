//! Grading of collected responses against the answer key

use std::sync::Arc;

use super::prompt::build_grading_prompt;
use super::record::GradeRecord;
use super::scoring::score_verdicts;
use super::store::{GradeDetail, GradeStore};
use super::verdict::{parse_verdict_sheet, ParseOutcome};
use super::GradingConfig;
use crate::assignments::Assignment;
use crate::collector::Response;
use crate::providers::{CompletionRequest, CompletionResponse, LLMProvider, Message, ProviderResult};
use crate::runner::Executor;

/// Error stored on grades of responses that never produced an answer
pub const NOT_COLLECTED: &str = "response was not successfully collected";

/// Grades responses with one grading model and one explicit configuration
pub struct Grader {
    provider: Arc<dyn LLMProvider>,
    config: GradingConfig,
    details: Option<GradeStore>,
}

impl Grader {
    pub fn new(provider: Arc<dyn LLMProvider>, config: GradingConfig) -> Self {
        Self {
            provider,
            config,
            details: None,
        }
    }

    /// Also write a detail file per grade
    pub fn with_detail_store(mut self, store: GradeStore) -> Self {
        self.details = Some(store);
        self
    }

    pub fn config(&self) -> &GradingConfig {
        &self.config
    }

    pub fn detail_store(&self) -> Option<&GradeStore> {
        self.details.as_ref()
    }

    /// Prompt, images and sampling settings for one grading call
    pub fn build_request(&self, assignment: &Assignment, answer: &str) -> CompletionRequest {
        CompletionRequest::new(
            vec![Message::user(build_grading_prompt(assignment, answer))],
            self.config.max_output_tokens,
        )
        .with_model(&self.config.grader_model)
        .with_temperature(self.config.temperature)
        .with_images(assignment.images.clone())
    }

    fn blank_record(&self, response: &Response, assignment: &Assignment, grade_num: u32) -> GradeRecord {
        GradeRecord::new(
            &self.config.grader_model,
            &response.model,
            response.assignment,
            response.trial,
            grade_num,
        )
        .with_temperature(self.config.temperature)
        .with_expected(assignment.expected_count() as u32)
    }

    /// Grade one response. Never fails: problems become a record with
    /// `success = false`.
    pub async fn grade(
        &self,
        executor: &Executor,
        response: &Response,
        assignment: &Assignment,
        grade_num: u32,
    ) -> GradeRecord {
        self.grade_detailed(executor, response, assignment, grade_num)
            .await
            .record
    }

    /// Like [`Grader::grade`], keeping the grader's raw reply and usage
    pub async fn grade_detailed(
        &self,
        executor: &Executor,
        response: &Response,
        assignment: &Assignment,
        grade_num: u32,
    ) -> GradeDetail {
        let record = self.blank_record(response, assignment, grade_num);

        let Some(answer) = response.gradable_answer() else {
            return GradeDetail::new(record.failed(NOT_COLLECTED, None));
        };

        let request = self.build_request(assignment, answer);
        let unit = format!(
            "grade {} of {} / assignment {} / trial {}",
            grade_num, response.model, response.assignment, response.trial
        );
        let result = executor.call(&self.provider, &request, &unit).await;
        let completion = result.as_ref().ok().cloned();

        let detail = GradeDetail::new(self.interpret(record, assignment, result));
        match completion {
            Some(completion) => detail.with_completion(&completion),
            None => detail,
        }
    }

    /// Turn the grading model's reply into a record
    pub fn interpret(
        &self,
        record: GradeRecord,
        assignment: &Assignment,
        result: ProviderResult<CompletionResponse>,
    ) -> GradeRecord {
        let completion = match result {
            Ok(completion) => completion,
            Err(e) => {
                tracing::error!(
                    "Grading call failed for {} assignment {}: {}",
                    record.tested_model,
                    record.assignment,
                    e
                );
                return record.failed(e.to_string(), None);
            }
        };

        match parse_verdict_sheet(&completion.content) {
            ParseOutcome::Parsed(sheet) => {
                let breakdown = score_verdicts(&sheet.questions, &assignment.labels());
                if breakdown.truncated {
                    tracing::warn!(
                        "Grade {} for {} assignment {} returned {} of {} expected sub-questions (missing: {})",
                        record.grade_num,
                        record.tested_model,
                        record.assignment,
                        breakdown.total_questions,
                        breakdown.total_questions_expected,
                        breakdown.missing_questions.join(", ")
                    );
                }
                if let Some(reported) = sheet.reported_score {
                    if (reported - breakdown.score).abs() > 0.5 {
                        tracing::debug!(
                            "Grader reported score {} but verdicts give {:.1}",
                            reported,
                            breakdown.score
                        );
                    }
                }
                record.scored(sheet.questions, breakdown)
            }
            ParseOutcome::Unparseable { reason, raw } => {
                tracing::warn!(
                    "Unparseable grade for {} assignment {}: {}",
                    record.tested_model,
                    record.assignment,
                    reason
                );
                record.failed(format!("unparseable grader output: {}", reason), Some(raw))
            }
        }
    }
}
