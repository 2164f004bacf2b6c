//! Serializable summary of a grade table

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::stats::ScoreStats;
use super::table::{ConsistencyRow, GradeTable, QuestionRow, SuccessRate};

/// Everything the reports show, computed once from a [`GradeTable`].
///
/// Scores come from complete gradings only; truncated gradings are counted
/// separately.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSummary {
    pub total_records: usize,
    pub complete: usize,
    pub failed: usize,
    pub truncated: usize,
    pub malformed_lines: usize,
    pub overall: Option<ScoreStats>,
    pub by_model: BTreeMap<String, ScoreStats>,
    pub by_assignment: BTreeMap<u32, ScoreStats>,
    pub consistency: Vec<ConsistencyRow>,
    pub model_assignment_matrix: BTreeMap<String, BTreeMap<u32, f64>>,
    pub questions: Vec<QuestionRow>,
    pub success_rate: BTreeMap<String, SuccessRate>,
    pub truncated_by_model: BTreeMap<String, usize>,
}

impl AnalysisSummary {
    pub fn from_table(table: &GradeTable) -> Self {
        Self {
            total_records: table.len(),
            complete: table.complete().count(),
            failed: table.failed_count(),
            truncated: table.truncated_count(),
            malformed_lines: table.malformed.len(),
            overall: table.overall(),
            by_model: table.by_model(),
            by_assignment: table.by_assignment(),
            consistency: table.consistency(),
            model_assignment_matrix: table.model_assignment_matrix(),
            questions: table.question_breakdown(),
            success_rate: table.success_rate_by_model(),
            truncated_by_model: table.truncated_by_model(),
        }
    }

    /// Models ordered by mean score, best first
    pub fn ranking(&self) -> Vec<(&str, &ScoreStats)> {
        let mut ranked: Vec<(&str, &ScoreStats)> = self
            .by_model
            .iter()
            .map(|(model, stats)| (model.as_str(), stats))
            .collect();
        ranked.sort_by(|a, b| {
            b.1.mean
                .partial_cmp(&a.1.mean)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        ranked
    }
}
