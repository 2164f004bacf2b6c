//! In-memory view of the grade log with the standard groupings

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::stats::ScoreStats;
use crate::grading::{GradeRecord, Verdict, VerdictSummary};

/// A log line that could not be parsed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MalformedLine {
    pub line_number: usize,
    pub error: String,
}

/// Score spread for one (assignment, tested model) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsistencyRow {
    pub assignment: u32,
    pub tested_model: String,
    pub stats: ScoreStats,
}

/// Verdict counts for one sub-question and tested model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionRow {
    pub assignment: u32,
    pub question: String,
    pub tested_model: String,
    pub summary: VerdictSummary,
    /// Share of gradings that marked it correct
    pub correct_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SuccessRate {
    pub total: usize,
    pub successful: usize,
    pub rate: f64,
}

/// All grade records of a log, in file order
#[derive(Debug, Clone, Default)]
pub struct GradeTable {
    pub records: Vec<GradeRecord>,
    pub malformed: Vec<MalformedLine>,
}

impl GradeTable {
    pub fn new(records: Vec<GradeRecord>) -> Self {
        Self {
            records,
            malformed: Vec::new(),
        }
    }

    pub fn with_malformed(mut self, malformed: Vec<MalformedLine>) -> Self {
        self.malformed = malformed;
        self
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Only the records produced by one grading model
    pub fn for_grader(&self, grader_model: &str) -> GradeTable {
        GradeTable {
            records: self
                .records
                .iter()
                .filter(|r| r.grader_model == grader_model)
                .cloned()
                .collect(),
            malformed: self.malformed.clone(),
        }
    }

    /// Successful gradings that cover the full answer key
    pub fn complete(&self) -> impl Iterator<Item = &GradeRecord> {
        self.records
            .iter()
            .filter(|r| r.success && r.score.is_some() && r.covers_answer_key())
    }

    /// Successful gradings that left some answer-key label without a verdict
    pub fn truncated(&self) -> impl Iterator<Item = &GradeRecord> {
        self.records.iter().filter(|r| r.success && !r.covers_answer_key())
    }

    pub fn truncated_count(&self) -> usize {
        self.truncated().count()
    }

    pub fn failed_count(&self) -> usize {
        self.records.iter().filter(|r| !r.success).count()
    }

    fn scores(&self) -> Vec<f64> {
        self.complete().filter_map(|r| r.score).collect()
    }

    pub fn overall(&self) -> Option<ScoreStats> {
        ScoreStats::from_scores(&self.scores())
    }

    fn grouped<K: Ord>(&self, key: impl Fn(&GradeRecord) -> K) -> BTreeMap<K, Vec<f64>> {
        let mut groups: BTreeMap<K, Vec<f64>> = BTreeMap::new();
        for record in self.complete() {
            if let Some(score) = record.score {
                groups.entry(key(record)).or_default().push(score);
            }
        }
        groups
    }

    fn stats_by<K: Ord>(&self, key: impl Fn(&GradeRecord) -> K) -> BTreeMap<K, ScoreStats> {
        self.grouped(key)
            .into_iter()
            .filter_map(|(k, scores)| ScoreStats::from_scores(&scores).map(|s| (k, s)))
            .collect()
    }

    pub fn by_model(&self) -> BTreeMap<String, ScoreStats> {
        self.stats_by(|r| r.tested_model.clone())
    }

    pub fn by_assignment(&self) -> BTreeMap<u32, ScoreStats> {
        self.stats_by(|r| r.assignment)
    }

    /// Repeated-grading spread per (assignment, model)
    pub fn consistency(&self) -> Vec<ConsistencyRow> {
        self.stats_by(|r| (r.assignment, r.tested_model.clone()))
            .into_iter()
            .map(|((assignment, tested_model), stats)| ConsistencyRow {
                assignment,
                tested_model,
                stats,
            })
            .collect()
    }

    /// Mean score per model and assignment
    pub fn model_assignment_matrix(&self) -> BTreeMap<String, BTreeMap<u32, f64>> {
        let mut matrix: BTreeMap<String, BTreeMap<u32, f64>> = BTreeMap::new();
        for ((assignment, model), stats) in self.stats_by(|r| (r.assignment, r.tested_model.clone())) {
            matrix.entry(model).or_default().insert(assignment, stats.mean);
        }
        matrix
    }

    /// Verdict counts per sub-question, including truncated gradings
    pub fn question_breakdown(&self) -> Vec<QuestionRow> {
        let mut counts: BTreeMap<(u32, String, String), VerdictSummary> = BTreeMap::new();
        for record in self.records.iter().filter(|r| r.success) {
            for (question, verdict) in &record.questions {
                let summary = counts
                    .entry((record.assignment, question.clone(), record.tested_model.clone()))
                    .or_default();
                match verdict {
                    Verdict::Correct => summary.correct += 1,
                    Verdict::Partial => summary.partial += 1,
                    Verdict::Incorrect => summary.incorrect += 1,
                }
            }
        }

        counts
            .into_iter()
            .map(|((assignment, question, tested_model), summary)| QuestionRow {
                assignment,
                question,
                tested_model,
                correct_rate: summary.correct as f64 / summary.total().max(1) as f64,
                summary,
            })
            .collect()
    }

    pub fn success_rate_by_model(&self) -> BTreeMap<String, SuccessRate> {
        let mut totals: BTreeMap<String, (usize, usize)> = BTreeMap::new();
        for record in &self.records {
            let entry = totals.entry(record.tested_model.clone()).or_default();
            entry.0 += 1;
            if record.success {
                entry.1 += 1;
            }
        }
        totals
            .into_iter()
            .map(|(model, (total, successful))| {
                let rate = successful as f64 / total.max(1) as f64;
                (
                    model,
                    SuccessRate {
                        total,
                        successful,
                        rate,
                    },
                )
            })
            .collect()
    }

    pub fn truncated_by_model(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for record in self.truncated() {
            *counts.entry(record.tested_model.clone()).or_insert(0) += 1;
        }
        counts
    }
}
