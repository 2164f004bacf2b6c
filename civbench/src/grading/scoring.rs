//! Score computation from a verdict mapping

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::verdict::Verdict;

/// Counts by verdict
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerdictSummary {
    #[serde(default)]
    pub correct: u32,
    #[serde(default)]
    pub partial: u32,
    #[serde(default)]
    pub incorrect: u32,
}

impl VerdictSummary {
    pub fn from_verdicts<'a>(verdicts: impl IntoIterator<Item = &'a Verdict>) -> Self {
        let mut summary = Self::default();
        for verdict in verdicts {
            match verdict {
                Verdict::Correct => summary.correct += 1,
                Verdict::Partial => summary.partial += 1,
                Verdict::Incorrect => summary.incorrect += 1,
            }
        }
        summary
    }

    pub fn total(&self) -> u32 {
        self.correct + self.partial + self.incorrect
    }

    /// correct + 0.5 * partial
    pub fn credit(&self) -> f64 {
        self.correct as f64 + 0.5 * self.partial as f64
    }
}

/// Score of one grading against the assignment's answer key
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreBreakdown {
    pub summary: VerdictSummary,
    /// 100 * credit / number of sub-questions returned
    pub score: f64,
    /// 100 * credit / max(returned, expected)
    pub expected_score: f64,
    pub total_questions: u32,
    pub total_questions_expected: u32,
    /// Expected labels the grader did not return
    pub missing_questions: Vec<String>,
    /// Some answer-key label has no verdict, whether the grader stopped
    /// early or returned labels that are not in the key
    pub truncated: bool,
}

fn percent(credit: f64, denominator: usize) -> f64 {
    if denominator == 0 {
        return 0.0;
    }
    (100.0 * credit / denominator as f64).clamp(0.0, 100.0)
}

/// Score a verdict mapping. `expected` are the normalised answer-key labels.
pub fn score_verdicts(questions: &IndexMap<String, Verdict>, expected: &[&str]) -> ScoreBreakdown {
    let summary = VerdictSummary::from_verdicts(questions.values());
    let credit = summary.credit();

    let missing_questions: Vec<String> = expected
        .iter()
        .filter(|label| !questions.contains_key(**label))
        .map(|label| label.to_string())
        .collect();

    let truncated = !missing_questions.is_empty();
    ScoreBreakdown {
        summary,
        score: percent(credit, questions.len()),
        expected_score: percent(credit, questions.len().max(expected.len())),
        total_questions: questions.len() as u32,
        total_questions_expected: expected.len() as u32,
        missing_questions,
        truncated,
    }
}
