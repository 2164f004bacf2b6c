//! Descriptive statistics over score samples

use serde::{Deserialize, Serialize};

/// Count, mean, sample standard deviation and spread of a set of scores
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreStats {
    pub count: usize,
    pub mean: f64,
    /// Sample standard deviation (n - 1); 0 for a single sample
    pub std_dev: f64,
    pub std_error: f64,
    pub min: f64,
    pub max: f64,
    pub range: f64,
}

impl ScoreStats {
    /// `None` for an empty sample
    pub fn from_scores(scores: &[f64]) -> Option<Self> {
        if scores.is_empty() {
            return None;
        }

        let count = scores.len();
        let n = count as f64;
        let mean = scores.iter().sum::<f64>() / n;
        let std_dev = if count > 1 {
            let var = scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / (n - 1.0);
            var.sqrt()
        } else {
            0.0
        };
        let min = scores.iter().copied().fold(f64::INFINITY, f64::min);
        let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        Some(Self {
            count,
            mean,
            std_dev,
            std_error: std_dev / n.sqrt(),
            min,
            max,
            range: max - min,
        })
    }
}
