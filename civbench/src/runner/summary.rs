//! End-of-batch accounting

use serde::{Deserialize, Serialize};
use std::fmt;

/// A unit of work that did not succeed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitFailure {
    pub unit: String,
    pub error: String,
}

/// Counts for one collection or grading batch.
///
/// `truncated` overlaps the other counters: a truncated collection is also
/// a failure, a truncated grading is still a success.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub truncated: usize,
    pub failures: Vec<UnitFailure>,
}

impl BatchSummary {
    pub fn record_success(&mut self) {
        self.attempted += 1;
        self.succeeded += 1;
    }

    pub fn record_failure(&mut self, unit: impl Into<String>, error: impl Into<String>) {
        self.attempted += 1;
        self.failed += 1;
        self.failures.push(UnitFailure {
            unit: unit.into(),
            error: error.into(),
        });
    }

    pub fn record_skip(&mut self) {
        self.skipped += 1;
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }

    /// Print the summary and every failure
    pub fn print(&self, title: &str) {
        println!("\n=== {} ===", title);
        println!("{}", self);
        if !self.failures.is_empty() {
            println!("\nFailures:");
            for failure in &self.failures {
                println!("  {}: {}", failure.unit, failure.error);
            }
        }
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "attempted {}, succeeded {}, failed {}, skipped {}, truncated {}",
            self.attempted, self.succeeded, self.failed, self.skipped, self.truncated
        )
    }
}
