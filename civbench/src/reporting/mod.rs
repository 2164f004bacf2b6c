//! Results reporting

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::analysis::AnalysisSummary;

/// JSON summary export
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonSummary {
    pub generated_at: String,
    pub source_log: String,
    pub rankings: Vec<ModelRanking>,
    pub analysis: AnalysisSummary,
}

/// Model ranking in summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRanking {
    pub model: String,
    pub mean_score: f64,
    pub std_dev: f64,
    pub gradings: usize,
}

impl JsonSummary {
    pub fn from_analysis(summary: &AnalysisSummary, source_log: impl Into<String>) -> Self {
        let rankings = summary
            .ranking()
            .into_iter()
            .map(|(model, stats)| ModelRanking {
                model: model.to_string(),
                mean_score: stats.mean,
                std_dev: stats.std_dev,
                gradings: stats.count,
            })
            .collect();

        Self {
            generated_at: chrono::Utc::now().to_rfc3339(),
            source_log: source_log.into(),
            rankings,
            analysis: summary.clone(),
        }
    }

    /// Write to JSON file
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, json)
    }
}

/// Generate a console report
pub fn print_console_report(summary: &AnalysisSummary) {
    println!("\n=== Civil Engineering Benchmark Results ===\n");
    println!(
        "Grades: {} total, {} complete, {} failed, {} truncated",
        summary.total_records, summary.complete, summary.failed, summary.truncated
    );
    if summary.malformed_lines > 0 {
        println!("Malformed log lines skipped: {}", summary.malformed_lines);
    }
    if let Some(overall) = &summary.overall {
        println!(
            "Overall: mean {:.1} ± {:.1} (n={})",
            overall.mean, overall.std_dev, overall.count
        );
    }

    println!("\nModel Rankings:");
    println!("{:-<60}", "");
    for (i, (model, stats)) in summary.ranking().iter().enumerate() {
        println!(
            "  {}. {:<40} {:>6.1} ± {:<5.1} (n={})",
            i + 1,
            model,
            stats.mean,
            stats.std_dev,
            stats.count
        );
    }

    if !summary.by_assignment.is_empty() {
        println!("\nScores by Assignment:");
        println!("{:-<60}", "");
        for (assignment, stats) in &summary.by_assignment {
            println!(
                "  Assignment {:<3} {:>6.1} ± {:<5.1} (n={})",
                assignment, stats.mean, stats.std_dev, stats.count
            );
        }
    }

    if !summary.model_assignment_matrix.is_empty() {
        let assignments: Vec<u32> = summary.by_assignment.keys().copied().collect();
        println!("\nModel × Assignment (mean score):");
        println!("{:-<60}", "");
        let header: String = assignments.iter().map(|a| format!("{:>7}", a)).collect();
        println!("  {:<40}{}", "", header);
        for (model, row) in &summary.model_assignment_matrix {
            let cells: String = assignments
                .iter()
                .map(|a| match row.get(a) {
                    Some(mean) => format!("{:>7.1}", mean),
                    None => format!("{:>7}", "-"),
                })
                .collect();
            println!("  {:<40}{}", model, cells);
        }
    }

    let noisy: Vec<_> = summary
        .consistency
        .iter()
        .filter(|row| row.stats.count > 1 && row.stats.range > 0.0)
        .collect();
    if !noisy.is_empty() {
        println!("\nGrading Consistency (repeated gradings that disagree):");
        println!("{:-<60}", "");
        for row in noisy {
            println!(
                "  {} / assignment {}: {:.1}..{:.1} (std {:.1}, n={})",
                row.tested_model,
                row.assignment,
                row.stats.min,
                row.stats.max,
                row.stats.std_dev,
                row.stats.count
            );
        }
    }

    if !summary.truncated_by_model.is_empty() {
        println!("\nTruncated Gradings (excluded from scores):");
        println!("{:-<60}", "");
        for (model, count) in &summary.truncated_by_model {
            println!("  {}: {}", model, count);
        }
    }

    println!("\nGrading Success Rate:");
    println!("{:-<60}", "");
    for (model, rate) in &summary.success_rate {
        println!(
            "  {:<40} {:>5.1}% ({}/{})",
            model,
            rate.rate * 100.0,
            rate.successful,
            rate.total
        );
    }

    println!("\n{:=<60}", "");
}
