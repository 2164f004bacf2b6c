//! Grade log analysis: groupings and statistics

pub mod stats;
pub mod summary;
pub mod table;

pub use stats::ScoreStats;
pub use summary::AnalysisSummary;
pub use table::{ConsistencyRow, GradeTable, MalformedLine, QuestionRow, SuccessRate};
