//! Civil-engineering homework benchmark for vision LLMs
//!
//! Sends images of homework assignments to several models, stores their
//! answers, has a grading model mark each sub-question against a
//! human-written answer key, and appends every grading to a JSONL log for
//! analysis.
//!
//! # Features
//!
//! - Assignment store: page images plus JSON, TOML or markdown answer keys
//! - OpenRouter and Anthropic (Claude) providers with image input
//! - Durable per-attempt response records with resume
//! - Strict verdict parsing, truncation flagging and explicit grading temperature
//! - Single-writer append-only grade log, plus a detail file per grade
//! - Per-model, per-assignment and per-question statistics
//!
//! # Example
//!
//! ```no_run
//! use std::collections::BTreeMap;
//! use std::sync::Arc;
//! use civbench::{
//!     assignments::AssignmentStore,
//!     collector::ResponseStore,
//!     config::Config,
//!     grading::Grader,
//!     log::GradeLog,
//!     providers::create_providers_with_config,
//!     runner::{Executor, ExecutorConfig},
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load(None)?;
//!     let providers = create_providers_with_config(&config);
//!     let grader_provider = providers.get(&config.grading.provider).ok_or("no grader")?;
//!
//!     let store = AssignmentStore::new(&config.paths.images_dir, &config.paths.ground_truth_dir);
//!     let mut assignments = BTreeMap::new();
//!     assignments.insert(1, Arc::new(store.load(1)?));
//!
//!     let responses = ResponseStore::new(&config.paths.responses_dir).load_all()?;
//!     let grader = Arc::new(Grader::new(grader_provider, config.grading.clone()));
//!     let executor = Executor::new(ExecutorConfig::from(&config.runner));
//!
//!     let log = GradeLog::open(config.paths.grade_log()).await?;
//!     let summary = executor.grade_all(grader, responses, &assignments, &log.sender()).await;
//!     log.finish().await?;
//!     println!("{}", summary);
//!     Ok(())
//! }
//! ```

pub mod analysis;
pub mod assignments;
pub mod collector;
pub mod config;
pub mod grading;
pub mod log;
pub mod providers;
pub mod reporting;
pub mod runner;

pub use config::Config;

/// Prelude module for common imports
pub mod prelude {
    pub use crate::analysis::{AnalysisSummary, GradeTable, ScoreStats};
    pub use crate::assignments::{Assignment, AssignmentStore};
    pub use crate::collector::{
        plan_units, CollectionSettings, CollectionStatus, CollectionUnit, Collector, Response,
        ResponseStore,
    };
    pub use crate::config::{Config, ModelTarget};
    pub use crate::grading::{
        parse_verdict_sheet, GradeDetail, GradeRecord, GradeStore, Grader, GradingConfig,
        ParseOutcome, Verdict,
    };
    pub use crate::log::{load_grade_table, GradeLog, LogSender};
    pub use crate::providers::{
        create_providers_with_config, CompletionRequest, CompletionResponse, LLMProvider,
        Message, ProviderError, ProviderRegistry, ProviderResult,
    };
    pub use crate::reporting::{print_console_report, JsonSummary};
    pub use crate::runner::{BatchSummary, ConsoleProgress, Executor, ExecutorConfig};
}
