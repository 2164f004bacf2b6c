//! Batch execution engine

pub mod executor;
pub mod rate_limiter;
pub mod summary;

pub use executor::{ConsoleProgress, Executor, ExecutorConfig, NoOpProgress, ProgressCallback};
pub use rate_limiter::RateLimiter;
pub use summary::{BatchSummary, UnitFailure};
