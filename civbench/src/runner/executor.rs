//! Async batch executor for collection and grading units

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use super::summary::BatchSummary;
use crate::assignments::Assignment;
use crate::collector::{CollectionStatus, CollectionUnit, Collector, Response};
use crate::config::RunnerConfig;
use crate::grading::Grader;
use crate::log::LogSender;
use crate::providers::{CompletionRequest, CompletionResponse, LLMProvider, ProviderError};

/// Configuration for the executor
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Maximum model calls in flight
    pub parallel_requests: usize,
    /// Number of retries on transient failure
    pub retry_count: u32,
    /// Initial retry delay in milliseconds
    pub retry_delay_ms: u64,
    /// Maximum retry delay in milliseconds
    pub max_retry_delay_ms: u64,
    /// Request timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            parallel_requests: 10,
            retry_count: 2,
            retry_delay_ms: 1000,
            max_retry_delay_ms: 60_000,
            timeout_ms: 120_000,
        }
    }
}

impl From<&RunnerConfig> for ExecutorConfig {
    fn from(config: &RunnerConfig) -> Self {
        Self {
            parallel_requests: config.parallel_requests.max(1),
            retry_count: config.retry_count,
            retry_delay_ms: config.retry_delay_ms,
            max_retry_delay_ms: config.max_retry_delay_ms,
            timeout_ms: config.timeout_ms,
        }
    }
}

/// Runs units concurrently under a shared permit pool
#[derive(Clone)]
pub struct Executor {
    config: ExecutorConfig,
    semaphore: Arc<Semaphore>,
    progress: Arc<dyn ProgressCallback>,
}

struct UnitOutcome {
    success: bool,
    truncated: bool,
    skipped: bool,
    error: Option<String>,
}

impl Executor {
    pub fn new(config: ExecutorConfig) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.parallel_requests.max(1)));
        Self {
            config,
            semaphore,
            progress: Arc::new(NoOpProgress),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// One model call with timeout and bounded retries.
    ///
    /// Rate limits wait for the provider's retry-after (capped by
    /// `max_retry_delay_ms`); other transient errors back off exponentially.
    /// Non-retryable errors return immediately.
    pub async fn call(
        &self,
        provider: &Arc<dyn LLMProvider>,
        request: &CompletionRequest,
        unit: &str,
    ) -> Result<CompletionResponse, ProviderError> {
        let mut last_error = None;
        let mut delay = self.config.retry_delay_ms;
        // wait owed before the next attempt: retry-after or backoff, never both
        let mut wait_ms = 0;

        for attempt in 0..=self.config.retry_count {
            if attempt > 0 {
                tracing::info!("Retry {} for {} on {}", attempt, unit, provider.name());
                sleep(Duration::from_millis(wait_ms)).await;
            }

            match self.try_call(provider, request).await {
                Ok(response) => return Ok(response),
                Err(ProviderError::RateLimited { retry_after_ms }) => {
                    wait_ms = retry_after_ms.min(self.config.max_retry_delay_ms);
                    tracing::warn!(
                        "Rate limited on {} for {}, waiting {}ms",
                        provider.name(),
                        unit,
                        wait_ms
                    );
                    last_error = Some(ProviderError::RateLimited { retry_after_ms });
                }
                Err(e) if e.is_retryable() => {
                    tracing::warn!("Transient error on {} for {}: {}", provider.name(), unit, e);
                    wait_ms = delay;
                    delay = (delay * 2).min(self.config.max_retry_delay_ms);
                    last_error = Some(e);
                }
                Err(e) => {
                    tracing::error!("Error on {} for {}: {}", provider.name(), unit, e);
                    return Err(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| ProviderError::Config("no attempt was made".to_string())))
    }

    /// Single attempt
    async fn try_call(
        &self,
        provider: &Arc<dyn LLMProvider>,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        let timeout = Duration::from_millis(self.config.timeout_ms);

        match tokio::time::timeout(timeout, provider.complete(request)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout {
                timeout_ms: self.config.timeout_ms,
            }),
        }
    }

    /// Collect every unit. A failing unit never stops its siblings.
    pub async fn collect_all(
        &self,
        collector: Arc<Collector>,
        units: Vec<CollectionUnit>,
    ) -> (Vec<Response>, BatchSummary) {
        let total = units.len();
        let completed = Arc::new(AtomicUsize::new(0));
        let mut handles: Vec<(String, JoinHandle<(Option<Response>, UnitOutcome)>)> = Vec::new();

        for unit in units {
            let label = unit.to_string();
            let executor = self.clone();
            let collector = Arc::clone(&collector);
            let completed = Arc::clone(&completed);
            let task_label = label.clone();

            let handle = tokio::spawn(async move {
                let Ok(_permit) = executor.semaphore.clone().acquire_owned().await else {
                    return (None, UnitOutcome::failed("executor shut down"));
                };
                executor.progress.on_unit_start(&task_label);

                let (response, outcome) = match collector.collect(&executor, &unit).await {
                    Ok(collected) => {
                        let response = collected.response;
                        let outcome = UnitOutcome {
                            success: response.success,
                            truncated: response.status == CollectionStatus::Truncated,
                            skipped: collected.reused,
                            error: response.error.clone(),
                        };
                        (Some(response), outcome)
                    }
                    Err(e) => {
                        tracing::error!("Could not store response for {}: {}", task_label, e);
                        (None, UnitOutcome::failed(e.to_string()))
                    }
                };

                executor.progress.on_unit_complete(&task_label, outcome.success);
                let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                executor.progress.on_progress(done, total);
                (response, outcome)
            });
            handles.push((label, handle));
        }

        let mut responses = Vec::new();
        let mut summary = BatchSummary::default();
        for (label, handle) in handles {
            match handle.await {
                Ok((response, outcome)) => {
                    outcome.tally(&mut summary, &label);
                    responses.extend(response);
                }
                Err(e) => {
                    tracing::error!("Collection task for {} panicked: {}", label, e);
                    summary.record_failure(label, format!("task panicked: {}", e));
                }
            }
        }

        tracing::info!("Collection finished: {}", summary);
        (responses, summary)
    }

    /// Grade every successfully collected response `grades_per_response`
    /// times, appending each record to the log. Failed responses are skipped.
    pub async fn grade_all(
        &self,
        grader: Arc<Grader>,
        responses: Vec<Response>,
        assignments: &BTreeMap<u32, Arc<Assignment>>,
        log: &LogSender,
    ) -> BatchSummary {
        let grades_per_response = grader.config().grades_per_response;
        let mut summary = BatchSummary::default();
        let mut jobs = Vec::new();

        for response in responses {
            if response.gradable_answer().is_none() {
                tracing::info!(
                    "Skipping {} assignment {} trial {} ({})",
                    response.model,
                    response.assignment,
                    response.trial,
                    response.status
                );
                summary.record_skip();
                continue;
            }
            let Some(assignment) = assignments.get(&response.assignment) else {
                tracing::warn!(
                    "Skipping {} assignment {}: assignment not loaded",
                    response.model,
                    response.assignment
                );
                summary.record_skip();
                continue;
            };
            let response = Arc::new(response);
            for grade_num in 0..grades_per_response {
                jobs.push((Arc::clone(&response), Arc::clone(assignment), grade_num));
            }
        }

        let total = jobs.len();
        let completed = Arc::new(AtomicUsize::new(0));
        let mut handles: Vec<(String, JoinHandle<UnitOutcome>)> = Vec::new();

        for (response, assignment, grade_num) in jobs {
            let label = format!(
                "{} / assignment {} / trial {} / grade {}",
                response.model, response.assignment, response.trial, grade_num
            );
            let executor = self.clone();
            let grader = Arc::clone(&grader);
            let log = log.clone();
            let completed = Arc::clone(&completed);
            let task_label = label.clone();

            let handle = tokio::spawn(async move {
                let Ok(_permit) = executor.semaphore.clone().acquire_owned().await else {
                    return UnitOutcome::failed("executor shut down");
                };
                executor.progress.on_unit_start(&task_label);

                let detail = grader.grade_detailed(&executor, &response, &assignment, grade_num).await;
                if let Some(store) = grader.detail_store() {
                    if let Err(e) = store.save(&detail) {
                        tracing::error!("Could not store grade detail for {}: {}", task_label, e);
                    }
                }
                let record = detail.record;
                let mut outcome = UnitOutcome {
                    success: record.success,
                    truncated: record.truncated,
                    skipped: false,
                    error: record.error.clone(),
                };
                if let Err(e) = log.append(record) {
                    tracing::error!("Could not log grade for {}: {}", task_label, e);
                    outcome.success = false;
                    outcome.error = Some(e.to_string());
                }

                executor.progress.on_unit_complete(&task_label, outcome.success);
                let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                executor.progress.on_progress(done, total);
                outcome
            });
            handles.push((label, handle));
        }

        for (label, handle) in handles {
            match handle.await {
                Ok(outcome) => outcome.tally(&mut summary, &label),
                Err(e) => {
                    tracing::error!("Grading task for {} panicked: {}", label, e);
                    summary.record_failure(label, format!("task panicked: {}", e));
                }
            }
        }

        tracing::info!("Grading finished: {}", summary);
        summary
    }
}

impl UnitOutcome {
    fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            truncated: false,
            skipped: false,
            error: Some(error.into()),
        }
    }

    fn tally(self, summary: &mut BatchSummary, label: &str) {
        if self.skipped {
            summary.record_skip();
            return;
        }
        if self.truncated {
            summary.truncated += 1;
        }
        if self.success {
            summary.record_success();
        } else {
            summary.record_failure(label, self.error.unwrap_or_else(|| "unknown error".to_string()));
        }
    }
}

/// Progress callback for tracking execution
pub trait ProgressCallback: Send + Sync {
    fn on_unit_start(&self, unit: &str);
    fn on_unit_complete(&self, unit: &str, success: bool);
    fn on_progress(&self, completed: usize, total: usize);
}

/// Default no-op progress callback
pub struct NoOpProgress;

impl ProgressCallback for NoOpProgress {
    fn on_unit_start(&self, _unit: &str) {}
    fn on_unit_complete(&self, _unit: &str, _success: bool) {}
    fn on_progress(&self, _completed: usize, _total: usize) {}
}

/// Console progress callback
pub struct ConsoleProgress;

impl ProgressCallback for ConsoleProgress {
    fn on_unit_start(&self, unit: &str) {
        println!("  Starting {}...", unit);
    }

    fn on_unit_complete(&self, unit: &str, success: bool) {
        let status = if success { "OK" } else { "FAILED" };
        println!("  {} {}", status, unit);
    }

    fn on_progress(&self, completed: usize, total: usize) {
        println!("Progress: {}/{} complete", completed, total);
    }
}
