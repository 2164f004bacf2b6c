#![allow(dead_code)]

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use civbench::config::{Config, ModelTarget, PathsConfig};
use civbench::providers::{CompletionRequest, CompletionResponse, LLMProvider, ProviderResult};
use civbench::runner::{ExecutorConfig, RateLimiter};

pub const GRADER_MODEL: &str = "test/grader";
pub const TESTED_MODEL: &str = "test/student";

type Responder = dyn Fn(&CompletionRequest) -> ProviderResult<CompletionResponse> + Send + Sync;

/// In-process provider that answers from a closure and records every request
pub struct ScriptedProvider {
    responder: Box<Responder>,
    requests: Mutex<Vec<CompletionRequest>>,
    limiter: Arc<RateLimiter>,
}

impl ScriptedProvider {
    pub fn new(
        responder: impl Fn(&CompletionRequest) -> ProviderResult<CompletionResponse> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            responder: Box::new(responder),
            requests: Mutex::new(Vec::new()),
            limiter: Arc::new(RateLimiter::new(10_000, 100_000_000)),
        })
    }

    /// Answers as `answer` for tested models and as `verdict_json` for the grader
    pub fn student_and_grader(answer: &str, verdict_json: &str) -> Arc<Self> {
        let answer = answer.to_string();
        let verdict_json = verdict_json.to_string();
        Self::new(move |request| {
            if request.model.as_deref() == Some(GRADER_MODEL) {
                reply(&verdict_json, "stop")
            } else {
                reply(&answer, "stop")
            }
        })
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LLMProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn default_model(&self) -> &str {
        TESTED_MODEL
    }

    async fn complete(&self, request: &CompletionRequest) -> ProviderResult<CompletionResponse> {
        self.requests.lock().unwrap().push(request.clone());
        (self.responder)(request)
    }

    fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }
}

pub fn reply(content: &str, finish_reason: &str) -> ProviderResult<CompletionResponse> {
    Ok(CompletionResponse {
        content: content.to_string(),
        model: "scripted".to_string(),
        input_tokens: 100,
        output_tokens: content.len() as u32,
        finish_reason: finish_reason.to_string(),
        latency_ms: 3,
    })
}

/// Write `N.png` and `N.json` for an assignment under `root`
pub fn write_assignment(root: &Path, number: u32, answer_key_json: &str) {
    let images = root.join("images");
    let truth = root.join("ground_truth");
    std::fs::create_dir_all(&images).unwrap();
    std::fs::create_dir_all(&truth).unwrap();
    std::fs::write(images.join(format!("{}.png", number)), b"\x89PNG fake page").unwrap();
    std::fs::write(truth.join(format!("{}.json", number)), answer_key_json).unwrap();
}

/// Config rooted in `root`, using the scripted provider for everything
pub fn test_config(root: &Path, assignments: Vec<u32>) -> Config {
    let mut config = Config::default();
    config.paths = PathsConfig {
        images_dir: root.join("images"),
        ground_truth_dir: root.join("ground_truth"),
        responses_dir: root.join("responses"),
        results_dir: root.join("results"),
        grades_dir: root.join("grades"),
    };
    config.collection.models = vec![ModelTarget::new("openrouter", TESTED_MODEL)];
    config.collection.assignments = assignments;
    config.grading.grader_model = GRADER_MODEL.to_string();
    config.grading.grades_per_response = 1;
    config
}

pub fn fast_executor_config() -> ExecutorConfig {
    ExecutorConfig {
        parallel_requests: 4,
        retry_count: 0,
        retry_delay_ms: 1,
        max_retry_delay_ms: 5,
        timeout_ms: 5_000,
    }
}
