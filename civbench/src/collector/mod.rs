//! Response collection: one model call per (model, assignment, trial)

pub mod store;

pub use store::{model_slug, CollectionStatus, Response, ResponseStore, StoreError, Usage};

use std::fmt;
use std::sync::Arc;

use crate::assignments::labels::mentions_label;
use crate::assignments::Assignment;
use crate::config::{CollectionConfig, ModelTarget};
use crate::providers::{
    CompletionRequest, CompletionResponse, Message, ProviderError, ProviderRegistry,
    ProviderResult,
};
use crate::runner::Executor;

/// One collection target
#[derive(Debug, Clone)]
pub struct CollectionUnit {
    pub target: ModelTarget,
    pub assignment: Arc<Assignment>,
    pub trial: u32,
}

impl fmt::Display for CollectionUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} / assignment {} / trial {}",
            self.target.model, self.assignment.number, self.trial
        )
    }
}

/// Cross product of models × assignments × trials, in that nesting order
pub fn plan_units(
    models: &[ModelTarget],
    assignments: &[Arc<Assignment>],
    trials: u32,
) -> Vec<CollectionUnit> {
    let mut units = Vec::with_capacity(models.len() * assignments.len() * trials as usize);
    for target in models {
        for trial in 0..trials {
            for assignment in assignments {
                units.push(CollectionUnit {
                    target: target.clone(),
                    assignment: Arc::clone(assignment),
                    trial,
                });
            }
        }
    }
    units
}

/// Result of collecting one unit
#[derive(Debug, Clone)]
pub struct Collected {
    pub response: Response,
    /// An earlier successful response was reused instead of calling the model
    pub reused: bool,
}

/// Prompt and sampling settings for answer collection
#[derive(Debug, Clone)]
pub struct CollectionSettings {
    pub prompt: String,
    pub max_output_tokens: u32,
    pub temperature: f32,
    /// Re-request targets that already have a successful response
    pub force: bool,
}

impl From<&CollectionConfig> for CollectionSettings {
    fn from(config: &CollectionConfig) -> Self {
        Self {
            prompt: config.prompt.clone(),
            max_output_tokens: config.max_output_tokens,
            temperature: config.temperature,
            force: false,
        }
    }
}

/// Sends assignments to models and persists every attempt
pub struct Collector {
    providers: ProviderRegistry,
    store: ResponseStore,
    settings: CollectionSettings,
}

impl Collector {
    pub fn new(providers: ProviderRegistry, store: ResponseStore, settings: CollectionSettings) -> Self {
        Self {
            providers,
            store,
            settings,
        }
    }

    pub fn store(&self) -> &ResponseStore {
        &self.store
    }

    pub fn settings(&self) -> &CollectionSettings {
        &self.settings
    }

    pub fn build_request(&self, unit: &CollectionUnit) -> CompletionRequest {
        CompletionRequest::new(
            vec![Message::user(&self.settings.prompt)],
            self.settings.max_output_tokens,
        )
        .with_model(&unit.target.model)
        .with_temperature(self.settings.temperature)
        .with_images(unit.assignment.images.clone())
    }

    /// Collect one unit and store the outcome, successful or not
    pub async fn collect(
        &self,
        executor: &Executor,
        unit: &CollectionUnit,
    ) -> Result<Collected, StoreError> {
        if !self.settings.force {
            match self
                .store
                .load(&unit.target.model, unit.trial, unit.assignment.number)
            {
                Ok(Some(existing)) if existing.success => {
                    tracing::info!("Reusing stored response for {}", unit);
                    return Ok(Collected {
                        response: existing,
                        reused: true,
                    });
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("Ignoring unreadable stored response for {}: {}", unit, e),
            }
        }

        let response = match self.providers.get(&unit.target.provider) {
            Some(provider) => {
                tracing::info!(
                    "Sending assignment {} ({} image(s)) to {}",
                    unit.assignment.number,
                    unit.assignment.images.len(),
                    unit.target.model
                );
                let request = self.build_request(unit);
                let result = executor.call(&provider, &request, &unit.to_string()).await;
                record_outcome(unit, provider.name(), result)
            }
            None => Response::failure(
                &unit.target.model,
                &unit.target.provider,
                unit.trial,
                unit.assignment.number,
                CollectionStatus::Error,
                format!("provider {} is not configured", unit.target.provider),
            ),
        };

        let path = self.store.save(&response)?;
        tracing::debug!("Stored {} response at {}", response.status, path.display());
        Ok(Collected {
            response,
            reused: false,
        })
    }
}

fn status_for_error(error: &ProviderError) -> CollectionStatus {
    match error {
        ProviderError::Timeout { .. } => CollectionStatus::Timeout,
        ProviderError::RateLimited { .. } => CollectionStatus::RateLimited,
        ProviderError::Blocked(_) => CollectionStatus::Blocked,
        _ => CollectionStatus::Error,
    }
}

/// Classify a model call into a stored response.
///
/// Output cut off by the token cap is never reported as success: the text is
/// kept only as `partial_answer`.
pub fn record_outcome(
    unit: &CollectionUnit,
    provider: &str,
    result: ProviderResult<CompletionResponse>,
) -> Response {
    let model = &unit.target.model;
    let number = unit.assignment.number;

    let completion = match result {
        Ok(completion) => completion,
        Err(e) => {
            tracing::error!("Collection failed for {}: {}", unit, e);
            return Response::failure(model, provider, unit.trial, number, status_for_error(&e), e.to_string());
        }
    };

    let mut response = if completion.hit_length_limit() {
        tracing::warn!(
            "Output for {} hit the token cap after {} tokens",
            unit,
            completion.output_tokens
        );
        let mut response = Response::failure(
            model,
            provider,
            unit.trial,
            number,
            CollectionStatus::Truncated,
            format!(
                "output truncated at the token cap (finish_reason={})",
                completion.finish_reason
            ),
        );
        if !completion.content.trim().is_empty() {
            response.partial_answer = Some(completion.content.clone());
        }
        response
    } else if completion.content.trim().is_empty() {
        tracing::warn!("Empty response for {}", unit);
        Response::failure(
            model,
            provider,
            unit.trial,
            number,
            CollectionStatus::Empty,
            "model returned an empty response",
        )
    } else {
        let mut response = Response::success(model, provider, unit.trial, number, &completion.content);
        response.missing_labels = unit
            .assignment
            .labels()
            .into_iter()
            .filter(|label| !mentions_label(&completion.content, label))
            .map(str::to_string)
            .collect();
        if !response.missing_labels.is_empty() {
            tracing::warn!(
                "Answer for {} never mentions {}",
                unit,
                response.missing_labels.join(", ")
            );
        }
        response
    };

    response.finish_reason = Some(completion.finish_reason);
    response.usage = Some(Usage {
        input_tokens: completion.input_tokens,
        output_tokens: completion.output_tokens,
    });
    response.latency_ms = Some(completion.latency_ms);
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    fn unit() -> CollectionUnit {
        let mut key = IndexMap::new();
        key.insert("1a".to_string(), "12 kN".to_string());
        key.insert("1b".to_string(), "36 kN·m".to_string());
        CollectionUnit {
            target: ModelTarget::new("openrouter", "openai/gpt-5"),
            assignment: Arc::new(Assignment::new(1, key)),
            trial: 0,
        }
    }

    fn completion(content: &str, finish_reason: &str) -> ProviderResult<CompletionResponse> {
        Ok(CompletionResponse {
            content: content.to_string(),
            model: "openai/gpt-5".to_string(),
            input_tokens: 900,
            output_tokens: 300,
            finish_reason: finish_reason.to_string(),
            latency_ms: 1200,
        })
    }

    #[test]
    fn test_plan_units() {
        let a = unit().assignment;
        let models = vec![ModelTarget::new("openrouter", "m1"), ModelTarget::new("openrouter", "m2")];
        let units = plan_units(&models, &[a.clone(), a], 3);
        assert_eq!(units.len(), 12);
        assert_eq!(units[0].target.model, "m1");
        assert_eq!(units[11].trial, 2);
    }

    #[test]
    fn test_success_records_missing_labels() {
        let response = record_outcome(&unit(), "openrouter", completion("Question 1a: R = 12 kN", "stop"));
        assert!(response.success);
        assert_eq!(response.status, CollectionStatus::Success);
        assert_eq!(response.answer.as_deref(), Some("Question 1a: R = 12 kN"));
        assert_eq!(response.missing_labels, vec!["1b"]);
        assert_eq!(response.usage.unwrap().output_tokens, 300);
    }

    #[test]
    fn test_truncated_output_is_not_success() {
        let response = record_outcome(
            &unit(),
            "openrouter",
            completion("Question 1a: R = 12 kN\nQuestion 1b: the moment is", "length"),
        );
        assert!(!response.success);
        assert_eq!(response.status, CollectionStatus::Truncated);
        assert!(response.answer.is_none());
        assert!(response.partial_answer.unwrap().ends_with("the moment is"));
        assert!(response.error.is_some());
    }

    #[test]
    fn test_empty_and_failed_calls() {
        let empty = record_outcome(&unit(), "openrouter", completion("  \n", "stop"));
        assert!(!empty.success);
        assert_eq!(empty.status, CollectionStatus::Empty);
        assert!(empty.answer.is_none());

        let blocked = record_outcome(
            &unit(),
            "openrouter",
            Err(ProviderError::Blocked("content filter".into())),
        );
        assert_eq!(blocked.status, CollectionStatus::Blocked);

        let limited = record_outcome(
            &unit(),
            "openrouter",
            Err(ProviderError::RateLimited { retry_after_ms: 1000 }),
        );
        assert_eq!(limited.status, CollectionStatus::RateLimited);
        assert!(!limited.success);
    }
}
