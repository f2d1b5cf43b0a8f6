//! Model gateway: retry, backoff and timeout policy around a provider.
//!
//! Callers only ever see two failures: `AuthFailed` (never retried) and
//! `ModelUnavailable` (transient failures exhausted, or a non-retryable
//! provider error). Content is returned untouched; interpreting it is the
//! normalizer's job.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::config::TriageConfig;
use crate::error::LlmError;
use crate::llm::provider::{ChatMessage, CompletionRequest, LlmProvider};

/// Per-call options.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionOptions {
    pub model_id: String,
    /// In [0, 1].
    pub temperature: f32,
    pub max_tokens: u32,
    /// Per-attempt deadline. An attempt that misses it is abandoned.
    pub timeout: Duration,
}

impl CompletionOptions {
    pub fn from_config(config: &TriageConfig) -> Self {
        Self {
            model_id: config.model_id.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            timeout: config.timeout,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature.clamp(0.0, 1.0);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens.max(1);
        self
    }
}

/// Exponential backoff policy for transient failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound of the random delay added to each backoff.
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &TriageConfig) -> Self {
        Self {
            max_attempts: config.max_retries.max(1),
            base_delay: config.backoff_base,
            max_delay: config.backoff_max.max(config.backoff_base),
            ..Self::default()
        }
    }

    /// Backoff before retry number `attempt` (1-based): `base * 2^(attempt-1)`,
    /// capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis();
        let multiplier = 1u128 << attempt.saturating_sub(1).min(20);
        let backoff_ms = base_ms.saturating_mul(multiplier).min(self.max_delay.as_millis());
        Duration::from_millis(u64::try_from(backoff_ms).unwrap_or(u64::MAX))
    }

    fn jittered(&self, delay: Duration) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return delay;
        }
        delay + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }
}

/// Raw model output plus call metadata.
#[derive(Debug, Clone)]
pub struct RawCompletion {
    pub text: String,
    pub model_id: String,
    /// Wall time of the successful attempt.
    pub latency: Duration,
    pub input_tokens: Option<u32>,
    pub output_tokens: Option<u32>,
    /// Attempts made, including the successful one.
    pub attempts: u32,
    /// Estimated USD cost from the provider's token prices.
    pub cost: Decimal,
}

/// Single entry point for model calls.
pub struct ModelGateway {
    provider: Arc<dyn LlmProvider>,
    retry: RetryPolicy,
    defaults: CompletionOptions,
}

impl ModelGateway {
    pub fn new(provider: Arc<dyn LlmProvider>, retry: RetryPolicy, defaults: CompletionOptions) -> Self {
        Self {
            provider,
            retry,
            defaults,
        }
    }

    pub fn from_config(provider: Arc<dyn LlmProvider>, config: &TriageConfig) -> Self {
        Self::new(
            provider,
            RetryPolicy::from_config(config),
            CompletionOptions::from_config(config),
        )
    }

    /// Options used when the caller has no overrides.
    pub fn defaults(&self) -> &CompletionOptions {
        &self.defaults
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Complete a single user prompt.
    pub async fn complete(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<RawCompletion, LlmError> {
        self.complete_messages(vec![ChatMessage::user(prompt)], options)
            .await
    }

    /// Complete a full message list.
    pub async fn complete_messages(
        &self,
        messages: Vec<ChatMessage>,
        options: &CompletionOptions,
    ) -> Result<RawCompletion, LlmError> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            let request = CompletionRequest::new(messages.clone())
                .with_model(options.model_id.clone())
                .with_temperature(options.temperature)
                .with_max_tokens(options.max_tokens);

            let started = Instant::now();
            let outcome = match tokio::time::timeout(options.timeout, self.provider.complete(request)).await
            {
                Ok(result) => result,
                Err(_) => Err(LlmError::Timeout {
                    provider: self.provider.model_name().to_string(),
                    timeout: options.timeout,
                }),
            };
            let latency = started.elapsed();

            match outcome {
                Ok(response) => {
                    let (input_price, output_price) = self.provider.cost_per_token();
                    let cost = input_price * Decimal::from(response.input_tokens)
                        + output_price * Decimal::from(response.output_tokens);
                    info!(
                        model = %options.model_id,
                        attempt,
                        latency_ms = latency.as_millis() as u64,
                        output_tokens = response.output_tokens,
                        "Model call completed"
                    );
                    return Ok(RawCompletion {
                        text: response.content,
                        model_id: options.model_id.clone(),
                        latency,
                        input_tokens: (response.input_tokens > 0).then_some(response.input_tokens),
                        output_tokens: (response.output_tokens > 0).then_some(response.output_tokens),
                        attempts: attempt,
                        cost,
                    });
                }
                Err(err @ LlmError::AuthFailed { .. }) => {
                    warn!(model = %options.model_id, "Model call rejected: authentication failed");
                    return Err(err);
                }
                Err(err) if err.is_transient() && attempt < max_attempts => {
                    let delay = err
                        .retry_after()
                        .map(|requested| requested.min(self.retry.max_delay))
                        .unwrap_or_else(|| self.retry.jittered(self.retry.delay_for(attempt)));
                    warn!(
                        model = %options.model_id,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient model failure, backing off"
                    );
                    last_error = err.to_string();
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    debug!(model = %options.model_id, attempt, error = %err, "Model call failed");
                    return Err(LlmError::ModelUnavailable {
                        model: options.model_id.clone(),
                        attempts: attempt,
                        reason: err.to_string(),
                    });
                }
            }
        }

        Err(LlmError::ModelUnavailable {
            model: options.model_id.clone(),
            attempts: max_attempts,
            reason: last_error,
        })
    }
}
