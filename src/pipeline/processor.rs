//! Email processor: turns one email into a validated `ProcessedEmail`.
//!
//! Flow per email:
//! 1. Render the triage prompt
//! 2. Model round trip through the gateway (retries transient failures)
//! 3. Normalize the raw text into a triage record
//! 4. On normalization failure, repeat with the strict prompt variant
//!
//! State moves `Pending → AwaitingModel → Normalizing → {Done | Failed}`.
//! Only a successful run writes a record, so an abandoned or failed call
//! never leaves partial data behind. A run whose future is dropped mid-way
//! goes back to `Pending`.

use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt;
use futures::stream;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, error, info, warn};

use crate::config::TriageConfig;
use crate::error::{FailureReason, NormalizationError, ProcessingError};
use crate::llm::{CompletionOptions, ModelGateway};
use crate::normalizer::{Normalizer, SchemaSpec, TriageRecord};
use crate::pipeline::types::{Email, ProcessedEmail, ProcessingState};
use crate::prompts::{self, PromptLibrary};
use crate::store::TriageStore;

/// Raw model output logged on normalization failure.
const RAW_LOG_CHARS: usize = 500;

/// Holds an email's processing lock for one run. Dropped before `settle`,
/// it resets the email to `Pending` and only then releases the lock.
struct RunGuard {
    store: Arc<TriageStore>,
    email_id: String,
    lock: Option<OwnedMutexGuard<()>>,
}

impl RunGuard {
    fn settle(mut self) {
        drop(self.lock.take());
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let Some(lock) = self.lock.take() else {
            return;
        };
        let store = Arc::clone(&self.store);
        let email_id = std::mem::take(&mut self.email_id);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if store.reset_interrupted(&email_id).await {
                        warn!(email_id = %email_id, "Processing abandoned, email back to pending");
                    }
                    drop(lock);
                });
            }
            Err(_) => warn!(email_id = %email_id, "Processing abandoned outside a runtime"),
        }
    }
}

pub struct EmailProcessor {
    gateway: Arc<ModelGateway>,
    prompts: Arc<PromptLibrary>,
    store: Arc<TriageStore>,
    options: CompletionOptions,
    /// Full prompt → model → normalize cycles per email.
    attempts: u32,
    max_workers: usize,
}

impl EmailProcessor {
    pub fn new(
        gateway: Arc<ModelGateway>,
        prompts: Arc<PromptLibrary>,
        store: Arc<TriageStore>,
        config: &TriageConfig,
    ) -> Self {
        Self {
            options: gateway.defaults().clone(),
            gateway,
            prompts,
            store,
            attempts: config.process_attempts.max(1),
            max_workers: config.max_workers.max(1),
        }
    }

    pub fn store(&self) -> &Arc<TriageStore> {
        &self.store
    }

    /// Process a single email.
    ///
    /// Re-processing an email that is already `Done` or `Failed` starts a
    /// fresh run; concurrent runs for the same id are serialized.
    pub async fn process(&self, email: Email) -> Result<ProcessedEmail, ProcessingError> {
        self.store.ingest([email.clone()]).await;
        let guard = RunGuard {
            store: Arc::clone(&self.store),
            email_id: email.id.clone(),
            lock: Some(self.store.lock_email(&email.id).await),
        };

        if self
            .store
            .state(&email.id)
            .await
            .is_some_and(|s| s.is_terminal())
        {
            self.store.transition(&email.id, ProcessingState::Pending).await;
        }

        info!(
            email_id = %email.id,
            sender = %email.sender,
            subject = %email.subject,
            "Processing email"
        );

        let result = match self.run(&email).await {
            Ok(processed) => {
                self.store.record_processed(processed.clone()).await;
                self.store.transition(&email.id, ProcessingState::Done).await;
                Ok(processed)
            }
            Err(e) => {
                self.store.transition(&email.id, ProcessingState::Failed).await;
                error!(email_id = %email.id, reason = %e.reason(), error = %e, "Email processing failed");
                Err(e)
            }
        };
        guard.settle();
        result
    }

    /// Process emails independently, at most `max_workers` at a time.
    ///
    /// Returns one result per input, in input order. A failed email never
    /// affects the others.
    pub async fn process_batch(
        &self,
        emails: Vec<Email>,
    ) -> Vec<Result<ProcessedEmail, ProcessingError>> {
        let total = emails.len();
        info!(total, workers = self.max_workers, "Processing email batch");

        let results: Vec<_> = stream::iter(emails)
            .map(|email| self.process(email))
            .buffered(self.max_workers)
            .collect()
            .await;

        let failed = results.iter().filter(|r| r.is_err()).count();
        info!(
            total,
            succeeded = total - failed,
            failed,
            "Batch processing complete"
        );
        results
    }

    /// Re-run every stored email that is still `Pending` or `Failed`.
    pub async fn retry_pending(&self) -> Vec<Result<ProcessedEmail, ProcessingError>> {
        let emails = self.store.pending_or_failed().await;
        debug!(count = emails.len(), "Retrying pending and failed emails");
        self.process_batch(emails).await
    }

    async fn run(&self, email: &Email) -> Result<ProcessedEmail, ProcessingError> {
        let fail = |reason: FailureReason, detail: String| ProcessingError::Failed {
            email_id: email.id.clone(),
            reason,
            detail,
        };

        self.store.transition(&email.id, ProcessingState::AwaitingModel).await;

        let template = self
            .prompts
            .get_template(prompts::TRIAGE)
            .map_err(|e| fail(FailureReason::Configuration, e.to_string()))?;
        let vars = prompts::email_vars(email);
        let normalizer = Normalizer::with_reference(email.received_at);
        let mut last_error: Option<NormalizationError> = None;

        for attempt in 1..=self.attempts {
            self.store.transition(&email.id, ProcessingState::AwaitingModel).await;

            let prompt = if attempt == 1 {
                prompts::render(template, &vars)
            } else {
                prompts::render_strict(template, &vars)
            }
            .map_err(|e| fail(FailureReason::Configuration, e.to_string()))?;

            let completion = self
                .gateway
                .complete(&prompt, &self.options)
                .await
                .map_err(|e| fail(FailureReason::from_llm(&e), e.to_string()))?;

            self.store.transition(&email.id, ProcessingState::Normalizing).await;

            let normalized = normalizer
                .normalize_traced(&completion.text, SchemaSpec::Triage)
                .map(|(record, pass)| (record.into_triage(), pass));

            match normalized {
                Ok((Some(record), pass)) => {
                    let processed = assemble(email, record, completion.text);
                    info!(
                        email_id = %email.id,
                        category = %processed.category,
                        action_items = processed.action_items.len(),
                        attempt,
                        pass = ?pass,
                        latency_ms = completion.latency.as_millis() as u64,
                        "Email processed"
                    );
                    return Ok(processed);
                }
                Ok((None, _)) => {
                    // Triage schema always yields a triage record.
                    return Err(fail(
                        FailureReason::Normalization,
                        "normalizer returned a non-triage record".into(),
                    ));
                }
                Err(e) => {
                    warn!(
                        email_id = %email.id,
                        attempt,
                        max_attempts = self.attempts,
                        missing = ?e.missing_fields,
                        "Model output could not be normalized"
                    );
                    debug!(
                        email_id = %email.id,
                        raw = %completion.text.chars().take(RAW_LOG_CHARS).collect::<String>(),
                        "Unparseable model output"
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(fail(
            FailureReason::Normalization,
            last_error.map_or_else(|| "no attempts made".to_string(), |e| e.to_string()),
        ))
    }
}

/// Build the final record. The deadline is the explicit one when given,
/// otherwise the earliest action item due date.
fn assemble(email: &Email, record: TriageRecord, raw_model_output: String) -> ProcessedEmail {
    let deadline = record
        .deadline
        .or_else(|| record.action_items.iter().filter_map(|i| i.due).min());
    ProcessedEmail {
        email_id: email.id.clone(),
        category: record.category,
        action_items: record.action_items,
        deadline,
        raw_model_output,
        processed_at: Utc::now(),
    }
}
