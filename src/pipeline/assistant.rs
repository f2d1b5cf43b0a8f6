//! Assistant: ad hoc questions, summaries, follow-ups and reply drafts.
//!
//! Same gateway and normalizer as the processor, with task-specific
//! prompts and schemas. A result is either fully normalized or an error;
//! partially normalized drafts are never returned.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::TriageConfig;
use crate::error::{DraftError, FailureReason};
use crate::llm::{CompletionOptions, ModelGateway};
use crate::normalizer::{Normalizer, StructuredRecord};
use crate::pipeline::types::{Email, ReplyDraft, Tone};
use crate::prompts::{self, PromptLibrary, PromptVars};
use crate::store::TriageStore;

/// Why a generation failed, before it is tied to an operation.
struct Failure {
    reason: FailureReason,
    detail: String,
}

impl Failure {
    fn new(reason: FailureReason, detail: impl ToString) -> Self {
        Self {
            reason,
            detail: detail.to_string(),
        }
    }

    fn into_answer(self, email: &Email) -> DraftError {
        DraftError::Answer {
            email_id: email.id.clone(),
            reason: self.reason,
            detail: self.detail,
        }
    }

    fn into_generation(self, email: &Email) -> DraftError {
        DraftError::Generation {
            email_id: email.id.clone(),
            reason: self.reason,
            detail: self.detail,
        }
    }
}

pub struct Assistant {
    gateway: Arc<ModelGateway>,
    prompts: Arc<PromptLibrary>,
    store: Arc<TriageStore>,
    options: CompletionOptions,
    attempts: u32,
}

impl Assistant {
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
        }
    }

    /// Answer a question using only the given email.
    pub async fn answer(&self, email: &Email, question: &str) -> Result<String, DraftError> {
        let mut vars = prompts::email_vars(email);
        vars.insert("question", question.to_string());
        let record = self
            .generate(email, prompts::ANSWER, vars)
            .await
            .map_err(|f| f.into_answer(email))?;
        record
            .into_answer()
            .ok_or_else(|| Failure::new(FailureReason::Normalization, "expected an answer").into_answer(email))
    }

    /// One or two sentence summary.
    pub async fn summarize(&self, email: &Email) -> Result<String, DraftError> {
        let record = self
            .generate(email, prompts::SUMMARIZE, prompts::email_vars(email))
            .await
            .map_err(|f| f.into_answer(email))?;
        record
            .into_answer()
            .ok_or_else(|| Failure::new(FailureReason::Normalization, "expected a summary").into_answer(email))
    }

    pub async fn suggest_follow_ups(&self, email: &Email) -> Result<Vec<String>, DraftError> {
        let record = self
            .generate(email, prompts::FOLLOW_UP, prompts::email_vars(email))
            .await
            .map_err(|f| f.into_generation(email))?;
        record.into_follow_ups().ok_or_else(|| {
            Failure::new(FailureReason::Normalization, "expected follow-ups").into_generation(email)
        })
    }

    /// Draft a reply in the given tone. The draft is recorded in the store.
    pub async fn draft_reply(&self, email: &Email, tone: Tone) -> Result<ReplyDraft, DraftError> {
        let mut vars = prompts::email_vars(email);
        vars.insert("tone", tone.describe().to_string());

        let fields = self
            .generate(email, prompts::DRAFT_REPLY, vars)
            .await
            .and_then(|record| {
                record
                    .into_draft()
                    .ok_or_else(|| Failure::new(FailureReason::Normalization, "expected a reply draft"))
            })
            .map_err(|f| f.into_generation(email))?;

        let draft = ReplyDraft {
            id: Uuid::new_v4(),
            email_id: email.id.clone(),
            subject: fields.subject,
            body: fields.body,
            follow_ups: fields.follow_ups,
            tone,
            created_at: Utc::now(),
        };
        self.store.record_draft(draft.clone()).await;
        info!(
            email_id = %email.id,
            draft_id = %draft.id,
            tone = ?tone,
            follow_ups = draft.follow_ups.len(),
            "Reply draft created"
        );
        Ok(draft)
    }

    /// Render, complete and normalize, retrying normalization failures with
    /// the strict prompt.
    async fn generate(
        &self,
        email: &Email,
        task_key: &str,
        vars: PromptVars,
    ) -> Result<StructuredRecord, Failure> {
        let template = self
            .prompts
            .get_template(task_key)
            .map_err(|e| Failure::new(FailureReason::Configuration, e))?;
        let normalizer = Normalizer::with_reference(email.received_at);
        let mut last_error = None;

        for attempt in 1..=self.attempts {
            let prompt = if attempt == 1 {
                prompts::render(template, &vars)
            } else {
                prompts::render_strict(template, &vars)
            }
            .map_err(|e| Failure::new(FailureReason::Configuration, e))?;

            let completion = self
                .gateway
                .complete(&prompt, &self.options)
                .await
                .map_err(|e| Failure::new(FailureReason::from_llm(&e), e))?;

            match normalizer.normalize(&completion.text, template.expected_schema) {
                Ok(record) => {
                    debug!(email_id = %email.id, task = task_key, attempt, "Assistant task completed");
                    return Ok(record);
                }
                Err(e) => {
                    warn!(
                        email_id = %email.id,
                        task = task_key,
                        attempt,
                        missing = ?e.missing_fields,
                        "Assistant output could not be normalized"
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(Failure::new(
            FailureReason::Normalization,
            last_error.map_or_else(|| "no attempts made".to_string(), |e| e.to_string()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use chrono::TimeZone;
    use rust_decimal::Decimal;
    use secrecy::SecretString;

    use super::*;
    use crate::error::LlmError;
    use crate::llm::{CompletionRequest, CompletionResponse, FinishReason, LlmProvider};

    /// Pops scripted replies, repeating the last; records every prompt.
    struct Scripted {
        replies: Mutex<Vec<String>>,
        prompts: Mutex<Vec<String>>,
        calls: AtomicU32,
    }

    impl Scripted {
        fn new(replies: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.iter().rev().map(|r| r.to_string()).collect()),
                prompts: Mutex::new(Vec::new()),
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl LlmProvider for Scripted {
        fn model_name(&self) -> &str {
            "scripted"
        }

        fn cost_per_token(&self) -> (Decimal, Decimal) {
            (Decimal::ZERO, Decimal::ZERO)
        }

        async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(message) = request.messages.last() {
                self.prompts.lock().unwrap().push(message.content.clone());
            }
            let mut replies = self.replies.lock().unwrap();
            let content = if replies.len() > 1 {
                replies.pop().unwrap_or_default()
            } else {
                replies.last().cloned().unwrap_or_default()
            };
            Ok(CompletionResponse {
                content,
                input_tokens: 5,
                output_tokens: 5,
                finish_reason: FinishReason::Stop,
                response_id: None,
            })
        }
    }

    fn email() -> Email {
        Email {
            id: "e1".into(),
            sender: "pal@example.com".into(),
            subject: "Lunch on Friday?".into(),
            body: "Want to grab lunch Friday at noon?".into(),
            received_at: Utc.with_ymd_and_hms(2025, 3, 5, 10, 0, 0).unwrap(),
        }
    }

    fn assistant(provider: Arc<Scripted>) -> Assistant {
        let config = TriageConfig::new(SecretString::from("test-key"));
        let gateway = ModelGateway::from_config(provider, &config);
        Assistant::new(
            Arc::new(gateway),
            Arc::new(PromptLibrary::new()),
            Arc::new(TriageStore::new()),
            &config,
        )
    }

    #[tokio::test]
    async fn answer_uses_question_in_prompt() {
        let provider = Scripted::new(&[r#"{"answer": "Friday at noon."}"#]);
        let assistant = assistant(provider.clone());

        let answer = assistant.answer(&email(), "When is lunch?").await.unwrap();
        assert_eq!(answer, "Friday at noon.");
        assert!(provider.prompts.lock().unwrap()[0].contains("Question: When is lunch?"));
    }

    #[tokio::test]
    async fn plain_text_summary_is_accepted() {
        let assistant = assistant(Scripted::new(&["Summary: Lunch invitation for Friday."]));
        assert_eq!(
            assistant.summarize(&email()).await.unwrap(),
            "Lunch invitation for Friday."
        );
    }

    #[tokio::test]
    async fn draft_is_recorded_in_store() {
        let reply = r#"{"subject": "Re: Lunch on Friday?", "body": "Sounds great!", "follow_ups": ["Add to calendar"]}"#;
        let assistant = assistant(Scripted::new(&[reply]));

        let draft = assistant.draft_reply(&email(), Tone::Friendly).await.unwrap();
        assert_eq!(draft.subject, "Re: Lunch on Friday?");
        assert_eq!(draft.follow_ups, vec!["Add to calendar".to_string()]);
        assert_eq!(draft.tone, Tone::Friendly);
        assert_eq!(assistant.store.latest_draft("e1").await, Some(draft));
    }

    #[tokio::test]
    async fn draft_retries_with_strict_prompt() {
        let reply = r#"{"subject": "Re: Lunch", "body": "Yes!"}"#;
        let provider = Scripted::new(&["I'd be glad to help with that.", reply]);
        let assistant = assistant(provider.clone());

        let draft = assistant.draft_reply(&email(), Tone::Concise).await.unwrap();
        assert_eq!(draft.body, "Yes!");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
        let prompts = provider.prompts.lock().unwrap();
        assert!(!prompts[0].contains("IMPORTANT"));
        assert!(prompts[1].contains("IMPORTANT"));
    }

    #[tokio::test]
    async fn failed_draft_is_error_and_not_recorded() {
        let assistant = assistant(Scripted::new(&["Hmm."]));
        let err = assistant.draft_reply(&email(), Tone::Formal).await.unwrap_err();
        assert!(matches!(
            err,
            DraftError::Generation { reason: FailureReason::Normalization, .. }
        ));
        assert!(assistant.store.list_drafts().await.is_empty());
    }

    #[tokio::test]
    async fn follow_ups_from_bullets() {
        let assistant = assistant(Scripted::new(&["- Confirm the time\n- Book a table"]));
        assert_eq!(
            assistant.suggest_follow_ups(&email()).await.unwrap(),
            vec!["Confirm the time".to_string(), "Book a table".to_string()]
        );
    }
}
