//! End-to-end pipeline tests against a scripted model.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use secrecy::SecretString;

use inbox_triage::config::TriageConfig;
use inbox_triage::error::{FailureReason, LlmError};
use inbox_triage::llm::{
    CompletionOptions, CompletionRequest, CompletionResponse, FinishReason, LlmProvider,
    ModelGateway,
};
use inbox_triage::pipeline::{
    Assistant, Category, Email, EmailProcessor, Priority, ProcessingState, Tone,
};
use inbox_triage::prompts::PromptLibrary;
use inbox_triage::store::TriageStore;

type Script = dyn Fn(&str, u32) -> Result<String, LlmError> + Send + Sync;

/// Answers each prompt with `script(prompt, call_number)`.
struct ScriptedModel {
    script: Box<Script>,
    calls: AtomicU32,
}

impl ScriptedModel {
    fn new(script: impl Fn(&str, u32) -> Result<String, LlmError> + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            script: Box::new(script),
            calls: AtomicU32::new(0),
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmProvider for ScriptedModel {
    fn model_name(&self) -> &str {
        "scripted"
    }

    fn cost_per_token(&self) -> (Decimal, Decimal) {
        (Decimal::new(1, 6), Decimal::new(2, 6))
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let prompt = request
            .messages
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        let content = (self.script)(&prompt, call)?;
        Ok(CompletionResponse {
            content,
            input_tokens: 120,
            output_tokens: 40,
            finish_reason: FinishReason::Stop,
            response_id: None,
        })
    }
}

struct Harness {
    processor: EmailProcessor,
    assistant: Assistant,
    store: Arc<TriageStore>,
}

fn harness(model: Arc<ScriptedModel>) -> Harness {
    let config = TriageConfig::new(SecretString::from("sk-test"));
    let gateway = Arc::new(ModelGateway::from_config(model, &config));
    let prompts = Arc::new(PromptLibrary::new());
    let store = Arc::new(TriageStore::new());
    Harness {
        processor: EmailProcessor::new(
            Arc::clone(&gateway),
            Arc::clone(&prompts),
            Arc::clone(&store),
            &config,
        ),
        assistant: Assistant::new(gateway, prompts, Arc::clone(&store), &config),
        store,
    }
}

/// Wednesday morning.
fn received() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 5, 9, 30, 0).unwrap()
}

fn friday_eod() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 7, 23, 59, 59).unwrap()
}

fn email(id: &str, subject: &str, body: &str) -> Email {
    Email {
        id: id.into(),
        sender: "manager@example.com".into(),
        subject: subject.into(),
        body: body.into(),
        received_at: received(),
    }
}

fn project_deadline() -> Email {
    email("e1", "Re: Project deadline", "Please send the report by Friday EOD.")
}

const REMINDER_JSON: &str = r#"{"category": "Reminder", "action_items": [{"description": "Send the report", "due": "Friday", "priority": "High"}], "deadline": null}"#;

#[tokio::test]
async fn project_deadline_example_from_clean_json() {
    let h = harness(ScriptedModel::new(|_, _| Ok(REMINDER_JSON.into())));

    let processed = h.processor.process(project_deadline()).await.unwrap();
    assert_eq!(processed.category, Category::Reminder);
    assert_eq!(processed.action_items.len(), 1);
    let item = &processed.action_items[0];
    assert_eq!(item.description, "Send the report");
    assert_eq!(item.due, Some(friday_eod()));
    assert_eq!(item.priority, Priority::High);
    assert_eq!(processed.deadline, Some(friday_eod()));
}

#[tokio::test]
async fn project_deadline_example_from_chatty_output() {
    let h = harness(ScriptedModel::new(|_, _| {
        Ok(format!(
            "Of course! Here's the triage:\n```json\n{REMINDER_JSON}\n```\nHope that helps."
        ))
    }));

    let processed = h.processor.process(project_deadline()).await.unwrap();
    assert_eq!(processed.category, Category::Reminder);
    assert_eq!(processed.action_items[0].description, "Send the report");
    assert_eq!(processed.action_items[0].due, Some(friday_eod()));
}

#[tokio::test]
async fn project_deadline_example_from_plain_prose() {
    let h = harness(ScriptedModel::new(|_, _| {
        Ok("Category: Reminder\n\nThe sender writes: please send the report by Friday EOD.".into())
    }));

    let processed = h.processor.process(project_deadline()).await.unwrap();
    assert_eq!(processed.category, Category::Reminder);
    assert_eq!(processed.action_items.len(), 1);
    assert_eq!(processed.action_items[0].description, "Send the report");
    assert_eq!(processed.action_items[0].due, Some(friday_eod()));
    assert_eq!(processed.action_items[0].priority, Priority::High);
}

#[tokio::test]
async fn unknown_category_is_mapped_to_other() {
    let h = harness(ScriptedModel::new(|_, _| {
        Ok(r#"{"category": "Spam", "action_items": []}"#.into())
    }));
    let processed = h.processor.process(project_deadline()).await.unwrap();
    assert_eq!(processed.category, Category::Other);
    assert!(Category::ALL.contains(&processed.category));
}

#[tokio::test]
async fn batch_isolates_one_failing_email() {
    let model = ScriptedModel::new(|prompt, _| {
        if prompt.contains("POISON") {
            Ok("I cannot help with that.".into())
        } else {
            Ok(REMINDER_JSON.into())
        }
    });
    let h = harness(model.clone());

    let emails = vec![
        email("a", "One", "Please review the draft."),
        email("b", "Two", "Please sign the form."),
        email("c", "POISON", "???"),
        email("d", "Four", "Please book the room."),
        email("e", "Five", "Please call back."),
    ];
    let results = h.processor.process_batch(emails).await;

    assert_eq!(results.len(), 5);
    let failed: Vec<_> = results.iter().filter_map(|r| r.as_ref().err()).collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].email_id(), "c");
    assert_eq!(failed[0].reason(), FailureReason::Normalization);
    assert!(results[2].is_err());

    for id in ["a", "b", "d", "e"] {
        assert_eq!(h.store.state(id).await, Some(ProcessingState::Done));
    }
    assert_eq!(h.store.state("c").await, Some(ProcessingState::Failed));
    assert_eq!(h.store.list_processed().await.len(), 4);
    // Four single calls plus two attempts for the failing email.
    assert_eq!(model.calls(), 6);
}

#[tokio::test]
async fn reprocessing_is_idempotent_for_deterministic_model() {
    let h = harness(ScriptedModel::new(|_, _| Ok(REMINDER_JSON.into())));

    let first = h.processor.process(project_deadline()).await.unwrap();
    let second = h.processor.process(project_deadline()).await.unwrap();
    assert_eq!(first.category, second.category);
    assert_eq!(first.action_items, second.action_items);
    assert_eq!(h.store.list_processed().await.len(), 1);
    assert_eq!(h.store.processed_history("e1").await.len(), 2);
}

#[tokio::test]
async fn concurrent_runs_for_same_email_are_serialized() {
    let h = harness(ScriptedModel::new(|_, call| {
        Ok(if call == 1 {
            r#"{"category": "Urgent", "action_items": []}"#.into()
        } else {
            REMINDER_JSON.into()
        })
    }));

    let (first, second) = tokio::join!(
        h.processor.process(project_deadline()),
        h.processor.process(project_deadline())
    );
    assert!(first.is_ok() && second.is_ok());

    let history = h.store.processed_history("e1").await;
    let categories: Vec<_> = history.iter().map(|p| p.category).collect();
    assert_eq!(categories, vec![Category::Urgent, Category::Reminder]);
    let listed = h.store.list_processed().await;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].category, Category::Reminder);
    assert_eq!(h.store.state("e1").await, Some(ProcessingState::Done));
}

#[tokio::test(start_paused = true)]
async fn transient_failures_are_retried_by_gateway() {
    let model = ScriptedModel::new(|_, call| {
        if call <= 2 {
            Err(LlmError::ServerError {
                provider: "scripted".into(),
                status: 503,
            })
        } else {
            Ok(REMINDER_JSON.into())
        }
    });
    let h = harness(model.clone());

    let processed = h.processor.process(project_deadline()).await.unwrap();
    assert_eq!(processed.category, Category::Reminder);
    assert_eq!(model.calls(), 3);
}

#[tokio::test]
async fn gateway_reports_attempts_and_cost() {
    let model = ScriptedModel::new(|_, _| Ok("ok".into()));
    let config = TriageConfig::new(SecretString::from("sk-test"));
    let gateway = ModelGateway::from_config(model.clone(), &config);

    let raw = gateway
        .complete("hello", &CompletionOptions::from_config(&config))
        .await
        .unwrap();
    assert_eq!(raw.text, "ok");
    assert_eq!(raw.attempts, 1);
    assert_eq!(raw.input_tokens, Some(120));
    assert_eq!(raw.output_tokens, Some(40));
    // 120 * 0.000001 + 40 * 0.000002
    assert_eq!(raw.cost, Decimal::new(200, 6));
}

#[tokio::test]
async fn auth_failure_fails_fast() {
    let model = ScriptedModel::new(|_, _| {
        Err(LlmError::AuthFailed {
            provider: "scripted".into(),
        })
    });
    let h = harness(model.clone());

    let err = h.processor.process(project_deadline()).await.unwrap_err();
    assert_eq!(err.reason(), FailureReason::Authentication);
    assert_eq!(model.calls(), 1);
    assert_eq!(h.store.state("e1").await, Some(ProcessingState::Failed));
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_surface_model_unavailable() {
    let model = ScriptedModel::new(|_, _| {
        Err(LlmError::Timeout {
            provider: "scripted".into(),
            timeout: Duration::from_secs(20),
        })
    });
    let h = harness(model.clone());

    let err = h.processor.process(project_deadline()).await.unwrap_err();
    assert_eq!(err.reason(), FailureReason::ModelUnavailable);
    assert_eq!(model.calls(), 3);
}

#[tokio::test]
async fn failed_emails_can_be_retried() {
    let healthy = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let flag = Arc::clone(&healthy);
    let h = harness(ScriptedModel::new(move |_, _| {
        if flag.load(Ordering::SeqCst) {
            Ok(REMINDER_JSON.into())
        } else {
            Ok("garbled".into())
        }
    }));

    assert!(h.processor.process(project_deadline()).await.is_err());
    assert_eq!(h.store.pending_or_failed().await.len(), 1);

    healthy.store(true, Ordering::SeqCst);
    let retried = h.processor.retry_pending().await;
    assert_eq!(retried.len(), 1);
    assert!(retried[0].is_ok());
    assert!(h.store.pending_or_failed().await.is_empty());
}

#[tokio::test]
async fn drafts_and_snapshot_round_trip() {
    let h = harness(ScriptedModel::new(|prompt, _| {
        if prompt.contains("Draft a reply") {
            Ok("Subject: Re: Project deadline\nBody: Will do, you'll have it Friday.".into())
        } else {
            Ok(REMINDER_JSON.into())
        }
    }));

    h.processor.process(project_deadline()).await.unwrap();
    let draft = h
        .assistant
        .draft_reply(&project_deadline(), Tone::Professional)
        .await
        .unwrap();
    assert_eq!(draft.subject, "Re: Project deadline");
    assert_eq!(draft.body, "Will do, you'll have it Friday.");

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("processed.json");
    h.store.save_snapshot(&path).await.unwrap();

    let restored = TriageStore::load_snapshot(&path).await.unwrap();
    assert_eq!(restored.list_processed().await, h.store.list_processed().await);
    assert_eq!(restored.latest_draft("e1").await, Some(draft));
    assert_eq!(restored.by_category(Category::Reminder).await.len(), 1);

    let insights = restored.insights(10).await;
    assert_eq!(insights.total_emails, 1);
    assert_eq!(insights.category_counts[1], (Category::Reminder, 1));
}
