//! In-memory triage store with flat-file JSON snapshots.
//!
//! Processed records and drafts are append-only: re-processing adds a new
//! `ProcessedEmail` that supersedes the previous one for reads, and every
//! draft is retained. Per-email locks serialize concurrent re-processing of
//! the same email id.

pub mod insights;

pub use insights::{Insights, PriorityScore};

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::pipeline::types::{Category, Email, ProcessedEmail, ProcessingState, ReplyDraft};

/// On-disk layout of a snapshot.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    emails: Vec<Email>,
    processed: Vec<ProcessedEmail>,
    drafts: Vec<ReplyDraft>,
    states: HashMap<String, ProcessingState>,
}

#[derive(Default)]
pub struct TriageStore {
    /// Ingestion order.
    emails: RwLock<Vec<Email>>,
    /// Every processed record, oldest first.
    processed: RwLock<Vec<ProcessedEmail>>,
    /// Every draft, oldest first.
    drafts: RwLock<Vec<ReplyDraft>>,
    states: RwLock<HashMap<String, ProcessingState>>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl TriageStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Emails and state ────────────────────────────────────────────

    /// Record emails; a known id keeps its first version. New emails start
    /// out `Pending`.
    pub async fn ingest(&self, emails: impl IntoIterator<Item = Email>) -> usize {
        let mut stored = self.emails.write().await;
        let mut states = self.states.write().await;
        let mut added = 0;
        for email in emails {
            if stored.iter().any(|e| e.id == email.id) {
                debug!(email_id = %email.id, "Email already ingested");
                continue;
            }
            states.entry(email.id.clone()).or_insert(ProcessingState::Pending);
            stored.push(email);
            added += 1;
        }
        added
    }

    pub async fn email(&self, email_id: &str) -> Option<Email> {
        self.emails.read().await.iter().find(|e| e.id == email_id).cloned()
    }

    pub async fn emails(&self) -> Vec<Email> {
        self.emails.read().await.clone()
    }

    pub async fn state(&self, email_id: &str) -> Option<ProcessingState> {
        self.states.read().await.get(email_id).copied()
    }

    /// Move an email to `to`. Unknown ids count as `Pending`. Returns false
    /// and leaves the state alone when the transition is not allowed.
    pub async fn transition(&self, email_id: &str, to: ProcessingState) -> bool {
        let mut states = self.states.write().await;
        let from = states
            .get(email_id)
            .copied()
            .unwrap_or(ProcessingState::Pending);
        if from == to {
            return true;
        }
        if !from.can_transition_to(to) {
            warn!(email_id, %from, %to, "Rejected invalid state transition");
            return false;
        }
        debug!(email_id, %from, %to, "State transition");
        states.insert(email_id.to_string(), to);
        true
    }

    /// Emails awaiting a first run or a manual retry, in ingestion order.
    pub async fn pending_or_failed(&self) -> Vec<Email> {
        // Lock order is always `emails` before `states`.
        let emails = self.emails.read().await;
        let states = self.states.read().await;
        emails
            .iter()
            .filter(|e| {
                matches!(
                    states.get(&e.id),
                    None | Some(ProcessingState::Pending | ProcessingState::Failed)
                )
            })
            .cloned()
            .collect()
    }

    /// Put an email caught mid-run back to `Pending`. Settled states are
    /// left alone.
    pub async fn reset_interrupted(&self, email_id: &str) -> bool {
        let mut states = self.states.write().await;
        match states.get_mut(email_id) {
            Some(state) if state.is_in_flight() => {
                debug!(email_id, from = %state, "Reset interrupted run to pending");
                *state = ProcessingState::Pending;
                true
            }
            _ => false,
        }
    }

    /// Exclusive processing right for one email id.
    pub async fn lock_email(&self, email_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            // Entries only the map holds are neither locked nor awaited.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(locks.entry(email_id.to_string()).or_default())
        };
        lock.lock_owned().await
    }

    // ── Processed records ───────────────────────────────────────────

    pub async fn record_processed(&self, record: ProcessedEmail) {
        debug!(email_id = %record.email_id, category = %record.category, "Recorded processed email");
        self.processed.write().await.push(record);
    }

    /// Latest record per email id, ordered by first processing.
    pub async fn list_processed(&self) -> Vec<ProcessedEmail> {
        let history = self.processed.read().await;
        let mut latest: Vec<ProcessedEmail> = Vec::new();
        let mut index: HashMap<&str, usize> = HashMap::new();
        for record in history.iter() {
            match index.get(record.email_id.as_str()) {
                Some(&i) => latest[i] = record.clone(),
                None => {
                    index.insert(&record.email_id, latest.len());
                    latest.push(record.clone());
                }
            }
        }
        latest
    }

    pub async fn latest_processed(&self, email_id: &str) -> Option<ProcessedEmail> {
        self.processed
            .read()
            .await
            .iter()
            .rev()
            .find(|p| p.email_id == email_id)
            .cloned()
    }

    /// All records ever produced for one email, oldest first.
    pub async fn processed_history(&self, email_id: &str) -> Vec<ProcessedEmail> {
        self.processed
            .read()
            .await
            .iter()
            .filter(|p| p.email_id == email_id)
            .cloned()
            .collect()
    }

    pub async fn by_category(&self, category: Category) -> Vec<ProcessedEmail> {
        self.list_processed()
            .await
            .into_iter()
            .filter(|p| p.category == category)
            .collect()
    }

    /// Processed emails whose sender matches, ignoring ASCII case.
    pub async fn by_sender(&self, sender: &str) -> Vec<ProcessedEmail> {
        let senders: HashMap<String, String> = self
            .emails
            .read()
            .await
            .iter()
            .map(|e| (e.id.clone(), e.sender.clone()))
            .collect();
        self.list_processed()
            .await
            .into_iter()
            .filter(|p| {
                senders
                    .get(&p.email_id)
                    .is_some_and(|s| s.eq_ignore_ascii_case(sender))
            })
            .collect()
    }

    /// Processed emails received in `[from, to)`. Records without a known
    /// email fall back to their processing time.
    pub async fn in_range(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<ProcessedEmail> {
        let received: HashMap<String, DateTime<Utc>> = self
            .emails
            .read()
            .await
            .iter()
            .map(|e| (e.id.clone(), e.received_at))
            .collect();
        self.list_processed()
            .await
            .into_iter()
            .filter(|p| {
                let at = received.get(&p.email_id).copied().unwrap_or(p.processed_at);
                at >= from && at < to
            })
            .collect()
    }

    // ── Drafts ──────────────────────────────────────────────────────

    pub async fn record_draft(&self, draft: ReplyDraft) {
        debug!(email_id = %draft.email_id, draft_id = %draft.id, "Recorded reply draft");
        self.drafts.write().await.push(draft);
    }

    pub async fn list_drafts(&self) -> Vec<ReplyDraft> {
        self.drafts.read().await.clone()
    }

    pub async fn drafts_for(&self, email_id: &str) -> Vec<ReplyDraft> {
        self.drafts
            .read()
            .await
            .iter()
            .filter(|d| d.email_id == email_id)
            .cloned()
            .collect()
    }

    /// Most recent draft for display.
    pub async fn latest_draft(&self, email_id: &str) -> Option<ReplyDraft> {
        self.drafts
            .read()
            .await
            .iter()
            .rev()
            .find(|d| d.email_id == email_id)
            .cloned()
    }

    // ── Snapshots ───────────────────────────────────────────────────

    /// Write the whole store as pretty JSON, creating parent directories.
    pub async fn save_snapshot(&self, path: &Path) -> Result<(), StoreError> {
        let snapshot = Snapshot {
            emails: self.emails.read().await.clone(),
            processed: self.processed.read().await.clone(),
            drafts: self.drafts.read().await.clone(),
            states: self.states.read().await.clone(),
        };
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec_pretty(&snapshot)?;
        tokio::fs::write(path, json).await?;
        info!(
            path = %path.display(),
            emails = snapshot.emails.len(),
            processed = snapshot.processed.len(),
            drafts = snapshot.drafts.len(),
            "Saved snapshot"
        );
        Ok(())
    }

    /// Load a snapshot. Emails caught mid-run go back to `Pending`.
    pub async fn load_snapshot(path: &Path) -> Result<Self, StoreError> {
        let raw = tokio::fs::read(path).await?;
        let mut snapshot: Snapshot = serde_json::from_slice(&raw)?;
        for state in snapshot.states.values_mut() {
            if state.is_in_flight() {
                *state = ProcessingState::Pending;
            }
        }
        info!(
            path = %path.display(),
            emails = snapshot.emails.len(),
            processed = snapshot.processed.len(),
            "Loaded snapshot"
        );
        Ok(Self {
            emails: RwLock::new(snapshot.emails),
            processed: RwLock::new(snapshot.processed),
            drafts: RwLock::new(snapshot.drafts),
            states: RwLock::new(snapshot.states),
            locks: Mutex::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};
    use uuid::Uuid;

    use super::*;
    use crate::pipeline::types::Tone;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, day, 9, 0, 0).unwrap()
    }

    fn email(id: &str, sender: &str, day: u32) -> Email {
        Email {
            id: id.into(),
            sender: sender.into(),
            subject: format!("Subject {id}"),
            body: "Body".into(),
            received_at: at(day),
        }
    }

    fn processed(id: &str, category: Category) -> ProcessedEmail {
        ProcessedEmail {
            email_id: id.into(),
            category,
            action_items: Vec::new(),
            deadline: None,
            raw_model_output: "{}".into(),
            processed_at: Utc::now(),
        }
    }

    fn draft(id: &str, subject: &str) -> ReplyDraft {
        ReplyDraft {
            id: Uuid::new_v4(),
            email_id: id.into(),
            subject: subject.into(),
            body: "Thanks".into(),
            follow_ups: Vec::new(),
            tone: Tone::Professional,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn ingest_skips_known_ids() {
        let store = TriageStore::new();
        assert_eq!(store.ingest([email("a", "x@y", 1), email("b", "x@y", 2)]).await, 2);
        assert_eq!(store.ingest([email("a", "other@y", 3)]).await, 0);
        assert_eq!(store.email("a").await.unwrap().sender, "x@y");
        assert_eq!(store.state("b").await, Some(ProcessingState::Pending));
    }

    #[tokio::test]
    async fn latest_record_supersedes_but_history_is_kept() {
        let store = TriageStore::new();
        store.record_processed(processed("a", Category::Other)).await;
        store.record_processed(processed("b", Category::Urgent)).await;
        store.record_processed(processed("a", Category::Reminder)).await;

        let listed = store.list_processed().await;
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].email_id, "a");
        assert_eq!(listed[0].category, Category::Reminder);
        assert_eq!(store.processed_history("a").await.len(), 2);
        assert_eq!(store.by_category(Category::Other).await.len(), 0);
    }

    #[tokio::test]
    async fn queries_by_sender_and_range() {
        let store = TriageStore::new();
        store
            .ingest([email("a", "Boss@Example.com", 1), email("b", "pal@example.com", 5)])
            .await;
        store.record_processed(processed("a", Category::Urgent)).await;
        store.record_processed(processed("b", Category::Information)).await;

        let from_boss = store.by_sender("boss@example.com").await;
        assert_eq!(from_boss.len(), 1);
        assert_eq!(from_boss[0].email_id, "a");

        let early = store.in_range(at(1), at(1) + Duration::days(2)).await;
        assert_eq!(early.len(), 1);
        assert_eq!(early[0].email_id, "a");
    }

    #[tokio::test]
    async fn transitions_follow_state_machine() {
        let store = TriageStore::new();
        store.ingest([email("a", "x@y", 1)]).await;
        assert!(!store.transition("a", ProcessingState::Done).await);
        assert!(store.transition("a", ProcessingState::AwaitingModel).await);
        assert!(store.transition("a", ProcessingState::Failed).await);
        assert_eq!(store.pending_or_failed().await.len(), 1);
        assert!(store.transition("a", ProcessingState::Pending).await);
        assert!(store.transition("a", ProcessingState::AwaitingModel).await);
        assert!(store.transition("a", ProcessingState::Normalizing).await);
        assert!(store.transition("a", ProcessingState::Done).await);
        assert!(store.pending_or_failed().await.is_empty());
    }

    #[tokio::test]
    async fn latest_draft_wins_and_all_are_kept() {
        let store = TriageStore::new();
        store.record_draft(draft("a", "first")).await;
        store.record_draft(draft("a", "second")).await;
        store.record_draft(draft("b", "other")).await;
        assert_eq!(store.latest_draft("a").await.unwrap().subject, "second");
        assert_eq!(store.drafts_for("a").await.len(), 2);
        assert_eq!(store.list_drafts().await.len(), 3);
        assert!(store.latest_draft("c").await.is_none());
    }

    #[tokio::test]
    async fn same_email_lock_is_exclusive() {
        let store = TriageStore::new();
        let guard = store.lock_email("a").await;
        assert!(
            tokio::time::timeout(std::time::Duration::from_millis(20), store.lock_email("a"))
                .await
                .is_err()
        );
        let _other = store.lock_email("b").await;
        drop(guard);
        let _again = store.lock_email("a").await;
    }

    #[tokio::test]
    async fn released_locks_are_evicted() {
        let store = TriageStore::new();
        for id in ["a", "b", "c"] {
            drop(store.lock_email(id).await);
        }
        let held = store.lock_email("d").await;
        assert_eq!(store.locks.lock().await.len(), 1);
        drop(held);
    }

    #[tokio::test]
    async fn reset_interrupted_only_touches_in_flight_states() {
        let store = TriageStore::new();
        store.ingest([email("a", "x@y", 1), email("b", "x@y", 2)]).await;
        store.transition("a", ProcessingState::AwaitingModel).await;
        store.transition("b", ProcessingState::AwaitingModel).await;
        store.transition("b", ProcessingState::Failed).await;

        assert!(store.reset_interrupted("a").await);
        assert!(!store.reset_interrupted("b").await);
        assert!(!store.reset_interrupted("missing").await);
        assert_eq!(store.state("a").await, Some(ProcessingState::Pending));
        assert_eq!(store.state("b").await, Some(ProcessingState::Failed));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_ingest_and_pending_scan_finish() {
        let store = Arc::new(TriageStore::new());
        let mut tasks = Vec::new();
        for worker in 0..4 {
            let writer = Arc::clone(&store);
            tasks.push(tokio::spawn(async move {
                for i in 0..300 {
                    writer.ingest([email(&format!("{worker}-{i}"), "x@y", 1)]).await;
                }
            }));
            let reader = Arc::clone(&store);
            tasks.push(tokio::spawn(async move {
                for _ in 0..3000 {
                    reader.pending_or_failed().await;
                }
            }));
        }

        let all = futures::future::join_all(tasks);
        let joined = tokio::time::timeout(std::time::Duration::from_secs(20), all)
            .await
            .expect("ingest and pending scan deadlocked");
        assert!(joined.iter().all(Result::is_ok));
        assert_eq!(store.pending_or_failed().await.len(), 1200);
    }

    #[tokio::test]
    async fn snapshot_round_trip_resets_interrupted_states() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("processed.json");

        let store = TriageStore::new();
        store.ingest([email("a", "x@y", 1), email("b", "x@y", 2)]).await;
        store.transition("a", ProcessingState::AwaitingModel).await;
        store.record_processed(processed("b", Category::ToDo)).await;
        store.record_draft(draft("b", "Re: b")).await;
        store.save_snapshot(&path).await.unwrap();

        let loaded = TriageStore::load_snapshot(&path).await.unwrap();
        assert_eq!(loaded.emails().await.len(), 2);
        assert_eq!(loaded.list_processed().await, store.list_processed().await);
        assert_eq!(loaded.list_drafts().await.len(), 1);
        assert_eq!(loaded.state("a").await, Some(ProcessingState::Pending));
    }

    #[tokio::test]
    async fn loading_missing_snapshot_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = TriageStore::load_snapshot(&dir.path().join("nope.json"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, StoreError::Io(_)));
    }
}
