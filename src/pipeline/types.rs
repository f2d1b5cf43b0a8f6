//! Shared types for the email processing pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Inbound email ───────────────────────────────────────────────────

/// An ingested email. Immutable once ingested; identity is `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Email {
    pub id: String,
    pub sender: String,
    pub subject: String,
    pub body: String,
    #[serde(alias = "timestamp")]
    pub received_at: DateTime<Utc>,
}

// ── Classification ──────────────────────────────────────────────────

/// Closed set of triage categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Category {
    Urgent,
    Reminder,
    ToDo,
    Information,
    Other,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Self::Urgent,
        Self::Reminder,
        Self::ToDo,
        Self::Information,
        Self::Other,
    ];

    /// Map a model-supplied label onto the closed set.
    ///
    /// Anything unrecognized becomes `Other`.
    pub fn from_label(label: &str) -> Self {
        let key: String = label
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        match key.as_str() {
            "urgent" | "important" | "critical" | "highpriority" => Self::Urgent,
            "reminder" | "reminders" | "followup" => Self::Reminder,
            "todo" | "todos" | "task" | "actionrequired" | "action" => Self::ToDo,
            "information" | "informational" | "info" | "fyi" | "newsletter" | "update" => {
                Self::Information
            }
            _ => Self::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Urgent => "Urgent",
            Self::Reminder => "Reminder",
            Self::ToDo => "ToDo",
            Self::Information => "Information",
            Self::Other => "Other",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Action item priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    /// Map a model-supplied label; `None` when it names no known priority.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "high" | "urgent" | "critical" | "p0" | "p1" => Some(Self::High),
            "medium" | "normal" | "moderate" | "p2" => Some(Self::Medium),
            "low" | "minor" | "p3" => Some(Self::Low),
            _ => None,
        }
    }
}

/// A task extracted from an email.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionItem {
    pub description: String,
    pub due: Option<DateTime<Utc>>,
    pub priority: Priority,
}

// ── Processed email ─────────────────────────────────────────────────

/// Structured result of triaging one email.
///
/// Never mutated; re-processing produces a new record that supersedes the
/// old one by `email_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedEmail {
    pub email_id: String,
    pub category: Category,
    pub action_items: Vec<ActionItem>,
    pub deadline: Option<DateTime<Utc>>,
    /// Model output this record was built from, kept for audit.
    pub raw_model_output: String,
    pub processed_at: DateTime<Utc>,
}

// ── Reply drafts ────────────────────────────────────────────────────

/// Tone requested for a reply draft.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tone {
    #[default]
    Professional,
    Friendly,
    Formal,
    Concise,
}

impl Tone {
    /// Instruction fragment used in the draft prompt.
    pub fn describe(&self) -> &'static str {
        match self {
            Self::Professional => "friendly but professional",
            Self::Friendly => "warm and casual",
            Self::Formal => "formal and courteous",
            Self::Concise => "brief and to the point",
        }
    }
}

/// A generated reply. Every draft is retained; the newest wins for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyDraft {
    pub id: Uuid,
    pub email_id: String,
    pub subject: String,
    pub body: String,
    pub follow_ups: Vec<String>,
    pub tone: Tone,
    pub created_at: DateTime<Utc>,
}

// ── Processing state ────────────────────────────────────────────────

/// Per-email processing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingState {
    Pending,
    AwaitingModel,
    Normalizing,
    Done,
    Failed,
}

impl ProcessingState {
    /// Check if this state allows transitioning to another state.
    pub fn can_transition_to(&self, target: ProcessingState) -> bool {
        use ProcessingState::*;

        matches!(
            (self, target),
            (Pending, AwaitingModel)
                | (AwaitingModel, Normalizing)
                | (AwaitingModel, Failed)
                // Stricter-prompt retry goes back to the model.
                | (Normalizing, AwaitingModel)
                | (Normalizing, Done)
                | (Normalizing, Failed)
                // Manual retry / re-processing.
                | (Done, Pending)
                | (Failed, Pending)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// A model call or normalization is underway.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::AwaitingModel | Self::Normalizing)
    }
}

impl std::fmt::Display for ProcessingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::AwaitingModel => "awaiting_model",
            Self::Normalizing => "normalizing",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}
