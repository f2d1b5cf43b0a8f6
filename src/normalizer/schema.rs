//! Target schemas and the structured records they produce.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::pipeline::types::{ActionItem, Category};

/// Which record the normalizer should produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchemaSpec {
    /// Category, action items and deadline of an email.
    Triage,
    /// Subject, body and follow-ups of a reply.
    ReplyDraft,
    /// A list of follow-up suggestions.
    FollowUps,
    /// Free-text answer or summary.
    Answer,
}

impl SchemaSpec {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Triage => "triage",
            Self::ReplyDraft => "reply_draft",
            Self::FollowUps => "follow_ups",
            Self::Answer => "answer",
        }
    }

    /// Fields that must resolve for normalization to succeed.
    pub fn required_fields(&self) -> &'static [&'static str] {
        match self {
            Self::Triage => &["category", "action_items"],
            Self::ReplyDraft => &["subject", "body"],
            Self::FollowUps => &["follow_ups"],
            Self::Answer => &["answer"],
        }
    }
}

/// Category, action items and deadline extracted from model output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriageRecord {
    pub category: Category,
    pub action_items: Vec<ActionItem>,
    pub deadline: Option<DateTime<Utc>>,
}

/// Reply fields extracted from model output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftRecord {
    pub subject: String,
    pub body: String,
    pub follow_ups: Vec<String>,
}

/// A validated record.
#[derive(Debug, Clone, PartialEq)]
pub enum StructuredRecord {
    Triage(TriageRecord),
    ReplyDraft(DraftRecord),
    FollowUps(Vec<String>),
    Answer(String),
}

impl StructuredRecord {
    pub fn schema(&self) -> SchemaSpec {
        match self {
            Self::Triage(_) => SchemaSpec::Triage,
            Self::ReplyDraft(_) => SchemaSpec::ReplyDraft,
            Self::FollowUps(_) => SchemaSpec::FollowUps,
            Self::Answer(_) => SchemaSpec::Answer,
        }
    }

    pub fn into_triage(self) -> Option<TriageRecord> {
        match self {
            Self::Triage(r) => Some(r),
            _ => None,
        }
    }

    pub fn into_draft(self) -> Option<DraftRecord> {
        match self {
            Self::ReplyDraft(r) => Some(r),
            _ => None,
        }
    }

    pub fn into_follow_ups(self) -> Option<Vec<String>> {
        match self {
            Self::FollowUps(items) => Some(items),
            _ => None,
        }
    }

    pub fn into_answer(self) -> Option<String> {
        match self {
            Self::Answer(text) => Some(text),
            _ => None,
        }
    }
}

/// Canonical text encoding of a record; `normalize` reads it back unchanged.
pub fn serialize(record: &StructuredRecord) -> String {
    let value = match record {
        StructuredRecord::Triage(r) => serde_json::to_value(r),
        StructuredRecord::ReplyDraft(r) => serde_json::to_value(r),
        StructuredRecord::FollowUps(items) => Ok(serde_json::json!({ "follow_ups": items })),
        StructuredRecord::Answer(text) => Ok(serde_json::json!({ "answer": text })),
    };
    // Records hold only strings, enums and timestamps, which always encode.
    value.map(|v| v.to_string()).unwrap_or_default()
}
