//! Schema normalizer: turns untrusted model text into validated records.
//!
//! Three passes, each only reached when the previous one leaves required
//! fields unresolved:
//! 1. Direct parse of the whole text as JSON.
//! 2. Repair: parse payload-shaped spans found inside the text
//!    (code fences, balanced brackets), tolerating small syntax slips.
//! 3. Field-level fallback: deterministic pattern rules per field.
//!
//! Partial results carry forward, so a fallback rule only fills fields the
//! structured passes could not. Enum fields are always mapped onto their
//! closed sets and timestamps are either fully parsed or absent.

pub mod dates;
pub mod fallback;
pub mod repair;
pub mod schema;

pub use dates::DateResolver;
pub use schema::{DraftRecord, SchemaSpec, StructuredRecord, TriageRecord, serialize};

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::NormalizationError;
use crate::pipeline::types::{ActionItem, Category, Priority};

/// Which pass produced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NormalizationPass {
    Direct,
    Repaired,
    Fallback,
}

/// Normalizer with an optional reference instant for relative dates.
#[derive(Debug, Clone, Copy, Default)]
pub struct Normalizer {
    dates: DateResolver,
}

impl Normalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve "Friday", "tomorrow" and friends relative to `at`.
    pub fn with_reference(at: DateTime<Utc>) -> Self {
        Self {
            dates: DateResolver::new(Some(at)),
        }
    }

    pub fn normalize(
        &self,
        raw_text: &str,
        schema: SchemaSpec,
    ) -> Result<StructuredRecord, NormalizationError> {
        self.normalize_traced(raw_text, schema).map(|(record, _)| record)
    }

    /// Like [`normalize`](Self::normalize), also reporting the deciding pass.
    pub fn normalize_traced(
        &self,
        raw_text: &str,
        schema: SchemaSpec,
    ) -> Result<(StructuredRecord, NormalizationPass), NormalizationError> {
        match schema {
            SchemaSpec::Triage => self.run::<TriageCandidate>(raw_text, schema),
            SchemaSpec::ReplyDraft => self.run::<DraftCandidate>(raw_text, schema),
            SchemaSpec::FollowUps => self.run::<FollowUpsCandidate>(raw_text, schema),
            SchemaSpec::Answer => self.run::<AnswerCandidate>(raw_text, schema),
        }
    }

    fn run<C: Candidate>(
        &self,
        raw_text: &str,
        schema: SchemaSpec,
    ) -> Result<(StructuredRecord, NormalizationPass), NormalizationError> {
        let dates = &self.dates;
        let mut best = C::default();

        if let Ok(value) = serde_json::from_str::<Value>(raw_text.trim()) {
            best.merge(C::from_value(&value, dates));
            if best.missing().is_empty() {
                return Ok((best.into_record(), NormalizationPass::Direct));
            }
        }

        for span in repair::candidate_spans(raw_text) {
            if let Some(value) = repair::parse_lenient(span) {
                best.merge(C::from_value(&value, dates));
                if best.missing().is_empty() {
                    debug!(schema = schema.name(), "Model output recovered by repair pass");
                    return Ok((best.into_record(), NormalizationPass::Repaired));
                }
            }
        }

        best.fill_from_text(raw_text, dates);
        let missing = best.missing();
        if missing.is_empty() {
            debug!(schema = schema.name(), "Model output recovered by field fallback");
            return Ok((best.into_record(), NormalizationPass::Fallback));
        }

        debug!(schema = schema.name(), ?missing, "Model output could not be normalized");
        Err(NormalizationError {
            schema: schema.name().to_string(),
            missing_fields: missing.into_iter().map(String::from).collect(),
        })
    }
}

/// Normalize without a reference instant.
pub fn normalize(raw_text: &str, schema: SchemaSpec) -> Result<StructuredRecord, NormalizationError> {
    Normalizer::new().normalize(raw_text, schema)
}

/// Partially resolved record for one schema.
trait Candidate: Default {
    /// Fields readable from a parsed structured value.
    fn from_value(value: &Value, dates: &DateResolver) -> Self;
    /// Fill still-missing fields from free text.
    fn fill_from_text(&mut self, text: &str, dates: &DateResolver);
    /// Take fields from `other` that are still missing here.
    fn merge(&mut self, other: Self);
    fn missing(&self) -> Vec<&'static str>;
    /// Only called once `missing()` is empty.
    fn into_record(self) -> StructuredRecord;
}

// ── Triage ──────────────────────────────────────────────────────────

#[derive(Default)]
struct TriageCandidate {
    category: Option<Category>,
    action_items: Option<Vec<ActionItem>>,
    deadline: Option<DateTime<Utc>>,
}

impl Candidate for TriageCandidate {
    fn from_value(value: &Value, dates: &DateResolver) -> Self {
        match value {
            Value::Object(map) => Self {
                category: field(map, &["category", "label", "classification"])
                    .and_then(Value::as_str)
                    .map(Category::from_label),
                action_items: field(map, &["action_items", "actions", "tasks", "todos"])
                    .and_then(|v| parse_items(v, dates)),
                deadline: field(map, &["deadline", "due", "due_date"])
                    .and_then(Value::as_str)
                    .and_then(|s| dates.parse(s)),
            },
            Value::Array(_) => Self {
                action_items: parse_items(value, dates),
                ..Self::default()
            },
            _ => Self::default(),
        }
    }

    fn fill_from_text(&mut self, text: &str, dates: &DateResolver) {
        if self.category.is_none() {
            self.category = fallback::category(text);
        }
        if self.action_items.is_none() {
            self.action_items = Some(fallback::action_items(text, dates));
        }
    }

    fn merge(&mut self, other: Self) {
        self.category = self.category.or(other.category);
        self.deadline = self.deadline.or(other.deadline);
        if self.action_items.is_none() {
            self.action_items = other.action_items;
        }
    }

    fn missing(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.category.is_none() {
            missing.push("category");
        }
        if self.action_items.is_none() {
            missing.push("action_items");
        }
        missing
    }

    fn into_record(self) -> StructuredRecord {
        StructuredRecord::Triage(TriageRecord {
            category: self.category.unwrap_or(Category::Other),
            action_items: self.action_items.unwrap_or_default(),
            deadline: self.deadline,
        })
    }
}

/// `null` is an empty list; any other non-array is not type-conformant.
fn parse_items(value: &Value, dates: &DateResolver) -> Option<Vec<ActionItem>> {
    match value {
        Value::Null => Some(Vec::new()),
        Value::Array(items) => Some(items.iter().filter_map(|v| parse_item(v, dates)).collect()),
        _ => None,
    }
}

fn parse_item(value: &Value, dates: &DateResolver) -> Option<ActionItem> {
    match value {
        Value::String(text) => fallback::describe_action(text, dates),
        Value::Object(map) => {
            let description = field(map, &["description", "task", "action", "title", "item"])
                .and_then(Value::as_str)
                .filter(|s| !s.trim().is_empty())?
                .to_string();
            let due = field(map, &["due", "deadline", "due_date", "by"])
                .and_then(Value::as_str)
                .and_then(|s| dates.parse(s));
            let priority = field(map, &["priority", "urgency"])
                .and_then(Value::as_str)
                .and_then(Priority::from_label)
                .unwrap_or_else(|| fallback::infer_priority(&description, due.is_some()));
            Some(ActionItem {
                description,
                due,
                priority,
            })
        }
        _ => None,
    }
}

// ── Reply draft ─────────────────────────────────────────────────────

#[derive(Default)]
struct DraftCandidate {
    subject: Option<String>,
    body: Option<String>,
    follow_ups: Option<Vec<String>>,
}

impl Candidate for DraftCandidate {
    fn from_value(value: &Value, _dates: &DateResolver) -> Self {
        let Value::Object(map) = value else {
            return Self::default();
        };
        Self {
            subject: non_blank(field(map, &["subject", "title"])),
            body: non_blank(field(map, &["body", "reply", "message", "content"])),
            follow_ups: field(map, &["follow_ups", "followups", "follow_up", "next_steps"])
                .and_then(string_list),
        }
    }

    fn fill_from_text(&mut self, text: &str, _dates: &DateResolver) {
        let fields = fallback::reply_fields(text);
        if self.subject.is_none() {
            self.subject = fields.subject;
        }
        if self.body.is_none() {
            self.body = fields.body;
        }
        if self.follow_ups.is_none() {
            self.follow_ups = Some(fields.follow_ups);
        }
    }

    fn merge(&mut self, other: Self) {
        if self.subject.is_none() {
            self.subject = other.subject;
        }
        if self.body.is_none() {
            self.body = other.body;
        }
        if self.follow_ups.is_none() {
            self.follow_ups = other.follow_ups;
        }
    }

    fn missing(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.subject.is_none() {
            missing.push("subject");
        }
        if self.body.is_none() {
            missing.push("body");
        }
        missing
    }

    fn into_record(self) -> StructuredRecord {
        StructuredRecord::ReplyDraft(DraftRecord {
            subject: self.subject.unwrap_or_default(),
            body: self.body.unwrap_or_default(),
            follow_ups: self.follow_ups.unwrap_or_default(),
        })
    }
}

// ── Follow-ups ──────────────────────────────────────────────────────

#[derive(Default)]
struct FollowUpsCandidate {
    items: Option<Vec<String>>,
}

impl Candidate for FollowUpsCandidate {
    fn from_value(value: &Value, _dates: &DateResolver) -> Self {
        let items = match value {
            Value::Object(map) => field(map, &["follow_ups", "followups", "suggestions", "next_steps"])
                .and_then(string_list),
            Value::Array(_) => string_list(value),
            _ => None,
        };
        Self { items }
    }

    fn fill_from_text(&mut self, text: &str, _dates: &DateResolver) {
        if self.items.is_none() {
            let items = fallback::follow_ups(text);
            self.items = (!items.is_empty()).then_some(items);
        }
    }

    fn merge(&mut self, other: Self) {
        if self.items.is_none() {
            self.items = other.items;
        }
    }

    fn missing(&self) -> Vec<&'static str> {
        if self.items.is_none() {
            vec!["follow_ups"]
        } else {
            Vec::new()
        }
    }

    fn into_record(self) -> StructuredRecord {
        StructuredRecord::FollowUps(self.items.unwrap_or_default())
    }
}

// ── Answer ──────────────────────────────────────────────────────────

#[derive(Default)]
struct AnswerCandidate {
    answer: Option<String>,
}

impl Candidate for AnswerCandidate {
    fn from_value(value: &Value, _dates: &DateResolver) -> Self {
        let answer = match value {
            Value::Object(map) => non_blank(field(map, &["answer", "response", "summary", "text"])),
            Value::String(_) => non_blank(Some(value)),
            _ => None,
        };
        Self { answer }
    }

    fn fill_from_text(&mut self, text: &str, _dates: &DateResolver) {
        if self.answer.is_none() {
            self.answer = fallback::answer(text);
        }
    }

    fn merge(&mut self, other: Self) {
        if self.answer.is_none() {
            self.answer = other.answer;
        }
    }

    fn missing(&self) -> Vec<&'static str> {
        if self.answer.is_none() {
            vec!["answer"]
        } else {
            Vec::new()
        }
    }

    fn into_record(self) -> StructuredRecord {
        StructuredRecord::Answer(self.answer.unwrap_or_default())
    }
}

// ── Value helpers ───────────────────────────────────────────────────

/// Look up the first of `keys`, matching case-insensitively and treating
/// spaces and dashes as underscores.
fn field<'a>(map: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|wanted| {
        map.iter()
            .find(|(key, _)| {
                let key = key.trim().to_ascii_lowercase().replace([' ', '-'], "_");
                key == *wanted
            })
            .map(|(_, v)| v)
    })
}

fn non_blank(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(String::from)
}

/// Array of strings kept verbatim; non-string entries are dropped, `null`
/// is empty.
fn string_list(value: &Value) -> Option<Vec<String>> {
    match value {
        Value::Null => Some(Vec::new()),
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect(),
        ),
        _ => None,
    }
}
