//! Prompt library: task-keyed templates with `{{name}}` placeholders.
//!
//! Built-in templates are compiled in; a JSON file of `task_key → text`
//! overrides can replace any of them at startup. The library is read-only
//! once built.

use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use tracing::info;

use crate::config::TriageConfig;
use crate::error::PromptError;
use crate::normalizer::SchemaSpec;
use crate::pipeline::types::Email;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").unwrap());

pub const CATEGORIZE: &str = "categorize";
pub const EXTRACT_ACTIONS: &str = "extract_actions";
pub const TRIAGE: &str = "triage";
pub const SUMMARIZE: &str = "summarize";
pub const DRAFT_REPLY: &str = "draft_reply";
pub const FOLLOW_UP: &str = "follow_up";
pub const ANSWER: &str = "answer";

/// Variables bound into a template.
pub type PromptVars = HashMap<&'static str, String>;

#[derive(Debug, Clone, PartialEq)]
pub struct PromptTemplate {
    pub task_key: String,
    pub template_text: String,
    pub expected_schema: SchemaSpec,
}

impl PromptTemplate {
    fn builtin(task_key: &str, expected_schema: SchemaSpec, template_text: &str) -> Self {
        Self {
            task_key: task_key.to_string(),
            template_text: template_text.to_string(),
            expected_schema,
        }
    }

    /// Placeholder names in order of first appearance.
    pub fn placeholders(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for caps in PLACEHOLDER.captures_iter(&self.template_text) {
            if let Some(name) = caps.get(1).map(|m| m.as_str())
                && !names.contains(&name)
            {
                names.push(name);
            }
        }
        names
    }
}

/// All prompt templates, keyed by task.
#[derive(Debug, Clone)]
pub struct PromptLibrary {
    templates: HashMap<String, PromptTemplate>,
}

impl Default for PromptLibrary {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptLibrary {
    /// Library holding only the built-in templates.
    pub fn new() -> Self {
        let templates = builtin_templates()
            .into_iter()
            .map(|t| (t.task_key.clone(), t))
            .collect();
        Self { templates }
    }

    /// Built-ins plus the overrides file named in the config, if any.
    pub fn from_config(config: &TriageConfig) -> Result<Self, PromptError> {
        match &config.prompts_path {
            Some(path) => Self::new().load_overrides(path),
            None => Ok(Self::new()),
        }
    }

    pub fn get_template(&self, task_key: &str) -> Result<&PromptTemplate, PromptError> {
        self.templates
            .get(task_key)
            .ok_or_else(|| PromptError::UnknownTask {
                task_key: task_key.to_string(),
            })
    }

    pub fn task_keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.templates.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    /// Replace template texts. Keys must name existing tasks; the expected
    /// schema of a task never changes.
    pub fn with_overrides(mut self, overrides: HashMap<String, String>) -> Result<Self, PromptError> {
        for (task_key, text) in overrides {
            let Some(template) = self.templates.get_mut(&task_key) else {
                return Err(PromptError::InvalidOverrides(format!(
                    "unknown task key '{task_key}'"
                )));
            };
            if text.trim().is_empty() {
                return Err(PromptError::InvalidOverrides(format!(
                    "template for '{task_key}' is empty"
                )));
            }
            template.template_text = text;
        }
        Ok(self)
    }

    /// Apply overrides from a JSON object file (`{"triage": "...", ...}`).
    pub fn load_overrides(self, path: &Path) -> Result<Self, PromptError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            PromptError::InvalidOverrides(format!("cannot read {}: {e}", path.display()))
        })?;
        let overrides: HashMap<String, String> = serde_json::from_str(&raw).map_err(|e| {
            PromptError::InvalidOverrides(format!("{} is not a JSON object of strings: {e}", path.display()))
        })?;
        info!(path = %path.display(), count = overrides.len(), "Loaded prompt overrides");
        self.with_overrides(overrides)
    }
}

/// Substitute every `{{name}}` placeholder.
pub fn render(template: &PromptTemplate, vars: &PromptVars) -> Result<String, PromptError> {
    if let Some(missing) = template
        .placeholders()
        .into_iter()
        .find(|name| !vars.contains_key(*name))
    {
        return Err(PromptError::MissingVariable {
            task_key: template.task_key.clone(),
            variable: missing.to_string(),
        });
    }

    let rendered = PLACEHOLDER.replace_all(&template.template_text, |caps: &Captures<'_>| {
        vars.get(&caps[1]).cloned().unwrap_or_default()
    });
    Ok(rendered.into_owned())
}

/// [`render`] plus an instruction demanding nothing but the expected
/// payload; used after a response could not be normalized.
pub fn render_strict(template: &PromptTemplate, vars: &PromptVars) -> Result<String, PromptError> {
    let mut prompt = render(template, vars)?;
    prompt.push_str("\n\nIMPORTANT: your previous reply could not be parsed. ");
    prompt.push_str("Reply with ONLY a single JSON object of exactly this shape, ");
    prompt.push_str("with no markdown fences and no text before or after it:\n");
    prompt.push_str(schema_shape(template.expected_schema));
    Ok(prompt)
}

/// Standard variables for an email: sender, subject, body, received_at.
pub fn email_vars(email: &Email) -> PromptVars {
    HashMap::from([
        ("sender", email.sender.clone()),
        ("subject", email.subject.clone()),
        ("body", email.body.clone()),
        ("received_at", email.received_at.format("%A, %Y-%m-%d %H:%M UTC").to_string()),
    ])
}

fn schema_shape(schema: SchemaSpec) -> &'static str {
    match schema {
        SchemaSpec::Triage => {
            r#"{"category": "Urgent|Reminder|ToDo|Information|Other", "action_items": [{"description": "...", "due": "YYYY-MM-DD or null", "priority": "High|Medium|Low"}], "deadline": "YYYY-MM-DD or null"}"#
        }
        SchemaSpec::ReplyDraft => r#"{"subject": "...", "body": "...", "follow_ups": ["..."]}"#,
        SchemaSpec::FollowUps => r#"{"follow_ups": ["..."]}"#,
        SchemaSpec::Answer => r#"{"answer": "..."}"#,
    }
}

fn builtin_templates() -> Vec<PromptTemplate> {
    vec![
        PromptTemplate::builtin(
            CATEGORIZE,
            SchemaSpec::Triage,
            "You are an email categorization assistant. Categorize this email into exactly one of: \
             Urgent, Reminder, ToDo, Information, Other. ToDo emails must contain a direct request \
             requiring the reader's action.\n\
             Respond in JSON: {\"category\": \"...\", \"action_items\": []}\n\n\
             From: {{sender}}\nSubject: {{subject}}\n\n{{body}}",
        ),
        PromptTemplate::builtin(
            EXTRACT_ACTIONS,
            SchemaSpec::Triage,
            "Extract all action items and deadlines from this email, received {{received_at}}. \
             Respond in JSON: {\"category\": \"...\", \"action_items\": [{\"description\": \"...\", \
             \"due\": \"YYYY-MM-DD\", \"priority\": \"High|Medium|Low\"}]}. \
             If an item has no explicit deadline, set \"due\": null.\n\n\
             Subject: {{subject}}\n\n{{body}}",
        ),
        PromptTemplate::builtin(
            TRIAGE,
            SchemaSpec::Triage,
            "You triage emails. For the email below:\n\
             1. Pick one category: Urgent, Reminder, ToDo, Information, Other.\n\
             2. List every action the reader must take as a short imperative description, \
             with its due date if one is given and a priority (High, Medium or Low).\n\
             3. Give the overall deadline, if any.\n\
             Relative dates like \"Friday\" are relative to {{received_at}}.\n\
             Respond with ONLY a JSON object:\n\
             {\"category\": \"...\", \"action_items\": [{\"description\": \"...\", \"due\": \"YYYY-MM-DD or null\", \
             \"priority\": \"...\"}], \"deadline\": \"YYYY-MM-DD or null\"}\n\n\
             From: {{sender}}\nSubject: {{subject}}\n\n{{body}}",
        ),
        PromptTemplate::builtin(
            SUMMARIZE,
            SchemaSpec::Answer,
            "Summarize this email in one or two sentences for a busy reader.\n\
             Respond in JSON: {\"answer\": \"...\"}\n\n\
             From: {{sender}}\nSubject: {{subject}}\n\n{{body}}",
        ),
        PromptTemplate::builtin(
            DRAFT_REPLY,
            SchemaSpec::ReplyDraft,
            "You write replies to emails. Draft a reply to the email below in a {{tone}} tone. \
             If it is a meeting request, ask for an agenda and confirm the time. \
             Also suggest up to three follow-up actions for the reader.\n\
             Respond in JSON: {\"subject\": \"...\", \"body\": \"...\", \"follow_ups\": [\"...\"]}\n\n\
             From: {{sender}}\nSubject: {{subject}}\n\n{{body}}",
        ),
        PromptTemplate::builtin(
            FOLLOW_UP,
            SchemaSpec::FollowUps,
            "Suggest up to three concrete follow-up actions the reader should take after this email.\n\
             Respond in JSON: {\"follow_ups\": [\"...\"]}\n\n\
             From: {{sender}}\nSubject: {{subject}}\n\n{{body}}",
        ),
        PromptTemplate::builtin(
            ANSWER,
            SchemaSpec::Answer,
            "Answer the question using only the email below. If the email does not say, answer \
             that it does not say.\n\
             Question: {{question}}\n\
             Respond in JSON: {\"answer\": \"...\"}\n\n\
             From: {{sender}}\nSubject: {{subject}}\nReceived: {{received_at}}\n\n{{body}}",
        ),
    ]
}
