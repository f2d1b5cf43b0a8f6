//! Field-level fallback extraction when no structured payload survives.
//!
//! Each rule fills one field from free text with deterministic patterns.
//! Rules never invent values: a field they cannot find stays absent.

use std::sync::LazyLock;

use regex::Regex;

use super::dates::DateResolver;
use crate::pipeline::types::{ActionItem, Category, Priority};

static LABELED_CATEGORY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?im)^[\s*#>-]*category\**\s*[:=-]\s*\**\s*"?([A-Za-z][A-Za-z /-]*)"#).unwrap()
});

static CATEGORY_VOCABULARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(urgent|important|critical|reminder|to-?do|action required|informational|information|fyi|newsletter)\b",
    )
    .unwrap()
});

static BULLET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*(?:[-*\u{2022}]|\d+[.)])\s+(.+?)\s*$").unwrap());

static REQUEST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:please|kindly|can you|could you|would you|need you to|remember to|don't forget to|do not forget to|make sure to|be sure to)\s+([^.!?\n]+)",
    )
    .unwrap()
});

static ITEM_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(?:task|action(?: item)?|todo|to-do)\s*\d*\s*:\s*").unwrap());

static NO_ITEMS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(?:none|n/a|no action|nothing)\b").unwrap());

static TRAILING_CONNECTOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:[\s,;:-]+(?:by|before|on|until|till|due|no later than|latest))+[\s,;:-]*$")
        .unwrap()
});

static URGENT_WORDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(urgent|asap|immediately|critical|high priority|today|eod|end of (?:the )?day)\b")
        .unwrap()
});

static RELAXED_WORDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(no rush|whenever|when you get a chance|low priority|if you have time)\b").unwrap()
});

static SUBJECT_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)^[\s*#>]*subject\**\s*:\s*\**\s*(.+?)\s*$").unwrap());

static BODY_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)^[\s*#>]*body\**\s*:\**[ \t]*").unwrap());

static FOLLOW_UP_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^[\s*#>]*(?:suggested\s+)?follow[- ]?ups?(?:\s+actions)?\**\s*:\**").unwrap()
});

static ANSWER_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*(?:answer|summary|response)\s*:\s*").unwrap());

const MAX_FALLBACK_LINES: usize = 10;

/// Category from an explicit `Category:` label, else the first known
/// category word in the text.
pub fn category(text: &str) -> Option<Category> {
    if let Some(caps) = LABELED_CATEGORY.captures(text) {
        return Some(Category::from_label(&caps[1]));
    }
    CATEGORY_VOCABULARY
        .captures(text)
        .map(|caps| Category::from_label(&caps[1]))
}

/// Action items from bullet lines, else from request sentences.
pub fn action_items(text: &str, dates: &DateResolver) -> Vec<ActionItem> {
    let bullets: Vec<String> = bullet_lines(text)
        .into_iter()
        .filter(|line| !LABELED_CATEGORY.is_match(line))
        .collect();

    let phrases: Vec<String> = if bullets.is_empty() {
        REQUEST
            .captures_iter(text)
            .map(|caps| caps[1].to_string())
            .collect()
    } else {
        bullets
            .into_iter()
            .map(|line| {
                let line = ITEM_LABEL.replace(&line, "").into_owned();
                match REQUEST.captures(&line) {
                    Some(caps) => caps[1].to_string(),
                    None => line,
                }
            })
            .collect()
    };

    let mut items: Vec<ActionItem> = Vec::new();
    for phrase in phrases {
        if NO_ITEMS.is_match(phrase.trim()) {
            continue;
        }
        if let Some(item) = describe_action(&phrase, dates)
            && !items
                .iter()
                .any(|i| i.description.eq_ignore_ascii_case(&item.description))
        {
            items.push(item);
        }
    }
    items
}

/// Turn a request phrase into an action item: the deadline phrase becomes
/// `due` and is cut from the description.
pub fn describe_action(phrase: &str, dates: &DateResolver) -> Option<ActionItem> {
    let phrase = phrase.trim().trim_matches(|c: char| {
        matches!(c, '"' | '\'' | ',' | ';' | ':' | '{' | '}' | '[' | ']') || c.is_whitespace()
    });
    let found = dates.scan(phrase);

    let description = match &found {
        Some(m) if m.span.start > 0 => &phrase[..m.span.start],
        Some(m) => &phrase[m.span.end..],
        None => phrase,
    };
    let description = TRAILING_CONNECTOR.replace(description.trim(), "");
    let description = capitalize(description.trim().trim_end_matches([',', ';', ':', '-']));
    if description.is_empty() {
        return None;
    }

    let due = found.map(|m| m.at);
    Some(ActionItem {
        description,
        due,
        priority: infer_priority(phrase, due.is_some()),
    })
}

/// High for urgent wording or a concrete due date, Low for explicitly
/// relaxed wording, Medium otherwise.
pub fn infer_priority(text: &str, has_due: bool) -> Priority {
    if URGENT_WORDS.is_match(text) || has_due {
        Priority::High
    } else if RELAXED_WORDS.is_match(text) {
        Priority::Low
    } else {
        Priority::Medium
    }
}

/// Text of every bullet or numbered line.
pub fn bullet_lines(text: &str) -> Vec<String> {
    BULLET
        .captures_iter(text)
        .map(|caps| caps[1].trim().to_string())
        .filter(|line| !line.is_empty())
        .collect()
}

/// Reply fields from a `Subject:` / `Body:` / `Follow-ups:` layout.
#[derive(Debug, Default, PartialEq)]
pub struct ReplyFields {
    pub subject: Option<String>,
    pub body: Option<String>,
    pub follow_ups: Vec<String>,
}

pub fn reply_fields(text: &str) -> ReplyFields {
    let subject_caps = SUBJECT_LINE.captures(text);
    let subject = subject_caps
        .as_ref()
        .map(|c| c[1].trim().trim_matches('"').to_string())
        .filter(|s| !s.is_empty());

    let follow_marker = FOLLOW_UP_MARKER.find(text);
    let body_end = follow_marker.map_or(text.len(), |m| m.start());

    let body_start = match BODY_MARKER.find(text) {
        Some(m) => Some(m.end()),
        None => subject_caps.as_ref().and_then(|c| c.get(0)).map(|m| m.end()),
    };
    let body = match body_start {
        Some(start) if start <= body_end => Some(text[start..body_end].trim().to_string()),
        Some(start) => Some(text[start..].trim().to_string()),
        None => Some(text[..body_end].trim().to_string()),
    }
    .filter(|b| !b.is_empty());

    let follow_ups = follow_marker
        .map(|m| bullet_lines(&text[m.end()..]))
        .unwrap_or_default();

    ReplyFields {
        subject,
        body,
        follow_ups,
    }
}

/// Follow-up suggestions: bullet lines, else plain non-heading lines.
pub fn follow_ups(text: &str) -> Vec<String> {
    let bullets = bullet_lines(text);
    if !bullets.is_empty() {
        return bullets.into_iter().take(MAX_FALLBACK_LINES).collect();
    }
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.ends_with(':'))
        .take(MAX_FALLBACK_LINES)
        .map(String::from)
        .collect()
}

/// Free-text answer with any `Answer:` label and wrapping quotes removed.
pub fn answer(text: &str) -> Option<String> {
    let stripped = ANSWER_LABEL.replace(text.trim(), "");
    let answer = stripped.trim().trim_matches('"').trim();
    (!answer.is_empty()).then(|| answer.to_string())
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
