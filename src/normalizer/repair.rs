//! Repair pass: recover a parseable payload from text around it.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

static CODE_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\n?(.*?)```").unwrap());

static TRAILING_COMMA: LazyLock<Regex> = LazyLock::new(|| Regex::new(r",(\s*[}\]])").unwrap());

/// Openers tried per bracket kind before giving up.
const MAX_SPAN_STARTS: usize = 8;

/// Substrings of `text` that may hold the structured payload, best first:
/// fenced code blocks, then balanced `{...}` spans, then balanced `[...]` spans.
pub fn candidate_spans(text: &str) -> Vec<&str> {
    let mut spans: Vec<&str> = CODE_FENCE
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().trim())
        .filter(|s| !s.is_empty())
        .collect();

    for (open, close) in [('{', '}'), ('[', ']')] {
        let starts = text
            .char_indices()
            .filter(|(_, c)| *c == open)
            .map(|(i, _)| i)
            .take(MAX_SPAN_STARTS);
        for start in starts {
            if let Some(span) = balanced_span(text, start, open, close)
                && !spans.contains(&span)
            {
                spans.push(span);
                break;
            }
        }
    }

    spans
}

/// The balanced span opening at byte `start`, skipping brackets inside strings.
pub fn balanced_span(text: &str, start: usize, open: char, close: char) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text.get(start..)?.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            c if c == open => depth += 1,
            c if c == close => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    let end = start + offset + c.len_utf8();
                    return Some(&text[start..end]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse a candidate span, tolerating common model slips.
pub fn parse_lenient(span: &str) -> Option<Value> {
    if let Ok(v) = serde_json::from_str(span) {
        return Some(v);
    }

    let mut fixed = TRAILING_COMMA.replace_all(span, "$1").into_owned();
    if let Ok(v) = serde_json::from_str(&fixed) {
        return Some(v);
    }

    fixed = fixed.replace(['\u{201c}', '\u{201d}'], "\"");
    serde_json::from_str(&fixed).ok()
}
