//! Aggregations over triaged emails: counts, frequency, timeline, keywords
//! and rule-based priority scores.

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use serde::Serialize;

use super::TriageStore;
use crate::pipeline::types::{Category, Email, Priority, ProcessedEmail};

/// Words too common to be interesting in keyword counts.
const STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "you", "your", "this", "that", "are", "our", "has", "have",
    "will", "from", "all", "but", "can", "was", "were", "they", "their", "them", "about",
    "please", "kindly", "hello", "hi", "thanks", "thank", "team", "dear", "regards", "best",
    "here", "link", "click", "http", "https", "com", "subject", "body",
];

const URGENT_KEYWORDS: &[&str] = &["urgent", "asap", "immediately", "critical", "high priority"];
const DEADLINE_KEYWORDS: &[&str] = &["deadline", "by ", "before ", "due ", "last date", "submit"];
const MEETING_KEYWORDS: &[&str] = &["meeting", "call", "discussion", "review", "planning"];

const HIGH_THRESHOLD: i32 = 7;
const MEDIUM_THRESHOLD: i32 = 4;

/// Score and label for one email.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PriorityScore {
    pub score: i32,
    pub label: Priority,
}

/// Rule-based priority from category, wording and number of action items.
pub fn priority_score(email: &Email, processed: Option<&ProcessedEmail>) -> PriorityScore {
    let mut score = 0;
    match processed.map(|p| p.category) {
        Some(Category::Urgent | Category::ToDo) => score += 3,
        Some(Category::Information) => score -= 1,
        _ => {}
    }

    let text = format!("{} {}", email.subject, email.body).to_lowercase();
    let mentions = |words: &[&str]| words.iter().any(|w| text.contains(w));
    if mentions(URGENT_KEYWORDS) {
        score += 3;
    }
    if mentions(DEADLINE_KEYWORDS) {
        score += 2;
    }
    if mentions(MEETING_KEYWORDS) {
        score += 1;
    }

    let actions = processed.map_or(0, |p| p.action_items.len());
    score += actions.min(3) as i32;

    let label = if score >= HIGH_THRESHOLD {
        Priority::High
    } else if score >= MEDIUM_THRESHOLD {
        Priority::Medium
    } else {
        Priority::Low
    };
    PriorityScore { score, label }
}

/// Count per category, every category included.
pub fn category_counts(processed: &[ProcessedEmail]) -> Vec<(Category, usize)> {
    Category::ALL
        .iter()
        .map(|c| (*c, processed.iter().filter(|p| p.category == *c).count()))
        .collect()
}

/// Emails per sender, most frequent first.
pub fn sender_frequency(emails: &[Email]) -> Vec<(String, usize)> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for email in emails {
        *counts.entry(email.sender.as_str()).or_default() += 1;
    }
    let mut freq: Vec<(String, usize)> = counts.into_iter().map(|(s, n)| (s.to_string(), n)).collect();
    freq.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    freq
}

/// Emails received per UTC day, oldest first.
pub fn timeline(emails: &[Email]) -> Vec<(NaiveDate, usize)> {
    let mut days: BTreeMap<NaiveDate, usize> = BTreeMap::new();
    for email in emails {
        *days.entry(email.received_at.date_naive()).or_default() += 1;
    }
    days.into_iter().collect()
}

/// Most frequent subject and body words, ties in order of first use.
pub fn keyword_counts(emails: &[Email], top_n: usize) -> Vec<(String, usize)> {
    let mut order: Vec<String> = Vec::new();
    let mut counts: HashMap<String, usize> = HashMap::new();

    for email in emails {
        let text = format!("{} {}", email.subject, email.body).to_lowercase();
        for raw in text.split_whitespace() {
            let token = raw.trim_matches(|c: char| ".,!?:;()[]\"'".contains(c));
            if token.chars().count() <= 2 || STOPWORDS.contains(&token) {
                continue;
            }
            let count = counts.entry(token.to_string()).or_insert_with(|| {
                order.push(token.to_string());
                0
            });
            *count += 1;
        }
    }

    let mut ranked: Vec<(String, usize)> = order
        .into_iter()
        .map(|word| {
            let n = counts.get(&word).copied().unwrap_or_default();
            (word, n)
        })
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1));
    ranked.truncate(top_n);
    ranked
}

/// Everything a dashboard needs in one read.
#[derive(Debug, Clone, Serialize)]
pub struct Insights {
    pub total_emails: usize,
    pub processed: usize,
    pub category_counts: Vec<(Category, usize)>,
    pub sender_frequency: Vec<(String, usize)>,
    pub timeline: Vec<(NaiveDate, usize)>,
    pub keywords: Vec<(String, usize)>,
    /// Per email id, in ingestion order.
    pub priorities: Vec<(String, PriorityScore)>,
}

impl TriageStore {
    pub async fn insights(&self, top_keywords: usize) -> Insights {
        let emails = self.emails().await;
        let processed = self.list_processed().await;
        let by_id: HashMap<&str, &ProcessedEmail> =
            processed.iter().map(|p| (p.email_id.as_str(), p)).collect();

        let priorities = emails
            .iter()
            .map(|e| {
                let score = priority_score(e, by_id.get(e.id.as_str()).copied());
                (e.id.clone(), score)
            })
            .collect();

        Insights {
            total_emails: emails.len(),
            processed: processed.len(),
            category_counts: category_counts(&processed),
            sender_frequency: sender_frequency(&emails),
            timeline: timeline(&emails),
            keywords: keyword_counts(&emails, top_keywords),
            priorities,
        }
    }
}
