//! Email triage pipeline.
//!
//! Every email flows through:
//! 1. `PromptLibrary`: task template rendered with the email's fields
//! 2. `ModelGateway::complete()`: one model round trip, retried on transient failures
//! 3. `Normalizer::normalize()`: untrusted text into a validated record
//! 4. `TriageStore`: the record is written once, only on success
//!
//! `EmailProcessor` drives triage; `Assistant` reuses the same path for
//! answers, summaries and reply drafts.

pub mod assistant;
pub mod processor;
pub mod types;

pub use assistant::Assistant;
pub use processor::EmailProcessor;
pub use types::{
    ActionItem, Category, Email, Priority, ProcessedEmail, ProcessingState, ReplyDraft, Tone,
};
