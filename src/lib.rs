//! Inbox triage: classify emails, extract action items and draft replies
//! with an LLM whose output is normalized into strict records.

pub mod config;
pub mod error;
pub mod llm;
pub mod normalizer;
pub mod pipeline;
pub mod prompts;
pub mod store;
