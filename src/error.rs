//! Error types for inbox triage.

use std::time::Duration;

/// Top-level error type for the triage pipeline.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Prompt error: {0}")]
    Prompt(#[from] PromptError),

    #[error("Normalization error: {0}")]
    Normalization(#[from] NormalizationError),

    #[error("Processing error: {0}")]
    Processing(#[from] ProcessingError),

    #[error("Draft error: {0}")]
    Draft(#[from] DraftError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Model gateway errors.
///
/// `AuthFailed` and `ModelUnavailable` are the two outcomes callers see from
/// the gateway. The remaining variants describe a single failed attempt and
/// are what providers return; the gateway decides whether to retry them.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Model {model} unavailable after {attempts} attempt(s): {reason}")]
    ModelUnavailable {
        model: String,
        attempts: u32,
        reason: String,
    },

    #[error("Provider {provider} timed out after {timeout:?}")]
    Timeout { provider: String, timeout: Duration },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Provider {provider} returned server error {status}")]
    ServerError { provider: String, status: u16 },

    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LlmError {
    /// Whether a retry of the same request could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::RateLimited { .. } | Self::ServerError { .. }
        )
    }

    /// Server-requested delay before the next attempt, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Prompt library errors. Both indicate a programming or config defect.
#[derive(Debug, thiserror::Error)]
pub enum PromptError {
    #[error("Unknown prompt task: {task_key}")]
    UnknownTask { task_key: String },

    #[error("Template {task_key} requires variable {variable}")]
    MissingVariable { task_key: String, variable: String },

    #[error("Invalid prompt overrides: {0}")]
    InvalidOverrides(String),
}

/// The model output could not be turned into the requested record.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{schema} output missing fields: {}", missing_fields.join(", "))]
pub struct NormalizationError {
    pub schema: String,
    pub missing_fields: Vec<String>,
}

/// Reason code attached to a failed email.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    Authentication,
    ModelUnavailable,
    Normalization,
    Configuration,
}

impl FailureReason {
    /// Classify a gateway error.
    pub fn from_llm(err: &LlmError) -> Self {
        match err {
            LlmError::AuthFailed { .. } => Self::Authentication,
            _ => Self::ModelUnavailable,
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Authentication => "authentication",
            Self::ModelUnavailable => "model_unavailable",
            Self::Normalization => "normalization",
            Self::Configuration => "configuration",
        };
        write!(f, "{s}")
    }
}

/// Terminal per-email processing errors.
#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    #[error("Processing email {email_id} failed ({reason}): {detail}")]
    Failed {
        email_id: String,
        reason: FailureReason,
        detail: String,
    },
}

impl ProcessingError {
    pub fn email_id(&self) -> &str {
        match self {
            Self::Failed { email_id, .. } => email_id,
        }
    }

    pub fn reason(&self) -> FailureReason {
        match self {
            Self::Failed { reason, .. } => *reason,
        }
    }
}

/// Reply drafting and Q&A errors.
#[derive(Debug, thiserror::Error)]
pub enum DraftError {
    #[error("Draft generation for email {email_id} failed ({reason}): {detail}")]
    Generation {
        email_id: String,
        reason: FailureReason,
        detail: String,
    },

    #[error("Answering question about email {email_id} failed ({reason}): {detail}")]
    Answer {
        email_id: String,
        reason: FailureReason,
        detail: String,
    },
}

/// Snapshot persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;
