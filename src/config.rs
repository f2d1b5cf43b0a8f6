//! Configuration types.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// OpenRouter chat-completions endpoint.
pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Small, fast model used when nothing else is configured.
pub const DEFAULT_MODEL: &str = "meta-llama/llama-3.2-3b-instruct";

/// Triage configuration.
///
/// Loaded once at startup and shared read-only afterwards.
#[derive(Debug, Clone)]
pub struct TriageConfig {
    /// API credential for the completion endpoint.
    pub api_key: SecretString,
    /// Chat-completions URL.
    pub base_url: String,
    /// Default model id.
    pub model_id: String,
    /// Sampling temperature in [0, 1].
    pub temperature: f32,
    /// Max tokens per completion.
    pub max_tokens: u32,
    /// Per-attempt request timeout.
    pub timeout: Duration,
    /// Gateway attempts for transient failures.
    pub max_retries: u32,
    /// First backoff delay; doubles on each retry.
    pub backoff_base: Duration,
    /// Cap for the backoff delay.
    pub backoff_max: Duration,
    /// Full prompt → model → normalize cycles per email.
    pub process_attempts: u32,
    /// Emails processed concurrently in a batch.
    pub max_workers: usize,
    /// Optional JSON file with prompt overrides.
    pub prompts_path: Option<PathBuf>,
}

impl TriageConfig {
    /// Configuration with defaults and the given credential.
    pub fn new(api_key: SecretString) -> Self {
        Self {
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            model_id: DEFAULT_MODEL.to_string(),
            temperature: 0.2,
            max_tokens: 300,
            timeout: Duration::from_secs(20),
            max_retries: 3,
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(30),
            process_attempts: 2,
            max_workers: 5,
            prompts_path: None,
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key = std::env::var("OPENROUTER_API_KEY")
            .map_err(|_| ConfigError::MissingEnvVar("OPENROUTER_API_KEY".to_string()))?;

        let mut config = Self::new(SecretString::from(api_key));

        if let Ok(url) = std::env::var("TRIAGE_BASE_URL") {
            config.base_url = url;
        }
        if let Ok(model) = std::env::var("TRIAGE_MODEL") {
            config.model_id = model;
        }
        if let Some(t) = env_parse::<f32>("TRIAGE_TEMPERATURE")? {
            config.temperature = t;
        }
        if let Some(n) = env_parse::<u32>("TRIAGE_MAX_TOKENS")? {
            config.max_tokens = n;
        }
        if let Some(secs) = env_parse::<u64>("TRIAGE_TIMEOUT_SECS")? {
            config.timeout = Duration::from_secs(secs);
        }
        if let Some(n) = env_parse::<u32>("TRIAGE_MAX_RETRIES")? {
            config.max_retries = n;
        }
        if let Some(ms) = env_parse::<u64>("TRIAGE_BACKOFF_BASE_MS")? {
            config.backoff_base = Duration::from_millis(ms);
        }
        if let Some(n) = env_parse::<u32>("TRIAGE_PROCESS_ATTEMPTS")? {
            config.process_attempts = n;
        }
        if let Some(n) = env_parse::<usize>("TRIAGE_MAX_WORKERS")? {
            config.max_workers = n;
        }
        config.prompts_path = std::env::var("TRIAGE_PROMPTS_PATH").ok().map(PathBuf::from);

        config.validate()?;
        Ok(config)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.temperature) {
            return Err(invalid("temperature", "must be within [0, 1]"));
        }
        if self.max_tokens == 0 {
            return Err(invalid("max_tokens", "must be positive"));
        }
        if self.timeout.is_zero() {
            return Err(invalid("timeout", "must be positive"));
        }
        if self.max_retries == 0 {
            return Err(invalid("max_retries", "must allow at least one attempt"));
        }
        if self.process_attempts == 0 {
            return Err(invalid("process_attempts", "must allow at least one attempt"));
        }
        if self.max_workers == 0 {
            return Err(invalid("max_workers", "must be positive"));
        }
        Ok(())
    }
}

fn invalid(key: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}

fn env_parse<T>(key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("{raw:?}: {e}"),
            }),
        Err(_) => Ok(None),
    }
}
