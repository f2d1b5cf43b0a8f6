//! LLM integration for inbox triage.
//!
//! - [`provider`]: the `LlmProvider` trait, one round trip per call
//! - [`openrouter`]: OpenAI-compatible chat completions over reqwest
//! - [`gateway`]: retry/backoff/timeout policy every caller goes through

pub mod gateway;
pub mod openrouter;
pub mod provider;

pub use gateway::{CompletionOptions, ModelGateway, RawCompletion, RetryPolicy};
pub use openrouter::OpenRouterProvider;
pub use provider::*;

use std::sync::Arc;

use crate::config::TriageConfig;
use crate::error::LlmError;

/// Create the configured provider.
pub fn create_provider(config: &TriageConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    let provider = OpenRouterProvider::new(
        config.base_url.clone(),
        config.api_key.clone(),
        config.model_id.clone(),
        config.timeout,
    )?;
    tracing::info!("Using OpenRouter (model: {})", config.model_id);
    Ok(Arc::new(provider))
}

/// Create a gateway around the configured provider.
pub fn create_gateway(config: &TriageConfig) -> Result<Arc<ModelGateway>, LlmError> {
    let provider = create_provider(config)?;
    Ok(Arc::new(ModelGateway::from_config(provider, config)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_provider_with_any_key_constructs() {
        // Credentials are only checked by the server on the first request.
        let config = TriageConfig::new(secrecy::SecretString::from("test-key"));
        let provider = create_provider(&config).unwrap();
        assert_eq!(provider.model_name(), crate::config::DEFAULT_MODEL);
    }

    #[test]
    fn gateway_inherits_config_defaults() {
        let mut config = TriageConfig::new(secrecy::SecretString::from("test-key"));
        config.max_retries = 5;
        let gateway = create_gateway(&config).unwrap();
        assert_eq!(gateway.retry_policy().max_attempts, 5);
        assert_eq!(gateway.defaults().max_tokens, 300);
    }
}
