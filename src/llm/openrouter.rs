//! OpenRouter (OpenAI-compatible chat completions) provider over reqwest.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue, RETRY_AFTER};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use tracing::debug;

use crate::error::LlmError;
use crate::llm::provider::{CompletionRequest, CompletionResponse, FinishReason, LlmProvider};

const PROVIDER: &str = "openrouter";

/// Provider speaking the OpenAI chat-completions wire format.
pub struct OpenRouterProvider {
    http: reqwest::Client,
    url: String,
    api_key: SecretString,
    model: String,
    timeout: Duration,
}

impl OpenRouterProvider {
    pub fn new(
        url: impl Into<String>,
        api_key: SecretString,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::RequestFailed {
                provider: PROVIDER.to_string(),
                reason: format!("Failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            http,
            url: url.into(),
            api_key,
            model: model.into(),
            timeout,
        })
    }

    fn headers(&self) -> Result<HeaderMap, LlmError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let mut bearer = HeaderValue::from_str(&format!("Bearer {}", self.api_key.expose_secret()))
            .map_err(|_| LlmError::AuthFailed {
                provider: PROVIDER.to_string(),
            })?;
        bearer.set_sensitive(true);
        headers.insert(AUTHORIZATION, bearer);
        Ok(headers)
    }

    fn build_body(&self, request: &CompletionRequest) -> Value {
        let mut body = json!({
            "model": request.model.as_deref().unwrap_or(&self.model),
            "messages": request.messages,
        });
        if let Some(t) = request.temperature {
            body["temperature"] = json!(t);
        }
        if let Some(n) = request.max_tokens {
            body["max_tokens"] = json!(n);
        }
        body
    }
}

#[async_trait]
impl LlmProvider for OpenRouterProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn cost_per_token(&self) -> (Decimal, Decimal) {
        // Pricing varies per routed model; free-tier models are the default.
        (Decimal::ZERO, Decimal::ZERO)
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let body = self.build_body(&request);
        let resp = self
            .http
            .post(&self.url)
            .headers(self.headers()?)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout {
                        provider: PROVIDER.to_string(),
                        timeout: self.timeout,
                    }
                } else {
                    LlmError::RequestFailed {
                        provider: PROVIDER.to_string(),
                        reason: e.to_string(),
                    }
                }
            })?;

        let status = resp.status();
        let retry_after = resp
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let text = resp.text().await.map_err(|e| LlmError::RequestFailed {
            provider: PROVIDER.to_string(),
            reason: format!("failed to read response body: {e}"),
        })?;

        if let Some(err) = classify_status(status, retry_after, &text) {
            return Err(err);
        }

        let v: Value = serde_json::from_str(&text).map_err(|e| LlmError::InvalidResponse {
            provider: PROVIDER.to_string(),
            reason: format!("invalid JSON response: {e}"),
        })?;
        parse_chat_response(&v)
    }
}

/// Map a non-success HTTP status to the matching attempt error.
fn classify_status(status: StatusCode, retry_after: Option<Duration>, body: &str) -> Option<LlmError> {
    if status.is_success() {
        return None;
    }
    let provider = PROVIDER.to_string();
    let err = match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => LlmError::AuthFailed { provider },
        StatusCode::TOO_MANY_REQUESTS => LlmError::RateLimited {
            provider,
            retry_after,
        },
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => LlmError::ServerError {
            provider,
            status: status.as_u16(),
        },
        s if s.is_server_error() => LlmError::ServerError {
            provider,
            status: s.as_u16(),
        },
        s => {
            let preview: String = body.chars().take(200).collect();
            LlmError::RequestFailed {
                provider,
                reason: format!("API returned {s}: {preview}"),
            }
        }
    };
    Some(err)
}

/// Parse an OpenAI-style chat-completions response body.
fn parse_chat_response(v: &Value) -> Result<CompletionResponse, LlmError> {
    let choice = &v["choices"][0];
    let content = choice["message"]["content"]
        .as_str()
        .ok_or_else(|| LlmError::InvalidResponse {
            provider: PROVIDER.to_string(),
            reason: "missing `choices[0].message.content` in response".into(),
        })?;

    let usage = &v["usage"];
    let input_tokens = usage["prompt_tokens"].as_u64().unwrap_or(0) as u32;
    let output_tokens = usage["completion_tokens"].as_u64().unwrap_or(0) as u32;
    debug!(input_tokens, output_tokens, "Completion received");

    Ok(CompletionResponse {
        content: content.trim().to_string(),
        input_tokens,
        output_tokens,
        finish_reason: FinishReason::from_api(choice["finish_reason"].as_str()),
        response_id: v["id"].as_str().map(String::from),
    })
}
