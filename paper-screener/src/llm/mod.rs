//! LLM screening backends.
//!
//! `LlmProvider` is the seam between the pipeline and a concrete model API.
//! `ScreeningClient` wraps any provider with bounded retries and turns the
//! raw completion into a `ScreeningVerdict`.

mod anthropic;
mod client;
mod gemini;
mod mock;
mod openai;
mod parse;

pub use anthropic::AnthropicProvider;
pub use client::{RetryPolicy, ScreeningClient};
pub use gemini::GeminiProvider;
pub use mock::{verdict_json, MockProvider};
pub use openai::OpenAiProvider;
pub use parse::{parse_model_output, ParsedOutput};

use crate::config::{ApiKeys, LlmConfig, Provider};
use crate::prompt::ScreeningRequest;
use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;

/// A backend that turns a screening request into raw model text.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &str;

    fn model(&self) -> &str;

    async fn complete(&self, request: &ScreeningRequest) -> Result<String, ScreeningError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ScreeningError {
    #[error("{provider} rejected the credentials: {message}")]
    Auth { provider: String, message: String },

    #[error("{provider} rejected the request ({status}): {message}")]
    InvalidRequest {
        provider: String,
        status: u16,
        message: String,
    },

    #[error("{provider} rate limited the request")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("{provider} API error ({status}): {message}")]
    Api {
        provider: String,
        status: u16,
        message: String,
    },

    #[error("Transport error talking to {provider}: {message}")]
    Transport { provider: String, message: String },

    #[error("Malformed response from {provider}: {message}")]
    MalformedResponse {
        provider: String,
        message: String,
        raw: String,
    },

    #[error("All {attempts} attempts failed, last error: {last_error}")]
    RetryExhausted { attempts: u32, last_error: String },
}

impl ScreeningError {
    /// Transient failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            ScreeningError::RateLimited { .. } | ScreeningError::Transport { .. } => true,
            ScreeningError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Failures that will repeat for every entry; the run should stop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ScreeningError::Auth { .. } | ScreeningError::InvalidRequest { .. })
    }

    fn transport(provider: &str, err: reqwest::Error) -> Self {
        ScreeningError::Transport {
            provider: provider.to_string(),
            message: err.to_string(),
        }
    }
}

/// Map a non-success HTTP status to the error taxonomy.
fn classify_status(provider: &str, status: u16, body: &str, retry_after: Option<Duration>) -> ScreeningError {
    let message = error_message(body);
    let provider = provider.to_string();

    match status {
        401 | 403 => ScreeningError::Auth { provider, message },
        // Gemini answers an invalid key with 400
        400 if message.to_lowercase().contains("api key") => ScreeningError::Auth { provider, message },
        400 | 404 | 422 => ScreeningError::InvalidRequest { provider, status, message },
        429 => ScreeningError::RateLimited { provider, retry_after },
        _ => ScreeningError::Api { provider, status, message },
    }
}

/// Pull `error.message` out of a provider error body, falling back to the
/// raw body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            value
                .pointer("/error/message")
                .and_then(|m| m.as_str())
                .map(|m| m.to_string())
        })
        .unwrap_or_else(|| crate::utils::text::truncate_chars(body.trim(), 300))
}

/// Send a prepared request and decode the success body as `T`. The raw body
/// comes back too so callers can keep it when the payload carries no text.
async fn execute<T: DeserializeOwned>(
    provider: &str,
    request: reqwest::RequestBuilder,
) -> Result<(T, String), ScreeningError> {
    let response = request
        .send()
        .await
        .map_err(|e| ScreeningError::transport(provider, e))?;

    let status = response.status();
    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs);

    let body = response
        .text()
        .await
        .map_err(|e| ScreeningError::transport(provider, e))?;

    if !status.is_success() {
        return Err(classify_status(provider, status.as_u16(), &body, retry_after));
    }

    match serde_json::from_str::<T>(&body) {
        Ok(value) => Ok((value, body)),
        Err(e) => Err(ScreeningError::MalformedResponse {
            provider: provider.to_string(),
            message: e.to_string(),
            raw: body,
        }),
    }
}

fn http_client(provider: &str, timeout: Duration) -> Result<reqwest::Client, ScreeningError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ScreeningError::transport(provider, e))
}

/// Build the provider selected in `llm`, with the matching API key.
pub fn create_provider(llm: &LlmConfig, keys: &ApiKeys) -> Result<Arc<dyn LlmProvider>, ScreeningError> {
    let api_key = keys.key_for(llm.provider).ok_or_else(|| ScreeningError::Auth {
        provider: llm.provider.to_string(),
        message: format!("no API key configured (api_keys.{})", llm.provider.key_name()),
    })?;

    let model = llm.model_or_default().to_string();
    let timeout = Duration::from_secs(llm.timeout_seconds);

    let provider: Arc<dyn LlmProvider> = match llm.provider {
        Provider::Anthropic => {
            let mut p = AnthropicProvider::new(api_key, model, timeout)?;
            if let Some(base_url) = &llm.base_url {
                p = p.with_base_url(base_url);
            }
            Arc::new(p)
        }
        Provider::OpenAi => {
            let mut p = OpenAiProvider::new(api_key, model, timeout)?;
            if let Some(base_url) = &llm.base_url {
                p = p.with_base_url(base_url);
            }
            Arc::new(p)
        }
        Provider::Gemini => {
            let mut p = GeminiProvider::new(api_key, model, timeout)?;
            if let Some(base_url) = &llm.base_url {
                p = p.with_base_url(base_url);
            }
            Arc::new(p)
        }
    };

    tracing::info!("Using LLM provider {} with model {}", provider.name(), provider.model());
    Ok(provider)
}
