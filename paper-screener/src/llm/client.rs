use super::{parse_model_output, LlmProvider, ScreeningError};
use crate::config::LlmConfig;
use crate::criteria;
use crate::prompt::ScreeningRequest;
use crate::types::ScreeningVerdict;
use backoff::{backoff::Backoff, ExponentialBackoff};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Bounded exponential backoff for transient provider failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Extra attempts after the first one.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(llm: &LlmConfig) -> Self {
        Self {
            max_retries: llm.max_retries,
            initial_delay: Duration::from_millis(llm.retry_delay_ms),
            max_delay: Duration::from_millis(llm.max_retry_delay_ms.max(llm.retry_delay_ms)),
        }
    }

    /// No waiting between attempts.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            current_interval: self.initial_delay,
            initial_interval: self.initial_delay,
            max_interval: self.max_delay,
            multiplier: 2.0,
            // Attempts are bounded by max_retries instead
            max_elapsed_time: None,
            ..Default::default()
        }
    }
}

/// Runs screening requests against a provider and builds verdicts.
pub struct ScreeningClient {
    provider: Arc<dyn LlmProvider>,
    retry: RetryPolicy,
}

impl ScreeningClient {
    pub fn new(provider: Arc<dyn LlmProvider>, retry: RetryPolicy) -> Self {
        Self { provider, retry }
    }

    pub fn provider(&self) -> &Arc<dyn LlmProvider> {
        &self.provider
    }

    /// Screen one entry. A malformed provider answer becomes a degraded
    /// verdict; fatal and exhausted failures are returned as errors.
    pub async fn screen(&self, request: &ScreeningRequest) -> Result<ScreeningVerdict, ScreeningError> {
        let raw = match self.complete_with_retry(request).await {
            Ok(raw) => raw,
            Err(ScreeningError::MalformedResponse { provider, message, raw }) => {
                warn!(
                    "Malformed response from {} for {}: {}; recording as degraded",
                    provider, request.entry_id, message
                );
                raw
            }
            Err(e) => return Err(e),
        };

        let parsed = parse_model_output(&raw);
        let evaluation = criteria::evaluate(request.group, &parsed.criteria);

        if evaluation.degraded {
            warn!("Incomplete judgments for {}, verdict is degraded", request.entry_id);
        }

        Ok(ScreeningVerdict {
            accepted: evaluation.accepted,
            degraded: evaluation.degraded,
            criteria: parsed.criteria,
            summary: parsed.summary,
            raw_model_output: raw,
        })
    }

    async fn complete_with_retry(&self, request: &ScreeningRequest) -> Result<String, ScreeningError> {
        let mut backoff = self.retry.backoff();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            match self.provider.complete(request).await {
                Ok(text) => {
                    debug!("{} answered for {} on attempt {}", self.provider.name(), request.entry_id, attempt);
                    return Ok(text);
                }
                Err(e) if e.is_retryable() && attempt <= self.retry.max_retries => {
                    let mut delay = backoff.next_backoff().unwrap_or(self.retry.max_delay);
                    if let ScreeningError::RateLimited {
                        retry_after: Some(after),
                        ..
                    } = &e
                    {
                        delay = delay.max((*after).min(self.retry.max_delay));
                    }
                    warn!(
                        "Attempt {} failed for {}: {}, retrying in {:?}",
                        attempt, request.entry_id, e, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) if e.is_retryable() => {
                    return Err(ScreeningError::RetryExhausted {
                        attempts: attempt,
                        last_error: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }
}
