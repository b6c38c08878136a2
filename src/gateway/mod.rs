//! Provider gateway for OpenRouter chat completions.

pub mod error;
pub mod openrouter;
pub mod types;

use std::time::Duration;

use tokio::time::sleep;

use openrouter::{ChatProvider, OpenRouterAdapter};

pub use error::{ErrorContext, ProviderError};
pub use types::*;

#[async_trait::async_trait]
pub trait ChatGateway: Send + Sync {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError>;
}

/// Transport-level retry policy. Independent of the annotation retry bound,
/// which re-prompts on unparseable answers.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    /// Upper bound on a provider-requested `Retry-After` wait.
    pub max_retry_after: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_base_delay: Duration::from_secs(1),
            max_retry_after: Duration::from_secs(60),
        }
    }
}

pub struct ProviderGateway {
    openrouter: OpenRouterAdapter,
    config: GatewayConfig,
}

#[async_trait::async_trait]
impl ChatGateway for ProviderGateway {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError> {
        ProviderGateway::chat(self, req).await
    }
}

impl ProviderGateway {
    pub fn from_env() -> Result<Self, ProviderError> {
        Ok(Self {
            openrouter: OpenRouterAdapter::from_env()?,
            config: GatewayConfig::default(),
        })
    }

    pub fn with_config(openrouter: OpenRouterAdapter, config: GatewayConfig) -> Self {
        Self { openrouter, config }
    }

    pub async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError> {
        let mut last_error: Option<ProviderError> = None;

        for attempt in 0..=self.config.max_retries {
            match self.openrouter.chat(&req).await {
                Ok(resp) => {
                    if resp.truncated() {
                        tracing::warn!(
                            model = req.model.model_id(),
                            output_tokens = resp.output_tokens,
                            "completion stopped at max_tokens"
                        );
                    }
                    tracing::debug!(
                        model = req.model.model_id(),
                        caller = req.attribution.caller,
                        input_tokens = resp.input_tokens,
                        output_tokens = resp.output_tokens,
                        latency_ms = resp.latency.as_millis() as u64,
                        "chat completion"
                    );
                    return Ok(resp);
                }
                Err(err) => {
                    tracing::warn!(
                        model = req.model.model_id(),
                        caller = req.attribution.caller,
                        code = err.code(),
                        attempt,
                        error = %err,
                        "chat completion failed"
                    );

                    if !err.is_retryable() || attempt == self.config.max_retries {
                        return Err(err);
                    }

                    let delay = match err.retry_after() {
                        Some(wait) => wait.min(self.config.max_retry_after),
                        None => backoff_delay(self.config.retry_base_delay, attempt),
                    };
                    last_error = Some(err);
                    sleep(delay).await;
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| ProviderError::provider("openrouter", "unknown error", false)))
    }
}

fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let multiplier = 2u64.pow(attempt.min(5));
    base * multiplier as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let base = Duration::from_millis(100);
        assert_eq!(backoff_delay(base, 0), Duration::from_millis(100));
        assert_eq!(backoff_delay(base, 2), Duration::from_millis(400));
        assert_eq!(backoff_delay(base, 9), Duration::from_millis(3200));
    }
}
