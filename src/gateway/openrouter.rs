//! OpenRouter chat-completions adapter.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use super::error::{ErrorContext, ProviderError};
use super::types::*;

/// A single-shot chat completion backend.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError>;
}

pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Used when a 429 carries no usable `Retry-After`.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Rating answers are short; anything past this is a misbehaving upstream.
const MAX_RESPONSE_BYTES: usize = 1_024 * 1_024;

#[derive(Debug, Clone)]
pub struct OpenRouterAdapter {
    client: reqwest::Client,
    base_url: String,
}

impl OpenRouterAdapter {
    pub fn new(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        Self::with_config(api_key, DEFAULT_BASE_URL, DEFAULT_TIMEOUT, None, None)
    }

    /// Reads `OPENROUTER_API_KEY`, `OPENROUTER_BASE_URL`,
    /// `OPENROUTER_TIMEOUT_SECONDS`, `OPENROUTER_REFERER` and
    /// `OPENROUTER_APP_TITLE`.
    pub fn from_env() -> Result<Self, ProviderError> {
        let api_key = std::env::var("OPENROUTER_API_KEY")
            .map_err(|_| ProviderError::config("OPENROUTER_API_KEY not set"))?;
        let base_url =
            std::env::var("OPENROUTER_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.into());
        let timeout = std::env::var("OPENROUTER_TIMEOUT_SECONDS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map_or(DEFAULT_TIMEOUT, Duration::from_secs);

        Self::with_config(
            api_key,
            base_url,
            timeout,
            std::env::var("OPENROUTER_REFERER").ok(),
            std::env::var("OPENROUTER_APP_TITLE").ok(),
        )
    }

    pub fn with_config(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
        referer: Option<String>,
        app_title: Option<String>,
    ) -> Result<Self, ProviderError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let bearer = HeaderValue::from_str(&format!("Bearer {}", api_key.into()))
            .map_err(|_| ProviderError::config("API key is not a valid header value"))?;
        headers.insert(AUTHORIZATION, bearer);

        // Attribution headers are optional; skip values that aren't valid headers.
        for (name, value) in [("HTTP-Referer", referer), ("X-Title", app_title)] {
            if let Some(v) = value.and_then(|v| HeaderValue::from_str(&v).ok()) {
                headers.insert(name, v);
            }
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .gzip(true)
            .build()
            .map_err(|e| ProviderError::config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

// Wire format

#[derive(Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    /// Groups requests of one annotation job on the provider side.
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<String>,
}

#[derive(Deserialize)]
struct ApiResponse {
    #[serde(default)]
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct ApiChoice {
    message: Option<ApiChoiceMessage>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ApiChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[derive(Deserialize)]
struct ApiError {
    message: Option<String>,
    code: Option<serde_json::Value>,
}

fn retry_after(headers: &HeaderMap) -> Duration {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map_or(DEFAULT_RETRY_AFTER, Duration::from_secs)
}

/// Turn a non-2xx response into an error, keeping whatever the body says.
fn failure(status: StatusCode, mut ctx: ErrorContext, body: &str, wait: Duration) -> ProviderError {
    let mut message = format!("HTTP {}", status.as_u16());
    if let Some(error) = serde_json::from_str::<ApiResponse>(body).ok().and_then(|r| r.error) {
        if let Some(m) = error.message {
            message = m;
        }
        if let Some(code) = error.code {
            let code = match code {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            ctx = ctx.with_code(code);
        }
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        ProviderError::rate_limited(wait, ctx)
    } else {
        ProviderError::provider_with_context("openrouter", message, status.is_server_error(), ctx)
    }
}

#[async_trait]
impl ChatProvider for OpenRouterAdapter {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let start = Instant::now();
        let body = ApiRequest {
            model: req.model.model_id(),
            messages: &req.messages,
            temperature: req.temperature,
            max_tokens: req.max_tokens,
            user: req.attribution.job_id.map(|id| id.to_string()),
        };

        let mut response = self.client.post(self.chat_url()).json(&body).send().await?;
        let status = response.status();
        let wait = retry_after(response.headers());
        let mut ctx = ErrorContext::new().with_status(status.as_u16());
        if let Some(id) = response.headers().get("x-request-id").and_then(|v| v.to_str().ok()) {
            ctx = ctx.with_request_id(id);
        }

        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            if bytes.len() + chunk.len() > MAX_RESPONSE_BYTES {
                return Err(ProviderError::provider_with_context(
                    "openrouter",
                    format!("response exceeds {MAX_RESPONSE_BYTES} bytes"),
                    false,
                    ctx,
                ));
            }
            bytes.extend_from_slice(&chunk);
        }
        let text = String::from_utf8_lossy(&bytes);

        if !status.is_success() {
            return Err(failure(status, ctx, &text, wait));
        }

        let parsed: ApiResponse = serde_json::from_str(&text).map_err(|e| {
            ProviderError::provider_with_context("openrouter", format!("invalid JSON: {e}"), false, ctx.clone())
        })?;
        // OpenRouter reports some upstream failures inside a 200.
        if let Some(error) = parsed.error {
            return Err(ProviderError::provider_with_context(
                "openrouter",
                error.message.unwrap_or_default(),
                true,
                ctx,
            ));
        }

        let choice = parsed.choices.into_iter().next().ok_or_else(|| {
            ProviderError::provider_with_context("openrouter", "no choices in response", true, ctx)
        })?;
        let usage = parsed.usage.unwrap_or(ApiUsage {
            prompt_tokens: 0,
            completion_tokens: 0,
        });

        Ok(ChatResponse {
            content: choice.message.and_then(|m| m.content).unwrap_or_default(),
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            latency: start.elapsed(),
            finish_reason: FinishReason::from_api(choice.finish_reason.as_deref()),
        })
    }
}
