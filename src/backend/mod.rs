//! Provider-neutral LLM calls.
//!
//! [`LlmRecognizer`](crate::recognizer::LlmRecognizer) describes a call as an
//! [`LlmRequest`]; a [`Backend`] turns that into the provider's HTTP shape and
//! hands back an [`LlmResponse`]. [`with_backoff`] wraps any backend with
//! transport retries.
//!
//! ```text
//! LlmRequest ──► with_backoff ──► Backend::complete ──► LlmResponse
//!                                    ├─ OllamaBackend   /api/chat
//!                                    ├─ OpenAiBackend   /v1/chat/completions
//!                                    └─ MockBackend     canned replies
//! ```

pub mod backoff;
pub mod mock;
pub mod ollama;
pub mod openai;

pub use backoff::BackoffConfig;
pub use mock::MockBackend;
pub use ollama::OllamaBackend;
pub use openai::OpenAiBackend;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde_json::Value;

use crate::client::LlmConfig;
use crate::error::{AnalysisError, Result};

/// Observer called before each transport retry with
/// `(attempt, delay, reason)`.
pub type RetryCallback<'a> = Option<&'a mut (dyn FnMut(u32, Duration, &str) + Send)>;

/// One model call, independent of provider.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub model: String,
    /// Present for chat-style calls.
    pub system_prompt: Option<String>,
    pub prompt: String,
    /// Base64 PNGs attached to `prompt`.
    pub images: Vec<String>,
    /// Correction history. When non-empty it replaces `prompt` and `images`.
    pub messages: Vec<ChatMessage>,
    pub config: LlmConfig,
}

impl LlmRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            system_prompt: None,
            prompt: prompt.into(),
            images: Vec::new(),
            messages: Vec::new(),
            config: LlmConfig::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    /// Base64 PNGs.
    pub images: Vec<String>,
}

impl ChatMessage {
    fn with_role(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            images: Vec::new(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content)
    }

    pub fn with_images(mut self, images: Vec<String>) -> Self {
        self.images = images;
        self
    }
}

/// Chat roles. System prompts travel in [`LlmRequest::system_prompt`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug)]
pub struct LlmResponse {
    pub text: String,
    pub status: u16,
    /// Whatever usage or timing fields the provider returned.
    pub metadata: Option<Value>,
}

/// A vision-capable LLM provider. Used as `Arc<dyn Backend>`.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn complete(
        &self,
        client: &Client,
        base_url: &str,
        request: &LlmRequest,
    ) -> Result<LlmResponse>;

    /// Short name for logs and events.
    fn name(&self) -> &'static str;
}

/// `Retry-After` in its delta-seconds form. HTTP dates are ignored.
pub(crate) fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse().ok().map(Duration::from_secs)
}

/// Send `request` and parse the body as JSON. Non-2xx statuses become
/// [`AnalysisError::HttpError`] carrying the body and any `Retry-After`.
pub(crate) async fn send_json(request: RequestBuilder) -> Result<(Value, u16)> {
    let response = request.send().await?;
    let status = response.status();

    if status.is_success() {
        let body: Value = response.json().await?;
        return Ok((body, status.as_u16()));
    }

    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_retry_after);
    Err(AnalysisError::HttpError {
        status: status.as_u16(),
        body: response.text().await.unwrap_or_default(),
        retry_after,
    })
}

/// Connection failures and the configured statuses are transient. Anything
/// else is final.
pub fn is_retryable(error: &AnalysisError, config: &BackoffConfig) -> bool {
    match error {
        AnalysisError::Request(_) => true,
        AnalysisError::HttpError { status, .. } => config.retryable_statuses.contains(status),
        _ => false,
    }
}

pub(crate) fn is_cancelled(cancel: Option<&AtomicBool>) -> bool {
    cancel.is_some_and(|flag| flag.load(Ordering::Relaxed))
}

/// How long to wait before retry number `attempt` (1-based) after `error`.
fn retry_delay(config: &BackoffConfig, error: &AnalysisError, attempt: u32) -> Duration {
    match error {
        AnalysisError::HttpError {
            retry_after: Some(wait),
            ..
        } if config.respect_retry_after => (*wait).min(config.max_delay),
        _ => config.delay_for_attempt(attempt - 1),
    }
}

/// Call `backend`, retrying transient failures as `config` allows.
///
/// Returns the first success, or the error that ended the sequence: a
/// non-retryable one, or the last one once retries run out. `cancel` is
/// checked before each attempt and again after each sleep.
pub async fn with_backoff(
    backend: &Arc<dyn Backend>,
    client: &Client,
    base_url: &str,
    request: &LlmRequest,
    config: &BackoffConfig,
    cancel: Option<&AtomicBool>,
    mut on_retry: RetryCallback<'_>,
) -> Result<LlmResponse> {
    let mut attempt = 0;
    loop {
        if is_cancelled(cancel) {
            return Err(AnalysisError::Cancelled);
        }

        let error = match backend.complete(client, base_url, request).await {
            Ok(response) => return Ok(response),
            Err(e) if attempt < config.max_retries && is_retryable(&e, config) => e,
            Err(e) => return Err(e),
        };

        attempt += 1;
        let delay = retry_delay(config, &error, attempt);
        tracing::debug!(
            backend = backend.name(),
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "retrying backend call"
        );
        if let Some(callback) = on_retry.as_mut() {
            callback(attempt, delay, &error.to_string());
        }
        tokio::time::sleep(delay).await;
    }
}
