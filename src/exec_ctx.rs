//! Everything a recognition call needs to reach the model.
//!
//! One [`ExecCtx`] is built at startup from [`Config`](crate::config::Config)
//! and shared behind an `Arc` by every request.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;

use crate::backend::{Backend, BackoffConfig, OllamaBackend, OpenAiBackend};
use crate::error::{AnalysisError, Result};
use crate::events::EventHandler;

const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(60);

/// Endpoint, transport and observers for recognition calls.
///
/// # Example
///
/// ```
/// use inkcalc::exec_ctx::ExecCtx;
/// use std::time::Duration;
///
/// let ctx = ExecCtx::builder("http://localhost:11434/api")
///     .timeout(Duration::from_secs(30))
///     .build()
///     .unwrap();
/// assert_eq!(ctx.base_url, "http://localhost:11434");
/// ```
pub struct ExecCtx {
    pub client: Client,
    /// Provider root without any API path, e.g. `http://localhost:11434`.
    pub base_url: String,
    pub backend: Arc<dyn Backend>,
    pub backoff: BackoffConfig,
    /// Raised on shutdown. Calls stop before their next attempt.
    pub cancellation: Option<Arc<AtomicBool>>,
    pub event_handler: Option<Arc<dyn EventHandler>>,
}

impl ExecCtx {
    /// Start from `base_url` with Ollama, no transport retries and a 60s
    /// HTTP timeout.
    pub fn builder(base_url: impl Into<String>) -> ExecCtxBuilder {
        ExecCtxBuilder {
            base_url: base_url.into(),
            backend: None,
            backoff: BackoffConfig::none(),
            cancellation: None,
            event_handler: None,
            timeout: DEFAULT_HTTP_TIMEOUT,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_flag()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    pub fn cancel_flag(&self) -> Option<&AtomicBool> {
        self.cancellation.as_deref()
    }
}

impl fmt::Debug for ExecCtx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecCtx")
            .field("base_url", &self.base_url)
            .field("backend", &self.backend.name())
            .field("max_retries", &self.backoff.max_retries)
            .field("cancelled", &self.is_cancelled())
            .field("observed", &self.event_handler.is_some())
            .finish()
    }
}

/// See [`ExecCtx::builder`].
pub struct ExecCtxBuilder {
    base_url: String,
    backend: Option<Arc<dyn Backend>>,
    backoff: BackoffConfig,
    cancellation: Option<Arc<AtomicBool>>,
    event_handler: Option<Arc<dyn EventHandler>>,
    timeout: Duration,
}

impl ExecCtxBuilder {
    pub fn backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Talk to an OpenAI-compatible `/v1/chat/completions` without a key.
    pub fn openai(self) -> Self {
        self.backend(Arc::new(OpenAiBackend::new()))
    }

    /// Same as [`openai`](Self::openai), sending `Authorization: Bearer {key}`.
    pub fn openai_with_key(self, api_key: impl Into<String>) -> Self {
        self.backend(Arc::new(OpenAiBackend::new().with_api_key(api_key)))
    }

    pub fn backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn cancellation(mut self, flag: Option<Arc<AtomicBool>>) -> Self {
        self.cancellation = flag;
        self
    }

    pub fn event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.event_handler = Some(handler);
        self
    }

    /// Timeout for a single HTTP attempt, not the whole retry sequence.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn build(self) -> Result<ExecCtx> {
        let client = Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| AnalysisError::InvalidConfig(format!("HTTP client: {}", e)))?;

        Ok(ExecCtx {
            client,
            base_url: provider_root(&self.base_url),
            backend: self.backend.unwrap_or_else(|| Arc::new(OllamaBackend)),
            backoff: self.backoff,
            cancellation: self.cancellation,
            event_handler: self.event_handler,
        })
    }
}

/// Drop a trailing slash and any API path a user may have pasted along with
/// the host. Backends append their own.
fn provider_root(url: &str) -> String {
    const API_PATHS: [&str; 6] = [
        "/v1/chat/completions",
        "/v1/chat",
        "/v1",
        "/api/generate",
        "/api/chat",
        "/api",
    ];

    let url = url.trim_end_matches('/');
    API_PATHS
        .iter()
        .find_map(|path| url.strip_suffix(path))
        .unwrap_or(url)
        .to_string()
}
