//! Recognition: turning image pixels into textual statements.
//!
//! [`Recognizer`] is the seam between the analysis engine and whatever reads
//! the image. [`LlmRecognizer`] asks a vision-capable LLM through a
//! [`Backend`](crate::backend::Backend), parses its reply defensively, and
//! re-asks with a correction message when the reply cannot be used.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::Value;

use crate::backend::{self, ChatMessage, LlmRequest};
use crate::client::LlmConfig;
use crate::decode::DecodedImage;
use crate::diagnostics::ParseDiagnostics;
use crate::error::{AnalysisError, Result};
use crate::events::{emit, Event};
use crate::exec_ctx::ExecCtx;
use crate::output_parser::parse_json_traced;
use crate::prompt;
use crate::retry::RetryConfig;
use crate::types::{MathValue, RecognizedItem, VariableMapping};

/// Keys under which a reply object may wrap its item list.
const LIST_KEYS: &[&str] = &["items", "results", "data"];

/// Reads mathematical statements out of an image.
#[async_trait]
pub trait Recognizer: Send + Sync {
    /// Recognize the statements in `image`, in reading order.
    ///
    /// `variables` is the mapping as supplied with the request; it is context
    /// for the reader, not something it must resolve.
    async fn recognize(
        &self,
        image: &DecodedImage,
        variables: &VariableMapping,
        cancel: Option<&AtomicBool>,
    ) -> Result<Vec<RecognizedItem>>;

    /// Name for logs.
    fn name(&self) -> &str;
}

/// A [`Recognizer`] backed by a vision LLM.
///
/// # Example
///
/// ```
/// use inkcalc::backend::MockBackend;
/// use inkcalc::exec_ctx::ExecCtx;
/// use inkcalc::recognizer::LlmRecognizer;
/// use inkcalc::retry::RetryConfig;
/// use std::sync::Arc;
///
/// let ctx = ExecCtx::builder("http://localhost:11434")
///     .backend(Arc::new(MockBackend::fixed(r#"{"items": []}"#)))
///     .build()
///     .unwrap();
/// let recognizer = LlmRecognizer::new(Arc::new(ctx), "llama3.2-vision")
///     .with_retry(RetryConfig::new(1))
///     .with_max_image_dimension(512);
/// ```
pub struct LlmRecognizer {
    ctx: Arc<ExecCtx>,
    model: String,
    config: LlmConfig,
    retry: Option<RetryConfig>,
    max_image_dimension: u32,
}

impl LlmRecognizer {
    pub fn new(ctx: Arc<ExecCtx>, model: impl Into<String>) -> Self {
        Self {
            ctx,
            model: model.into(),
            config: LlmConfig::default(),
            retry: None,
            max_image_dimension: 1024,
        }
    }

    /// Set the LLM configuration.
    pub fn with_config(mut self, config: LlmConfig) -> Self {
        self.config = config;
        self
    }

    /// Re-ask the model when its reply cannot be parsed.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Longest image side sent to the backend.
    pub fn with_max_image_dimension(mut self, max: u32) -> Self {
        self.max_image_dimension = max.max(1);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Downscale and PNG-encode `image` on the blocking pool, as base64.
    async fn encode_image(&self, image: &DecodedImage) -> Result<String> {
        let image = image.clone();
        let max_dimension = self.max_image_dimension;
        tokio::task::spawn_blocking(move || {
            image
                .encode_png(max_dimension)
                .map(|png| STANDARD.encode(png))
        })
        .await
        .map_err(|e| AnalysisError::Other(format!("encode task failed: {}", e)))?
        .map_err(|e| AnalysisError::Other(format!("re-encoding image: {}", e)))
    }

    fn build_request(&self, prompt: &str, image: &str, messages: Vec<ChatMessage>, temperature: f64) -> LlmRequest {
        LlmRequest {
            model: self.model.clone(),
            system_prompt: Some(prompt::SYSTEM_PROMPT.to_string()),
            prompt: prompt.to_string(),
            images: vec![image.to_string()],
            messages,
            config: self.config.clone().with_temperature(temperature),
        }
    }

    /// One backend call with transport backoff. Returns the reply text.
    async fn call_backend(
        &self,
        request: &LlmRequest,
        cancel: Option<&AtomicBool>,
        diag: &mut ParseDiagnostics,
    ) -> Result<String> {
        let event_handler = self.ctx.event_handler.clone();
        let mut transport_retries = 0u32;
        let mut backoff_ms = 0u64;

        let mut on_retry = |attempt: u32, delay: std::time::Duration, reason: &str| {
            transport_retries = attempt;
            backoff_ms += delay.as_millis() as u64;
            emit(
                &event_handler,
                Event::TransportRetry {
                    attempt,
                    delay_ms: delay.as_millis() as u64,
                    reason: reason.to_string(),
                },
            );
        };

        let result = backend::with_backoff(
            &self.ctx.backend,
            &self.ctx.client,
            &self.ctx.base_url,
            request,
            &self.ctx.backoff,
            cancel,
            Some(&mut on_retry),
        )
        .await;

        diag.transport_retries += transport_retries;
        diag.backoff_total_ms += backoff_ms;

        match result {
            Ok(response) => Ok(response.text),
            Err(AnalysisError::Cancelled) => Err(AnalysisError::Cancelled),
            Err(e) => {
                tracing::error!(backend = self.ctx.backend.name(), error = %e, "backend call failed");
                Err(AnalysisError::RecognitionFailed(e.to_string()))
            }
        }
    }

    /// Parse a reply into items, recording how it went.
    fn interpret(raw: &str, diag: &mut ParseDiagnostics) -> std::result::Result<Vec<RecognizedItem>, String> {
        let outcome = parse_json_traced(raw)
            .map_err(|e| e.to_string())
            .and_then(|parsed| {
                diag.strategy = Some(parsed.strategy);
                diag.repaired = parsed.repaired;
                parse_items(&parsed.value)
            });

        match &outcome {
            Ok(items) => {
                diag.parse_error = None;
                diag.items = items.len();
            }
            Err(reason) => {
                diag.parse_error = Some(reason.clone());
                diag.items = 0;
            }
        }
        outcome
    }

    async fn run(&self, image: String, variables: &VariableMapping, cancel: Option<&AtomicBool>) -> Result<Vec<RecognizedItem>> {
        let prompt = prompt::analysis_prompt(variables);
        let base_temperature = self.config.temperature;
        let mut diag = ParseDiagnostics::default();

        let request = self.build_request(&prompt, &image, Vec::new(), base_temperature);
        let mut raw = self.call_backend(&request, cancel, &mut diag).await?;
        let mut outcome = Self::interpret(&raw, &mut diag);

        if let Some(retry) = self.retry.as_ref().filter(|_| outcome.is_err()) {
            let mut messages = vec![ChatMessage::user(prompt.clone()).with_images(vec![image.clone()])];

            for attempt in 1..=retry.max_retries {
                if backend::is_cancelled(cancel) {
                    return Err(AnalysisError::Cancelled);
                }
                let reason = match &outcome {
                    Err(reason) => reason.clone(),
                    Ok(_) => break,
                };
                emit(
                    &self.ctx.event_handler,
                    Event::RetryStart {
                        attempt,
                        reason: reason.clone(),
                    },
                );

                messages.push(ChatMessage::assistant(raw.clone()));
                messages.push(ChatMessage::user(prompt::correction_prompt(&reason)));

                let temperature = retry.temperature_for(base_temperature, attempt);
                let request = self.build_request(&prompt, &image, messages.clone(), temperature);
                raw = match self.call_backend(&request, cancel, &mut diag).await {
                    Ok(text) => text,
                    Err(e) => {
                        emit(
                            &self.ctx.event_handler,
                            Event::RetryEnd {
                                attempts: attempt,
                                success: false,
                            },
                        );
                        return Err(e);
                    }
                };
                diag.retry_attempts = attempt;
                outcome = Self::interpret(&raw, &mut diag);

                let success = outcome.is_ok();
                if success || attempt == retry.max_retries {
                    emit(
                        &self.ctx.event_handler,
                        Event::RetryEnd {
                            attempts: attempt,
                            success,
                        },
                    );
                }
            }
        }

        tracing::debug!(
            model = %self.model,
            strategy = ?diag.strategy,
            repaired = diag.repaired,
            retries = diag.retry_attempts,
            transport_retries = diag.transport_retries,
            backoff_ms = diag.backoff_total_ms,
            items = diag.items,
            "parsed recognition reply"
        );

        outcome.map_err(|reason| {
            tracing::error!(%reason, "recognition reply unusable");
            AnalysisError::RecognitionFailed(reason)
        })
    }
}

#[async_trait]
impl Recognizer for LlmRecognizer {
    async fn recognize(
        &self,
        image: &DecodedImage,
        variables: &VariableMapping,
        cancel: Option<&AtomicBool>,
    ) -> Result<Vec<RecognizedItem>> {
        let cancel = cancel.or(self.ctx.cancel_flag());
        if backend::is_cancelled(cancel) {
            return Err(AnalysisError::Cancelled);
        }

        let encoded = self.encode_image(image).await?;

        emit(
            &self.ctx.event_handler,
            Event::RecognitionStart {
                backend: self.ctx.backend.name().to_string(),
                model: self.model.clone(),
            },
        );

        let result = self.run(encoded, variables, cancel).await;

        emit(
            &self.ctx.event_handler,
            Event::RecognitionEnd {
                ok: result.is_ok(),
                items: result.as_ref().map_or(0, Vec::len),
            },
        );
        result
    }

    fn name(&self) -> &str {
        self.ctx.backend.name()
    }
}

/// Turn a parsed reply into items.
///
/// Accepts a top-level array, an object wrapping an array under
/// `items`/`results`/`data`, or a single item object. Items without text are
/// dropped. `{}` means nothing was found.
pub fn parse_items(value: &Value) -> std::result::Result<Vec<RecognizedItem>, String> {
    match value {
        Value::Array(entries) => Ok(entries.iter().filter_map(item_from).collect()),
        Value::Object(map) => {
            if let Some(list) = LIST_KEYS.iter().find_map(|key| map.get(*key)) {
                return match list {
                    Value::Array(_) => parse_items(list),
                    Value::Null => Ok(Vec::new()),
                    _ => Err("the items field is not a list".to_string()),
                };
            }
            if map.is_empty() {
                return Ok(Vec::new());
            }
            item_from(value)
                .map(|item| vec![item])
                .ok_or_else(|| "reply has no items list and no expr field".to_string())
        }
        other => Err(format!("expected a JSON object with an items list, got {}", json_kind(other))),
    }
}

fn item_from(entry: &Value) -> Option<RecognizedItem> {
    let (text, result, assign, hint) = match entry {
        Value::String(s) => (s.clone(), None, false, None),
        Value::Object(map) => {
            let text = match map.get("expr").or_else(|| map.get("expression"))? {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                _ => return None,
            };
            let result = map.get("result").and_then(math_value);
            let assign = map.get("assign").is_some_and(truthy);
            let hint = map.get("kind").and_then(Value::as_str);
            (text, result, assign, hint)
        }
        _ => return None,
    };

    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    Some(RecognizedItem::new(text, hint, result, assign))
}

fn math_value(value: &Value) -> Option<MathValue> {
    match value {
        Value::Number(n) => n.as_f64().map(MathValue::number),
        Value::String(s) if !s.trim().is_empty() => Some(MathValue::from_text(s)),
        Value::Bool(b) => Some(MathValue::Symbolic(b.to_string())),
        _ => None,
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => s.eq_ignore_ascii_case("true"),
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        _ => false,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
