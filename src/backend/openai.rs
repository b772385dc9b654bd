//! OpenAI-compatible `/v1/chat/completions`.
//!
//! Works with OpenAI itself and with vLLM, llama.cpp server, LM Studio or
//! Ollama's `/v1/` endpoint, provided the model takes image input. Images
//! become `image_url` content parts carrying PNG data URLs.

use std::fmt;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde_json::{json, Map, Value};

use super::{send_json, Backend, LlmRequest, LlmResponse};
use crate::error::Result;

/// Chat-completions backend, optionally authenticated with a bearer key.
///
/// # Example
///
/// ```
/// use inkcalc::backend::OpenAiBackend;
///
/// let backend = OpenAiBackend::new().with_api_key("sk-...");
/// assert!(backend.has_api_key());
/// assert!(!format!("{:?}", backend).contains("sk-..."));
/// ```
#[derive(Clone, Default)]
pub struct OpenAiBackend {
    api_key: Option<String>,
}

impl fmt::Debug for OpenAiBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let key = self.api_key.as_deref().map(|key| match key.get(..6) {
            Some(prefix) if key.len() > 6 => format!("{}***", prefix),
            _ => "***".to_string(),
        });
        f.debug_struct("OpenAiBackend").field("api_key", &key).finish()
    }
}

impl OpenAiBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Send `Authorization: Bearer {key}` with every call.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }
}

/// Plain string content, or a text part followed by one part per image.
fn content(text: &str, images: &[String]) -> Value {
    if images.is_empty() {
        return json!(text);
    }
    let text_part = json!({"type": "text", "text": text});
    let image_parts = images.iter().map(|image| {
        json!({
            "type": "image_url",
            "image_url": {"url": format!("data:image/png;base64,{}", image)},
        })
    });
    Value::Array(std::iter::once(text_part).chain(image_parts).collect())
}

fn messages(request: &LlmRequest) -> Vec<Value> {
    let mut out = Vec::with_capacity(request.messages.len() + 2);
    if let Some(system) = request.system_prompt.as_deref().filter(|s| !s.is_empty()) {
        out.push(json!({"role": "system", "content": system}));
    }
    if request.messages.is_empty() {
        out.push(json!({"role": "user", "content": content(&request.prompt, &request.images)}));
    } else {
        for message in &request.messages {
            out.push(json!({
                "role": message.role.as_str(),
                "content": content(&message.content, &message.images),
            }));
        }
    }
    out
}

/// Raw Ollama `options` have no equivalent here.
fn request_body(request: &LlmRequest) -> Value {
    let mut body = json!({
        "model": request.model,
        "messages": messages(request),
        "temperature": request.config.temperature,
        "max_tokens": request.config.max_tokens,
        "stream": false,
    });
    if request.config.json_mode {
        body["response_format"] = json!({"type": "json_object"});
    }
    body
}

fn metadata(reply: &Value) -> Option<Value> {
    let kept: Map<String, Value> = ["id", "model", "usage"]
        .iter()
        .filter_map(|&key| reply.get(key).map(|v| (key.to_string(), v.clone())))
        .collect();
    (!kept.is_empty()).then_some(Value::Object(kept))
}

#[async_trait]
impl Backend for OpenAiBackend {
    async fn complete(
        &self,
        client: &Client,
        base_url: &str,
        request: &LlmRequest,
    ) -> Result<LlmResponse> {
        let url = format!("{}/v1/chat/completions", base_url.trim_end_matches('/'));
        let builder = self.authorize(client.post(&url).json(&request_body(request)));

        let (reply, status) = send_json(builder).await?;
        let text = reply
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        Ok(LlmResponse {
            text,
            status,
            metadata: metadata(&reply),
        })
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}
