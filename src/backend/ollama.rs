//! Ollama's native chat API.
//!
//! Every call goes to `/api/chat`: the recognizer always sends a system
//! prompt, and corrections replay a conversation. Images are base64 strings
//! in an `images` array on the user message that carries them.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Map, Value};

use super::{send_json, Backend, LlmRequest, LlmResponse};
use crate::error::Result;

/// Timing and token counters worth keeping from an Ollama reply.
const METADATA_KEYS: [&str; 5] = [
    "model",
    "total_duration",
    "prompt_eval_count",
    "eval_count",
    "eval_duration",
];

/// The default backend.
#[derive(Debug, Clone)]
pub struct OllamaBackend;

fn options(request: &LlmRequest) -> Value {
    let config = &request.config;
    let mut options = Map::new();
    options.insert("temperature".into(), json!(config.temperature));
    options.insert("num_predict".into(), json!(config.max_tokens));
    if let Some(Value::Object(extra)) = &config.options {
        options.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    Value::Object(options)
}

fn chat_message(role: &str, content: &str, images: &[String]) -> Value {
    let mut message = json!({"role": role, "content": content});
    if !images.is_empty() {
        message["images"] = json!(images);
    }
    message
}

fn chat_messages(request: &LlmRequest) -> Vec<Value> {
    let system = request
        .system_prompt
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(|s| chat_message("system", s, &[]));

    let mut messages: Vec<Value> = system.into_iter().collect();
    if request.messages.is_empty() {
        messages.push(chat_message("user", &request.prompt, &request.images));
    } else {
        // A correction history already ends with the latest user turn.
        messages.extend(
            request
                .messages
                .iter()
                .map(|m| chat_message(m.role.as_str(), &m.content, &m.images)),
        );
    }
    messages
}

fn request_body(request: &LlmRequest) -> Value {
    let mut body = json!({
        "model": request.model,
        "messages": chat_messages(request),
        "stream": false,
        "options": options(request),
    });
    if request.config.json_mode {
        body["format"] = json!("json");
    }
    body
}

fn metadata(reply: &Value) -> Option<Value> {
    let kept: Map<String, Value> = METADATA_KEYS
        .iter()
        .filter_map(|&key| reply.get(key).map(|v| (key.to_string(), v.clone())))
        .collect();
    (!kept.is_empty()).then_some(Value::Object(kept))
}

#[async_trait]
impl Backend for OllamaBackend {
    async fn complete(
        &self,
        client: &Client,
        base_url: &str,
        request: &LlmRequest,
    ) -> Result<LlmResponse> {
        let url = format!("{}/api/chat", base_url.trim_end_matches('/'));

        let (reply, status) = send_json(client.post(&url).json(&request_body(request))).await?;
        let text = reply
            .pointer("/message/content")
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
        "ollama"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ChatMessage, Role};

    fn read_request() -> LlmRequest {
        LlmRequest::new("llama3.2-vision", "Read the math in this image.")
    }

    #[test]
    fn test_body_fields() {
        let body = request_body(&read_request());

        assert_eq!(body["model"], "llama3.2-vision");
        assert_eq!(body["stream"], false);
        assert_eq!(body["format"], "json");
        assert_eq!(body["options"]["temperature"], 0.4);
        assert_eq!(body["options"]["num_predict"], 1024);
        assert!(body.get("prompt").is_none());
        assert!(body.get("images").is_none());
    }

    #[test]
    fn test_plain_text_mode_omits_format() {
        let mut request = read_request();
        request.config.json_mode = false;
        assert!(request_body(&request).get("format").is_none());
    }

    #[test]
    fn test_image_rides_on_user_message() {
        let mut request = read_request();
        request.system_prompt = Some("You read handwriting.".into());
        request.images = vec!["AAAA".into()];
        let body = request_body(&request);

        let messages = body["messages"].as_array().expect("messages array");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], "system");
        assert!(messages[0].get("images").is_none());
        assert_eq!(messages[1]["role"], "user");
        assert_eq!(messages[1]["content"], "Read the math in this image.");
        assert_eq!(messages[1]["images"][0], "AAAA");
    }

    #[test]
    fn test_blank_system_prompt_is_skipped() {
        let mut request = read_request();
        request.system_prompt = Some(String::new());
        let body = request_body(&request);
        let messages = body["messages"].as_array().expect("messages");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["role"], "user");
    }

    #[test]
    fn test_history_replaces_prompt() {
        let mut request = read_request();
        request.messages = vec![
            ChatMessage::user("Read this.").with_images(vec!["AAAA".into()]),
            ChatMessage::assistant("not json"),
            ChatMessage::user("Reply with JSON only."),
        ];
        let body = request_body(&request);

        let messages = body["messages"].as_array().expect("messages");
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0]["images"][0], "AAAA");
        assert_eq!(messages[1]["role"], Role::Assistant.as_str());
        assert!(messages[1].get("images").is_none());
        assert_eq!(messages[2]["content"], "Reply with JSON only.");
    }

    #[test]
    fn test_custom_options_merge() {
        let mut request = read_request();
        request.config.options = Some(json!({"num_ctx": 8192, "temperature": 0.0}));
        let options = options(&request);

        assert_eq!(options["num_ctx"], 8192);
        assert_eq!(options["temperature"], 0.0);
        assert_eq!(options["num_predict"], 1024);
    }

    #[test]
    fn test_metadata_keeps_known_counters() {
        let reply = json!({"message": {"content": "{}"}, "eval_count": 12, "model": "m", "done": true});
        let meta = metadata(&reply).expect("metadata");
        assert_eq!(meta["eval_count"], 12);
        assert!(meta.get("done").is_none());
        assert!(metadata(&json!({"message": {}})).is_none());
    }
}
