use serde_json::Value;

/// Sampling and output settings for one model call.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// 0.0 is deterministic. Semantic retries cool this further.
    pub temperature: f64,

    pub max_tokens: u32,

    /// Ask the provider for a JSON-only reply (`format: json` on Ollama,
    /// `response_format` on OpenAI-compatible APIs).
    pub json_mode: bool,

    /// Extra Ollama `options` (e.g. `{"num_ctx": 8192}`), merged over the
    /// sampling settings. OpenAI-compatible backends ignore it.
    pub options: Option<Value>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            temperature: 0.4,
            max_tokens: 1024,
            json_mode: true,
            options: None,
        }
    }
}

impl LlmConfig {
    pub fn with_temperature(mut self, temp: f64) -> Self {
        self.temperature = temp;
        self
    }

    pub fn with_max_tokens(mut self, tokens: u32) -> Self {
        self.max_tokens = tokens;
        self
    }

    pub fn with_json_mode(mut self, enabled: bool) -> Self {
        self.json_mode = enabled;
        self
    }

    pub fn with_options(mut self, options: Value) -> Self {
        self.options = Some(options);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_llm_config_defaults() {
        let config = LlmConfig::default();
        assert_eq!(config.temperature, 0.4);
        assert_eq!(config.max_tokens, 1024);
        assert!(config.json_mode);
        assert!(config.options.is_none());
    }

    #[test]
    fn test_llm_config_builder() {
        let config = LlmConfig::default()
            .with_temperature(0.1)
            .with_max_tokens(4096)
            .with_json_mode(false)
            .with_options(json!({"seed": 7}));
        assert_eq!(config.temperature, 0.1);
        assert_eq!(config.max_tokens, 4096);
        assert!(!config.json_mode);
        assert_eq!(config.options, Some(json!({"seed": 7})));
    }
}
