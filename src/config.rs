//! Service configuration, read from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use serde_json::Value;

use crate::client::LlmConfig;
use crate::error::{AnalysisError, Result};

/// Deployment environment. Development logs at `debug`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl FromStr for Environment {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dev" | "development" => Ok(Environment::Development),
            "prod" | "production" => Ok(Environment::Production),
            other => Err(AnalysisError::InvalidConfig(format!("ENV: unknown environment `{}`", other))),
        }
    }
}

/// Which provider API the recognizer talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Ollama native API.
    Ollama,
    /// Any OpenAI-compatible chat completions API.
    OpenAi,
}

impl FromStr for BackendKind {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ollama" => Ok(BackendKind::Ollama),
            "openai" => Ok(BackendKind::OpenAi),
            other => Err(AnalysisError::InvalidConfig(format!("LLM_BACKEND: unknown backend `{}`", other))),
        }
    }
}

/// Configuration for the HTTP service and its recognition backend.
#[derive(Clone)]
pub struct Config {
    /// Host to bind (`SERVER_URL`).
    pub host: String,
    /// Port to bind (`PORT`).
    pub port: u16,
    /// `ENV`.
    pub environment: Environment,
    /// `LLM_BACKEND`.
    pub backend: BackendKind,
    /// `LLM_BASE_URL`.
    pub llm_base_url: String,
    /// `LLM_MODEL`.
    pub llm_model: String,
    /// `LLM_API_KEY`, sent as a bearer token by the OpenAI backend.
    pub llm_api_key: Option<String>,
    /// HTTP client timeout for one backend call (`LLM_TIMEOUT_SECS`).
    pub llm_timeout: Duration,
    /// Transport retries on 429/5xx/connection errors (`LLM_MAX_RETRIES`).
    pub llm_max_retries: u32,
    /// Re-asks after an unparsable reply (`LLM_PARSE_RETRIES`).
    pub llm_parse_retries: u32,
    /// Sampling temperature of the first attempt (`LLM_TEMPERATURE`).
    pub llm_temperature: f64,
    /// Reply length cap (`LLM_MAX_TOKENS`).
    pub llm_max_tokens: u32,
    /// Ask for JSON-only replies (`LLM_JSON_MODE`). Some OpenAI-compatible
    /// servers reject `response_format`.
    pub llm_json_mode: bool,
    /// Extra Ollama options as a JSON object (`LLM_OPTIONS`).
    pub llm_options: Option<Value>,
    /// Deadline for a whole request (`REQUEST_TIMEOUT_SECS`).
    pub request_timeout: Duration,
    /// Request body limit in bytes (`MAX_BODY_BYTES`).
    pub max_body_bytes: usize,
    /// Longest image side sent to the backend (`MAX_IMAGE_DIMENSION`).
    pub max_image_dimension: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8900,
            environment: Environment::Development,
            backend: BackendKind::Ollama,
            llm_base_url: "http://localhost:11434".to_string(),
            llm_model: "llama3.2-vision".to_string(),
            llm_api_key: None,
            llm_timeout: Duration::from_secs(60),
            llm_max_retries: 2,
            llm_parse_retries: 1,
            llm_temperature: 0.4,
            llm_max_tokens: 1024,
            llm_json_mode: true,
            llm_options: None,
            request_timeout: Duration::from_secs(90),
            max_body_bytes: 16 * 1024 * 1024,
            max_image_dimension: 1024,
        }
    }
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through `lookup`; unset or blank keys use defaults.
    ///
    /// # Example
    ///
    /// ```
    /// use inkcalc::config::{BackendKind, Config};
    ///
    /// let config = Config::from_lookup(|key| match key {
    ///     "PORT" => Some("9000".to_string()),
    ///     "LLM_BACKEND" => Some("openai".to_string()),
    ///     _ => None,
    /// })
    /// .unwrap();
    /// assert_eq!(config.bind_address(), "0.0.0.0:9000");
    /// assert_eq!(config.backend, BackendKind::OpenAi);
    /// ```
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        Ok(Self {
            host: get("SERVER_URL").unwrap_or(defaults.host),
            port: parse_or(&get, "PORT", defaults.port)?,
            environment: parse_or(&get, "ENV", defaults.environment)?,
            backend: parse_or(&get, "LLM_BACKEND", defaults.backend)?,
            llm_base_url: get("LLM_BASE_URL").unwrap_or(defaults.llm_base_url),
            llm_model: get("LLM_MODEL").unwrap_or(defaults.llm_model),
            llm_api_key: get("LLM_API_KEY"),
            llm_timeout: Duration::from_secs(parse_or(&get, "LLM_TIMEOUT_SECS", defaults.llm_timeout.as_secs())?),
            llm_max_retries: parse_or(&get, "LLM_MAX_RETRIES", defaults.llm_max_retries)?,
            llm_parse_retries: parse_or(&get, "LLM_PARSE_RETRIES", defaults.llm_parse_retries)?,
            llm_temperature: parse_or(&get, "LLM_TEMPERATURE", defaults.llm_temperature)?,
            llm_max_tokens: parse_or(&get, "LLM_MAX_TOKENS", defaults.llm_max_tokens)?,
            llm_json_mode: parse_or(&get, "LLM_JSON_MODE", defaults.llm_json_mode)?,
            llm_options: get("LLM_OPTIONS").map(|raw| parse_options(&raw)).transpose()?,
            request_timeout: Duration::from_secs(parse_or(
                &get,
                "REQUEST_TIMEOUT_SECS",
                defaults.request_timeout.as_secs(),
            )?),
            max_body_bytes: parse_or(&get, "MAX_BODY_BYTES", defaults.max_body_bytes)?,
            max_image_dimension: parse_or(&get, "MAX_IMAGE_DIMENSION", defaults.max_image_dimension)?,
        })
    }

    /// `host:port` for the listener.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn is_development(&self) -> bool {
        self.environment == Environment::Development
    }

    /// Per-call model settings for the recognizer.
    pub fn llm_config(&self) -> LlmConfig {
        let config = LlmConfig::default()
            .with_temperature(self.llm_temperature)
            .with_max_tokens(self.llm_max_tokens)
            .with_json_mode(self.llm_json_mode);
        match &self.llm_options {
            Some(options) => config.with_options(options.clone()),
            None => config,
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("bind", &self.bind_address())
            .field("environment", &self.environment)
            .field("backend", &self.backend)
            .field("llm_base_url", &self.llm_base_url)
            .field("llm_model", &self.llm_model)
            .field("llm_api_key", &self.llm_api_key.as_ref().map(|_| "***"))
            .field("llm_timeout", &self.llm_timeout)
            .field("llm_max_retries", &self.llm_max_retries)
            .field("llm_parse_retries", &self.llm_parse_retries)
            .field("llm_temperature", &self.llm_temperature)
            .field("llm_max_tokens", &self.llm_max_tokens)
            .field("llm_json_mode", &self.llm_json_mode)
            .field("llm_options", &self.llm_options)
            .field("request_timeout", &self.request_timeout)
            .field("max_body_bytes", &self.max_body_bytes)
            .field("max_image_dimension", &self.max_image_dimension)
            .finish()
    }
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|e| AnalysisError::InvalidConfig(format!("{}=`{}`: {}", key, raw, e))),
    }
}

fn parse_options(raw: &str) -> Result<Value> {
    match serde_json::from_str(raw) {
        Ok(options @ Value::Object(_)) => Ok(options),
        Ok(_) => Err(AnalysisError::InvalidConfig(format!(
            "LLM_OPTIONS=`{}`: expected a JSON object",
            raw
        ))),
        Err(e) => Err(AnalysisError::InvalidConfig(format!("LLM_OPTIONS=`{}`: {}", raw, e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<Config> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = from_pairs(&[]).unwrap();
        assert_eq!(config.bind_address(), "0.0.0.0:8900");
        assert!(config.is_development());
        assert_eq!(config.backend, BackendKind::Ollama);
        assert_eq!(config.llm_model, "llama3.2-vision");
        assert_eq!(config.llm_max_retries, 2);
        assert_eq!(config.llm_parse_retries, 1);
        assert_eq!(config.request_timeout, Duration::from_secs(90));
        assert_eq!(config.max_body_bytes, 16_777_216);
        assert_eq!(config.max_image_dimension, 1024);
        assert!(config.llm_api_key.is_none());

        let llm = config.llm_config();
        assert_eq!(llm.temperature, 0.4);
        assert_eq!(llm.max_tokens, 1024);
        assert!(llm.json_mode);
        assert!(llm.options.is_none());
    }

    #[test]
    fn test_model_settings_reach_llm_config() {
        let config = from_pairs(&[
            ("LLM_TEMPERATURE", "0.1"),
            ("LLM_MAX_TOKENS", "2048"),
            ("LLM_JSON_MODE", "false"),
            ("LLM_OPTIONS", r#"{"num_ctx": 8192}"#),
        ])
        .unwrap();
        let llm = config.llm_config();
        assert_eq!(llm.temperature, 0.1);
        assert_eq!(llm.max_tokens, 2048);
        assert!(!llm.json_mode);
        assert_eq!(llm.options, Some(serde_json::json!({"num_ctx": 8192})));
    }

    #[test]
    fn test_overrides() {
        let config = from_pairs(&[
            ("SERVER_URL", "127.0.0.1"),
            ("PORT", "3000"),
            ("ENV", "Production"),
            ("LLM_BACKEND", "OpenAI"),
            ("LLM_API_KEY", "sk-secret"),
            ("LLM_TIMEOUT_SECS", "15"),
            ("MAX_BODY_BYTES", "1024"),
        ])
        .unwrap();
        assert_eq!(config.bind_address(), "127.0.0.1:3000");
        assert_eq!(config.environment, Environment::Production);
        assert_eq!(config.backend, BackendKind::OpenAi);
        assert_eq!(config.llm_timeout, Duration::from_secs(15));
        assert_eq!(config.max_body_bytes, 1024);
        assert!(!format!("{:?}", config).contains("sk-secret"));
    }

    #[test]
    fn test_blank_values_use_defaults() {
        let config = from_pairs(&[("PORT", "  "), ("LLM_API_KEY", "")]).unwrap();
        assert_eq!(config.port, 8900);
        assert!(config.llm_api_key.is_none());
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let cases = [
            ("PORT", "eighty"),
            ("ENV", "staging"),
            ("LLM_BACKEND", "bard"),
            ("MAX_BODY_BYTES", "-1"),
            ("LLM_TEMPERATURE", "warm"),
            ("LLM_JSON_MODE", "yes"),
            ("LLM_OPTIONS", "[1]"),
            ("LLM_OPTIONS", "{oops"),
        ];
        for (key, value) in cases {
            let err = from_pairs(&[(key, value)]).unwrap_err();
            assert!(matches!(err, AnalysisError::InvalidConfig(ref m) if m.contains(key)), "{}", key);
        }
    }
}
