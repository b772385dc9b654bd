//! Semantic retry with error feedback for recognition replies.
//!
//! When a model reply cannot be turned into recognized items, the
//! [`LlmRecognizer`](crate::recognizer::LlmRecognizer) re-asks with the
//! original request, the bad reply, and a correction message describing what
//! went wrong. [`RetryConfig`] bounds how often that happens.

/// Configuration for LLM-in-the-loop retry on unparsable replies.
///
/// # Example
///
/// ```
/// use inkcalc::retry::RetryConfig;
///
/// let config = RetryConfig::new(2);
/// assert_eq!(config.temperature_for(0.4, 1), 0.2);
///
/// let flat = RetryConfig::new(2).no_cool_down();
/// assert_eq!(flat.temperature_for(0.4, 1), 0.4);
/// ```
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum retry attempts (not counting the initial call). Range: 0-5.
    pub max_retries: u32,

    /// Lower temperature on each retry. Default: `true`.
    /// Drops by 0.2 per retry (floored at 0.0).
    pub cool_down: bool,
}

impl RetryConfig {
    /// Retry up to N times.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries: max_retries.min(5),
            cool_down: true,
        }
    }

    /// Disable temperature cool-down.
    pub fn no_cool_down(mut self) -> Self {
        self.cool_down = false;
        self
    }

    /// Temperature to use for retry `attempt` (1-indexed).
    pub fn temperature_for(&self, base: f64, attempt: u32) -> f64 {
        if !self.cool_down {
            return base;
        }
        let cooled = base - 0.2 * attempt as f64;
        // Keep one decimal so 0.4 - 0.2 is exactly 0.2.
        ((cooled * 10.0).round() / 10.0).max(0.0)
    }
}
