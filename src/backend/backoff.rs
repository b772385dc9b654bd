//! Transport retry delays for backend calls.
//!
//! A user is waiting on every recognition, so the service runs with
//! [`BackoffConfig::interactive()`]: a couple of quick retries with jitter,
//! never sleeping longer than a few seconds. `LLM_MAX_RETRIES` sets the count.

use std::time::Duration;

/// How transient backend failures (429, 5xx, dropped connections) are retried.
///
/// # Example
///
/// ```
/// use inkcalc::backend::BackoffConfig;
///
/// let config = BackoffConfig::interactive().with_max_retries(4);
/// assert_eq!(config.max_retries, 4);
/// assert!(BackoffConfig::default().max_retries == 0);
/// ```
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Retries after the first attempt. 0 disables retry.
    pub max_retries: u32,

    /// Delay before the first retry.
    pub initial_delay: Duration,

    /// Growth factor between consecutive delays.
    pub multiplier: f64,

    /// Upper bound for any single delay, `Retry-After` included.
    pub max_delay: Duration,

    /// Randomization applied to each delay.
    pub jitter: JitterStrategy,

    /// HTTP statuses worth retrying.
    pub retryable_statuses: Vec<u16>,

    /// Sleep for the provider's `Retry-After` instead of the computed delay.
    pub respect_retry_after: bool,
}

/// Randomization of retry delays, so concurrent requests hitting the same
/// rate limit do not retry in lockstep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JitterStrategy {
    /// Exactly the computed delay.
    None,
    /// Uniform in `[0, delay]`.
    Full,
    /// `delay / 2` plus uniform in `[0, delay / 2]`.
    Equal,
}

impl BackoffConfig {
    /// Never retry.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::interactive()
        }
    }

    /// Two retries starting at 500ms, growing 1.5x, capped at 5s.
    pub fn interactive() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(500),
            multiplier: 1.5,
            max_delay: Duration::from_secs(5),
            jitter: JitterStrategy::Full,
            retryable_statuses: vec![429, 500, 502, 503, 504],
            respect_retry_after: true,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Delay before retry `attempt` (0-indexed): `initial * multiplier^attempt`,
    /// capped at `max_delay`, then jittered.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = base.min(self.max_delay.as_secs_f64());

        let seconds = match self.jitter {
            JitterStrategy::None => capped,
            JitterStrategy::Full => fastrand::f64() * capped,
            JitterStrategy::Equal => capped / 2.0 + fastrand::f64() * (capped / 2.0),
        };
        Duration::from_secs_f64(seconds)
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self::none()
    }
}
