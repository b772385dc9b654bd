//! Parse diagnostics for recognition replies.
//!
//! [`ParseDiagnostics`] records what happened while turning a model reply
//! into recognized items: which extraction strategy worked, how many retries
//! were needed, and whether the reply had to be repaired.

/// Records what happened during reply parsing.
///
/// Produced by [`LlmRecognizer`](crate::recognizer::LlmRecognizer) for every
/// recognition and logged at `debug`.
///
/// # Example
///
/// ```
/// use inkcalc::diagnostics::ParseDiagnostics;
///
/// let diag = ParseDiagnostics::default();
/// assert!(diag.ok());
/// ```
#[derive(Debug, Clone, Default)]
pub struct ParseDiagnostics {
    /// Where the JSON was found: `"direct"`, `"code_block"` or `"bracket"`.
    pub strategy: Option<&'static str>,

    /// If parsing failed, the error message. `None` means success.
    pub parse_error: Option<String>,

    /// Number of semantic retry attempts (0 = the initial reply parsed).
    pub retry_attempts: u32,

    /// Number of transport retries (429, 5xx) across all calls.
    pub transport_retries: u32,

    /// Total time spent in backoff delays (milliseconds).
    pub backoff_total_ms: u64,

    /// Whether JSON repair was applied (Python literals, single quotes, etc.).
    pub repaired: bool,

    /// Number of items kept from the reply.
    pub items: usize,
}

impl ParseDiagnostics {
    /// Quick check: did parsing succeed?
    pub fn ok(&self) -> bool {
        self.parse_error.is_none()
    }
}
