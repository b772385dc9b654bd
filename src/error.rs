use std::time::Duration;
use thiserror::Error;

use crate::decode::DecodeError;

/// Errors produced by the analysis pipeline and its components.
#[derive(Error, Debug)]
pub enum AnalysisError {
    /// The inbound data-URL could not be turned into pixel data.
    #[error("image decode failed: {0}")]
    Decode(#[from] DecodeError),

    /// The recognition backend could not be queried or its reply could not
    /// be understood.
    #[error("recognition failed: {0}")]
    RecognitionFailed(String),

    /// Low-level HTTP transport failure (connection refused, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// JSON parsing failed at the serde level.
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error with status code, response body, and optional Retry-After hint.
    ///
    /// Returned by [`Backend`](crate::backend::Backend) implementations when
    /// the provider returns a non-success status code. The `retry_after` field
    /// is populated from the `Retry-After` response header when present.
    #[error("HTTP {status}: {body}")]
    HttpError {
        /// HTTP status code (e.g. 429, 500, 503).
        status: u16,
        /// Response body text.
        body: String,
        /// Parsed `Retry-After` header value, if present.
        retry_after: Option<Duration>,
    },

    /// The analysis was cancelled via the cancellation flag.
    #[error("analysis was cancelled")]
    Cancelled,

    /// The request did not finish within the configured deadline.
    #[error("analysis timed out after {0:?}")]
    Timeout(Duration),

    /// Invalid configuration detected at startup.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Catch-all for other errors.
    #[error("{0}")]
    Other(String),
}

impl AnalysisError {
    /// HTTP status code the transport layer answers with for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            AnalysisError::Decode(_) => 400,
            AnalysisError::RecognitionFailed(_)
            | AnalysisError::Request(_)
            | AnalysisError::Json(_)
            | AnalysisError::HttpError { .. } => 502,
            AnalysisError::Cancelled => 503,
            AnalysisError::Timeout(_) => 504,
            AnalysisError::InvalidConfig(_) | AnalysisError::Other(_) => 500,
        }
    }

    /// Client-facing message. Never carries backend bodies or internal detail.
    pub fn public_message(&self) -> &'static str {
        match self {
            AnalysisError::Decode(_) => "Invalid image payload",
            AnalysisError::RecognitionFailed(_)
            | AnalysisError::Request(_)
            | AnalysisError::Json(_)
            | AnalysisError::HttpError { .. } => "Recognition failed, please retry",
            AnalysisError::Cancelled => "Service is shutting down",
            AnalysisError::Timeout(_) => "Image analysis timed out",
            AnalysisError::InvalidConfig(_) | AnalysisError::Other(_) => "Internal server error",
        }
    }
}

pub type Result<T> = std::result::Result<T, AnalysisError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_errors_are_client_errors() {
        let err = AnalysisError::from(DecodeError::MalformedPayload);
        assert_eq!(err.status_code(), 400);
        assert_eq!(err.public_message(), "Invalid image payload");
    }

    #[test]
    fn test_backend_errors_collapse_to_recognition_failure() {
        let http = AnalysisError::HttpError {
            status: 503,
            body: "upstream stack trace".into(),
            retry_after: None,
        };
        assert_eq!(http.status_code(), 502);
        assert!(!http.public_message().contains("stack trace"));

        let failed = AnalysisError::RecognitionFailed("no items array".into());
        assert_eq!(failed.status_code(), 502);
        assert_eq!(failed.public_message(), http.public_message());
    }

    #[test]
    fn test_timeout_and_cancel_statuses() {
        assert_eq!(AnalysisError::Timeout(Duration::from_secs(1)).status_code(), 504);
        assert_eq!(AnalysisError::Cancelled.status_code(), 503);
        assert_eq!(AnalysisError::InvalidConfig("x".into()).status_code(), 500);
    }
}
