//! The response envelope returned by `POST /api/calculate-results`.

use serde::Serialize;

use crate::error::AnalysisError;
use crate::types::ResultRecord;

/// `{status, message, data}`: `data` holds every record on success and is
/// always empty on failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisResponse {
    pub status: &'static str,
    pub message: String,
    pub data: Vec<ResultRecord>,
}

impl AnalysisResponse {
    /// Records in recognition order.
    pub fn success(records: Vec<ResultRecord>) -> Self {
        Self {
            status: "success",
            message: "Image processed".to_string(),
            data: records,
        }
    }

    /// A failure carrying only the client-facing message for `error`.
    pub fn failure(error: &AnalysisError) -> Self {
        Self::error_message(error.public_message())
    }

    /// A failure with a fixed message, for errors raised before analysis.
    pub fn error_message(message: impl Into<String>) -> Self {
        Self {
            status: "error",
            message: message.into(),
            data: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == "success"
    }
}
