use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

/// Body shape shared by every API endpoint.
///
/// ```json
/// { "isSuccess": true, "code": 1000, "message": "ok", "result": { ... } }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", bound(deserialize = "T: Deserialize<'de>"))]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Envelope<T> {
    pub is_success: bool,
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub result: Option<T>,
}

/// A completed request: transport status plus the API envelope.
#[derive(Debug, Clone)]
pub struct ApiResponse<T> {
    pub status: StatusCode,
    pub envelope: Envelope<T>,
}

impl<T> ApiResponse<T> {
    /// True when both the transport and the API report success
    pub fn is_success(&self) -> bool {
        self.status.is_success() && self.envelope.is_success
    }

    pub fn code(&self) -> Option<i64> {
        self.envelope.code
    }

    pub fn message(&self) -> Option<&str> {
        self.envelope.message.as_deref()
    }

    pub fn result(&self) -> Option<&T> {
        self.envelope.result.as_ref()
    }

    pub fn into_result(self) -> Option<T> {
        self.envelope.result
    }
}
