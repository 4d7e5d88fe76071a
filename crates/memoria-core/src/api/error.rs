use reqwest::StatusCode;
use thiserror::Error;

use crate::auth::StorageError;

use super::envelope::Envelope;

/// Failed responses keep their complete body; only the `Display` text is
/// shortened.
#[derive(Error, Debug)]
pub enum ApiError {
    /// The access token was rejected and refreshing it failed. All stored
    /// secrets have been cleared; route the user back to login.
    #[error("Session expired - please log in again")]
    SessionExpired,

    #[error("Unauthorized - token rejected after refresh")]
    Unauthorized,

    #[error("Access denied: {}", truncate_body(.0))]
    AccessDenied(String),

    #[error("Resource not found: {}", truncate_body(.0))]
    NotFound(String),

    #[error("Rate limited - please wait before retrying")]
    RateLimited(String),

    #[error("Server error ({status}): {}", truncate_body(.body))]
    ServerError { status: StatusCode, body: String },

    #[error("Request failed ({status}): {}", truncate_body(.body))]
    Status { status: StatusCode, body: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Truncate a response body to avoid logging excessive data
fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY_LENGTH {
        body.to_string()
    } else {
        let mut end = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
    }
}

impl ApiError {
    /// Classify a non-success response that is not an authorization failure
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let body = body.to_string();
        match status.as_u16() {
            401 => ApiError::Unauthorized,
            403 => ApiError::AccessDenied(body),
            404 => ApiError::NotFound(body),
            429 => ApiError::RateLimited(body),
            500..=599 => ApiError::ServerError { status, body },
            _ => ApiError::Status { status, body },
        }
    }

    /// HTTP status of the failed response, when there was one
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ApiError::SessionExpired | ApiError::Unauthorized => Some(StatusCode::UNAUTHORIZED),
            ApiError::AccessDenied(_) => Some(StatusCode::FORBIDDEN),
            ApiError::NotFound(_) => Some(StatusCode::NOT_FOUND),
            ApiError::RateLimited(_) => Some(StatusCode::TOO_MANY_REQUESTS),
            ApiError::ServerError { status, .. } | ApiError::Status { status, .. } => Some(*status),
            ApiError::Network(e) => e.status(),
            ApiError::InvalidResponse(_)
            | ApiError::InvalidHeader(_)
            | ApiError::Storage(_) => None,
        }
    }

    /// Complete body of the failed response, exactly as the server sent it
    pub fn body(&self) -> Option<&str> {
        match self {
            ApiError::AccessDenied(body)
            | ApiError::NotFound(body)
            | ApiError::RateLimited(body)
            | ApiError::ServerError { body, .. }
            | ApiError::Status { body, .. } => Some(body.as_str()),
            _ => None,
        }
    }

    /// The API envelope of the failed response, if the body carried one
    pub fn envelope(&self) -> Option<Envelope<serde_json::Value>> {
        self.body().and_then(|body| serde_json::from_str(body).ok())
    }

    pub fn is_session_expired(&self) -> bool {
        matches!(self, ApiError::SessionExpired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status() {
        assert!(matches!(
            ApiError::from_status(StatusCode::UNAUTHORIZED, ""),
            ApiError::Unauthorized
        ));
        assert!(matches!(
            ApiError::from_status(StatusCode::FORBIDDEN, "no"),
            ApiError::AccessDenied(b) if b == "no"
        ));
        assert!(matches!(
            ApiError::from_status(StatusCode::TOO_MANY_REQUESTS, ""),
            ApiError::RateLimited(_)
        ));

        let err = ApiError::from_status(StatusCode::BAD_GATEWAY, "upstream down");
        assert_eq!(err.status(), Some(StatusCode::BAD_GATEWAY));
        assert_eq!(err.to_string(), "Server error (502 Bad Gateway): upstream down");

        let err = ApiError::from_status(StatusCode::UNPROCESSABLE_ENTITY, "{}");
        assert!(matches!(err, ApiError::Status { .. }));
        assert!(!err.is_session_expired());
    }

    #[test]
    fn test_long_body_kept_whole_but_displayed_short() {
        let message = "m".repeat(600);
        let body = format!(r#"{{"isSuccess": false, "code": 4001, "message": "{}"}}"#, message);
        let err = ApiError::from_status(StatusCode::BAD_REQUEST, &body);

        assert_eq!(err.body(), Some(body.as_str()));
        let envelope = err.envelope().unwrap();
        assert_eq!(envelope.code, Some(4001));
        assert_eq!(envelope.message.as_deref(), Some(message.as_str()));

        assert!(err.to_string().contains("(truncated,"));
    }

    #[test]
    fn test_truncate_body() {
        let long = "x".repeat(MAX_ERROR_BODY_LENGTH + 10);
        assert!(truncate_body(&long).ends_with("(truncated, 510 total bytes)"));

        // Never splits a multi-byte character
        let korean = "추".repeat(MAX_ERROR_BODY_LENGTH);
        assert!(truncate_body(&korean).contains("truncated"));
    }
}
