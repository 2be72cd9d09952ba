//! Error type shared by the request coordinator and the drive API.

use thiserror::Error;

/// Drive client error type
#[derive(Error, Debug, Clone)]
pub enum ApiError {
    /// The access token was rejected even after a refresh-and-retry.
    #[error("Access token expired")]
    AuthExpired,

    /// The refresh token is missing or was rejected; the session is over.
    #[error("Session terminated: {0}")]
    AuthInvalid(String),

    #[error("Network error: {0}")]
    NetworkFailure(String),

    #[error("Request rejected ({status}): {message}")]
    RequestRejected { status: u16, message: String },

    /// Some items of a bulk operation failed; the others went through.
    #[error("{failed} of {total} items failed: {reason}")]
    BulkIncomplete {
        failed: usize,
        total: usize,
        reason: String,
    },

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for ApiError {
    fn from(e: std::io::Error) -> Self {
        ApiError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        ApiError::ParseError(e.to_string())
    }
}

impl ApiError {
    /// Build a `RequestRejected` from a status and raw body, preferring the
    /// server's JSON `message` field when there is one.
    pub fn rejected(status: u16, body: &[u8]) -> Self {
        let message = serde_json::from_slice::<serde_json::Value>(body)
            .ok()
            .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
            .unwrap_or_else(|| sanitize_api_error(&String::from_utf8_lossy(body)));
        ApiError::RequestRejected { status, message }
    }

    /// True when the user has to sign in again.
    pub fn is_session_terminated(&self) -> bool {
        matches!(self, ApiError::AuthInvalid(_))
    }

    /// Check if this error is recoverable (the caller may try again later)
    pub fn is_recoverable(&self) -> bool {
        match self {
            ApiError::NetworkFailure(_) => true,
            ApiError::RequestRejected { status, .. } => *status >= 500,
            ApiError::BulkIncomplete { .. } => true,
            _ => false,
        }
    }
}

/// Trim an error body to something fit for a log line or a message box.
/// HTML error pages are replaced by a placeholder.
pub fn sanitize_api_error(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.starts_with("<!") || trimmed.starts_with("<html") {
        return "server returned an HTML error page".to_string();
    }
    if trimmed.is_empty() {
        return "no details".to_string();
    }
    trimmed.chars().take(200).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejected_prefers_json_message() {
        let err = ApiError::rejected(404, br#"{"message":"Folder not found"}"#);
        match err {
            ApiError::RequestRejected { status, message } => {
                assert_eq!(status, 404);
                assert_eq!(message, "Folder not found");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_rejected_falls_back_to_body() {
        let err = ApiError::rejected(500, b"<!DOCTYPE html><html></html>");
        assert_eq!(
            err.to_string(),
            "Request rejected (500): server returned an HTML error page"
        );
    }

    #[test]
    fn test_error_classification() {
        assert!(ApiError::AuthInvalid("gone".into()).is_session_terminated());
        assert!(!ApiError::AuthExpired.is_session_terminated());
        assert!(ApiError::NetworkFailure("reset".into()).is_recoverable());
        assert!(ApiError::RequestRejected { status: 503, message: String::new() }.is_recoverable());
        assert!(!ApiError::RequestRejected { status: 404, message: String::new() }.is_recoverable());
        let partial = ApiError::BulkIncomplete { failed: 1, total: 3, reason: "boom".into() };
        assert!(partial.is_recoverable());
        assert_eq!(partial.to_string(), "1 of 3 items failed: boom");
    }
}
