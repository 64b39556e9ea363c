//! Error types for the authenticated request pipeline

use thiserror::Error;

use crate::auth::TokenError;

/// Main error type for the request pipeline
#[derive(Error, Debug)]
pub enum PipelineError {
    /// No response was received (connection refused, DNS, TLS, timeout, ...)
    #[error("Network error: {0}")]
    Network(String),

    /// The API answered 401; the access token is no longer accepted
    #[error("Access token expired or rejected (401)")]
    AuthExpired,

    /// A refresh was needed but no refresh token is stored
    #[error("No refresh token available; sign in again")]
    RefreshUnavailable,

    /// The refresh endpoint failed or timed out
    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    /// Any other non-2xx response, passed through unchanged
    #[error("Request failed with status {status}: {message}")]
    RequestError {
        /// HTTP status code
        status: u16,
        /// Error text (the body's `message` field when present)
        message: String,
        /// Raw response body
        body: String,
    },

    /// The request was replayed once with a fresh token and was rejected again
    #[error("Request still unauthorized after token refresh")]
    RetryExhausted,

    /// Credential store failure
    #[error("Credential store error: {0}")]
    Storage(#[from] TokenError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Request could not be built
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Response body could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// The caller cancelled the request while it was suspended
    #[error("Request cancelled")]
    Cancelled,
}

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

impl PipelineError {
    /// Create a network error
    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    /// Create a refresh failure
    pub fn refresh_failed(msg: impl Into<String>) -> Self {
        Self::RefreshFailed(msg.into())
    }

    /// Create a request error for a non-2xx, non-401 response
    pub fn request(status: u16, message: impl Into<String>, body: impl Into<String>) -> Self {
        Self::RequestError {
            status,
            message: message.into(),
            body: body.into(),
        }
    }

    /// Create an invalid configuration error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create an invalid request error
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Create a decode error
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Whether this error means the session is unrecoverable without signing in again.
    ///
    /// Callers typically clear credentials and redirect to a login flow when this is true.
    #[must_use]
    pub fn is_terminal_auth(&self) -> bool {
        matches!(
            self,
            Self::RefreshUnavailable | Self::RefreshFailed(_) | Self::RetryExhausted
        )
    }

    /// HTTP status associated with this error, if any
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::AuthExpired | Self::RetryExhausted => Some(401),
            Self::RequestError { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_auth_classification() {
        assert!(PipelineError::RefreshUnavailable.is_terminal_auth());
        assert!(PipelineError::refresh_failed("boom").is_terminal_auth());
        assert!(PipelineError::RetryExhausted.is_terminal_auth());

        assert!(!PipelineError::AuthExpired.is_terminal_auth());
        assert!(!PipelineError::network("refused").is_terminal_auth());
        assert!(!PipelineError::request(500, "oops", "").is_terminal_auth());
    }

    #[test]
    fn test_status() {
        assert_eq!(PipelineError::AuthExpired.status(), Some(401));
        assert_eq!(PipelineError::request(404, "missing", "").status(), Some(404));
        assert_eq!(PipelineError::network("refused").status(), None);
    }

    #[test]
    fn test_request_error_display_uses_message() {
        let err = PipelineError::request(422, "email already taken", r#"{"message":"email already taken"}"#);
        assert_eq!(
            err.to_string(),
            "Request failed with status 422: email already taken"
        );
    }
}
