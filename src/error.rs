// Error handling module
// Defines the errors surfaced to calling features and the fallback messages

use std::time::Duration;
use thiserror::Error;

/// Errors returned by [`ApiClient`](crate::http_client::ApiClient) calls
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClientError {
    /// No response arrived before the per-call deadline
    #[error("Request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Transport-level failure (connection refused, DNS, reset...)
    #[error("Network error: {0}")]
    Network(String),

    /// Well-formed non-2xx response
    #[error("HTTP error {status}: {message}")]
    Http {
        status: u16,
        message: String,
        code: Option<String>,
    },

    /// Session is over; credentials have been cleared
    #[error("Authentication expired, please log in again")]
    AuthExpired,

    /// 2xx response whose body is not JSON
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// The request could not be built
    #[error("Invalid request: {0}")]
    Request(String),
}

impl ClientError {
    /// Stable machine-readable code for feature-specific handling
    pub fn code(&self) -> &'static str {
        match self {
            ClientError::Timeout { .. } => "TIMEOUT",
            ClientError::Network(_) => "NETWORK_ERROR",
            ClientError::Http { .. } => "HTTP_ERROR",
            ClientError::AuthExpired => "AUTH_EXPIRED",
            ClientError::InvalidResponse(_) => "INVALID_RESPONSE",
            ClientError::Request(_) => "INVALID_REQUEST",
        }
    }

    /// HTTP status, when the server answered
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Http { status, .. } => Some(*status),
            ClientError::AuthExpired => Some(401),
            _ => None,
        }
    }

    /// Whether the caller may reasonably try the same call again.
    /// The client itself never does.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::Timeout { .. } | ClientError::Network(_))
    }

    pub fn is_auth_expired(&self) -> bool {
        matches!(self, ClientError::AuthExpired)
    }
}

/// Human-readable fallback used when the server supplies no message
pub fn fallback_message(status: u16) -> String {
    match status {
        400 => "Invalid request. Please check your input.".to_string(),
        401 => "Your session has expired. Please log in again.".to_string(),
        403 => "You do not have permission to perform this action.".to_string(),
        404 => "The requested resource was not found.".to_string(),
        500 => "Server error. Please try again later.".to_string(),
        501 => "This feature is not available yet.".to_string(),
        _ => format!("Request failed with status {}", status),
    }
}

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Whole milliseconds of a deadline, saturating at `u64::MAX`
pub(crate) fn deadline_ms(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = ClientError::Timeout { timeout_ms: 50 };
        assert_eq!(err.to_string(), "Request timed out after 50ms");

        let err = ClientError::Http {
            status: 404,
            message: "Product not found".to_string(),
            code: None,
        };
        assert_eq!(err.to_string(), "HTTP error 404: Product not found");

        assert_eq!(
            ClientError::AuthExpired.to_string(),
            "Authentication expired, please log in again"
        );
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(ClientError::Timeout { timeout_ms: 1 }.code(), "TIMEOUT");
        assert_eq!(ClientError::Network("refused".into()).code(), "NETWORK_ERROR");
        assert_eq!(ClientError::AuthExpired.code(), "AUTH_EXPIRED");
        assert_eq!(
            ClientError::Http {
                status: 500,
                message: String::new(),
                code: None
            }
            .code(),
            "HTTP_ERROR"
        );
        assert_eq!(ClientError::InvalidResponse("x".into()).code(), "INVALID_RESPONSE");
        assert_eq!(ClientError::Request("x".into()).code(), "INVALID_REQUEST");
    }

    #[test]
    fn test_retryable() {
        assert!(ClientError::Timeout { timeout_ms: 10 }.is_retryable());
        assert!(ClientError::Network("dns".into()).is_retryable());
        assert!(!ClientError::AuthExpired.is_retryable());
        assert!(!ClientError::Http {
            status: 503,
            message: "down".into(),
            code: None
        }
        .is_retryable());
    }

    #[test]
    fn test_status() {
        assert_eq!(ClientError::AuthExpired.status(), Some(401));
        assert_eq!(ClientError::Timeout { timeout_ms: 1 }.status(), None);
        let err = ClientError::Http {
            status: 403,
            message: "no".into(),
            code: Some("FORBIDDEN".into()),
        };
        assert_eq!(err.status(), Some(403));
    }

    #[test]
    fn test_fallback_messages() {
        assert_eq!(
            fallback_message(400),
            "Invalid request. Please check your input."
        );
        assert_eq!(
            fallback_message(403),
            "You do not have permission to perform this action."
        );
        assert_eq!(fallback_message(404), "The requested resource was not found.");
        assert_eq!(fallback_message(500), "Server error. Please try again later.");
        assert_eq!(fallback_message(501), "This feature is not available yet.");
        assert_eq!(fallback_message(418), "Request failed with status 418");
    }

    #[test]
    fn test_deadline_ms_saturates() {
        assert_eq!(deadline_ms(Duration::from_millis(250)), 250);
        assert_eq!(deadline_ms(Duration::from_micros(1500)), 1);
        assert_eq!(deadline_ms(Duration::MAX), u64::MAX);
    }
}
