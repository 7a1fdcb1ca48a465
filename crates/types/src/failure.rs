use serde::{Deserialize, Serialize};
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

/// Raw failure reported by a remote call, before classification
#[derive(Debug, Clone)]
pub struct ApiFailure {
    /// HTTP-style status code, when the transport produced one
    pub status: Option<u16>,
    pub message: String,
    pub cause: Option<Arc<dyn StdError + Send + Sync>>,
}

impl ApiFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
            cause: None,
        }
    }

    pub fn with_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
            cause: None,
        }
    }

    pub fn with_cause(mut self, cause: impl StdError + Send + Sync + 'static) -> Self {
        self.cause = Some(Arc::new(cause));
        self
    }

    pub fn code(&self) -> ErrorCode {
        ErrorCode::from_failure(self)
    }
}

impl fmt::Display for ApiFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "[{status}] {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl StdError for ApiFailure {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause
            .as_ref()
            .map(|cause| cause.as_ref() as &(dyn StdError + 'static))
    }
}

/// Machine-readable failure code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    RateLimit,
    Authentication,
    Authorization,
    NotFound,
    Validation,
    ServerError,
    NetworkError,
    Timeout,
    Unknown,
    // Internal conditions
    RollbackFailed,
    InvalidTransition,
    QueueTimeout,
    Cancelled,
    Configuration,
}

const NETWORK_PATTERNS: [&str; 3] = ["network", "connection", "offline"];

impl ErrorCode {
    /// Classify a raw failure; status codes win over message patterns
    pub fn from_failure(failure: &ApiFailure) -> Self {
        if let Some(status) = failure.status {
            return match status {
                429 => ErrorCode::RateLimit,
                401 => ErrorCode::Authentication,
                403 => ErrorCode::Authorization,
                404 => ErrorCode::NotFound,
                400 => ErrorCode::Validation,
                s if s >= 500 => ErrorCode::ServerError,
                _ => ErrorCode::Unknown,
            };
        }

        let message = failure.message.to_ascii_lowercase();
        if NETWORK_PATTERNS.iter().any(|p| message.contains(p)) {
            ErrorCode::NetworkError
        } else if message.contains("timeout") {
            ErrorCode::Timeout
        } else {
            ErrorCode::Unknown
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::RateLimit
                | ErrorCode::ServerError
                | ErrorCode::NetworkError
                | ErrorCode::Timeout
                | ErrorCode::QueueTimeout
        )
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            ErrorCode::RateLimit => ErrorCategory::ApiLimit,
            ErrorCode::NetworkError | ErrorCode::Timeout => ErrorCategory::Network,
            ErrorCode::Validation => ErrorCategory::Validation,
            ErrorCode::Authentication
            | ErrorCode::Authorization
            | ErrorCode::NotFound
            | ErrorCode::ServerError => ErrorCategory::ApiError,
            ErrorCode::RollbackFailed
            | ErrorCode::InvalidTransition
            | ErrorCode::QueueTimeout
            | ErrorCode::Cancelled
            | ErrorCode::Configuration => ErrorCategory::System,
            ErrorCode::Unknown => ErrorCategory::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::RateLimit => "RATE_LIMIT",
            ErrorCode::Authentication => "AUTHENTICATION",
            ErrorCode::Authorization => "AUTHORIZATION",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::Validation => "VALIDATION",
            ErrorCode::ServerError => "SERVER_ERROR",
            ErrorCode::NetworkError => "NETWORK_ERROR",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::Unknown => "UNKNOWN",
            ErrorCode::RollbackFailed => "ROLLBACK_FAILED",
            ErrorCode::InvalidTransition => "INVALID_TRANSITION",
            ErrorCode::QueueTimeout => "QUEUE_TIMEOUT",
            ErrorCode::Cancelled => "CANCELLED",
            ErrorCode::Configuration => "CONFIGURATION",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse error taxonomy used for routing and metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    ApiError,
    ApiLimit,
    Network,
    Validation,
    System,
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::ApiError => "API_ERROR",
            ErrorCategory::ApiLimit => "API_LIMIT",
            ErrorCategory::Network => "NETWORK",
            ErrorCategory::Validation => "VALIDATION",
            ErrorCategory::System => "SYSTEM",
            ErrorCategory::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_classify_first() {
        let cases = [
            (429, ErrorCode::RateLimit, true),
            (401, ErrorCode::Authentication, false),
            (403, ErrorCode::Authorization, false),
            (404, ErrorCode::NotFound, false),
            (400, ErrorCode::Validation, false),
            (500, ErrorCode::ServerError, true),
            (503, ErrorCode::ServerError, true),
            (409, ErrorCode::Unknown, false),
        ];

        for (status, code, retryable) in cases {
            // message mentions a network problem but the status wins
            let failure = ApiFailure::with_status(status, "network hiccup");
            assert_eq!(failure.code(), code, "status {status}");
            assert_eq!(code.is_retryable(), retryable, "status {status}");
        }
    }

    #[test]
    fn test_message_patterns_without_status() {
        assert_eq!(
            ApiFailure::new("Connection reset by peer").code(),
            ErrorCode::NetworkError
        );
        assert_eq!(ApiFailure::new("client is OFFLINE").code(), ErrorCode::NetworkError);
        assert_eq!(ApiFailure::new("request timeout").code(), ErrorCode::Timeout);
        assert_eq!(ApiFailure::new("something odd").code(), ErrorCode::Unknown);
        assert!(!ErrorCode::Unknown.is_retryable());
    }

    #[test]
    fn test_categories() {
        assert_eq!(ErrorCode::RateLimit.category(), ErrorCategory::ApiLimit);
        assert_eq!(ErrorCode::Validation.category(), ErrorCategory::Validation);
        assert_eq!(ErrorCode::RollbackFailed.category(), ErrorCategory::System);
        assert_eq!(ErrorCode::NotFound.category(), ErrorCategory::ApiError);
    }

    #[test]
    fn test_failure_display_and_source() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "socket closed");
        let failure = ApiFailure::with_status(502, "bad gateway").with_cause(io);

        assert_eq!(failure.to_string(), "[502] bad gateway");
        assert_eq!(failure.source().unwrap().to_string(), "socket closed");
    }
}
