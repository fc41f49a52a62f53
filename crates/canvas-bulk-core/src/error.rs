//! Error types for task operations, batch execution and pagination

use std::fmt;

/// Status code attached to a failed operation.
///
/// Usually an HTTP status, but application-level failures surfaced inside a
/// 2xx body may carry a textual code instead.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Status {
    Code(u16),
    Text(String),
}

impl Status {
    /// Numeric HTTP status, if this is one
    pub fn code(&self) -> Option<u16> {
        match self {
            Self::Code(c) => Some(*c),
            Self::Text(_) => None,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Code(c) => write!(f, "{c}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<u16> for Status {
    fn from(code: u16) -> Self {
        Self::Code(code)
    }
}

impl From<&str> for Status {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

/// Error returned by a single task operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// Request never produced a response (connect, DNS, TLS, timeout)
    Network { message: String },
    /// Non-2xx response
    Http { status: u16, message: String },
    /// Transport succeeded but the body reports a failure
    Application { status: Status, message: String },
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network { message } => write!(f, "network error: {message}"),
            Self::Http { status, message } => write!(f, "HTTP {status}: {message}"),
            Self::Application { status, message } => {
                write!(f, "application error ({status}): {message}")
            }
        }
    }
}

impl std::error::Error for TaskError {}

impl TaskError {
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: message.into(),
        }
    }

    pub fn application(status: impl Into<Status>, message: impl Into<String>) -> Self {
        Self::Application {
            status: status.into(),
            message: message.into(),
        }
    }

    /// Create from a reqwest error. Errors without a status never reached the server.
    pub fn from_reqwest(e: reqwest::Error) -> Self {
        let status = e.status();
        // Strip URL to avoid leaking tokens or ids from query strings in logs
        let message = e.without_url().to_string();
        match status {
            Some(status) => Self::Http {
                status: status.as_u16(),
                message,
            },
            None => Self::Network { message },
        }
    }

    /// Human-readable reason without the status prefix
    pub fn message(&self) -> &str {
        match self {
            Self::Network { message } | Self::Http { message, .. } => message,
            Self::Application { message, .. } => message,
        }
    }

    /// Status code, absent for network errors
    pub fn status(&self) -> Option<Status> {
        match self {
            Self::Network { .. } => None,
            Self::Http { status, .. } => Some(Status::Code(*status)),
            Self::Application { status, .. } => Some(status.clone()),
        }
    }

    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network { .. })
    }

    /// Transient failures worth another attempt: no response, rate limit, gateway errors.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. } => true,
            Self::Http { status, .. } => matches!(status, 429 | 500 | 502 | 503 | 504),
            Self::Application { .. } => false,
        }
    }

    /// Failures where the server declined the request before acting on it.
    ///
    /// A network error may hide a request that was processed, so only
    /// these are safe to resend for non-idempotent methods.
    pub fn is_rejected_unprocessed(&self) -> bool {
        matches!(self, Self::Http { status: 429 | 502 | 503 | 504, .. })
    }
}

/// Malformed executor input. Task failures never produce this.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchError {
    InvalidBatchSize(usize),
}

impl fmt::Display for BatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidBatchSize(n) => write!(f, "batch size must be at least 1, got {n}"),
        }
    }
}

impl std::error::Error for BatchError {}

/// Error while walking a paginated resource.
#[derive(Debug)]
pub enum PaginationError {
    /// A page request failed
    Request(TaskError),
    /// Response body did not have the expected shape
    UnexpectedBody { url: String, expected: &'static str },
    /// Connection path resolved to nothing
    ConnectionNotFound { path: String },
    /// `hasNextPage` was true but no `endCursor` was provided
    MissingCursor { path: String },
    /// A `next` link pointed at a page that was already fetched
    LinkCycle { url: String },
}

impl fmt::Display for PaginationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Request(e) => write!(f, "page request failed: {e}"),
            Self::UnexpectedBody { url, expected } => {
                write!(f, "unexpected response body from {url}: expected {expected}")
            }
            Self::ConnectionNotFound { path } => write!(
                f,
                "no connection found at '{path}'; check that the upstream identifier (e.g. course id) is valid"
            ),
            Self::MissingCursor { path } => {
                write!(f, "'{path}' reports another page but has no endCursor")
            }
            Self::LinkCycle { url } => write!(f, "pagination loops back to {url}"),
        }
    }
}

impl std::error::Error for PaginationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Request(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TaskError> for PaginationError {
    fn from(e: TaskError) -> Self {
        Self::Request(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_has_no_status() {
        let err = TaskError::network("connection refused");
        assert!(err.is_network());
        assert_eq!(err.status(), None);
    }

    #[test]
    fn http_status_recorded() {
        let err = TaskError::http(404, "not found");
        assert!(!err.is_network());
        assert_eq!(err.status(), Some(Status::Code(404)));
    }

    #[test]
    fn application_text_status() {
        let err = TaskError::application("invalid_state", "already published");
        assert_eq!(err.status(), Some(Status::Text("invalid_state".to_string())));
        assert_eq!(err.message(), "already published");
    }

    #[test]
    fn gateway_errors_retryable() {
        assert!(TaskError::http(502, "bad gateway").is_retryable());
        assert!(TaskError::http(504, "timeout").is_retryable());
        assert!(TaskError::http(429, "slow down").is_retryable());
        assert!(TaskError::network("reset").is_retryable());
    }

    #[test]
    fn client_errors_not_retryable() {
        for status in [400, 401, 403, 404, 422] {
            assert!(!TaskError::http(status, "x").is_retryable(), "{status}");
        }
        assert!(!TaskError::application(200u16, "errors").is_retryable());
    }

    #[test]
    fn rejected_unprocessed_excludes_network_and_500() {
        assert!(TaskError::http(429, "slow down").is_rejected_unprocessed());
        assert!(TaskError::http(503, "unavailable").is_rejected_unprocessed());
        assert!(!TaskError::network("timed out").is_rejected_unprocessed());
        assert!(!TaskError::http(500, "oops").is_rejected_unprocessed());
    }

    #[test]
    fn display_formats() {
        assert_eq!(format!("{}", TaskError::http(422, "bad")), "HTTP 422: bad");
        assert_eq!(
            format!("{}", TaskError::network("dns")),
            "network error: dns"
        );
        assert_eq!(
            format!("{}", BatchError::InvalidBatchSize(0)),
            "batch size must be at least 1, got 0"
        );
    }

    #[test]
    fn connection_not_found_mentions_identifier() {
        let err = PaginationError::ConnectionNotFound {
            path: "course.assignmentsConnection".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("course.assignmentsConnection"));
        assert!(msg.contains("identifier"));
    }
}
