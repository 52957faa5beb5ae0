//! Error types for keel-client.

use std::fmt;

use thiserror::Error;

/// Which side of the exchange an HTTP failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpErrorKind {
    /// 4xx and any other non-success status below 500.
    Client,
    /// 5xx.
    Server,
}

impl HttpErrorKind {
    pub fn from_status(status: u16) -> Self {
        if status >= 500 { HttpErrorKind::Server } else { HttpErrorKind::Client }
    }
}

impl fmt::Display for HttpErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpErrorKind::Client => write!(f, "client"),
            HttpErrorKind::Server => write!(f, "server"),
        }
    }
}

/// The classified error every public request method rejects with.
///
/// Messages never carry raw server payloads; bodies are sanitised before a
/// message is extracted from them. The type is `Clone` because one failure
/// may be delivered to every caller sharing a deduplicated request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// The transport could not complete the exchange (DNS, refused, reset).
    #[error("network error: {message}")]
    Network { message: String },

    /// An attempt did not produce a response within its deadline.
    #[error("request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The caller's abort signal fired.
    #[error("request was cancelled")]
    Cancelled,

    /// The server answered with a non-success status.
    #[error("{kind} error {status}: {message}")]
    Http {
        kind: HttpErrorKind,
        status: u16,
        message: String,
    },

    /// A success status whose body could not be decoded.
    #[error("invalid response: {message}")]
    InvalidResponse { message: String },

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// The request body could not be serialised.
    #[error("failed to encode request body: {0}")]
    InvalidRequest(String),
}

impl ClientError {
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        ClientError::Http {
            kind: HttpErrorKind::from_status(status),
            status,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        ClientError::Network { message: message.into() }
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        ClientError::InvalidResponse { message: message.into() }
    }

    /// HTTP-style status for the failure; `0` when no response was received.
    pub fn status(&self) -> u16 {
        match self {
            ClientError::Network { .. }
            | ClientError::Cancelled
            | ClientError::InvalidUrl(_)
            | ClientError::InvalidRequest(_) => 0,
            ClientError::Timeout { .. } => 408,
            ClientError::Http { status, .. } => *status,
            ClientError::InvalidResponse { .. } => 500,
        }
    }

    pub fn message(&self) -> String {
        match self {
            ClientError::Http { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    /// Whether the retry executor may try again after this failure.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Network { .. } | ClientError::Timeout { .. } => true,
            ClientError::Http { status, .. } => crate::core::is_retryable_status(*status),
            ClientError::Cancelled
            | ClientError::InvalidResponse { .. }
            | ClientError::InvalidUrl(_)
            | ClientError::InvalidRequest(_) => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ClientError::Cancelled)
    }
}

impl From<TransportError> for ClientError {
    fn from(e: TransportError) -> Self {
        ClientError::network(e.to_string())
    }
}

impl From<url::ParseError> for ClientError {
    fn from(e: url::ParseError) -> Self {
        ClientError::InvalidUrl(e.to_string())
    }
}

/// Failure reported by a [`Transport`](crate::Transport) implementation.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("failed to read response body: {0}")]
    Body(String),

    #[error("{0}")]
    Other(String),
}

#[cfg(feature = "reqwest")]
impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() || e.is_request() {
            TransportError::Connection(e.to_string())
        } else if e.is_body() || e.is_decode() {
            TransportError::Body(e.to_string())
        } else {
            TransportError::Other(e.to_string())
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Figment(#[from] Box<figment::Error>),

    #[error("invalid base URL: {0}")]
    BaseUrl(#[from] url::ParseError),

    #[error("failed to build transport: {0}")]
    Transport(#[from] TransportError),
}

impl From<figment::Error> for ConfigError {
    fn from(e: figment::Error) -> Self {
        ConfigError::Figment(Box::new(e))
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(ClientError::network("refused").status(), 0);
        assert_eq!(ClientError::Cancelled.status(), 0);
        assert_eq!(ClientError::Timeout { timeout_ms: 10 }.status(), 408);
        assert_eq!(ClientError::http(503, "down").status(), 503);
        assert_eq!(ClientError::invalid_response("bad json").status(), 500);
    }

    #[test]
    fn http_kind_follows_status() {
        assert!(matches!(
            ClientError::http(404, "missing"),
            ClientError::Http { kind: HttpErrorKind::Client, .. }
        ));
        assert!(matches!(
            ClientError::http(502, "gateway"),
            ClientError::Http { kind: HttpErrorKind::Server, .. }
        ));
    }

    #[test]
    fn retryable_classes() {
        assert!(ClientError::network("reset").is_retryable());
        assert!(ClientError::Timeout { timeout_ms: 1 }.is_retryable());
        assert!(ClientError::http(429, "slow down").is_retryable());
        assert!(ClientError::http(500, "boom").is_retryable());
        assert!(!ClientError::http(404, "missing").is_retryable());
        assert!(!ClientError::Cancelled.is_retryable());
        assert!(!ClientError::invalid_response("x").is_retryable());
    }

    #[test]
    fn cancellation_is_distinguishable_from_network() {
        let cancelled = ClientError::Cancelled;
        let network = ClientError::network("offline");
        assert_eq!(cancelled.status(), network.status());
        assert!(cancelled.is_cancelled());
        assert!(!network.is_cancelled());
    }

    #[test]
    fn http_message_is_bare() {
        assert_eq!(ClientError::http(403, "Permission denied").message(), "Permission denied");
    }
}
