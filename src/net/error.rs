use std::fmt::{Display, Formatter};

use serde::Serialize;

/// Classification of a failed network exchange, as seen by the transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportErrorKind {
    InvalidRequest,
    Connect,
    Timeout,
    Cancelled,
    Body,
    Authentication,
    Decode,
    Other,
}

impl TransportErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportErrorKind::InvalidRequest => "net/invalid-request",
            TransportErrorKind::Connect => "net/connect",
            TransportErrorKind::Timeout => "net/timeout",
            TransportErrorKind::Cancelled => "net/cancelled",
            TransportErrorKind::Body => "net/body",
            TransportErrorKind::Authentication => "net/authentication",
            TransportErrorKind::Decode => "net/decode",
            TransportErrorKind::Other => "net/other",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportError {
    pub kind: TransportErrorKind,
    message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn code_str(&self) -> &'static str {
        self.kind.as_str()
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == TransportErrorKind::Cancelled
    }
}

impl Display for TransportError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code_str())
    }
}

impl std::error::Error for TransportError {}

pub type TransportResult<T> = Result<T, TransportError>;

pub fn invalid_request(message: impl Into<String>) -> TransportError {
    TransportError::new(TransportErrorKind::InvalidRequest, message)
}

pub fn cancelled(message: impl Into<String>) -> TransportError {
    TransportError::new(TransportErrorKind::Cancelled, message)
}

pub(crate) fn map_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        return TransportError::new(
            TransportErrorKind::Timeout,
            format!("request timed out: {err}"),
        );
    }
    if err.is_connect() {
        return TransportError::new(
            TransportErrorKind::Connect,
            format!("failed to connect: {err}"),
        );
    }
    if err.is_body() || err.is_decode() {
        return TransportError::new(
            TransportErrorKind::Body,
            format!("failed to read response body: {err}"),
        );
    }
    if err.is_builder() || err.is_request() {
        return invalid_request(format!("malformed request: {err}"));
    }
    TransportError::new(TransportErrorKind::Other, format!("request failed: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_code() {
        let err = TransportError::new(TransportErrorKind::Timeout, "slow upstream");
        assert_eq!(err.to_string(), "slow upstream (net/timeout)");
        assert!(!err.is_cancelled());
        assert!(cancelled("stop").is_cancelled());
    }
}
