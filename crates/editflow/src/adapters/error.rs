//! Adapter error type shared by every external service client.

use thiserror::Error;

use crate::error::ErrorKind;

/// A failed call to an external service, classified for retry decisions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{service} {kind} error: {message}")]
pub struct AdapterError {
    pub service: &'static str,
    pub kind: ErrorKind,
    pub message: String,
    /// HTTP status, when the service answered at all.
    pub status: Option<u16>,
}

impl AdapterError {
    pub fn transient(service: &'static str, message: impl Into<String>) -> Self {
        Self {
            service,
            kind: ErrorKind::Transient,
            message: message.into(),
            status: None,
        }
    }

    pub fn permanent(service: &'static str, message: impl Into<String>) -> Self {
        Self {
            service,
            kind: ErrorKind::Permanent,
            message: message.into(),
            status: None,
        }
    }

    /// Classifies an HTTP error response. 5xx, 429 and 408 are transient,
    /// any other status is permanent.
    pub fn from_status(service: &'static str, status: u16, body: &str) -> Self {
        let kind = if status >= 500 || status == 429 || status == 408 {
            ErrorKind::Transient
        } else {
            ErrorKind::Permanent
        };
        Self {
            service,
            kind,
            message: format!("HTTP {}: {}", status, truncate(body, 300)),
            status: Some(status),
        }
    }

    /// Classifies a transport-level failure. Timeouts and connection
    /// problems are transient; malformed responses are permanent.
    pub fn from_reqwest(service: &'static str, err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return Self::from_status(service, status.as_u16(), &err.to_string());
        }
        if err.is_timeout() || err.is_connect() || err.is_request() {
            Self::transient(service, err.to_string())
        } else {
            Self::permanent(service, err.to_string())
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
