//! External call error types.
//!
//! Every failure of a protocol or service call is categorized for retry
//! decisions:
//!
//! - **Transient** errors are retriable (5xx, rate limits, network failures, timeouts)
//! - **Permanent** errors will fail again on retry (not found, malformed input, most 4xx)
//! - **InsufficientFunds** is a terminal business error from the mint service
//!
//! Services often report failures as free text, so classification falls back
//! to message patterns when there is no status code.

use std::fmt;
use thiserror::Error;

/// The kind of external error, categorized for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Transient error - safe to retry with backoff.
    ///
    /// Examples:
    /// - HTTP 5xx (server errors)
    /// - HTTP 429 (rate limited)
    /// - Connection refused, DNS failure, timeouts
    Transient,

    /// Permanent error - retrying the same call cannot succeed.
    ///
    /// Examples:
    /// - Source post not found (404)
    /// - Malformed request (400, 422)
    /// - Authentication failures (401, 403)
    Permanent,

    /// The minting account cannot pay for the transaction.
    ///
    /// The job is rejected instead of retried.
    InsufficientFunds,
}

impl ErrorKind {
    /// Returns true if this error is retriable under the default policy.
    pub fn is_retriable(&self) -> bool {
        matches!(self, ErrorKind::Transient)
    }

    /// Returns true if the job cannot succeed and must be rejected.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ErrorKind::InsufficientFunds)
    }
}

/// An external call error with categorization for retry decisions.
#[derive(Debug, Error)]
pub struct ServiceError {
    /// The kind of error.
    pub kind: ErrorKind,

    /// The HTTP status code, if available.
    pub status_code: Option<u16>,

    /// A human-readable description of the error.
    pub message: String,

    /// The underlying transport error, if available.
    #[source]
    pub source: Option<reqwest::Error>,
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "service error (HTTP {}): {}", code, self.message),
            None => write!(f, "service error: {}", self.message),
        }
    }
}

impl ServiceError {
    fn with_kind(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status_code: None,
            message: message.into(),
            source: None,
        }
    }

    /// Creates a transient error.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::with_kind(ErrorKind::Transient, message)
    }

    /// Creates a permanent error.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::with_kind(ErrorKind::Permanent, message)
    }

    /// Creates an insufficient-funds error.
    pub fn insufficient_funds(message: impl Into<String>) -> Self {
        Self::with_kind(ErrorKind::InsufficientFunds, message)
    }

    /// Categorizes a failure reported by status code and body text.
    ///
    /// An insufficient-funds marker wins over any status code. Without a
    /// status code the message decides between transient and permanent.
    pub fn classify(status_code: Option<u16>, message: impl Into<String>) -> Self {
        let message = message.into();

        let kind = if is_insufficient_funds(&message) {
            ErrorKind::InsufficientFunds
        } else {
            match status_code {
                Some(429) => ErrorKind::Transient,
                Some(403) if is_rate_limit_error(&message) => ErrorKind::Transient,
                Some(408) => ErrorKind::Transient,
                Some(code) if (500..600).contains(&code) => ErrorKind::Transient,
                Some(_) => ErrorKind::Permanent,
                None => {
                    if is_rate_limit_error(&message) || is_network_error(&message) {
                        ErrorKind::Transient
                    } else if is_permanent_message(&message) {
                        ErrorKind::Permanent
                    } else {
                        // Unknown failures without a status are retried.
                        ErrorKind::Transient
                    }
                }
            }
        };

        Self {
            kind,
            status_code,
            message,
            source: None,
        }
    }

    /// Categorizes a reqwest transport or decode error.
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        let status_code = err.status().map(|s| s.as_u16());
        let mut classified = if err.is_timeout() || err.is_connect() {
            Self::transient(err.to_string())
        } else if err.is_decode() {
            Self::permanent(format!("undecodable response: {err}"))
        } else {
            Self::classify(status_code, err.to_string())
        };
        classified.status_code = status_code;
        classified.source = Some(err);
        classified
    }
}

impl From<reqwest::Error> for ServiceError {
    fn from(err: reqwest::Error) -> Self {
        Self::from_reqwest(err)
    }
}

/// Checks if a message carries the mint service's insufficient-balance marker.
fn is_insufficient_funds(message: &str) -> bool {
    let message_lower = message.to_lowercase();
    message_lower.contains("insufficient balance") || message_lower.contains("insufficient funds")
}

/// Checks if an error message indicates a rate limit.
fn is_rate_limit_error(message: &str) -> bool {
    let message_lower = message.to_lowercase();
    message_lower.contains("rate limit")
        || message_lower.contains("too many requests")
        || message_lower.contains("429")
}

/// Checks if an error message indicates a network-level error.
fn is_network_error(message: &str) -> bool {
    let message_lower = message.to_lowercase();
    message_lower.contains("timeout")
        || message_lower.contains("timed out")
        || message_lower.contains("connection")
        || message_lower.contains("network")
        || message_lower.contains("dns")
        || message_lower.contains("econnreset")
        || message_lower.contains("503")
        || message_lower.contains("502")
        || message_lower.contains("500")
}

/// Checks if an error message names a condition retries cannot fix.
fn is_permanent_message(message: &str) -> bool {
    let message_lower = message.to_lowercase();
    message_lower.contains("not found")
        || message_lower.contains("malformed")
        || message_lower.contains("invalid")
        || message_lower.contains("deleted")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_classify() {
        assert_eq!(ServiceError::classify(Some(503), "unavailable").kind, ErrorKind::Transient);
        assert_eq!(ServiceError::classify(Some(429), "slow down").kind, ErrorKind::Transient);
        assert_eq!(ServiceError::classify(Some(404), "no such post").kind, ErrorKind::Permanent);
        assert_eq!(
            ServiceError::classify(Some(403), "API rate limit exceeded").kind,
            ErrorKind::Transient
        );
        assert_eq!(ServiceError::classify(Some(403), "forbidden").kind, ErrorKind::Permanent);
    }

    #[test]
    fn messages_classify_without_status() {
        assert_eq!(ServiceError::classify(None, "connection reset").kind, ErrorKind::Transient);
        assert_eq!(ServiceError::classify(None, "request timed out").kind, ErrorKind::Transient);
        assert_eq!(ServiceError::classify(None, "Rate limit hit").kind, ErrorKind::Transient);
        assert_eq!(ServiceError::classify(None, "tweet not found").kind, ErrorKind::Permanent);
        assert_eq!(ServiceError::classify(None, "malformed URL").kind, ErrorKind::Permanent);
    }

    #[test]
    fn insufficient_funds_wins_over_status() {
        let err = ServiceError::classify(Some(500), "execution reverted: Insufficient balance");
        assert_eq!(err.kind, ErrorKind::InsufficientFunds);
        assert!(err.kind.is_terminal());
        assert!(!err.kind.is_retriable());
    }

    #[test]
    fn display_includes_status() {
        let err = ServiceError::classify(Some(502), "bad gateway");
        assert_eq!(err.to_string(), "service error (HTTP 502): bad gateway");
        assert_eq!(ServiceError::permanent("x").to_string(), "service error: x");
    }
}
