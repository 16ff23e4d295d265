//! Error types for logical replication CDC.
//!
//! Includes error classification so the session controller can tell a
//! transient transport failure from a terminal one.

use crate::postgres::protocol::parser::ParseError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// SQLSTATE `duplicate_object`, returned when the replication slot exists.
pub const SQLSTATE_DUPLICATE_OBJECT: &str = "42710";

/// Error categories for metrics and alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Server-side errors reported by PostgreSQL
    Database,
    /// Replication protocol errors (framing, unexpected messages)
    Replication,
    /// Malformed decoder output
    Decode,
    /// Configuration errors (invalid settings)
    Configuration,
    /// Network errors (connection, I/O)
    Network,
    /// Serialization errors (JSON)
    Serialization,
    /// Lifecycle errors (cancellation, invalid state)
    Lifecycle,
}

/// CDC-specific errors
#[derive(Error, Debug)]
pub enum CdcError {
    /// Error reported by the server through an ErrorResponse
    #[error("PostgreSQL error {code}: {message}")]
    Postgres { code: String, message: String },

    /// Replication protocol error
    #[error("Replication error: {0}")]
    Replication(String),

    /// A change line could not be parsed
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Connection closed by the server
    #[error("Connection closed")]
    ConnectionClosed,

    /// The session was cancelled
    #[error("Cancelled")]
    Cancelled,

    /// Invalid state
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl CdcError {
    /// Create a new server error from its SQLSTATE code and message
    pub fn postgres(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Postgres {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Create a new replication error
    pub fn replication(msg: impl Into<String>) -> Self {
        Self::Replication(msg.into())
    }

    /// Create a new config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid state error
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    /// SQLSTATE of a server error, if any.
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Self::Postgres { code, .. } => Some(code.as_str()),
            _ => None,
        }
    }

    /// True when slot creation failed only because the slot already exists.
    pub fn is_slot_already_exists(&self) -> bool {
        self.sqlstate() == Some(SQLSTATE_DUPLICATE_OBJECT)
    }

    /// True for the cooperative cancellation signal.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Check if this error is retriable.
    ///
    /// Returns true for transient errors that may succeed on retry.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::ConnectionClosed => true,

            Self::Replication(msg) => {
                msg.contains("temporarily")
                    || msg.contains("connection reset")
                    || msg.contains("connection lost")
            }

            // Connection exception, transaction rollback, insufficient
            // resources and operator intervention (except query_canceled)
            Self::Postgres { code, .. } => {
                code.starts_with("08")
                    || code.starts_with("40")
                    || code.starts_with("53")
                    || (code.starts_with("57") && code != "57014")
            }

            Self::Io(e) => {
                use std::io::ErrorKind;
                matches!(
                    e.kind(),
                    ErrorKind::ConnectionReset
                        | ErrorKind::ConnectionAborted
                        | ErrorKind::BrokenPipe
                        | ErrorKind::UnexpectedEof
                        | ErrorKind::TimedOut
                        | ErrorKind::Interrupted
                )
            }

            Self::Parse(_)
            | Self::Config(_)
            | Self::Json(_)
            | Self::Cancelled
            | Self::InvalidState(_) => false,
        }
    }

    /// Get the error category for metrics and alerting.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Postgres { .. } => ErrorCategory::Database,
            Self::Replication(_) => ErrorCategory::Replication,
            Self::Parse(_) => ErrorCategory::Decode,
            Self::Config(_) => ErrorCategory::Configuration,
            Self::ConnectionClosed => ErrorCategory::Network,
            Self::Io(_) => ErrorCategory::Network,
            Self::Json(_) => ErrorCategory::Serialization,
            Self::Cancelled => ErrorCategory::Lifecycle,
            Self::InvalidState(_) => ErrorCategory::Lifecycle,
        }
    }

    /// Get a metric-safe error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Postgres { .. } => "postgres_error",
            Self::Replication(_) => "replication_error",
            Self::Parse(_) => "parse_error",
            Self::Config(_) => "config_error",
            Self::ConnectionClosed => "connection_closed",
            Self::Io(_) => "io_error",
            Self::Json(_) => "json_error",
            Self::Cancelled => "cancelled",
            Self::InvalidState(_) => "invalid_state",
        }
    }
}

/// Result type for CDC operations
pub type Result<T> = std::result::Result<T, CdcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CdcError::replication("unexpected message");
        assert!(err.to_string().contains("Replication error"));
        assert!(err.to_string().contains("unexpected message"));

        let err = CdcError::postgres("42P01", "relation does not exist");
        assert_eq!(
            err.to_string(),
            "PostgreSQL error 42P01: relation does not exist"
        );
    }

    #[test]
    fn test_slot_already_exists() {
        assert!(CdcError::postgres("42710", "replication slot exists").is_slot_already_exists());
        assert!(!CdcError::postgres("42704", "missing").is_slot_already_exists());
        assert!(!CdcError::replication("42710").is_slot_already_exists());
    }

    #[test]
    fn test_error_is_retriable() {
        assert!(CdcError::ConnectionClosed.is_retriable());
        assert!(CdcError::postgres("08006", "connection failure").is_retriable());
        assert!(CdcError::postgres("57P01", "admin shutdown").is_retriable());
        assert!(
            CdcError::Io(std::io::Error::from(std::io::ErrorKind::ConnectionReset)).is_retriable()
        );

        assert!(!CdcError::postgres("57014", "query canceled").is_retriable());
        assert!(!CdcError::config("bad config").is_retriable());
        assert!(!CdcError::Cancelled.is_retriable());
        assert!(!CdcError::Parse(ParseError::MessageTooShort).is_retriable());
    }

    #[test]
    fn test_error_category() {
        assert_eq!(
            CdcError::replication("x").category(),
            ErrorCategory::Replication
        );
        assert_eq!(
            CdcError::config("x").category(),
            ErrorCategory::Configuration
        );
        assert_eq!(
            CdcError::ConnectionClosed.category(),
            ErrorCategory::Network
        );
        assert_eq!(CdcError::Cancelled.category(), ErrorCategory::Lifecycle);
        assert_eq!(
            CdcError::from(ParseError::MessageTooShort).category(),
            ErrorCategory::Decode
        );
    }

    #[test]
    fn test_error_code() {
        assert_eq!(CdcError::ConnectionClosed.error_code(), "connection_closed");
        assert_eq!(CdcError::Cancelled.error_code(), "cancelled");
        assert_eq!(CdcError::config("x").error_code(), "config_error");
    }
}
