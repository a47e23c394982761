//! Error types for directory operations.
//!
//! This module provides the error type shared by every dirmap crate. Protocol faults keep the
//! numeric result code so callers can branch on it instead of parsing messages.

use crate::result_code::ResultCode;
use thiserror::Error;

/// Main error type for directory operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Caller supplied an argument the request cannot be built from
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The server answered with a non-success result code
    #[error("Protocol error: {code}: {message}")]
    Protocol {
        /// Result code reported by the server
        code: ResultCode,
        /// Diagnostic message reported by the server
        message: String,
    },

    /// Transport-level failure (connect, TLS, broken connection)
    #[error("Connection error: {0}")]
    Connection(String),

    /// Operation timed out
    #[error("Timeout: {0}")]
    Timeout(String),

    /// A control or extended-operation value could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Specialized result type for directory operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Builds a protocol error from a result code and diagnostic message.
    #[must_use]
    pub fn protocol(code: ResultCode, message: impl Into<String>) -> Self {
        Self::Protocol {
            code,
            message: message.into(),
        }
    }

    /// Returns the error code for this error type.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "INVALID_ARGUMENT",
            Self::ConfigError(_) => "CONFIG_ERROR",
            Self::Protocol { .. } => "PROTOCOL_ERROR",
            Self::Connection(_) => "CONNECTION_ERROR",
            Self::Timeout(_) => "TIMEOUT",
            Self::Decode(_) => "DECODE_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Returns the LDAP result code carried by a protocol error.
    #[must_use]
    pub const fn result_code(&self) -> Option<ResultCode> {
        match self {
            Self::Protocol { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Returns true if the connection that produced this error must not be reused.
    #[must_use]
    pub const fn is_connection_fault(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Timeout(_))
    }

    /// Returns true if this error should be logged as a serious error.
    #[must_use]
    pub const fn should_log(&self) -> bool {
        matches!(
            self,
            Self::Internal(_) | Self::ConfigError(_) | Self::Connection(_) | Self::Decode(_)
        )
    }
}

// Conversions from external error types
impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Self::InvalidArgument(format!("invalid directory URL: {err}"))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidArgument(format!("invalid options document: {err}"))
    }
}

impl From<validator::ValidationErrors> for Error {
    fn from(err: validator::ValidationErrors) -> Self {
        Self::ConfigError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            Error::InvalidArgument("test".to_string()).error_code(),
            "INVALID_ARGUMENT"
        );
        assert_eq!(
            Error::ConfigError("test".to_string()).error_code(),
            "CONFIG_ERROR"
        );
        assert_eq!(
            Error::protocol(ResultCode::NO_SUCH_OBJECT, "missing").error_code(),
            "PROTOCOL_ERROR"
        );
        assert_eq!(
            Error::Connection("test".to_string()).error_code(),
            "CONNECTION_ERROR"
        );
        assert_eq!(Error::Timeout("test".to_string()).error_code(), "TIMEOUT");
        assert_eq!(Error::Decode("test".to_string()).error_code(), "DECODE_ERROR");
        assert_eq!(
            Error::Internal("test".to_string()).error_code(),
            "INTERNAL_ERROR"
        );
    }

    #[test]
    fn test_error_display() {
        let err = Error::protocol(ResultCode::NO_SUCH_OBJECT, "entry not found");
        assert_eq!(
            err.to_string(),
            "Protocol error: 32 (no such object): entry not found"
        );

        let err = Error::InvalidArgument("sort keys required".to_string());
        assert_eq!(err.to_string(), "Invalid argument: sort keys required");
    }

    #[test]
    fn test_result_code_accessor() {
        let err = Error::protocol(ResultCode::ENTRY_ALREADY_EXISTS, "");
        assert_eq!(err.result_code(), Some(ResultCode::ENTRY_ALREADY_EXISTS));
        assert_eq!(Error::Timeout("slow".to_string()).result_code(), None);
    }

    #[test]
    fn test_connection_faults() {
        assert!(Error::Connection("reset".to_string()).is_connection_fault());
        assert!(Error::Timeout("slow".to_string()).is_connection_fault());
        assert!(!Error::protocol(ResultCode::UNWILLING_TO_PERFORM, "").is_connection_fault());
    }

    #[test]
    fn test_should_log() {
        assert!(Error::Internal("test".to_string()).should_log());
        assert!(Error::ConfigError("test".to_string()).should_log());
        assert!(Error::Connection("test".to_string()).should_log());

        assert!(!Error::protocol(ResultCode::NO_SUCH_OBJECT, "").should_log());
        assert!(!Error::InvalidArgument("test".to_string()).should_log());
    }

    #[test]
    fn test_from_url_parse_error() {
        let err = url::Url::parse("not a url").unwrap_err();
        let dir_err: Error = err.into();
        assert!(matches!(dir_err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_from_serde_json_error() {
        let err = serde_json::from_str::<serde_json::Value>("{invalid json}").unwrap_err();
        let dir_err: Error = err.into();
        assert_eq!(dir_err.error_code(), "INVALID_ARGUMENT");
    }

    #[test]
    fn test_error_partial_eq() {
        let err1 = Error::protocol(ResultCode::OTHER, "x");
        let err2 = Error::protocol(ResultCode::OTHER, "x");
        let err3 = Error::protocol(ResultCode::OTHER, "y");

        assert_eq!(err1, err2.clone());
        assert_ne!(err1, err3);
    }
}
