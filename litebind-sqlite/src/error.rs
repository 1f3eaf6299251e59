//! Error types for SQLite operations.

use std::ffi::c_int;

use rusqlite::ffi;
use thiserror::Error;

pub use rusqlite::ErrorCode;

/// Result type for SQLite operations.
pub type SqliteResult<T> = Result<T, SqliteError>;

/// Errors raised by the binding layer.
///
/// Engine failures keep the native result code and message unchanged; everything else is
/// detected on this side of the call interface before the engine is reached.
#[derive(Error, Debug)]
pub enum SqliteError {
    /// Invalid open options.
    #[error("configuration error: {0}")]
    Config(String),

    /// The engine rejected SQL text while compiling it.
    #[error("syntax error: {0}")]
    Syntax(#[source] rusqlite::Error),

    /// The engine reported a runtime fault.
    #[error("engine error: {0}")]
    Engine(#[from] rusqlite::Error),

    /// Operation not valid for the handle's current lifecycle state.
    #[error("invalid state: {0}")]
    State(String),

    /// Parameter shape mismatch or unmatched named parameter.
    #[error("bind error: {0}")]
    Bind(String),

    /// Host value with no storage class.
    #[error("unsupported type: {0}")]
    UnsupportedType(String),

    /// A row could not be projected onto the requested host type.
    #[error("deserialization error: {0}")]
    Deserialization(String),
}

impl SqliteError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a state error.
    pub fn state(message: impl Into<String>) -> Self {
        Self::State(message.into())
    }

    /// Create a bind error.
    pub fn bind(message: impl Into<String>) -> Self {
        Self::Bind(message.into())
    }

    /// Create an unsupported type error.
    pub fn unsupported_type(message: impl Into<String>) -> Self {
        Self::UnsupportedType(message.into())
    }

    /// Create a deserialization error.
    pub fn deserialization(message: impl Into<String>) -> Self {
        Self::Deserialization(message.into())
    }

    /// Build an engine failure from a raw result code and the connection's error message.
    pub(crate) fn from_code(code: c_int, message: Option<String>) -> rusqlite::Error {
        rusqlite::Error::SqliteFailure(ffi::Error::new(code), message)
    }

    /// Engine failure raised while compiling SQL.
    pub(crate) fn syntax(code: c_int, message: impl Into<String>) -> Self {
        Self::Syntax(Self::from_code(code, Some(message.into())))
    }

    /// The engine's extended result code, for `Syntax` and `Engine` failures.
    pub fn code(&self) -> Option<c_int> {
        match self {
            Self::Syntax(e) | Self::Engine(e) => e.sqlite_error().map(|e| e.extended_code),
            _ => None,
        }
    }

    /// The engine's primary result code, for `Syntax` and `Engine` failures.
    pub fn error_code(&self) -> Option<ErrorCode> {
        match self {
            Self::Syntax(e) | Self::Engine(e) => e.sqlite_error_code(),
            _ => None,
        }
    }

    /// Check if this is a lifecycle error.
    pub fn is_state_error(&self) -> bool {
        matches!(self, Self::State(_))
    }

    /// Check if this is a parameter binding error.
    pub fn is_bind_error(&self) -> bool {
        matches!(self, Self::Bind(_))
    }

    /// Check if this error came from the engine.
    pub fn is_engine_error(&self) -> bool {
        matches!(self, Self::Syntax(_) | Self::Engine(_))
    }

    /// Check if the engine reported a constraint violation.
    pub fn is_constraint_violation(&self) -> bool {
        self.error_code() == Some(ErrorCode::ConstraintViolation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SqliteError::config("readonly connections cannot create");
        assert!(err.to_string().contains("configuration error"));
        assert!(err.to_string().contains("readonly"));
    }

    #[test]
    fn test_error_constructors() {
        assert!(matches!(SqliteError::config("test"), SqliteError::Config(_)));
        assert!(SqliteError::state("test").is_state_error());
        assert!(SqliteError::bind("test").is_bind_error());
        assert!(matches!(
            SqliteError::unsupported_type("test"),
            SqliteError::UnsupportedType(_)
        ));
    }

    #[test]
    fn test_engine_code_preserved() {
        let err = SqliteError::syntax(ffi::SQLITE_ERROR, "near \"SELEC\": syntax error");
        assert!(err.is_engine_error());
        assert_eq!(err.code(), Some(ffi::SQLITE_ERROR));
        assert!(err.to_string().contains("near \"SELEC\""));
    }

    #[test]
    fn test_constraint_violation() {
        let err = SqliteError::Engine(SqliteError::from_code(
            ffi::SQLITE_CONSTRAINT_UNIQUE,
            Some("UNIQUE constraint failed: t.id".to_string()),
        ));
        assert!(err.is_constraint_violation());
        assert_eq!(err.code(), Some(ffi::SQLITE_CONSTRAINT_UNIQUE));
    }
}
