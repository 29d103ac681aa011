//! Error types for Rollcall

use thiserror::Error;

use crate::db::DatabaseError;

/// Main error type for Rollcall operations.
///
/// Every failure is scoped to a single request or flow.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed input (PIN, token, request shape). Raised before any store access.
    #[error("{0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    /// Scanned code is wrong or outside the accepted windows.
    ///
    /// Wrong and expired codes are deliberately indistinguishable.
    #[error("Code expired, scan again")]
    ExpiredToken,

    /// Refresh token is invalid, expired or already rotated
    #[error("Session expired, please sign in again")]
    AuthExpired,

    #[error("Not authenticated: {0}")]
    Unauthenticated(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Session is not active")]
    SessionNotActive,

    #[error("No lesson scheduled")]
    NoLessonScheduled,

    #[error("Too many requests, try again later")]
    RateLimited,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using Rollcall's Error
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation(message.into())
    }

    /// Create a not-found error for the named resource
    pub fn not_found(what: impl Into<String>) -> Self {
        Error::NotFound(what.into())
    }

    /// Create a conflict error
    pub fn conflict(message: impl Into<String>) -> Self {
        Error::Conflict(message.into())
    }
}

impl From<DatabaseError> for Error {
    fn from(e: DatabaseError) -> Self {
        match e {
            DatabaseError::UniqueViolation(msg) => Error::Conflict(msg),
            DatabaseError::NotFound(what) => Error::NotFound(what),
            other => Error::Storage(other.to_string()),
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        DatabaseError::from(e).into()
    }
}
