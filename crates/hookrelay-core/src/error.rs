//! Error types and result handling for core storage operations.

use thiserror::Error;

/// Result type alias using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core error type for storage and model operations.
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    /// Storage backend operation failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// Entity not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Uniqueness or referential constraint violated.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// Invalid input.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl CoreError {
    /// Creates a storage error from a message.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// Creates a not-found error from a message.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }
}
