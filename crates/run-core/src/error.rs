//! Error types for core domain validation.

use thiserror::Error;

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised while constructing or parsing domain values.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("this runtime ({0}) is not supported")]
    UnsupportedRuntime(String),

    #[error("invalid identifier {value:?}: {reason}")]
    InvalidId { value: String, reason: String },
}
