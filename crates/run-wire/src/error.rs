//! Wire protocol errors.

use thiserror::Error;

pub type WireResult<T> = Result<T, WireError>;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("expected output to end with a {expected}-byte trailer, got {len} bytes")]
    Truncated { len: usize, expected: usize },

    #[error("trailer declares a {declared}-byte response, only {available} bytes available")]
    LengthOverflow { declared: usize, available: usize },

    #[error("response of {0} bytes does not fit the length trailer")]
    ResponseTooLarge(usize),

    #[error("cannot encode envelope: {0}")]
    Encode(String),

    #[error("cannot decode envelope: {0}")]
    Decode(String),

    #[error("invalid status code {0}")]
    InvalidStatus(i64),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
