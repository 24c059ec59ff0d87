//! Error types for the Run state store.

use thiserror::Error;

/// Result type alias for state store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur during state store operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("{kind} {id} already exists")]
    AlreadyExists { kind: &'static str, id: String },

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("deployment {deployment_id} does not belong to endpoint {endpoint_id}")]
    WrongEndpoint {
        endpoint_id: String,
        deployment_id: String,
    },
}

impl StateError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        StateError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn already_exists(kind: &'static str, id: impl ToString) -> Self {
        StateError::AlreadyExists {
            kind,
            id: id.to_string(),
        }
    }
}
