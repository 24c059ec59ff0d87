//! Runtime errors.

use std::time::Duration;

use run_core::DeploymentId;
use run_state::StateError;
use run_wire::WireError;
use thiserror::Error;

pub type RuntimeResult<T> = Result<T, RuntimeError>;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("module cache already holds an entry for deployment {0}")]
    CacheEntryExists(DeploymentId),

    #[error("module cache has no entry for deployment {0}")]
    CacheEntryMissing(DeploymentId),

    #[error("engine error: {0}")]
    Engine(String),

    #[error("failed to compile module: {0}")]
    Compile(String),

    #[error("failed to instantiate module: {0}")]
    Instantiate(String),

    #[error("guest trapped: {0}")]
    Trap(String),

    #[error("guest exited with status {0}")]
    Exit(i32),

    #[error("deployment {0} not found")]
    DeploymentNotFound(DeploymentId),

    #[error("artifact for deployment {0} not found")]
    ArtifactNotFound(DeploymentId),

    #[error("artifact for deployment {deployment_id} does not match hash {expected}")]
    ArtifactMismatch {
        deployment_id: DeploymentId,
        expected: String,
    },

    #[error("timed out after {0:?} resolving sandbox instance")]
    ResolveTimeout(Duration),

    #[error("instance manager is not running")]
    ManagerUnavailable,

    #[error("executor for deployment {0} has stopped")]
    ExecutorUnavailable(DeploymentId),

    #[error("background task failed: {0}")]
    Join(String),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Wire(#[from] WireError),
}
