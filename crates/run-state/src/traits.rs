//! Collaborator interfaces consumed by the runtime and the gateway.
//!
//! All three are synchronous. Callers on an async runtime either accept the
//! short blocking window of an embedded store or move the call onto
//! `spawn_blocking`.

use std::collections::HashMap;

use run_core::{BlobMetadata, Deployment, DeploymentId, Endpoint, EndpointId, RequestId, RequestLog};

use crate::error::StateResult;

/// CRUD and lookup for endpoints, deployments, and blob metadata.
pub trait MetadataStore: Send + Sync {
    /// Fails with `AlreadyExists` if the id is taken.
    fn create_endpoint(&self, endpoint: &Endpoint) -> StateResult<()>;

    fn get_endpoint(&self, id: EndpointId) -> StateResult<Option<Endpoint>>;

    fn list_endpoints(&self) -> StateResult<Vec<Endpoint>>;

    /// Replace an endpoint's default environment.
    fn update_endpoint_env(
        &self,
        id: EndpointId,
        environment: HashMap<String, String>,
    ) -> StateResult<Endpoint>;

    /// Point an endpoint at one of its own deployments. Used both to
    /// publish a new deployment and to roll back to an older one.
    fn set_active_deployment(
        &self,
        endpoint_id: EndpointId,
        deployment_id: DeploymentId,
    ) -> StateResult<Endpoint>;

    /// Fails with `NotFound` if the owning endpoint does not exist.
    fn create_deployment(&self, deployment: &Deployment) -> StateResult<()>;

    fn get_deployment(&self, id: DeploymentId) -> StateResult<Option<Deployment>>;

    fn list_deployments(&self, endpoint_id: EndpointId) -> StateResult<Vec<Deployment>>;

    /// Remove a deployment and its blob metadata. Returns whether it existed.
    ///
    /// An endpoint whose active pointer targets the deleted deployment is
    /// left with no active deployment.
    fn delete_deployment(&self, id: DeploymentId) -> StateResult<bool>;

    fn put_blob_metadata(&self, metadata: &BlobMetadata) -> StateResult<()>;

    fn get_blob_metadata(&self, deployment_id: DeploymentId) -> StateResult<Option<BlobMetadata>>;
}

/// Content-addressed storage for deployment artifacts.
pub trait BlobStore: Send + Sync {
    /// Store `data` and return its location. Storing identical bytes twice
    /// yields the same location.
    fn put_blob(&self, data: &[u8]) -> StateResult<String>;

    fn get_blob(&self, location: &str) -> StateResult<Option<Vec<u8>>>;

    fn delete_blob(&self, location: &str) -> StateResult<bool>;
}

/// Per-request guest log lines.
pub trait LogStore: Send + Sync {
    /// Fails with `AlreadyExists` if a log for the same
    /// `(deployment, request)` pair was already appended.
    fn append_log(&self, log: &RequestLog) -> StateResult<()>;

    fn get_request_log(
        &self,
        deployment_id: DeploymentId,
        request_id: RequestId,
    ) -> StateResult<Option<RequestLog>>;

    fn list_logs(&self, deployment_id: DeploymentId) -> StateResult<Vec<RequestLog>>;

    /// Look a log up by request id alone.
    fn find_log(&self, request_id: RequestId) -> StateResult<Option<RequestLog>>;
}
