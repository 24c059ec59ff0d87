//! Domain types for endpoints, deployments, and per-request records.
//!
//! Endpoints and deployments are persisted by the metadata store as JSON.
//! A deployment is immutable once created; only an endpoint's
//! `active_deployment_id` pointer moves (publish or rollback).

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::CoreError;

/// Unique identifier for an endpoint.
pub type EndpointId = Uuid;

/// Unique identifier for a deployment.
pub type DeploymentId = Uuid;

/// Unique identifier for a single inbound request.
pub type RequestId = Uuid;

// ── Runtime kind ──────────────────────────────────────────────────

/// Guest language runtime a deployment was built for.
///
/// The set is closed: anything else fails to parse with
/// [`CoreError::UnsupportedRuntime`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    Go,
    Python,
    Rust,
}

/// How request/response envelopes are serialized for a guest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeEncoding {
    /// Protobuf messages (`proto.v1.HTTPRequest` / `proto.v1.HTTPResponse`).
    Protobuf,
    /// JSON documents, for guests without a protobuf runtime.
    Json,
}

impl RuntimeKind {
    pub const ALL: [RuntimeKind; 3] = [RuntimeKind::Go, RuntimeKind::Python, RuntimeKind::Rust];

    pub fn as_str(&self) -> &'static str {
        match self {
            RuntimeKind::Go => "go",
            RuntimeKind::Python => "python",
            RuntimeKind::Rust => "rust",
        }
    }

    /// The envelope encoding the guest SDK for this runtime speaks.
    pub fn encoding(&self) -> EnvelopeEncoding {
        match self {
            RuntimeKind::Go | RuntimeKind::Rust => EnvelopeEncoding::Protobuf,
            RuntimeKind::Python => EnvelopeEncoding::Json,
        }
    }
}

impl fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuntimeKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "go" => Ok(RuntimeKind::Go),
            "python" => Ok(RuntimeKind::Python),
            "rust" => Ok(RuntimeKind::Rust),
            other => Err(CoreError::UnsupportedRuntime(other.to_string())),
        }
    }
}

/// Format guest log lines are written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

// ── Endpoint ──────────────────────────────────────────────────────

/// A logical function name with a pointer to its currently active deployment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Endpoint {
    pub id: EndpointId,
    pub name: String,
    pub runtime: RuntimeKind,
    /// Default environment variables for every deployment of this endpoint.
    pub environment: HashMap<String, String>,
    pub active_deployment_id: Option<DeploymentId>,
    /// Unix timestamp (microseconds).
    pub created_at: u64,
}

impl Endpoint {
    pub fn new(name: &str, runtime: RuntimeKind, environment: HashMap<String, String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            runtime,
            environment,
            active_deployment_id: None,
            created_at: epoch_micros(),
        }
    }

    pub fn has_active_deployment(&self) -> bool {
        self.active_deployment_id.is_some()
    }
}

// ── Deployment ────────────────────────────────────────────────────

/// One immutable code artifact plus its environment, owned by an endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Deployment {
    pub id: DeploymentId,
    pub endpoint_id: EndpointId,
    /// SHA-256 hex digest of the artifact bytes.
    pub hash: String,
    pub environment: HashMap<String, String>,
    #[serde(default)]
    pub format: LogFormat,
    /// Unix timestamp (microseconds).
    pub created_at: u64,
}

impl Deployment {
    /// Create a deployment record for `blob` owned by `endpoint`.
    pub fn new(endpoint: &Endpoint, blob: &[u8], environment: HashMap<String, String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            endpoint_id: endpoint.id,
            hash: content_hash(blob),
            environment,
            format: LogFormat::default(),
            created_at: epoch_micros(),
        }
    }

    /// Environment visible to the guest: endpoint defaults overlaid by the
    /// deployment's own variables.
    pub fn resolve_env(&self, endpoint: &Endpoint) -> HashMap<String, String> {
        let mut env = endpoint.environment.clone();
        env.extend(
            self.environment
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        env
    }
}

// ── Blob ──────────────────────────────────────────────────────────

/// Where a deployment's code artifact lives in the blob store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BlobMetadata {
    pub deployment_id: DeploymentId,
    pub hash: String,
    /// Opaque blob store location.
    pub location: String,
    pub size: u64,
    pub created_at: u64,
}

// ── Request records ───────────────────────────────────────────────

/// Log lines a guest wrote while serving one request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestLog {
    pub deployment_id: DeploymentId,
    pub request_id: RequestId,
    pub lines: Vec<String>,
    pub created_at: u64,
}

impl RequestLog {
    pub fn new(deployment_id: DeploymentId, request_id: RequestId, lines: Vec<String>) -> Self {
        Self {
            deployment_id,
            request_id,
            lines,
            created_at: epoch_micros(),
        }
    }
}

/// Status and latency of one executed request.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestMetric {
    pub request_id: RequestId,
    pub endpoint_id: EndpointId,
    pub deployment_id: DeploymentId,
    pub status: u16,
    pub duration: Duration,
}

impl RequestMetric {
    pub fn is_error(&self) -> bool {
        self.status >= 500
    }
}

// ── Helpers ───────────────────────────────────────────────────────

/// Parse a textual identifier into a UUID.
pub fn parse_id(value: &str) -> Result<Uuid, CoreError> {
    Uuid::parse_str(value).map_err(|e| CoreError::InvalidId {
        value: value.to_string(),
        reason: e.to_string(),
    })
}

/// SHA-256 hex digest of an artifact.
pub fn content_hash(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

pub fn epoch_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_kind_parses_known_names() {
        for kind in RuntimeKind::ALL {
            assert_eq!(kind.as_str().parse::<RuntimeKind>().unwrap(), kind);
        }
    }

    #[test]
    fn runtime_kind_rejects_unknown_name() {
        let err = "cobol".parse::<RuntimeKind>().unwrap_err();
        assert!(matches!(err, CoreError::UnsupportedRuntime(ref r) if r == "cobol"));
        assert_eq!(err.to_string(), "this runtime (cobol) is not supported");
    }

    #[test]
    fn runtime_kind_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&RuntimeKind::Python).unwrap(), "\"python\"");
        assert_eq!(RuntimeKind::Python.encoding(), EnvelopeEncoding::Json);
        assert_eq!(RuntimeKind::Go.encoding(), EnvelopeEncoding::Protobuf);
    }

    #[test]
    fn new_endpoint_has_no_active_deployment() {
        let endpoint = Endpoint::new("hello", RuntimeKind::Go, HashMap::new());
        assert!(!endpoint.has_active_deployment());
        assert_eq!(endpoint.name, "hello");
    }

    #[test]
    fn deployment_hash_is_content_addressed() {
        let endpoint = Endpoint::new("hello", RuntimeKind::Go, HashMap::new());
        let a = Deployment::new(&endpoint, b"wasm bytes", HashMap::new());
        let b = Deployment::new(&endpoint, b"wasm bytes", HashMap::new());
        assert_ne!(a.id, b.id);
        assert_eq!(a.hash, b.hash);
        assert_eq!(a.hash.len(), 64);
        assert_eq!(a.endpoint_id, endpoint.id);
    }

    #[test]
    fn deployment_env_overrides_endpoint_defaults() {
        let endpoint = Endpoint::new(
            "hello",
            RuntimeKind::Go,
            HashMap::from([
                ("REGION".to_string(), "eu".to_string()),
                ("LEVEL".to_string(), "info".to_string()),
            ]),
        );
        let deployment = Deployment::new(
            &endpoint,
            b"wasm",
            HashMap::from([("LEVEL".to_string(), "debug".to_string())]),
        );

        let env = deployment.resolve_env(&endpoint);
        assert_eq!(env["REGION"], "eu");
        assert_eq!(env["LEVEL"], "debug");
    }

    #[test]
    fn parse_id_rejects_garbage() {
        assert!(parse_id("not-a-uuid").is_err());
        let id = Uuid::new_v4();
        assert_eq!(parse_id(&id.to_string()).unwrap(), id);
    }
}
