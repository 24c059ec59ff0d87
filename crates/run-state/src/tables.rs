//! redb table definitions for the Run state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized records).

use redb::TableDefinition;

/// Endpoints keyed by `{endpoint_id}`.
pub const ENDPOINTS: TableDefinition<&str, &[u8]> = TableDefinition::new("endpoints");

/// Deployments keyed by `{endpoint_id}:{deployment_id}`.
pub const DEPLOYMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("deployments");

/// Owning endpoint of each deployment, keyed by `{deployment_id}`.
pub const DEPLOYMENT_OWNERS: TableDefinition<&str, &str> =
    TableDefinition::new("deployment_owners");

/// Blob metadata keyed by `{deployment_id}`.
pub const BLOB_METADATA: TableDefinition<&str, &[u8]> = TableDefinition::new("blob_metadata");

/// Artifact bytes keyed by content hash.
pub const BLOBS: TableDefinition<&str, &[u8]> = TableDefinition::new("blobs");

/// Request logs keyed by `{deployment_id}:{request_id}`.
pub const REQUEST_LOGS: TableDefinition<&str, &[u8]> = TableDefinition::new("request_logs");

/// Request log key (`{deployment_id}:{request_id}`) keyed by `{request_id}`.
pub const REQUEST_LOG_INDEX: TableDefinition<&str, &str> =
    TableDefinition::new("request_log_index");

/// Metrics snapshots keyed by `{endpoint_id}:{epoch:020}`.
pub const METRICS: TableDefinition<&str, &[u8]> = TableDefinition::new("metrics");
