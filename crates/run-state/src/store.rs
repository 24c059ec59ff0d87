//! StateStore — redb-backed persistence for Run.
//!
//! Implements the [`MetadataStore`], [`BlobStore`] and [`LogStore`]
//! collaborator traits and stores metrics snapshots. The store supports
//! both on-disk and in-memory backends (the latter for testing).

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use run_core::{
    BlobMetadata, Deployment, DeploymentId, Endpoint, EndpointId, RequestId, RequestLog,
    content_hash,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::traits::{BlobStore, LogStore, MetadataStore};
use crate::types::MetricsSnapshot;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;

fn to_json<T: Serialize>(value: &T) -> StateResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(map_err!(Serialize))
}

fn from_json<T: DeserializeOwned>(bytes: &[u8]) -> StateResult<T> {
    serde_json::from_slice(bytes).map_err(map_err!(Deserialize))
}

fn deployment_key(endpoint_id: EndpointId, deployment_id: DeploymentId) -> String {
    format!("{endpoint_id}:{deployment_id}")
}

fn log_key(deployment_id: DeploymentId, request_id: RequestId) -> String {
    format!("{deployment_id}:{request_id}")
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(ENDPOINTS).map_err(map_err!(Table))?;
        txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        txn.open_table(DEPLOYMENT_OWNERS).map_err(map_err!(Table))?;
        txn.open_table(BLOB_METADATA).map_err(map_err!(Table))?;
        txn.open_table(BLOBS).map_err(map_err!(Table))?;
        txn.open_table(REQUEST_LOGS).map_err(map_err!(Table))?;
        txn.open_table(REQUEST_LOG_INDEX).map_err(map_err!(Table))?;
        txn.open_table(METRICS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get_json<T: DeserializeOwned>(&self, def: JsonTable, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(from_json(guard.value())?)),
            None => Ok(None),
        }
    }

    /// Every value whose key starts with `prefix`, in key order.
    fn scan_prefix<T: DeserializeOwned>(&self, def: JsonTable, prefix: &str) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.range(prefix..).map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if !key.value().starts_with(prefix) {
                break;
            }
            results.push(from_json(value.value())?);
        }
        Ok(results)
    }

    fn owner_of(&self, deployment_id: DeploymentId) -> StateResult<Option<EndpointId>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DEPLOYMENT_OWNERS).map_err(map_err!(Table))?;
        let id = deployment_id.to_string();
        match table.get(id.as_str()).map_err(map_err!(Read))? {
            Some(guard) => {
                let owner = run_core::parse_id(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(owner))
            }
            None => Ok(None),
        }
    }

    /// Store `artifact` and register a new deployment of it for `endpoint`.
    ///
    /// The deployment is not activated.
    pub fn deploy(
        &self,
        endpoint: &Endpoint,
        artifact: &[u8],
        environment: HashMap<String, String>,
    ) -> StateResult<Deployment> {
        let deployment = Deployment::new(endpoint, artifact, environment);
        let location = self.put_blob(artifact)?;
        self.create_deployment(&deployment)?;
        self.put_blob_metadata(&BlobMetadata {
            deployment_id: deployment.id,
            hash: deployment.hash.clone(),
            location,
            size: artifact.len() as u64,
            created_at: deployment.created_at,
        })?;
        Ok(deployment)
    }

    // ── Metrics ────────────────────────────────────────────────────

    /// Insert a metrics snapshot.
    pub fn put_metrics(&self, snapshot: &MetricsSnapshot) -> StateResult<()> {
        let key = snapshot.table_key();
        let value = to_json(snapshot)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(METRICS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// The most recent `limit` snapshots for an endpoint, oldest first.
    pub fn list_metrics_for_endpoint(
        &self,
        endpoint_id: EndpointId,
        limit: usize,
    ) -> StateResult<Vec<MetricsSnapshot>> {
        let mut all: Vec<MetricsSnapshot> =
            self.scan_prefix(METRICS, &format!("{endpoint_id}:"))?;
        let skip = all.len().saturating_sub(limit);
        Ok(all.split_off(skip))
    }
}

// ── Endpoints, deployments, blob metadata ──────────────────────────

impl MetadataStore for StateStore {
    fn create_endpoint(&self, endpoint: &Endpoint) -> StateResult<()> {
        let key = endpoint.id.to_string();
        let value = to_json(endpoint)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(ENDPOINTS).map_err(map_err!(Table))?;
            if table.get(key.as_str()).map_err(map_err!(Read))?.is_some() {
                return Err(StateError::already_exists("endpoint", &key));
            }
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, name = %endpoint.name, "endpoint created");
        Ok(())
    }

    fn get_endpoint(&self, id: EndpointId) -> StateResult<Option<Endpoint>> {
        self.get_json(ENDPOINTS, &id.to_string())
    }

    fn list_endpoints(&self) -> StateResult<Vec<Endpoint>> {
        let mut endpoints: Vec<Endpoint> = self.scan_prefix(ENDPOINTS, "")?;
        endpoints.sort_by_key(|e| e.created_at);
        Ok(endpoints)
    }

    fn update_endpoint_env(
        &self,
        id: EndpointId,
        environment: HashMap<String, String>,
    ) -> StateResult<Endpoint> {
        let key = id.to_string();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let endpoint = {
            let mut table = txn.open_table(ENDPOINTS).map_err(map_err!(Table))?;
            let mut endpoint: Endpoint = match table.get(key.as_str()).map_err(map_err!(Read))? {
                Some(guard) => from_json(guard.value())?,
                None => return Err(StateError::not_found("endpoint", &key)),
            };
            endpoint.environment = environment;
            let value = to_json(&endpoint)?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
            endpoint
        };
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, "endpoint environment updated");
        Ok(endpoint)
    }

    fn set_active_deployment(
        &self,
        endpoint_id: EndpointId,
        deployment_id: DeploymentId,
    ) -> StateResult<Endpoint> {
        let key = endpoint_id.to_string();
        let deployment_key = deployment_id.to_string();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let endpoint = {
            let owners = txn.open_table(DEPLOYMENT_OWNERS).map_err(map_err!(Table))?;
            let owner = match owners.get(deployment_key.as_str()).map_err(map_err!(Read))? {
                Some(guard) => guard.value().to_string(),
                None => return Err(StateError::not_found("deployment", &deployment_key)),
            };
            if owner != key {
                return Err(StateError::WrongEndpoint {
                    endpoint_id: key,
                    deployment_id: deployment_key,
                });
            }

            let mut table = txn.open_table(ENDPOINTS).map_err(map_err!(Table))?;
            let mut endpoint: Endpoint = match table.get(key.as_str()).map_err(map_err!(Read))? {
                Some(guard) => from_json(guard.value())?,
                None => return Err(StateError::not_found("endpoint", &key)),
            };
            endpoint.active_deployment_id = Some(deployment_id);
            let value = to_json(&endpoint)?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
            endpoint
        };
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(endpoint_id = %key, deployment_id = %deployment_key, "active deployment set");
        Ok(endpoint)
    }

    fn create_deployment(&self, deployment: &Deployment) -> StateResult<()> {
        let id = deployment.id.to_string();
        let owner = deployment.endpoint_id.to_string();
        let key = deployment_key(deployment.endpoint_id, deployment.id);
        let value = to_json(deployment)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let endpoints = txn.open_table(ENDPOINTS).map_err(map_err!(Table))?;
            if endpoints.get(owner.as_str()).map_err(map_err!(Read))?.is_none() {
                return Err(StateError::not_found("endpoint", &owner));
            }

            let mut owners = txn.open_table(DEPLOYMENT_OWNERS).map_err(map_err!(Table))?;
            if owners.get(id.as_str()).map_err(map_err!(Read))?.is_some() {
                return Err(StateError::already_exists("deployment", &id));
            }
            owners
                .insert(id.as_str(), owner.as_str())
                .map_err(map_err!(Write))?;

            let mut table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(deployment_id = %id, endpoint_id = %owner, hash = %deployment.hash, "deployment created");
        Ok(())
    }

    fn get_deployment(&self, id: DeploymentId) -> StateResult<Option<Deployment>> {
        match self.owner_of(id)? {
            Some(owner) => self.get_json(DEPLOYMENTS, &deployment_key(owner, id)),
            None => Ok(None),
        }
    }

    fn list_deployments(&self, endpoint_id: EndpointId) -> StateResult<Vec<Deployment>> {
        let mut deployments: Vec<Deployment> =
            self.scan_prefix(DEPLOYMENTS, &format!("{endpoint_id}:"))?;
        deployments.sort_by_key(|d| d.created_at);
        Ok(deployments)
    }

    fn delete_deployment(&self, id: DeploymentId) -> StateResult<bool> {
        let id_key = id.to_string();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut owners = txn.open_table(DEPLOYMENT_OWNERS).map_err(map_err!(Table))?;
            let owner = match owners.remove(id_key.as_str()).map_err(map_err!(Write))? {
                Some(guard) => guard.value().to_string(),
                None => return Ok(false),
            };

            let mut table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
            table
                .remove(format!("{owner}:{id_key}").as_str())
                .map_err(map_err!(Write))?;

            let mut blobs = txn.open_table(BLOB_METADATA).map_err(map_err!(Table))?;
            blobs.remove(id_key.as_str()).map_err(map_err!(Write))?;

            let mut endpoints = txn.open_table(ENDPOINTS).map_err(map_err!(Table))?;
            let endpoint: Option<Endpoint> =
                match endpoints.get(owner.as_str()).map_err(map_err!(Read))? {
                    Some(guard) => Some(from_json(guard.value())?),
                    None => None,
                };
            if let Some(mut endpoint) = endpoint.filter(|e| e.active_deployment_id == Some(id)) {
                endpoint.active_deployment_id = None;
                let value = to_json(&endpoint)?;
                endpoints
                    .insert(owner.as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(deployment_id = %id_key, "deployment deleted");
        Ok(true)
    }

    fn put_blob_metadata(&self, metadata: &BlobMetadata) -> StateResult<()> {
        let key = metadata.deployment_id.to_string();
        let value = to_json(metadata)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(BLOB_METADATA).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get_blob_metadata(&self, deployment_id: DeploymentId) -> StateResult<Option<BlobMetadata>> {
        self.get_json(BLOB_METADATA, &deployment_id.to_string())
    }
}

// ── Blobs ──────────────────────────────────────────────────────────

impl BlobStore for StateStore {
    fn put_blob(&self, data: &[u8]) -> StateResult<String> {
        let location = content_hash(data);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(BLOBS).map_err(map_err!(Table))?;
            if table.get(location.as_str()).map_err(map_err!(Read))?.is_none() {
                table
                    .insert(location.as_str(), data)
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%location, size = data.len(), "blob stored");
        Ok(location)
    }

    fn get_blob(&self, location: &str) -> StateResult<Option<Vec<u8>>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(BLOBS).map_err(map_err!(Table))?;
        Ok(table
            .get(location)
            .map_err(map_err!(Read))?
            .map(|guard| guard.value().to_vec()))
    }

    fn delete_blob(&self, location: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(BLOBS).map_err(map_err!(Table))?;
            existed = table.remove(location).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%location, existed, "blob deleted");
        Ok(existed)
    }
}

// ── Request logs ───────────────────────────────────────────────────

impl LogStore for StateStore {
    fn append_log(&self, log: &RequestLog) -> StateResult<()> {
        let key = log_key(log.deployment_id, log.request_id);
        let value = to_json(log)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(REQUEST_LOGS).map_err(map_err!(Table))?;
            if table.get(key.as_str()).map_err(map_err!(Read))?.is_some() {
                return Err(StateError::already_exists("request log", &key));
            }
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;

            let mut index = txn.open_table(REQUEST_LOG_INDEX).map_err(map_err!(Table))?;
            index
                .insert(log.request_id.to_string().as_str(), key.as_str())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get_request_log(
        &self,
        deployment_id: DeploymentId,
        request_id: RequestId,
    ) -> StateResult<Option<RequestLog>> {
        self.get_json(REQUEST_LOGS, &log_key(deployment_id, request_id))
    }

    fn list_logs(&self, deployment_id: DeploymentId) -> StateResult<Vec<RequestLog>> {
        let mut logs: Vec<RequestLog> =
            self.scan_prefix(REQUEST_LOGS, &format!("{deployment_id}:"))?;
        logs.sort_by_key(|l| l.created_at);
        Ok(logs)
    }

    fn find_log(&self, request_id: RequestId) -> StateResult<Option<RequestLog>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let index = txn.open_table(REQUEST_LOG_INDEX).map_err(map_err!(Table))?;
        let Some(key) = index
            .get(request_id.to_string().as_str())
            .map_err(map_err!(Read))?
        else {
            return Ok(None);
        };
        let table = txn.open_table(REQUEST_LOGS).map_err(map_err!(Table))?;
        match table.get(key.value()).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(from_json(guard.value())?)),
            None => Ok(None),
        }
    }
}
