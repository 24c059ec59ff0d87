//! Offline admin commands. Each returns the text to print.

use std::collections::HashMap;
use std::fmt::Write as _;

use anyhow::Context;
use run_core::{DeploymentId, Endpoint, EndpointId, RequestId, RuntimeKind};
use run_state::{LogStore, MetadataStore, StateStore};

pub fn create_endpoint(
    store: &StateStore,
    name: &str,
    runtime: RuntimeKind,
    env: HashMap<String, String>,
) -> anyhow::Result<String> {
    let endpoint = Endpoint::new(name, runtime, env);
    store.create_endpoint(&endpoint).context("failed to create endpoint")?;
    Ok(format!("created endpoint {} ({name}, {runtime})", endpoint.id))
}

pub fn list_endpoints(store: &StateStore) -> anyhow::Result<String> {
    let endpoints = store.list_endpoints().context("failed to list endpoints")?;
    let mut out = format!("{:<36}  {:<8}  {:<36}  NAME", "ID", "RUNTIME", "ACTIVE DEPLOYMENT");
    for e in endpoints {
        let active = e
            .active_deployment_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string());
        let _ = write!(out, "\n{:<36}  {:<8}  {:<36}  {}", e.id, e.runtime, active, e.name);
    }
    Ok(out)
}

pub fn deploy(
    store: &StateStore,
    endpoint_id: EndpointId,
    artifact: &[u8],
    env: HashMap<String, String>,
    activate: bool,
) -> anyhow::Result<String> {
    let endpoint = store
        .get_endpoint(endpoint_id)?
        .with_context(|| format!("endpoint {endpoint_id} not found"))?;
    let deployment = store
        .deploy(&endpoint, artifact, env)
        .context("failed to store deployment")?;

    let mut out = format!(
        "created deployment {} (sha256 {}, {} bytes)",
        deployment.id,
        deployment.hash,
        artifact.len()
    );
    if activate {
        store.set_active_deployment(endpoint.id, deployment.id)?;
        let _ = write!(out, "\nendpoint {} now serves {}", endpoint.id, deployment.id);
    }
    Ok(out)
}

pub fn promote(
    store: &StateStore,
    endpoint_id: EndpointId,
    deployment_id: DeploymentId,
) -> anyhow::Result<String> {
    let endpoint = store
        .set_active_deployment(endpoint_id, deployment_id)
        .context("failed to promote deployment")?;
    Ok(format!("endpoint {} now serves {deployment_id}", endpoint.id))
}

pub fn request_log(store: &StateStore, request_id: RequestId) -> anyhow::Result<String> {
    let log = store
        .find_log(request_id)?
        .with_context(|| format!("no log stored for request {request_id}"))?;
    Ok(log.lines.join("\n"))
}

pub fn deployment_logs(store: &StateStore, deployment_id: DeploymentId) -> anyhow::Result<String> {
    let logs = store.list_logs(deployment_id)?;
    let entries: Vec<_> = logs
        .into_iter()
        .map(|log| {
            serde_json::json!({
                "request_id": log.request_id,
                "created_at": log.created_at,
                "lines": log.lines,
            })
        })
        .collect();
    Ok(serde_json::to_string_pretty(&entries)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use run_core::RequestLog;
    use uuid::Uuid;

    fn store() -> StateStore {
        StateStore::open_in_memory().unwrap()
    }

    #[test]
    fn create_and_list_endpoints() {
        let store = store();
        let out = create_endpoint(&store, "hello", RuntimeKind::Python, HashMap::new()).unwrap();
        assert!(out.contains("hello, python"));

        let listing = list_endpoints(&store).unwrap();
        let rows: Vec<_> = listing.lines().collect();
        assert_eq!(rows.len(), 2);
        assert!(rows[1].ends_with("hello"));
        assert!(rows[1].contains("  -  "));
    }

    #[test]
    fn deploy_and_promote() {
        let store = store();
        let endpoint = Endpoint::new("api", RuntimeKind::Go, HashMap::new());
        store.create_endpoint(&endpoint).unwrap();

        deploy(&store, endpoint.id, b"v1", HashMap::new(), true).unwrap();
        let first = store.get_endpoint(endpoint.id).unwrap().unwrap().active_deployment_id.unwrap();

        let out = deploy(&store, endpoint.id, b"v2", HashMap::new(), false).unwrap();
        assert!(!out.contains("now serves"));
        assert_eq!(
            store.get_endpoint(endpoint.id).unwrap().unwrap().active_deployment_id,
            Some(first)
        );

        let second = store
            .list_deployments(endpoint.id)
            .unwrap()
            .into_iter()
            .find(|d| d.id != first)
            .unwrap();
        promote(&store, endpoint.id, second.id).unwrap();
        assert_eq!(
            store.get_endpoint(endpoint.id).unwrap().unwrap().active_deployment_id,
            Some(second.id)
        );
    }

    #[test]
    fn deploy_to_missing_endpoint_fails() {
        let err = deploy(&store(), Uuid::new_v4(), b"x", HashMap::new(), false).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn logs_by_request_and_deployment() {
        let store = store();
        let deployment_id = Uuid::new_v4();
        let request_id = Uuid::new_v4();
        store
            .append_log(&RequestLog::new(deployment_id, request_id, vec!["a".into(), "b".into()]))
            .unwrap();

        assert_eq!(request_log(&store, request_id).unwrap(), "a\nb");
        assert!(request_log(&store, Uuid::new_v4()).is_err());

        let json: serde_json::Value = serde_json::from_str(&deployment_logs(&store, deployment_id).unwrap()).unwrap();
        assert_eq!(json[0]["lines"], serde_json::json!(["a", "b"]));
    }
}
