//! HTTP handlers.
//!
//! `/{mode}/{id}/{*path}` resolves the target deployment, registers a
//! correlation slot, dispatches the envelope, and waits for the slot.
//! There is no deadline here: the dispatcher's resolve deadline and the
//! executor's guaranteed completion bound the wait.

use std::str::FromStr;

use axum::body::to_bytes;
use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use run_core::{CoreError, Deployment, Endpoint, RequestEnvelope, parse_id};
use run_state::{MetadataStore, MetricsSnapshot, StateStore};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::Gateway;
use crate::convert::{headers_from_http, inner_url, into_http_response};
use crate::error::GatewayError;

/// How the `{id}` path segment is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// `{id}` is an endpoint; its active deployment serves the request.
    Live,
    /// `{id}` is a deployment, served whether or not it is active.
    Preview,
}

impl FromStr for Mode {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "live" => Ok(Mode::Live),
            "preview" => Ok(Mode::Preview),
            other => Err(GatewayError::UnknownMode(other.to_string())),
        }
    }
}

/// ANY /{mode}/{id}
pub async fn invoke(
    State(gateway): State<Gateway>,
    Path((mode, id)): Path<(String, String)>,
    request: Request,
) -> Result<Response, GatewayError> {
    serve(gateway, &mode, &id, None, request).await
}

/// ANY /{mode}/{id}/{*path}
pub async fn invoke_path(
    State(gateway): State<Gateway>,
    Path((mode, id, rest)): Path<(String, String, String)>,
    request: Request,
) -> Result<Response, GatewayError> {
    serve(gateway, &mode, &id, Some(&rest), request).await
}

async fn serve(
    gateway: Gateway,
    mode: &str,
    id: &str,
    rest: Option<&str>,
    request: Request,
) -> Result<Response, GatewayError> {
    let mode: Mode = mode.parse()?;
    let id = parse_id(id).map_err(|e| match e {
        CoreError::InvalidId { value, reason } => GatewayError::InvalidId { value, reason },
        other => GatewayError::InvalidId {
            value: id.to_string(),
            reason: other.to_string(),
        },
    })?;
    let (endpoint, deployment) = resolve_target(&gateway, mode, id)?;

    let (parts, body) = request.into_parts();
    let mut envelope = RequestEnvelope::new(endpoint.id, deployment.id, endpoint.runtime);
    envelope.method = parts.method.to_string();
    envelope.url = inner_url(rest, &parts.uri);
    envelope.headers = headers_from_http(&parts.headers);
    envelope.env = deployment.resolve_env(&endpoint);
    envelope.body = to_bytes(body, gateway.config.max_body_bytes)
        .await
        .map_err(|e| GatewayError::Body(e.to_string()))?
        .to_vec();

    info!(
        request_id = %envelope.id,
        ?mode,
        deployment_id = %deployment.id,
        method = %envelope.method,
        url = %envelope.url,
        "new request"
    );

    let pending = gateway.correlations.register(envelope.id);
    gateway.dispatcher.dispatch(envelope);
    let response = pending.await.map_err(|_| GatewayError::ResponseDropped)?;

    debug!(request_id = %response.request_id, status = response.status, "returning sandbox response");
    Ok(into_http_response(response))
}

fn resolve_target(gateway: &Gateway, mode: Mode, id: Uuid) -> Result<(Endpoint, Deployment), GatewayError> {
    let store = &gateway.store;
    match mode {
        Mode::Preview => {
            let deployment = store
                .get_deployment(id)?
                .ok_or(GatewayError::DeploymentNotFound(id))?;
            let endpoint = store
                .get_endpoint(deployment.endpoint_id)?
                .ok_or(GatewayError::EndpointNotFound(deployment.endpoint_id))?;
            Ok((endpoint, deployment))
        }
        Mode::Live => {
            let endpoint = store
                .get_endpoint(id)?
                .ok_or(GatewayError::EndpointNotFound(id))?;
            let active = endpoint
                .active_deployment_id
                .ok_or(GatewayError::NoActiveDeployment(id))?;
            let deployment = store
                .get_deployment(active)?
                .ok_or(GatewayError::DeploymentNotFound(active))?;
            Ok((endpoint, deployment))
        }
    }
}

/// GET /healthz
pub async fn healthz() -> &'static str {
    "ok"
}

/// GET /metrics
pub async fn prometheus_metrics(State(gateway): State<Gateway>) -> impl IntoResponse {
    let snapshots = latest_snapshots(&gateway.store);
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        run_metrics::render_prometheus(&snapshots),
    )
}

/// The newest persisted snapshot of every endpoint that has one.
fn latest_snapshots(store: &StateStore) -> Vec<MetricsSnapshot> {
    let endpoints = match store.list_endpoints() {
        Ok(endpoints) => endpoints,
        Err(e) => {
            warn!(error = %e, "failed to list endpoints for metrics");
            return Vec::new();
        }
    };

    let mut snapshots = Vec::with_capacity(endpoints.len());
    for endpoint in &endpoints {
        match store.list_metrics_for_endpoint(endpoint.id, 1) {
            Ok(latest) => snapshots.extend(latest),
            Err(e) => {
                warn!(endpoint_id = %endpoint.id, error = %e, "failed to read metrics snapshot");
            }
        }
    }
    snapshots
}
