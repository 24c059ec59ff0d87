//! run-gateway — HTTP ingress for Run.
//!
//! Turns an inbound HTTP request into a [`RequestEnvelope`](run_core::RequestEnvelope),
//! hands it to the sandbox executor for its deployment, and writes back
//! whatever response is eventually correlated to it.
//!
//! # Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | ANY | `/live/{endpoint_id}/{*path}` | Invoke the endpoint's active deployment |
//! | ANY | `/preview/{deployment_id}/{*path}` | Invoke a specific deployment |
//! | GET | `/metrics` | Prometheus exposition |
//! | GET | `/healthz` | Liveness probe |

pub mod convert;
pub mod correlation;
pub mod dispatch;
pub mod error;
pub mod handlers;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::{any, get};
use run_core::RunConfig;
use run_runtime::InstanceResolver;
use run_state::StateStore;

pub use correlation::{Correlations, Pending};
pub use dispatch::{Dispatcher, spawn_delivery};
pub use error::GatewayError;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub max_body_bytes: usize,
    /// Deadline for resolving a deployment to its executor.
    pub ask_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self::from(&RunConfig::default())
    }
}

impl From<&RunConfig> for GatewayConfig {
    fn from(config: &RunConfig) -> Self {
        Self {
            max_body_bytes: config.server.max_body_bytes,
            ask_timeout: config.runtime.ask_timeout(),
        }
    }
}

/// Shared state for gateway handlers.
#[derive(Clone)]
pub struct Gateway {
    store: StateStore,
    correlations: Correlations,
    dispatcher: Dispatcher,
    config: Arc<GatewayConfig>,
}

impl Gateway {
    pub fn new(store: StateStore, resolver: Arc<dyn InstanceResolver>, config: GatewayConfig) -> Self {
        let correlations = Correlations::new();
        let dispatcher = Dispatcher::new(resolver, correlations.clone(), config.ask_timeout);
        Self {
            store,
            correlations,
            dispatcher,
            config: Arc::new(config),
        }
    }

    /// The correlation map the delivery loop must complete into.
    pub fn correlations(&self) -> &Correlations {
        &self.correlations
    }
}

/// Build the gateway router.
pub fn build_router(gateway: Gateway) -> Router {
    Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/metrics", get(handlers::prometheus_metrics))
        .route("/{mode}/{id}", any(handlers::invoke))
        .route("/{mode}/{id}/{*path}", any(handlers::invoke_path))
        .with_state(gateway)
}
