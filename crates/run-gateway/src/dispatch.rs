//! Dispatch and delivery — the two halves of the asynchronous path.
//!
//! ```text
//! handler ──register──▶ Correlations ◀──complete── delivery loop
//!    │                                                 ▲
//!    └──dispatch──▶ resolver (deadline) ──submit──▶ executor ──Completion──┘
//! ```
//!
//! Every dispatched envelope ends in exactly one `complete` call: either
//! from the delivery loop or, when resolution or submission fails, from the
//! dispatcher itself with a synthesized 500.

use std::sync::Arc;
use std::time::Duration;

use run_core::{Completion, Headers, RequestEnvelope, RequestId, ResponseEnvelope};
use run_metrics::MetricsCollector;
use run_runtime::{InstanceResolver, RuntimeError, RuntimeResult};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::correlation::Correlations;
use crate::error::error_body;

/// A JSON error response, shaped like the gateway's own error responses.
pub fn error_envelope(request_id: RequestId, status: u16, message: impl Into<String>) -> ResponseEnvelope {
    let mut headers = Headers::new();
    headers.insert("content-type".to_string(), vec!["application/json".to_string()]);
    ResponseEnvelope {
        request_id,
        status,
        headers,
        body: error_body(message).to_string().into_bytes(),
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    resolver: Arc<dyn InstanceResolver>,
    correlations: Correlations,
    ask_timeout: Duration,
}

impl Dispatcher {
    pub fn new(resolver: Arc<dyn InstanceResolver>, correlations: Correlations, ask_timeout: Duration) -> Self {
        Self {
            resolver,
            correlations,
            ask_timeout,
        }
    }

    /// Route `request` to its executor on a background task.
    pub fn dispatch(&self, request: RequestEnvelope) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let request_id = request.id;
            let deployment_id = request.deployment_id;
            if let Err(e) = this.forward(request).await {
                warn!(%request_id, %deployment_id, error = %e, "dispatch failed");
                this.correlations.complete(error_envelope(
                    request_id,
                    500,
                    format!("cannot reach sandbox instance: {e}"),
                ));
            }
        })
    }

    async fn forward(&self, request: RequestEnvelope) -> RuntimeResult<()> {
        let resolve = self.resolver.resolve(request.deployment_id, request.runtime);
        let handle = tokio::time::timeout(self.ask_timeout, resolve)
            .await
            .map_err(|_| RuntimeError::ResolveTimeout(self.ask_timeout))??;
        debug!(request_id = %request.id, deployment_id = %handle.deployment_id(), "request routed");
        handle.submit(request).await
    }
}

/// Drain executor completions: answer waiting callers and hand metrics to
/// the collector without holding up delivery.
pub fn spawn_delivery(
    mut completions: mpsc::UnboundedReceiver<Completion>,
    correlations: Correlations,
    collector: Arc<MetricsCollector>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(Completion { response, metric }) = completions.recv().await {
            let request_id = response.request_id;
            if !correlations.complete(response) {
                debug!(%request_id, "no caller waiting for response");
            }
            if let Some(metric) = metric {
                let collector = Arc::clone(&collector);
                tokio::spawn(async move { collector.record(&metric).await });
            }
        }
        info!("completion channel closed, delivery stopped");
    })
}
