//! `rund serve` — wire the pipeline together and run until Ctrl-C.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use run_core::RunConfig;
use run_gateway::{Gateway, GatewayConfig, build_router, spawn_delivery};
use run_metrics::MetricsCollector;
use run_runtime::{ExecutorDeps, InstanceManager, ManagerConfig, ModuleCache, SandboxEngine, SandboxLimits};
use run_state::{MetadataStore, StateStore};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

pub async fn run(config: RunConfig, store: StateStore) -> anyhow::Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "Run daemon starting");
    info!(path = ?config.state.path, "state store opened");

    // ── Runtime ───────────────────────────────────────────────

    let engine = SandboxEngine::new(SandboxLimits::from(&config.runtime))
        .context("failed to initialize sandbox engine")?;
    let cache = ModuleCache::new();
    let (completions_tx, completions_rx) = mpsc::unbounded_channel();
    let deps = ExecutorDeps::from_store(engine, cache.clone(), store.clone(), completions_tx);
    let (manager, manager_task) = InstanceManager::spawn(deps, ManagerConfig::from(&config.runtime));
    info!("instance manager initialized");

    // ── Metrics ───────────────────────────────────────────────

    let collector = Arc::new(MetricsCollector::new(store.clone(), config.metrics.interval()));
    info!(interval = ?config.metrics.interval(), "metrics collector initialized");

    // ── Shutdown signal ───────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Background tasks ──────────────────────────────────────

    let metrics_handle = tokio::spawn({
        let collector = Arc::clone(&collector);
        let shutdown = shutdown_rx.clone();
        async move { collector.run(shutdown).await }
    });

    let reconcile_handle = tokio::spawn(reconcile(
        store.clone(),
        cache,
        manager.clone(),
        config.runtime.sweep_interval(),
        shutdown_rx.clone(),
    ));

    let gateway = Gateway::new(store, Arc::new(manager.clone()), GatewayConfig::from(&config));
    let delivery_handle = spawn_delivery(completions_rx, gateway.correlations().clone(), collector);

    // ── Gateway ───────────────────────────────────────────────

    let router = build_router(gateway);
    let addr = config.server.addr;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "gateway listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await
        .context("gateway server failed")?;

    // ── Drain ─────────────────────────────────────────────────

    let _ = reconcile_handle.await;
    if let Err(e) = manager.shutdown().await {
        warn!(error = %e, "instance manager shutdown failed");
    }
    let _ = manager_task.await;
    // Executors are gone, so the completion channel closes and delivery ends.
    let _ = delivery_handle.await;
    let _ = metrics_handle.await;

    info!("Run daemon stopped");
    Ok(())
}

/// Retire executors and cache entries of deployments that no longer exist.
async fn reconcile(
    store: StateStore,
    cache: ModuleCache,
    manager: InstanceManager,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                for deployment_id in cache.deployment_ids() {
                    match store.get_deployment(deployment_id) {
                        Ok(Some(_)) => {}
                        Ok(None) => {
                            debug!(%deployment_id, "deployment deleted, retiring");
                            if let Err(e) = manager.retire(deployment_id).await {
                                warn!(%deployment_id, error = %e, "failed to retire deployment");
                            }
                        }
                        Err(e) => warn!(%deployment_id, error = %e, "deployment lookup failed"),
                    }
                }
            }
            _ = shutdown.changed() => break,
        }
    }
}
