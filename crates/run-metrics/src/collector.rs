//! Metrics collector — tracks per-endpoint request metrics.
//!
//! Counters are atomics; latency samples sit behind a per-endpoint mutex.
//! Endpoints are registered lazily on their first recorded request.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use run_core::{EndpointId, RequestMetric};
use run_state::{MetricsSnapshot, StateResult, StateStore};
use tokio::sync::{Mutex, RwLock, watch};
use tracing::{debug, error, info};

/// Per-endpoint metrics bucket.
struct EndpointMetrics {
    /// Requests since the last snapshot.
    request_count: AtomicU64,
    /// 5xx responses since the last snapshot.
    error_count: AtomicU64,
    /// Latency samples in microseconds.
    latencies: Mutex<Vec<u64>>,
}

impl EndpointMetrics {
    fn new() -> Self {
        Self {
            request_count: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
            latencies: Mutex::new(Vec::new()),
        }
    }
}

/// Collects request metrics for every endpoint and periodically snapshots
/// them to the state store.
pub struct MetricsCollector {
    metrics: RwLock<HashMap<EndpointId, Arc<EndpointMetrics>>>,
    state: StateStore,
    interval: Duration,
}

impl MetricsCollector {
    pub fn new(state: StateStore, interval: Duration) -> Self {
        Self {
            metrics: RwLock::new(HashMap::new()),
            state,
            interval,
        }
    }

    /// Record one executed request.
    pub async fn record(&self, metric: &RequestMetric) {
        let latency_us = u64::try_from(metric.duration.as_micros()).unwrap_or(u64::MAX);
        self.record_request(metric.endpoint_id, latency_us, metric.is_error())
            .await;
    }

    /// Record a request for an endpoint, registering it if unseen.
    pub async fn record_request(&self, endpoint_id: EndpointId, latency_us: u64, is_error: bool) {
        let bucket = self.bucket(endpoint_id).await;
        bucket.request_count.fetch_add(1, Ordering::Relaxed);
        if is_error {
            bucket.error_count.fetch_add(1, Ordering::Relaxed);
        }
        bucket.latencies.lock().await.push(latency_us);
    }

    async fn bucket(&self, endpoint_id: EndpointId) -> Arc<EndpointMetrics> {
        if let Some(bucket) = self.metrics.read().await.get(&endpoint_id) {
            return Arc::clone(bucket);
        }
        let mut metrics = self.metrics.write().await;
        let bucket = metrics.entry(endpoint_id).or_insert_with(|| {
            debug!(%endpoint_id, "registered for metrics collection");
            Arc::new(EndpointMetrics::new())
        });
        Arc::clone(bucket)
    }

    /// Stop tracking an endpoint. Unsnapshotted samples are discarded.
    pub async fn unregister(&self, endpoint_id: EndpointId) {
        self.metrics.write().await.remove(&endpoint_id);
        debug!(%endpoint_id, "unregistered from metrics collection");
    }

    /// Requests recorded since the last snapshot.
    pub async fn current_request_count(&self, endpoint_id: EndpointId) -> u64 {
        self.metrics
            .read()
            .await
            .get(&endpoint_id)
            .map(|m| m.request_count.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub async fn registered_endpoints(&self) -> Vec<EndpointId> {
        self.metrics.read().await.keys().copied().collect()
    }

    /// Snapshot every endpoint, persist the snapshots, and start a new window.
    pub async fn snapshot(&self) -> StateResult<Vec<MetricsSnapshot>> {
        let metrics = self.metrics.read().await;
        let epoch = epoch_secs();
        let mut snapshots = Vec::with_capacity(metrics.len());

        for (endpoint_id, m) in metrics.iter() {
            let mut latencies = m.latencies.lock().await;
            let request_count = m.request_count.swap(0, Ordering::Relaxed);
            let error_count = m.error_count.swap(0, Ordering::Relaxed);

            let rps = request_count as f64 / self.interval.as_secs_f64();
            let error_rate = if request_count > 0 {
                error_count as f64 / request_count as f64
            } else {
                0.0
            };
            let (p50, p99) = compute_percentiles(&latencies);
            latencies.clear();
            drop(latencies);

            let snapshot = MetricsSnapshot {
                endpoint_id: *endpoint_id,
                epoch,
                total_requests: request_count,
                rps,
                latency_p50_ms: p50,
                latency_p99_ms: p99,
                error_rate,
            };
            self.state.put_metrics(&snapshot)?;
            snapshots.push(snapshot);
        }

        debug!(endpoints = snapshots.len(), epoch, "metrics snapshot persisted");
        Ok(snapshots)
    }

    /// Run the snapshot loop until `shutdown` flips, then take a final snapshot.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "metrics collector started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    if let Err(e) = self.snapshot().await {
                        error!(error = %e, "metrics snapshot failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("metrics collector shutting down");
                    if let Err(e) = self.snapshot().await {
                        error!(error = %e, "final metrics snapshot failed");
                    }
                    break;
                }
            }
        }
    }
}

/// P50 and P99 of latency samples in microseconds, returned in milliseconds.
///
/// Returns `(0.0, 0.0)` when there are no samples.
fn compute_percentiles(latencies: &[u64]) -> (f64, f64) {
    if latencies.is_empty() {
        return (0.0, 0.0);
    }

    let mut sorted = latencies.to_vec();
    sorted.sort_unstable();

    let at = |q: f64| {
        let idx = (sorted.len() as f64 * q) as usize;
        sorted[idx.min(sorted.len() - 1)] as f64 / 1000.0
    };
    (at(0.50), at(0.99))
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn collector(state: &StateStore) -> MetricsCollector {
        MetricsCollector::new(state.clone(), Duration::from_secs(60))
    }

    #[tokio::test]
    async fn first_record_registers_endpoint() {
        let state = StateStore::open_in_memory().unwrap();
        let collector = collector(&state);
        let endpoint = Uuid::new_v4();
        assert!(collector.registered_endpoints().await.is_empty());

        collector.record_request(endpoint, 5000, false).await;
        collector.record_request(endpoint, 10000, false).await;
        collector.record_request(endpoint, 3000, true).await;

        assert_eq!(collector.registered_endpoints().await, vec![endpoint]);
        assert_eq!(collector.current_request_count(endpoint).await, 3);
        assert_eq!(collector.current_request_count(Uuid::new_v4()).await, 0);
    }

    #[tokio::test]
    async fn record_uses_metric_status_and_duration() {
        let state = StateStore::open_in_memory().unwrap();
        let collector = collector(&state);
        let endpoint_id = Uuid::new_v4();
        let metric = |status| RequestMetric {
            request_id: Uuid::new_v4(),
            endpoint_id,
            deployment_id: Uuid::new_v4(),
            status,
            duration: Duration::from_millis(4),
        };

        collector.record(&metric(200)).await;
        collector.record(&metric(404)).await;
        collector.record(&metric(503)).await;

        let snapshots = collector.snapshot().await.unwrap();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].total_requests, 3);
        // Only 5xx counts as an error.
        assert!((snapshots[0].error_rate - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(snapshots[0].latency_p50_ms, 4.0);
    }

    #[tokio::test]
    async fn snapshot_persists_to_state() {
        let state = StateStore::open_in_memory().unwrap();
        let collector = collector(&state);
        let endpoint = Uuid::new_v4();

        collector.record_request(endpoint, 5000, false).await;
        collector.record_request(endpoint, 10000, false).await;
        collector.record_request(endpoint, 50000, true).await;

        let snapshots = collector.snapshot().await.unwrap();
        let snap = &snapshots[0];
        assert_eq!(snap.endpoint_id, endpoint);
        assert!(snap.rps > 0.0);
        assert!(snap.error_rate > 0.0 && snap.error_rate < 1.0);

        let stored = state.list_metrics_for_endpoint(endpoint, 10).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].epoch, snap.epoch);
        assert_eq!(stored[0].total_requests, 3);
    }

    #[tokio::test]
    async fn snapshot_resets_window() {
        let state = StateStore::open_in_memory().unwrap();
        let collector = collector(&state);
        let endpoint = Uuid::new_v4();

        collector.record_request(endpoint, 5000, false).await;
        collector.snapshot().await.unwrap();
        assert_eq!(collector.current_request_count(endpoint).await, 0);

        // The endpoint stays registered and reports an empty window.
        let snapshots = collector.snapshot().await.unwrap();
        assert_eq!(snapshots[0].total_requests, 0);
        assert_eq!(snapshots[0].error_rate, 0.0);
    }

    #[tokio::test]
    async fn unregister_drops_endpoint() {
        let state = StateStore::open_in_memory().unwrap();
        let collector = collector(&state);
        let endpoint = Uuid::new_v4();

        collector.record_request(endpoint, 1000, false).await;
        collector.unregister(endpoint).await;
        assert!(collector.registered_endpoints().await.is_empty());
        assert!(collector.snapshot().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn concurrent_records_are_counted() {
        let state = StateStore::open_in_memory().unwrap();
        let collector = Arc::new(collector(&state));
        let endpoint = Uuid::new_v4();

        let mut tasks = Vec::new();
        for i in 0..32u64 {
            let collector = Arc::clone(&collector);
            tasks.push(tokio::spawn(async move {
                collector.record_request(endpoint, i * 100, false).await;
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(collector.current_request_count(endpoint).await, 32);
        assert_eq!(collector.registered_endpoints().await.len(), 1);
    }

    #[tokio::test]
    async fn run_takes_final_snapshot_on_shutdown() {
        let state = StateStore::open_in_memory().unwrap();
        let collector = Arc::new(MetricsCollector::new(state.clone(), Duration::from_secs(3600)));
        let endpoint = Uuid::new_v4();
        collector.record_request(endpoint, 2000, false).await;

        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn({
            let collector = Arc::clone(&collector);
            async move { collector.run(rx).await }
        });
        tx.send(true).unwrap();
        task.await.unwrap();

        let stored = state.list_metrics_for_endpoint(endpoint, 10).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].total_requests, 1);
    }

    #[test]
    fn percentiles_empty() {
        assert_eq!(compute_percentiles(&[]), (0.0, 0.0));
    }

    #[test]
    fn percentiles_single_value() {
        assert_eq!(compute_percentiles(&[5000]), (5.0, 5.0));
    }

    #[test]
    fn percentiles_distribution() {
        let latencies: Vec<u64> = (1..=100).map(|i| i * 1000).collect();
        let (p50, p99) = compute_percentiles(&latencies);
        assert!((49.0..=51.0).contains(&p50), "p50 was {p50}");
        assert!((98.0..=100.0).contains(&p99), "p99 was {p99}");
    }
}
