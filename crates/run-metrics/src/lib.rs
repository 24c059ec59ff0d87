//! run-metrics — request observability for Run endpoints.
//!
//! Tracks per-endpoint request metrics (RPS, latency, error rate),
//! persists periodic snapshots to the state store, and renders them in the
//! Prometheus text format.
//!
//! # Architecture
//!
//! ```text
//! MetricsCollector
//!   ├── record() ← one RequestMetric per completed request
//!   ├── snapshot() → persists MetricsSnapshot to StateStore
//!   └── run() → periodic snapshot loop
//!
//! Prometheus exposition
//!   └── render_prometheus() → text/plain for GET /metrics
//! ```

pub mod collector;
pub mod prometheus;

pub use collector::MetricsCollector;
pub use prometheus::render_prometheus;
