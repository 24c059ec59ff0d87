//! Records owned by the state store itself.

use run_core::EndpointId;
use serde::{Deserialize, Serialize};

/// Point-in-time metrics snapshot for an endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricsSnapshot {
    pub endpoint_id: EndpointId,
    /// Epoch (unix timestamp in seconds).
    pub epoch: u64,
    pub total_requests: u64,
    /// Requests per second over the snapshot window.
    pub rps: f64,
    pub latency_p50_ms: f64,
    pub latency_p99_ms: f64,
    /// Share of requests answered with a 5xx status (0.0–1.0).
    pub error_rate: f64,
}

impl MetricsSnapshot {
    /// Zero-padded epoch keeps keys in time order under a lexicographic scan.
    pub fn table_key(&self) -> String {
        format!("{}:{:020}", self.endpoint_id, self.epoch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn table_key_sorts_by_epoch() {
        let id = Uuid::new_v4();
        let snap = |epoch| MetricsSnapshot {
            endpoint_id: id,
            epoch,
            total_requests: 0,
            rps: 0.0,
            latency_p50_ms: 0.0,
            latency_p99_ms: 0.0,
            error_rate: 0.0,
        };
        assert!(snap(9).table_key() < snap(10).table_key());
    }
}
