//! Prometheus text exposition format.

use std::fmt::Write as _;

use run_state::MetricsSnapshot;

struct Gauge {
    name: &'static str,
    help: &'static str,
    value: fn(&MetricsSnapshot) -> String,
}

const GAUGES: &[Gauge] = &[
    Gauge {
        name: "run_requests_per_second",
        help: "Requests per second over the last snapshot window.",
        value: |s| format!("{:.2}", s.rps),
    },
    Gauge {
        name: "run_requests_total",
        help: "Requests served in the last snapshot window.",
        value: |s| s.total_requests.to_string(),
    },
    Gauge {
        name: "run_latency_p50_ms",
        help: "P50 latency in milliseconds.",
        value: |s| format!("{:.2}", s.latency_p50_ms),
    },
    Gauge {
        name: "run_latency_p99_ms",
        help: "P99 latency in milliseconds.",
        value: |s| format!("{:.2}", s.latency_p99_ms),
    },
    Gauge {
        name: "run_error_rate",
        help: "Share of 5xx responses (0.0-1.0).",
        value: |s| format!("{:.4}", s.error_rate),
    },
];

/// Render snapshots as gauges labelled by `endpoint`.
pub fn render_prometheus(snapshots: &[MetricsSnapshot]) -> String {
    let mut out = String::new();
    for gauge in GAUGES {
        let _ = writeln!(out, "# HELP {} {}", gauge.name, gauge.help);
        let _ = writeln!(out, "# TYPE {} gauge", gauge.name);
        for s in snapshots {
            let _ = writeln!(
                out,
                "{}{{endpoint=\"{}\"}} {}",
                gauge.name,
                s.endpoint_id,
                (gauge.value)(s)
            );
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn test_snapshot(endpoint_id: Uuid) -> MetricsSnapshot {
        MetricsSnapshot {
            endpoint_id,
            epoch: 1000,
            total_requests: 9030,
            rps: 150.5,
            latency_p50_ms: 5.2,
            latency_p99_ms: 45.8,
            error_rate: 0.012,
        }
    }

    #[test]
    fn render_empty_keeps_declarations() {
        let output = render_prometheus(&[]);
        assert!(output.contains("# HELP run_requests_per_second"));
        assert!(output.contains("# TYPE run_requests_per_second gauge"));
        assert!(!output.contains("endpoint="));
    }

    #[test]
    fn render_single_endpoint() {
        let id = Uuid::new_v4();
        let output = render_prometheus(&[test_snapshot(id)]);

        assert!(output.contains(&format!("run_requests_per_second{{endpoint=\"{id}\"}} 150.50")));
        assert!(output.contains(&format!("run_requests_total{{endpoint=\"{id}\"}} 9030")));
        assert!(output.contains(&format!("run_latency_p50_ms{{endpoint=\"{id}\"}} 5.20")));
        assert!(output.contains(&format!("run_latency_p99_ms{{endpoint=\"{id}\"}} 45.80")));
        assert!(output.contains(&format!("run_error_rate{{endpoint=\"{id}\"}} 0.0120")));
    }

    #[test]
    fn every_sample_line_is_labelled() {
        let output = render_prometheus(&[test_snapshot(Uuid::new_v4()), test_snapshot(Uuid::new_v4())]);
        let samples: Vec<_> = output
            .lines()
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .collect();
        assert_eq!(samples.len(), 2 * GAUGES.len());
        for line in samples {
            assert!(line.contains("{endpoint=\""), "line should have labels: {line}");
        }
    }
}
