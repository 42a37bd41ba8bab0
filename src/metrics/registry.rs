use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Histogram bucket boundaries for latency metrics (seconds).
const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Thin handle around the global metrics recorder.
///
/// After `Metrics::install()` the `metrics` crate macros (`counter!`,
/// `gauge!`, `histogram!`) work anywhere in the codebase. The handle is
/// retained solely for rendering the `/metrics` endpoint.
#[derive(Clone)]
pub struct Metrics {
    handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder and register descriptions.
    /// Must be called once at startup, before any macro use.
    pub fn install() -> Self {
        let handle = PrometheusBuilder::new()
            .set_buckets_for_metric(
                metrics_exporter_prometheus::Matcher::Suffix("_duration_seconds".to_string()),
                LATENCY_BUCKETS,
            )
            .expect("valid matcher")
            .install_recorder()
            .expect("failed to install metrics recorder");

        describe_counter!(
            "iris_http_requests_total",
            Unit::Count,
            "Total HTTP requests dispatched"
        );
        describe_histogram!(
            "iris_http_request_duration_seconds",
            Unit::Seconds,
            "Total request duration from the client's perspective"
        );
        describe_histogram!(
            "iris_upstream_request_duration_seconds",
            Unit::Seconds,
            "Time from sending the upstream request to receiving response headers"
        );
        describe_gauge!(
            "iris_http_requests_in_flight",
            Unit::Count,
            "Requests currently being dispatched"
        );
        describe_counter!(
            "iris_connections_total",
            Unit::Count,
            "Client connections accepted (or failed to accept)"
        );
        describe_gauge!(
            "iris_connections_active",
            Unit::Count,
            "Currently open client connections"
        );

        Self { handle }
    }

    pub fn render(&self) -> String {
        self.handle.render()
    }
}
