use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    HistogramVec, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::LazyLock;

// --- Request Metrics ---

/// Total number of inbound requests handled by the proxy.
///
/// This counter tracks the overall request volume, before selection or
/// forwarding. Use it to monitor throughput and detect traffic spikes or drops.
/// Example Prometheus query: `rate(proxy_requests_total[5m])` for requests per second.
pub static HTTP_REQUESTS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!("proxy_requests_total", "Total number of inbound requests").unwrap()
});

/// Total number of requests successfully relayed, per upstream.
///
/// Counts relays where the backend produced a response, whatever its status.
/// Example query: `rate(proxy_requests_forwarded_total{upstream=\"...\"}[5m])`.
pub static REQUESTS_FORWARDED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "proxy_requests_forwarded_total",
        "Total number of requests relayed to each upstream",
        &["upstream"]
    )
    .unwrap()
});

/// Total number of relay failures per upstream.
///
/// Counts requests where the backend was unreachable, timed out, or the
/// relay could not complete; the caller received a gateway error instead.
/// Use to identify problematic upstreams.
/// Example query: `rate(proxy_relay_errors_total{upstream=\"...\"}[5m])`.
pub static RELAY_ERRORS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "proxy_relay_errors_total",
        "Total number of relay failures per upstream",
        &["upstream"]
    )
    .unwrap()
});

// --- Balancer Metrics ---

/// Total number of times each upstream was selected by the rotation.
///
/// Use to verify round-robin fairness: all live upstreams should grow at
/// the same rate.
/// Example query: `rate(proxy_upstream_selected_total{upstream=\"...\"}[5m])`.
pub static UPSTREAM_SELECTED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "proxy_upstream_selected_total",
        "Total number of times each upstream was selected",
        &["upstream"]
    )
    .unwrap()
});

/// Total number of requests rejected because no upstream was live.
///
/// A non-zero rate means the whole pool reported non-live and callers
/// received 503 responses.
/// Example query: `rate(proxy_no_upstream_available_total[5m])`.
pub static NO_UPSTREAM_AVAILABLE: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(
        "proxy_no_upstream_available_total",
        "Total requests rejected because no upstream was live"
    )
    .unwrap()
});

/// Total number of configured upstreams.
pub static TOTAL_UPSTREAMS: LazyLock<IntGauge> = LazyLock::new(|| {
    register_int_gauge!("proxy_upstreams_total", "Total number of configured upstreams").unwrap()
});

// --- Latency Metrics ---

/// Histogram of relay durations in seconds per upstream.
///
/// Buckets: `[0.001, 0.002, 0.005, 0.01, 0.02, 0.05, 0.1, 0.2, 0.5, 1.0, 2.0, 5.0, 10.0]`.
/// Use to analyze latency distribution and identify slow upstreams.
/// Example query: `histogram_quantile(0.95, sum(rate(proxy_request_duration_seconds_bucket{upstream=\"...\"}[5m])) by (le))`.
pub static REQUEST_LATENCY_PER_UPSTREAM: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        "proxy_request_duration_seconds",
        "Histogram of relay duration in seconds per upstream",
        &["upstream"],
        vec![0.001, 0.002, 0.005, 0.01, 0.02, 0.05, 0.1, 0.2, 0.5, 1.0, 2.0, 5.0, 10.0]
    )
    .unwrap()
});
