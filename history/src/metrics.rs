//! Prometheus metrics for history access

use once_cell::sync::Lazy;
use prometheus::{
    register_counter, register_counter_vec, register_histogram_vec, Counter, CounterVec, Encoder,
    HistogramVec, TextEncoder,
};

// ── Backend request metrics ──────────────────────────────────────────────────

pub static BACKEND_REQUESTS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "trendline_backend_requests_total",
        "History backend calls",
        &["backend", "operation", "status"]
    )
    .unwrap()
});

pub static BACKEND_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "trendline_backend_duration_seconds",
        "History backend call latency",
        &["backend", "operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
    )
    .unwrap()
});

pub static PARTITION_FAILURES: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "trendline_partition_failures_total",
        "Backend partitions skipped because they failed",
        &["backend", "kind"]
    )
    .unwrap()
});

// ── Routing metrics ──────────────────────────────────────────────────────────

pub static ROUTING_CACHE_MISSES: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "trendline_routing_cache_misses_total",
        "Value type classifications computed from configuration"
    )
    .unwrap()
});

// ── Cascade delete metrics ───────────────────────────────────────────────────

pub static HOUSEKEEPER_ROWS: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "trendline_housekeeper_rows_total",
        "Housekeeper cleanup tasks queued by item deletion"
    )
    .unwrap()
});

pub static DELETED_ITEMS: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "trendline_deleted_items_total",
        "Items removed by cascade delete"
    )
    .unwrap()
});

/// Record the outcome and latency of one backend call.
pub fn observe_backend(backend: &str, operation: &str, ok: bool, elapsed_secs: f64) {
    let status = if ok { "ok" } else { "error" };
    BACKEND_REQUESTS
        .with_label_values(&[backend, operation, status])
        .inc();
    BACKEND_DURATION
        .with_label_values(&[backend, operation])
        .observe(elapsed_secs);
}

/// Render all registered metrics to Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
