use axum::{http::StatusCode, response::IntoResponse};
use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Encoder, Gauge, Histogram, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};
use std::time::Duration;

/// Metric name prefix for all listening-views metrics
const PREFIX: &str = "listening_views";

lazy_static! {
    // Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // HTTP Request Metrics
    pub static ref HTTP_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_http_requests_total"), "Total number of HTTP requests"),
        &["method", "path", "status"]
    ).expect("Failed to create http_requests_total metric");

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_http_request_duration_seconds"),
            "HTTP request duration in seconds"
        )
        .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0]),
        &["method", "path"]
    ).expect("Failed to create http_request_duration_seconds metric");

    // Play Event Metrics
    pub static ref PLAY_EVENTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_play_events_total"), "Play events by outcome"),
        &["status"]
    ).expect("Failed to create play_events_total metric");

    pub static ref PLAY_EVENT_DURATION_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            format!("{PREFIX}_play_event_duration_seconds"),
            "Time to apply one play event in seconds"
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0])
    ).expect("Failed to create play_event_duration_seconds metric");

    pub static ref DEGRADED_READS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(
            format!("{PREFIX}_degraded_reads_total"),
            "Prior-value reads that failed and were taken as absent"
        ),
        &["table"]
    ).expect("Failed to create degraded_reads_total metric");

    pub static ref BATCH_MUTATIONS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            format!("{PREFIX}_batch_mutations"),
            "Number of mutations per submitted batch"
        )
        .buckets(vec![1.0, 2.0, 4.0, 8.0, 12.0, 16.0, 24.0, 32.0])
    ).expect("Failed to create batch_mutations metric");

    // Bulk Import Metrics
    pub static ref IMPORTED_ROWS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_imported_rows_total"), "Bulk import rows by kind and outcome"),
        &["kind", "status"]
    ).expect("Failed to create imported_rows_total metric");

    // Process Metrics
    pub static ref PROCESS_MEMORY_BYTES: Gauge = Gauge::new(
        format!("{PREFIX}_process_memory_bytes"),
        "Process memory usage in bytes"
    ).expect("Failed to create process_memory_bytes metric");
}

/// Initialize all metrics and register them with the Prometheus registry
pub fn init_metrics() {
    // Register all metrics - ignore errors if already registered (for tests)
    let _ = REGISTRY.register(Box::new(HTTP_REQUESTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(PLAY_EVENTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(PLAY_EVENT_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(DEGRADED_READS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(BATCH_MUTATIONS.clone()));
    let _ = REGISTRY.register(Box::new(IMPORTED_ROWS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(PROCESS_MEMORY_BYTES.clone()));

    tracing::info!("Metrics system initialized successfully");
}

/// Record HTTP request metrics
pub fn record_http_request(method: &str, path: &str, status: u16, duration: Duration) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status.to_string()])
        .inc();

    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path])
        .observe(duration.as_secs_f64());
}

/// Record the outcome of one play event
pub fn record_play_event(status: &str, duration: Duration) {
    PLAY_EVENTS_TOTAL.with_label_values(&[status]).inc();
    PLAY_EVENT_DURATION_SECONDS.observe(duration.as_secs_f64());
}

pub fn record_degraded_read(table: &str) {
    DEGRADED_READS_TOTAL.with_label_values(&[table]).inc();
}

pub fn record_batch_size(mutations: usize) {
    BATCH_MUTATIONS.observe(mutations as f64);
}

pub fn record_imported_row(kind: &str, status: &str) {
    IMPORTED_ROWS_TOTAL.with_label_values(&[kind, status]).inc();
}

/// Collapses concrete ids out of a request path so label cardinality stays bounded.
pub fn categorize_endpoint(path: &str) -> &'static str {
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
    match segments.as_slice() {
        [""] => "root",
        ["metrics"] => "metrics",
        ["v1", "listeners"] => "listeners",
        ["v1", "listeners", _] => "listener",
        ["v1", "tracks"] => "tracks",
        ["v1", "tracks", _] => "track",
        ["v1", "plays"] => "plays",
        ["v1", "top", _, _] => "top",
        ["v1", "daily", _, _] => "daily",
        _ => "other",
    }
}

/// Update process memory usage
pub fn update_memory_usage() {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            for line in status.lines() {
                if line.starts_with("VmRSS:") {
                    // RSS is reported in kB
                    if let Some(kb_str) = line.split_whitespace().nth(1) {
                        if let Ok(kb) = kb_str.parse::<f64>() {
                            PROCESS_MEMORY_BYTES.set(kb * 1024.0);
                            return;
                        }
                    }
                }
            }
        }
    }
}

/// Handler for the /metrics endpoint
pub async fn metrics_handler() -> impl IntoResponse {
    update_memory_usage();

    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = vec![];
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => {
            let response = String::from_utf8(buffer).unwrap_or_else(|_| String::from(""));
            (StatusCode::OK, response)
        }
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}
