use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    Encoder, HistogramVec, IntCounter, IntCounterVec, IntGauge, TextEncoder,
};

lazy_static! {
    // HTTP Metrics
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "http_requests_total",
        "Total number of HTTP requests",
        &["method", "path", "status"]
    )
    .unwrap();

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds",
        &["method", "path"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .unwrap();

    // Lock Metrics (Redis lease)
    pub static ref LOCK_OPERATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "lock_operations_total",
        "Total number of distributed lock operations",
        &["operation", "status"]
    )
    .unwrap();

    pub static ref LOCK_OPERATION_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "lock_operation_duration_seconds",
        "Distributed lock operation duration in seconds",
        &["operation"],
        vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1]
    )
    .unwrap();

    // Business Metrics
    pub static ref ROUND_SESSIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "round_sessions_total",
        "Round session lifecycle events",
        &["status"]
    )
    .unwrap();

    pub static ref ROUND_SESSIONS_ACTIVE: IntGauge = register_int_gauge!(
        "round_sessions_active",
        "Round sessions started by this instance and not yet completed"
    )
    .unwrap();

    pub static ref ANSWERS_RECORDED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "answers_recorded_total",
        "Answer ledger writes",
        &["outcome"]
    )
    .unwrap();

    pub static ref ROUNDS_SCORED_TOTAL: IntCounter = register_int_counter!(
        "rounds_scored_total",
        "Round results persisted"
    )
    .unwrap();

    pub static ref GENERATION_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "generation_requests_total",
        "Question generation calls",
        &["status"]
    )
    .unwrap();

    pub static ref ATTEMPTS_FINALIZED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "attempts_finalized_total",
        "Finalized attempts by grade",
        &["grade"]
    )
    .unwrap();

    pub static ref RANKING_RECOMPUTE_TOTAL: IntCounterVec = register_int_counter_vec!(
        "ranking_recompute_total",
        "Ranking recomputations per survey",
        &["status"]
    )
    .unwrap();

    pub static ref TIMEOUT_SWEEP_PAUSED_TOTAL: IntCounter = register_int_counter!(
        "timeout_sweep_paused_total",
        "Sessions paused because their time window closed"
    )
    .unwrap();

    pub static ref SSE_CONNECTIONS_ACTIVE: IntGauge = register_int_gauge!(
        "sse_connections_active",
        "Number of active SSE connections"
    )
    .unwrap();

    pub static ref SWEEPER_TICKS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "timeout_sweeper_ticks_total",
        "Total number of timeout sweeper ticks",
        &["status"]
    )
    .unwrap();

    pub static ref RANKING_WORKER_TICKS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "ranking_worker_ticks_total",
        "Total number of ranking worker ticks",
        &["status"]
    )
    .unwrap();
}

/// Renders all metrics in Prometheus text format
pub fn render_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer)
        .map_err(|e| prometheus::Error::Msg(format!("Failed to convert metrics to UTF-8: {}", e)))
}

/// Helper: track a Redis lock operation with metrics
pub async fn track_lock_operation<F, T>(operation: &str, future: F) -> Result<T, anyhow::Error>
where
    F: std::future::Future<Output = Result<T, anyhow::Error>>,
{
    let start = std::time::Instant::now();
    let result = future.await;
    let duration = start.elapsed().as_secs_f64();

    let status = if result.is_ok() { "success" } else { "error" };

    LOCK_OPERATIONS_TOTAL
        .with_label_values(&[operation, status])
        .inc();

    LOCK_OPERATION_DURATION_SECONDS
        .with_label_values(&[operation])
        .observe(duration);

    result
}
