use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_histogram_vec, register_int_counter, register_int_counter_vec,
    register_int_gauge, Histogram, HistogramVec, IntCounter, IntCounterVec, IntGauge,
};

lazy_static! {
    // ═══════════════════════════════════════════════════════════════════════════
    // OPERATION METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Total number of bulk operations started
    pub static ref OPERATIONS_STARTED: IntCounter = register_int_counter!(
        "bulkflow_operations_started_total",
        "Total number of bulk operations started"
    )
    .unwrap();

    /// Finished operations by final status
    pub static ref OPERATIONS_FINISHED: IntCounterVec = register_int_counter_vec!(
        "bulkflow_operations_finished_total",
        "Total bulk operations finished by status",
        &["status"]
    )
    .unwrap();

    /// Wall-clock duration of whole operations
    pub static ref OPERATION_DURATION: Histogram = register_histogram!(
        "bulkflow_operation_duration_ms",
        "Bulk operation duration in milliseconds",
        vec![100.0, 500.0, 1000.0, 5000.0, 15000.0, 60000.0, 300000.0, 900000.0]
    )
    .unwrap();

    /// Current number of operations in flight
    pub static ref ACTIVE_OPERATIONS: IntGauge = register_int_gauge!(
        "bulkflow_operations_active",
        "Current number of bulk operations in flight"
    )
    .unwrap();

    /// Stage entries by stage name
    pub static ref STAGE_TRANSITIONS: IntCounterVec = register_int_counter_vec!(
        "bulkflow_stage_transitions_total",
        "Total stage entries by stage",
        &["stage"]
    )
    .unwrap();

    // ═══════════════════════════════════════════════════════════════════════════
    // ERROR AND RECOVERY METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Categorized errors by category and code
    pub static ref ERRORS: IntCounterVec = register_int_counter_vec!(
        "bulkflow_errors_total",
        "Total categorized errors by category and code",
        &["category", "code"]
    )
    .unwrap();

    /// ERROR-level tracing events by error category
    pub static ref ERROR_EVENTS: IntCounterVec = register_int_counter_vec!(
        "bulkflow_error_events_total",
        "Total ERROR-level log events by error category",
        &["error_category"]
    )
    .unwrap();

    /// Recovery actions by strategy and outcome
    pub static ref RECOVERY_ACTIONS: IntCounterVec = register_int_counter_vec!(
        "bulkflow_recovery_actions_total",
        "Total recovery actions by strategy and outcome",
        &["strategy", "outcome"]
    )
    .unwrap();

    /// Incidents opened for manual intervention
    pub static ref INCIDENTS_OPENED: IntCounter = register_int_counter!(
        "bulkflow_incidents_opened_total",
        "Total incidents opened for operator intervention"
    )
    .unwrap();

    // ═══════════════════════════════════════════════════════════════════════════
    // PERFORMANCE METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Performance samples by metric name
    pub static ref PERFORMANCE_SAMPLES: HistogramVec = register_histogram_vec!(
        "bulkflow_performance_sample",
        "Performance samples by metric name",
        &["metric"],
        vec![1.0, 10.0, 50.0, 100.0, 500.0, 1000.0, 5000.0, 30000.0, 120000.0]
    )
    .unwrap();

    /// Samples that crossed a configured threshold
    pub static ref THRESHOLD_BREACHES: IntCounterVec = register_int_counter_vec!(
        "bulkflow_threshold_breaches_total",
        "Total performance samples above a threshold by metric and severity",
        &["metric", "severity"]
    )
    .unwrap();

    // ═══════════════════════════════════════════════════════════════════════════
    // QUEUE METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Items waiting for dispatch
    pub static ref QUEUE_DEPTH: IntGauge = register_int_gauge!(
        "bulkflow_queue_depth",
        "Items waiting for dispatch"
    )
    .unwrap();

    /// Items waiting out a retry backoff
    pub static ref QUEUE_SCHEDULED_RETRIES: IntGauge = register_int_gauge!(
        "bulkflow_queue_scheduled_retries",
        "Items waiting out a retry backoff"
    )
    .unwrap();

    /// Units currently in flight
    pub static ref ACTIVE_REQUESTS: IntGauge = register_int_gauge!(
        "bulkflow_requests_active",
        "Units currently in flight"
    )
    .unwrap();

    /// Dispatches inside the rolling one-minute window
    pub static ref REQUESTS_LAST_MINUTE: IntGauge = register_int_gauge!(
        "bulkflow_requests_last_minute",
        "Dispatches inside the rolling one-minute window"
    )
    .unwrap();

    // Lifetime totals are mirrored from queue stats snapshots, which can be
    // reset, so they are gauges rather than counters.

    pub static ref REQUESTS_DISPATCHED: IntGauge = register_int_gauge!(
        "bulkflow_requests_dispatched",
        "Units dispatched since the last stats reset"
    )
    .unwrap();

    pub static ref REQUESTS_RETRIED: IntGauge = register_int_gauge!(
        "bulkflow_requests_retried",
        "Retries scheduled since the last stats reset"
    )
    .unwrap();

    pub static ref REQUESTS_FAILED: IntGauge = register_int_gauge!(
        "bulkflow_requests_failed",
        "Units terminally failed since the last stats reset"
    )
    .unwrap();

    // ═══════════════════════════════════════════════════════════════════════════
    // LOG PERSISTENCE METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Log entries that could not be persisted on first try
    pub static ref LOG_PERSISTENCE_FAILURES: IntCounter = register_int_counter!(
        "bulkflow_log_persistence_failures_total",
        "Total log entries that failed to persist"
    )
    .unwrap();

    /// Entries held in the fallback buffer
    pub static ref LOG_FALLBACK_BUFFERED: IntGauge = register_int_gauge!(
        "bulkflow_log_fallback_buffered",
        "Log entries waiting in the fallback buffer"
    )
    .unwrap();
}
