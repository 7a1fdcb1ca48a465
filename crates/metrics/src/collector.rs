use std::time::Duration;

use bulkflow_queue::QueueStats;
use bulkflow_types::{ErrorCategory, ErrorCode, LogLevel, RecoveryStrategy, Stage};
use prometheus::{Encoder, Registry, TextEncoder};

use crate::metrics::*;
use crate::sinks::{names, MetricSample, MetricsSink};

/// Prometheus-backed metrics collector for bulk operations
pub struct MetricsCollector {
    registry: Registry,
}

impl MetricsCollector {
    /// Create a new metrics collector with default registry
    pub fn new() -> Self {
        let registry = Registry::new();
        Self { registry }
    }

    /// Create a new metrics collector with custom registry
    pub fn with_registry(registry: Registry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // OPERATION METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn record_operation_started(&self) {
        OPERATIONS_STARTED.inc();
        ACTIVE_OPERATIONS.inc();
    }

    /// Record a finished operation with its final status label
    pub fn record_operation_finished(&self, status: &str, duration: Duration) {
        OPERATIONS_FINISHED.with_label_values(&[status]).inc();
        OPERATION_DURATION.observe(duration.as_millis() as f64);
        ACTIVE_OPERATIONS.dec();
    }

    pub fn record_stage_transition(&self, stage: Stage) {
        STAGE_TRANSITIONS.with_label_values(&[stage.as_str()]).inc();
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // ERROR AND RECOVERY METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn record_error(&self, category: ErrorCategory, code: ErrorCode) {
        ERRORS
            .with_label_values(&[category.as_str(), code.as_str()])
            .inc();
    }

    /// Count an ERROR-level tracing event
    pub fn record_error_event(&self, error_category: &str) {
        ERROR_EVENTS.with_label_values(&[error_category]).inc();
    }

    pub fn record_recovery(&self, strategy: RecoveryStrategy, success: bool) {
        let outcome = if success { "success" } else { "failure" };
        RECOVERY_ACTIONS
            .with_label_values(&[strategy.as_str(), outcome])
            .inc();
    }

    pub fn record_incident_opened(&self) {
        INCIDENTS_OPENED.inc();
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // PERFORMANCE METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn record_performance_sample(&self, metric: &str, value: f64) {
        PERFORMANCE_SAMPLES
            .with_label_values(&[metric])
            .observe(value);
    }

    pub fn record_threshold_breach(&self, metric: &str, severity: LogLevel) {
        THRESHOLD_BREACHES
            .with_label_values(&[metric, severity.as_str()])
            .inc();
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // QUEUE METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Mirror a queue stats snapshot into the queue gauges
    pub fn record_queue_stats(&self, stats: &QueueStats) {
        QUEUE_DEPTH.set(stats.queue_length as i64);
        QUEUE_SCHEDULED_RETRIES.set(stats.scheduled_retries as i64);
        ACTIVE_REQUESTS.set(stats.active_requests as i64);
        REQUESTS_LAST_MINUTE.set(stats.requests_in_last_minute as i64);
        REQUESTS_DISPATCHED.set(stats.total_dispatched as i64);
        REQUESTS_RETRIED.set(stats.total_retries as i64);
        REQUESTS_FAILED.set(stats.total_failed as i64);
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // LOG PERSISTENCE METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn record_log_persistence_failure(&self) {
        LOG_PERSISTENCE_FAILURES.inc();
    }

    pub fn set_fallback_buffered(&self, count: usize) {
        LOG_FALLBACK_BUFFERED.set(count as i64);
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // EXPORT
    // ═══════════════════════════════════════════════════════════════════════════

    /// Export metrics in Prometheus text format
    pub fn export_metrics(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let metric_families = prometheus::gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| MetricsError::EncodingError(e.to_string()))?;

        String::from_utf8(buffer).map_err(|e| MetricsError::EncodingError(e.to_string()))
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Maps the logger's named samples onto the typed prometheus metrics;
/// any other name is treated as a performance sample
impl MetricsSink for MetricsCollector {
    fn record(&self, sample: &MetricSample) {
        match sample.name.as_str() {
            names::STAGE_STARTED => {
                STAGE_TRANSITIONS
                    .with_label_values(&[sample.tag("stage").unwrap_or("unknown")])
                    .inc();
            }
            names::ERROR => {
                ERRORS
                    .with_label_values(&[
                        sample.tag("category").unwrap_or("UNKNOWN"),
                        sample.tag("code").unwrap_or("UNKNOWN"),
                    ])
                    .inc();
            }
            names::RECOVERY_ACTION => {
                RECOVERY_ACTIONS
                    .with_label_values(&[
                        sample.tag("strategy").unwrap_or("UNKNOWN"),
                        sample.tag("outcome").unwrap_or("unknown"),
                    ])
                    .inc();
            }
            names::THRESHOLD_BREACH => {
                THRESHOLD_BREACHES
                    .with_label_values(&[
                        sample.tag("metric").unwrap_or("unknown"),
                        sample.tag("severity").unwrap_or("WARN"),
                    ])
                    .inc();
            }
            names::LOG_PERSISTENCE_FAILURE => self.record_log_persistence_failure(),
            names::FALLBACK_BUFFERED => self.set_fallback_buffered(sample.value as usize),
            metric => self.record_performance_sample(metric, sample.value),
        }
    }
}

/// Metrics error types
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("encoding error: {0}")]
    EncodingError(String),
}
