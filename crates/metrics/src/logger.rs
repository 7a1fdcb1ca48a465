//! Audit trail writer for bulk operations
//!
//! Every call produces exactly one [`LogEntry`], the matching tracing event,
//! metric samples and one analytics event. Persistence failures never reach
//! the caller: the entry goes to a bounded fallback buffer that
//! [`OperationLogger::flush_fallback`] drains once the store recovers.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use bulkflow_config::{LoggingConfig, MetricThreshold};
use bulkflow_store::{LogStore, StoreError};
use bulkflow_types::{
    CategorizedError, ContextSummary, ErrorCategory, LogCategory, LogDetails, LogEntry, LogLevel,
    LogMetadata, MetricUnit, PerformanceMetric, RecoveryAction, Stage,
};
use tracing::{debug, error, info, warn};

use crate::collector::MetricsCollector;
use crate::sinks::{
    names, AnalyticsEvent, AnalyticsSink, MetricSample, MetricsSink, TracingAnalyticsSink,
};

pub struct OperationLogger {
    store: Arc<dyn LogStore>,
    metrics: Arc<dyn MetricsSink>,
    analytics: Arc<dyn AnalyticsSink>,
    thresholds: RwLock<HashMap<String, MetricThreshold>>,
    fallback: Mutex<VecDeque<LogEntry>>,
    fallback_capacity: usize,
    dropped: AtomicU64,
}

impl OperationLogger {
    /// Logger feeding the prometheus collector and tracing-backed analytics
    pub fn new(store: Arc<dyn LogStore>, config: &LoggingConfig) -> Self {
        Self {
            store,
            metrics: Arc::new(MetricsCollector::new()),
            analytics: Arc::new(TracingAnalyticsSink),
            thresholds: RwLock::new(config.thresholds.clone()),
            fallback: Mutex::new(VecDeque::new()),
            fallback_capacity: config.fallback_buffer,
            dropped: AtomicU64::new(0),
        }
    }

    pub fn with_metrics_sink(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_analytics_sink(mut self, analytics: Arc<dyn AnalyticsSink>) -> Self {
        self.analytics = analytics;
        self
    }

    /// Replace the severity thresholds, e.g. after a config reload
    pub fn set_thresholds(&self, thresholds: HashMap<String, MetricThreshold>) {
        *self
            .thresholds
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = thresholds;
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // LOG ENTRY POINTS
    // ═══════════════════════════════════════════════════════════════════════════

    pub async fn log_operation_start(&self, context: &ContextSummary, stage: Stage) -> LogEntry {
        let resource_count = context.total_resources();
        let entry = LogEntry::new(
            LogLevel::Info,
            LogCategory::Operation,
            format!("Stage {stage} started"),
            context.clone(),
            LogMetadata {
                operation_id: context.operation_id.clone(),
                stage: Some(stage),
                resource_count: Some(resource_count),
                ..Default::default()
            },
            LogDetails::StageStarted { stage },
        );

        info!(
            operation_id = %context.operation_id,
            stage = %stage,
            resources = resource_count,
            "Stage started"
        );
        self.metrics
            .record(&MetricSample::count(names::STAGE_STARTED).with_tag("stage", stage.as_str()));
        self.analytics.track(
            &AnalyticsEvent::new("operation_stage_started")
                .with_property("operation_id", &context.operation_id)
                .with_property("stage", stage)
                .with_property("resource_count", resource_count),
        );

        self.persist(&entry).await;
        entry
    }

    pub async fn log_error(&self, err: &CategorizedError, context: &ContextSummary) -> LogEntry {
        let level = error_level(err);
        let details = err.details();
        let stage = details.stage.or(context.stage);

        let entry = LogEntry::new(
            level,
            LogCategory::Error,
            err.message(),
            context.clone(),
            LogMetadata {
                operation_id: context.operation_id.clone(),
                stage,
                error_category: Some(err.category()),
                recovery_strategy: Some(err.strategy()),
                ..Default::default()
            },
            LogDetails::Error {
                code: err.code(),
                retryable: err.retryable(),
                attempt: details.attempt,
                resource_id: details.resource_id.clone(),
            },
        );

        match level {
            LogLevel::Critical => error!(
                operation_id = %context.operation_id,
                error_category = err.category().as_str(),
                code = err.code().as_str(),
                strategy = err.strategy().as_str(),
                attempt = details.attempt,
                severity = "critical",
                "{}", err.message()
            ),
            LogLevel::Error => error!(
                operation_id = %context.operation_id,
                error_category = err.category().as_str(),
                code = err.code().as_str(),
                strategy = err.strategy().as_str(),
                attempt = details.attempt,
                "{}", err.message()
            ),
            _ => warn!(
                operation_id = %context.operation_id,
                error_category = err.category().as_str(),
                code = err.code().as_str(),
                strategy = err.strategy().as_str(),
                attempt = details.attempt,
                "{}", err.message()
            ),
        }

        self.metrics.record(
            &MetricSample::count(names::ERROR)
                .with_tag("category", err.category().as_str())
                .with_tag("code", err.code().as_str())
                .with_tag("strategy", err.strategy().as_str()),
        );
        self.analytics.track(
            &AnalyticsEvent::new("operation_error")
                .with_property("operation_id", &context.operation_id)
                .with_property("code", err.code())
                .with_property("category", err.category())
                .with_property("strategy", err.strategy())
                .with_property("retryable", err.retryable())
                .with_property("attempt", details.attempt),
        );

        self.persist(&entry).await;
        entry
    }

    pub async fn log_recovery_action(
        &self,
        action: &RecoveryAction,
        context: &ContextSummary,
        success: bool,
    ) -> LogEntry {
        let (level, outcome) = if success {
            (LogLevel::Info, "succeeded")
        } else {
            (LogLevel::Error, "failed")
        };

        let entry = LogEntry::new(
            level,
            LogCategory::Recovery,
            format!("Recovery {} {outcome}: {}", action.strategy, action.description),
            context.clone(),
            LogMetadata {
                operation_id: context.operation_id.clone(),
                stage: context.stage,
                recovery_strategy: Some(action.strategy),
                ..Default::default()
            },
            LogDetails::Recovery {
                strategy: action.strategy,
                description: action.description.clone(),
                target_stage: action.target_stage,
                success,
            },
        );

        if success {
            info!(
                operation_id = %context.operation_id,
                strategy = action.strategy.as_str(),
                attempt = action.attempt,
                target_stage = ?action.target_stage,
                "Recovery action succeeded"
            );
        } else {
            error!(
                operation_id = %context.operation_id,
                strategy = action.strategy.as_str(),
                attempt = action.attempt,
                target_stage = ?action.target_stage,
                error_category = "recovery",
                "Recovery action failed"
            );
        }

        self.metrics.record(
            &MetricSample::count(names::RECOVERY_ACTION)
                .with_tag("strategy", action.strategy.as_str())
                .with_tag("outcome", if success { "success" } else { "failure" }),
        );
        self.analytics.track(
            &AnalyticsEvent::new("recovery_action")
                .with_property("operation_id", &context.operation_id)
                .with_property("strategy", action.strategy)
                .with_property("target_stage", action.target_stage)
                .with_property("attempt", action.attempt)
                .with_property("success", success),
        );

        self.persist(&entry).await;
        entry
    }

    /// Success of a unit that only went through after queue retries
    pub async fn log_unit_completed(
        &self,
        context: &ContextSummary,
        work_key: &str,
        attempts: u32,
    ) -> LogEntry {
        let entry = LogEntry::new(
            LogLevel::Info,
            LogCategory::Operation,
            format!("{work_key} succeeded after {attempts} attempts"),
            context.clone(),
            LogMetadata {
                operation_id: context.operation_id.clone(),
                stage: context.stage,
                ..Default::default()
            },
            LogDetails::UnitCompleted {
                work_key: work_key.to_string(),
                attempts,
            },
        );

        info!(
            operation_id = %context.operation_id,
            work_key,
            attempts,
            "Unit succeeded after retries"
        );
        self.analytics.track(
            &AnalyticsEvent::new("unit_completed")
                .with_property("operation_id", &context.operation_id)
                .with_property("work_key", work_key)
                .with_property("attempts", attempts),
        );

        self.persist(&entry).await;
        entry
    }

    pub async fn log_performance_metric(
        &self,
        metric: &PerformanceMetric,
        context: &ContextSummary,
    ) -> LogEntry {
        let level = self.severity(&metric.name, metric.value);
        let duration_ms = match metric.unit {
            MetricUnit::Milliseconds => Some(metric.value.max(0.0) as u64),
            _ => None,
        };

        let mut entry = LogEntry::new(
            level,
            LogCategory::Performance,
            format!("{} = {}", metric.name, metric.value),
            context.clone(),
            LogMetadata {
                operation_id: context.operation_id.clone(),
                stage: context.stage,
                duration_ms,
                ..Default::default()
            },
            LogDetails::Performance {
                metric: metric.name.clone(),
                value: metric.value,
                unit: metric.unit,
            },
        );
        for (key, value) in &metric.tags {
            entry
                .extra
                .insert(key.clone(), serde_json::Value::String(value.clone()));
        }

        match level {
            LogLevel::Critical => error!(
                operation_id = %context.operation_id,
                metric = %metric.name,
                value = metric.value,
                severity = "critical",
                error_category = "performance",
                "Performance threshold exceeded"
            ),
            LogLevel::Warn => warn!(
                operation_id = %context.operation_id,
                metric = %metric.name,
                value = metric.value,
                "Performance threshold exceeded"
            ),
            _ => debug!(
                operation_id = %context.operation_id,
                metric = %metric.name,
                value = metric.value,
                "Performance sample"
            ),
        }

        let mut sample = MetricSample::new(metric.name.clone(), metric.value);
        sample.tags = metric.tags.clone();
        self.metrics.record(&sample);
        if level >= LogLevel::Warn {
            self.metrics.record(
                &MetricSample::count(names::THRESHOLD_BREACH)
                    .with_tag("metric", metric.name.clone())
                    .with_tag("severity", level.as_str()),
            );
        }
        self.analytics.track(
            &AnalyticsEvent::new("performance_metric")
                .with_property("operation_id", &context.operation_id)
                .with_property("metric", &metric.name)
                .with_property("value", metric.value)
                .with_property("unit", metric.unit)
                .with_property("severity", level),
        );

        self.persist(&entry).await;
        entry
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // FALLBACK BUFFER
    // ═══════════════════════════════════════════════════════════════════════════

    /// Retry persisting buffered entries oldest first, stopping at the first
    /// failure. Returns how many left the buffer.
    pub async fn flush_fallback(&self) -> usize {
        let mut flushed = 0;

        loop {
            let Some(next) = self.lock_fallback().front().cloned() else {
                break;
            };

            match self.store.append(&next).await {
                // a duplicate means an earlier attempt actually landed
                Ok(()) | Err(StoreError::DuplicateId(_)) => {
                    let mut fallback = self.lock_fallback();
                    if fallback.front().map(|e| e.id) == Some(next.id) {
                        fallback.pop_front();
                    }
                    flushed += 1;
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        remaining = self.fallback_len(),
                        "Log store still unavailable, keeping fallback entries"
                    );
                    break;
                }
            }
        }

        if flushed > 0 {
            info!(flushed, "Flushed fallback log entries");
        }
        self.report_fallback_size();
        flushed
    }

    pub fn fallback_len(&self) -> usize {
        self.lock_fallback().len()
    }

    pub fn fallback_entries(&self) -> Vec<LogEntry> {
        self.lock_fallback().iter().cloned().collect()
    }

    /// Entries evicted because the fallback buffer was full
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    async fn persist(&self, entry: &LogEntry) {
        // keep store order: older buffered entries go first
        if self.fallback_len() > 0 {
            self.flush_fallback().await;
            if self.fallback_len() > 0 {
                self.buffer(entry.clone());
                return;
            }
        }

        if let Err(e) = self.store.append(entry).await {
            self.metrics
                .record(&MetricSample::count(names::LOG_PERSISTENCE_FAILURE));
            let payload = serde_json::to_string(entry).unwrap_or_default();
            error!(
                entry_id = %entry.id,
                operation_id = %entry.operation_id(),
                error = %e,
                error_category = "log_persistence",
                entry = %payload,
                "Failed to persist log entry, buffering"
            );
            self.buffer(entry.clone());
        }
    }

    fn buffer(&self, entry: LogEntry) {
        if self.fallback_capacity == 0 {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }

        {
            let mut fallback = self.lock_fallback();
            if fallback.len() >= self.fallback_capacity {
                if let Some(evicted) = fallback.pop_front() {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    warn!(entry_id = %evicted.id, "Fallback buffer full, dropping oldest entry");
                }
            }
            fallback.push_back(entry);
        }
        self.report_fallback_size();
    }

    fn report_fallback_size(&self) {
        let size = self.fallback_len();
        self.metrics
            .record(&MetricSample::new(names::FALLBACK_BUFFERED, size as f64));
    }

    fn severity(&self, metric: &str, value: f64) -> LogLevel {
        let thresholds = self
            .thresholds
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        match thresholds.get(metric) {
            Some(t) if value > t.critical => LogLevel::Critical,
            Some(t) if value > t.warning => LogLevel::Warn,
            _ => LogLevel::Info,
        }
    }

    fn lock_fallback(&self) -> MutexGuard<'_, VecDeque<LogEntry>> {
        self.fallback
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn error_level(err: &CategorizedError) -> LogLevel {
    if err.category() == ErrorCategory::System {
        LogLevel::Critical
    } else if err.retryable() {
        LogLevel::Warn
    } else {
        LogLevel::Error
    }
}
