//! Outbound seams for numeric samples and analytics events.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Mutex;
use tracing::debug;

/// Sample names the logger emits besides raw performance metrics
pub mod names {
    pub const STAGE_STARTED: &str = "operation_stage_started";
    pub const ERROR: &str = "operation_error";
    pub const RECOVERY_ACTION: &str = "recovery_action";
    pub const THRESHOLD_BREACH: &str = "performance_threshold_breach";
    pub const LOG_PERSISTENCE_FAILURE: &str = "log_persistence_failure";
    pub const FALLBACK_BUFFERED: &str = "log_fallback_buffered";
}

/// A named numeric sample with string tags
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSample {
    pub name: String,
    pub value: f64,
    pub tags: BTreeMap<String, String>,
}

impl MetricSample {
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
            tags: BTreeMap::new(),
        }
    }

    /// A sample with value 1, for counting occurrences
    pub fn count(name: impl Into<String>) -> Self {
        Self::new(name, 1.0)
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }
}

/// Receives metric samples; implementations must not block
pub trait MetricsSink: Send + Sync {
    fn record(&self, sample: &MetricSample);
}

/// A named event with a property bag
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyticsEvent {
    pub name: String,
    pub timestamp: DateTime<Utc>,
    pub properties: BTreeMap<String, serde_json::Value>,
}

impl AnalyticsEvent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            timestamp: Utc::now(),
            properties: BTreeMap::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        let value = serde_json::to_value(value).unwrap_or(serde_json::Value::Null);
        self.properties.insert(key.into(), value);
        self
    }
}

pub trait AnalyticsSink: Send + Sync {
    fn track(&self, event: &AnalyticsEvent);
}

/// Default analytics sink: events become DEBUG tracing records
#[derive(Debug, Default)]
pub struct TracingAnalyticsSink;

impl AnalyticsSink for TracingAnalyticsSink {
    fn track(&self, event: &AnalyticsEvent) {
        let properties = serde_json::to_string(&event.properties).unwrap_or_default();
        debug!(event = %event.name, properties = %properties, "Analytics event");
    }
}

/// Captures samples in memory
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    samples: Mutex<Vec<MetricSample>>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn samples(&self) -> Vec<MetricSample> {
        self.samples
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn named(&self, name: &str) -> Vec<MetricSample> {
        self.samples()
            .into_iter()
            .filter(|s| s.name == name)
            .collect()
    }
}

impl MetricsSink for InMemoryMetrics {
    fn record(&self, sample: &MetricSample) {
        self.samples
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(sample.clone());
    }
}

/// Captures analytics events in memory
#[derive(Debug, Default)]
pub struct InMemoryAnalytics {
    events: Mutex<Vec<AnalyticsEvent>>,
}

impl InMemoryAnalytics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AnalyticsEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl AnalyticsSink for InMemoryAnalytics {
    fn track(&self, event: &AnalyticsEvent) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event.clone());
    }
}
