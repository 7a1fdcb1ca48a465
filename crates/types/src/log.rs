use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::{ErrorCategory, ErrorCode, RecoveryStrategy, ResourceKind, Stage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Critical,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogCategory {
    Operation,
    Error,
    Recovery,
    Performance,
}

impl LogCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogCategory::Operation => "OPERATION",
            LogCategory::Error => "ERROR",
            LogCategory::Recovery => "RECOVERY",
            LogCategory::Performance => "PERFORMANCE",
        }
    }
}

impl fmt::Display for LogCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only projection of an execution context at log time
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextSummary {
    pub operation_id: String,
    pub stage: Option<Stage>,
    pub resource_counts: BTreeMap<ResourceKind, usize>,
    pub error_count: usize,
    pub warning_count: usize,
}

impl ContextSummary {
    pub fn new(operation_id: impl Into<String>) -> Self {
        Self {
            operation_id: operation_id.into(),
            ..Default::default()
        }
    }

    pub fn total_resources(&self) -> usize {
        self.resource_counts.values().sum()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogMetadata {
    pub operation_id: String,
    pub stage: Option<Stage>,
    pub duration_ms: Option<u64>,
    pub resource_count: Option<usize>,
    pub error_category: Option<ErrorCategory>,
    pub recovery_strategy: Option<RecoveryStrategy>,
}

/// Category-specific payload of a log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LogDetails {
    StageStarted {
        stage: Stage,
    },
    Error {
        code: ErrorCode,
        retryable: bool,
        attempt: u32,
        resource_id: Option<String>,
    },
    Recovery {
        strategy: RecoveryStrategy,
        description: String,
        target_stage: Option<Stage>,
        success: bool,
    },
    Performance {
        metric: String,
        value: f64,
        unit: MetricUnit,
    },
    /// A unit that needed more than one attempt finally succeeded
    UnitCompleted {
        work_key: String,
        attempts: u32,
    },
}

/// One audit-trail record. Created once per event, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub category: LogCategory,
    pub message: String,
    pub context: ContextSummary,
    pub metadata: LogMetadata,
    pub details: LogDetails,
    #[serde(default)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl LogEntry {
    pub fn new(
        level: LogLevel,
        category: LogCategory,
        message: impl Into<String>,
        context: ContextSummary,
        metadata: LogMetadata,
        details: LogDetails,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            level,
            category,
            message: message.into(),
            context,
            metadata,
            details,
            extra: BTreeMap::new(),
        }
    }

    pub fn operation_id(&self) -> &str {
        &self.metadata.operation_id
    }
}

/// A recovery step as reported to the audit trail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryAction {
    pub strategy: RecoveryStrategy,
    pub description: String,
    pub target_stage: Option<Stage>,
    pub attempt: u32,
}

impl RecoveryAction {
    pub fn new(strategy: RecoveryStrategy, description: impl Into<String>) -> Self {
        Self {
            strategy,
            description: description.into(),
            target_stage: None,
            attempt: 1,
        }
    }

    pub fn with_target(mut self, stage: Stage) -> Self {
        self.target_stage = Some(stage);
        self
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricUnit {
    Milliseconds,
    Count,
    Ratio,
    PerMinute,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetric {
    pub name: String,
    pub value: f64,
    pub unit: MetricUnit,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl PerformanceMetric {
    pub fn new(name: impl Into<String>, value: f64, unit: MetricUnit) -> Self {
        Self {
            name: name.into(),
            value,
            unit,
            tags: BTreeMap::new(),
        }
    }

    pub fn duration(name: impl Into<String>, duration: std::time::Duration) -> Self {
        Self::new(name, duration.as_millis() as f64, MetricUnit::Milliseconds)
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_entry_serializes_typed_details() {
        let entry = LogEntry::new(
            LogLevel::Info,
            LogCategory::Operation,
            "stage started",
            ContextSummary::new("op-1"),
            LogMetadata {
                operation_id: "op-1".to_string(),
                stage: Some(Stage::Validation),
                ..Default::default()
            },
            LogDetails::StageStarted {
                stage: Stage::Validation,
            },
        );

        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["level"], "INFO");
        assert_eq!(json["details"]["type"], "stage_started");
        assert_eq!(json["details"]["stage"], "VALIDATION");

        let back: LogEntry = serde_json::from_value(json).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn test_level_ordering() {
        assert!(LogLevel::Critical > LogLevel::Error);
        assert!(LogLevel::Warn > LogLevel::Info);
    }

    #[test]
    fn test_summary_total() {
        let mut summary = ContextSummary::new("op");
        summary.resource_counts.insert(ResourceKind::Campaign, 2);
        summary.resource_counts.insert(ResourceKind::Keyword, 5);
        assert_eq!(summary.total_resources(), 7);
    }
}
