//! Core configuration structures for bulkflow

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Request queue configuration
    pub queue: QueueConfig,

    /// Recovery routing configuration
    pub recovery: RecoveryConfig,

    /// Logging and performance threshold configuration
    pub logging: LoggingConfig,

    /// Metrics exposition configuration
    pub metrics: MetricsConfig,

    /// Log and snapshot persistence backend
    pub store: StoreConfig,
}

/// Request queue configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Ceiling on in-flight units
    pub max_concurrent_requests: usize,

    /// Ceiling on dispatches inside any rolling one-minute window
    pub max_requests_per_minute: u32,

    /// Minimum spacing between two consecutive dispatches
    pub minimum_delay_ms: u64,

    /// Retries allowed after the first attempt
    pub retry_limit: u32,

    /// Backoff delay before the first retry
    pub initial_retry_delay_ms: u64,

    /// Upper bound on any backoff delay
    pub max_retry_delay_ms: u64,

    /// Exponential growth factor between retries
    pub backoff_factor: f64,

    /// Centered jitter as a fraction of the base delay
    pub jitter: f64,

    /// Interval of the rate-window purge sweep
    pub sweep_interval_secs: u64,

    /// Longest the dispatcher sleeps while a ceiling is saturated
    pub poll_interval_ms: u64,
}

impl QueueConfig {
    pub fn minimum_delay(&self) -> Duration {
        Duration::from_millis(self.minimum_delay_ms)
    }

    pub fn initial_retry_delay(&self) -> Duration {
        Duration::from_millis(self.initial_retry_delay_ms)
    }

    pub fn max_retry_delay(&self) -> Duration {
        Duration::from_millis(self.max_retry_delay_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: 5,
            max_requests_per_minute: 1000,
            minimum_delay_ms: 50,
            retry_limit: 3,
            initial_retry_delay_ms: 1000,
            max_retry_delay_ms: 30_000,
            backoff_factor: 2.0,
            jitter: 0.2,
            sweep_interval_secs: 60,
            poll_interval_ms: 100,
        }
    }
}

/// Partial queue configuration applied to a running queue
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueConfigPatch {
    pub max_concurrent_requests: Option<usize>,
    pub max_requests_per_minute: Option<u32>,
    pub minimum_delay_ms: Option<u64>,
    pub retry_limit: Option<u32>,
    pub initial_retry_delay_ms: Option<u64>,
    pub max_retry_delay_ms: Option<u64>,
    pub backoff_factor: Option<f64>,
    pub jitter: Option<f64>,
}

impl QueueConfigPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Overwrite every field the patch sets
    pub fn apply(&self, config: &mut QueueConfig) {
        if let Some(v) = self.max_concurrent_requests {
            config.max_concurrent_requests = v;
        }
        if let Some(v) = self.max_requests_per_minute {
            config.max_requests_per_minute = v;
        }
        if let Some(v) = self.minimum_delay_ms {
            config.minimum_delay_ms = v;
        }
        if let Some(v) = self.retry_limit {
            config.retry_limit = v;
        }
        if let Some(v) = self.initial_retry_delay_ms {
            config.initial_retry_delay_ms = v;
        }
        if let Some(v) = self.max_retry_delay_ms {
            config.max_retry_delay_ms = v;
        }
        if let Some(v) = self.backoff_factor {
            config.backoff_factor = v;
        }
        if let Some(v) = self.jitter {
            config.jitter = v;
        }
    }
}

impl From<&QueueConfig> for QueueConfigPatch {
    fn from(config: &QueueConfig) -> Self {
        Self {
            max_concurrent_requests: Some(config.max_concurrent_requests),
            max_requests_per_minute: Some(config.max_requests_per_minute),
            minimum_delay_ms: Some(config.minimum_delay_ms),
            retry_limit: Some(config.retry_limit),
            initial_retry_delay_ms: Some(config.initial_retry_delay_ms),
            max_retry_delay_ms: Some(config.max_retry_delay_ms),
            backoff_factor: Some(config.backoff_factor),
            jitter: Some(config.jitter),
        }
    }
}

/// Recovery configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Attempts per work unit before retry strategies stop being chosen
    pub max_attempts: u32,

    /// Hand failed compensations to manual intervention after a rollback
    pub escalate_failed_compensation: bool,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            escalate_failed_compensation: true,
        }
    }
}

/// Severity thresholds for one performance metric
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricThreshold {
    pub warning: f64,
    pub critical: f64,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Full `EnvFilter` directive, overrides `level` when set
    pub filter: Option<String>,

    /// Emit JSON lines instead of human-readable output
    pub json: bool,

    /// Entries kept in memory when the log store is unavailable
    pub fallback_buffer: usize,

    /// Performance thresholds by metric name
    pub thresholds: HashMap<String, MetricThreshold>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        let mut thresholds = HashMap::new();
        thresholds.insert(
            "stage_duration_ms".to_string(),
            MetricThreshold {
                warning: 30_000.0,
                critical: 120_000.0,
            },
        );
        thresholds.insert(
            "queue_depth".to_string(),
            MetricThreshold {
                warning: 500.0,
                critical: 2000.0,
            },
        );

        Self {
            level: "info".to_string(),
            filter: None,
            json: false,
            fallback_buffer: 1000,
            thresholds,
        }
    }
}

/// Metrics exposition configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Enable metrics collection
    pub enabled: bool,

    /// Address of the `/metrics` endpoint
    pub listen_addr: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_addr: "127.0.0.1:9090".to_string(),
        }
    }
}

/// Persistence backend for log entries and stage snapshots
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StoreConfig {
    #[default]
    Memory,
    Sqlite {
        /// sqlx connection url, e.g. `sqlite://bulkflow.db`
        url: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_defaults() {
        let config = QueueConfig::default();
        assert_eq!(config.max_concurrent_requests, 5);
        assert_eq!(config.retry_limit, 3);
        assert_eq!(config.minimum_delay(), Duration::from_millis(50));
        assert_eq!(config.max_retry_delay(), Duration::from_secs(30));
        assert_eq!(config.sweep_interval(), Duration::from_secs(60));
    }

    #[test]
    fn test_patch_applies_only_set_fields() {
        let mut config = QueueConfig::default();
        let patch = QueueConfigPatch {
            max_concurrent_requests: Some(2),
            jitter: Some(0.0),
            ..Default::default()
        };

        patch.apply(&mut config);
        assert_eq!(config.max_concurrent_requests, 2);
        assert_eq!(config.jitter, 0.0);
        assert_eq!(config.retry_limit, 3);
        assert!(!patch.is_empty());
        assert!(QueueConfigPatch::default().is_empty());
    }

    #[test]
    fn test_full_patch_round_trips() {
        let source = QueueConfig {
            max_requests_per_minute: 42,
            backoff_factor: 1.5,
            ..Default::default()
        };
        let mut target = QueueConfig::default();
        QueueConfigPatch::from(&source).apply(&mut target);
        assert_eq!(target.max_requests_per_minute, 42);
        assert_eq!(target.backoff_factor, 1.5);
    }

    #[test]
    fn test_store_config_tagging() {
        let json = r#"{ "backend": "sqlite", "url": "sqlite::memory:" }"#;
        let store: StoreConfig = serde_json::from_str(json).unwrap();
        assert_eq!(
            store,
            StoreConfig::Sqlite {
                url: "sqlite::memory:".to_string()
            }
        );

        let memory: StoreConfig = serde_json::from_str(r#"{ "backend": "memory" }"#).unwrap();
        assert_eq!(memory, StoreConfig::Memory);
    }
}
