//! Configuration validation

use crate::{AppConfig, ConfigError, LoggingConfig, QueueConfig, Result, StoreConfig};
use std::net::SocketAddr;

/// Validation error details
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate the entire application configuration
pub fn validate_config(config: &AppConfig) -> Result<()> {
    let mut errors = validate_queue_config(&config.queue);

    if config.recovery.max_attempts == 0 {
        errors.push(ValidationError::new(
            "recovery.max_attempts",
            "must be greater than 0",
        ));
    }

    errors.extend(validate_logging_config(&config.logging));

    if config.metrics.enabled && config.metrics.listen_addr.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "metrics.listen_addr",
            format!("'{}' is not a socket address", config.metrics.listen_addr),
        ));
    }

    if let StoreConfig::Sqlite { url } = &config.store {
        if !url.starts_with("sqlite:") {
            errors.push(ValidationError::new(
                "store.url",
                "sqlite url must start with sqlite:",
            ));
        }
    }

    into_result(errors)
}

/// Validate queue settings, returning every problem found
pub fn validate_queue_config(queue: &QueueConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if queue.max_concurrent_requests == 0 {
        errors.push(ValidationError::new(
            "queue.max_concurrent_requests",
            "must be greater than 0",
        ));
    }

    if queue.max_requests_per_minute == 0 {
        errors.push(ValidationError::new(
            "queue.max_requests_per_minute",
            "must be greater than 0",
        ));
    }

    if queue.initial_retry_delay_ms > queue.max_retry_delay_ms {
        errors.push(ValidationError::new(
            "queue.initial_retry_delay_ms",
            "must be <= max_retry_delay_ms",
        ));
    }

    if queue.backoff_factor < 1.0 {
        errors.push(ValidationError::new(
            "queue.backoff_factor",
            "must be >= 1.0",
        ));
    }

    if !(0.0..=1.0).contains(&queue.jitter) {
        errors.push(ValidationError::new("queue.jitter", "must be within [0, 1]"));
    }

    if queue.sweep_interval_secs == 0 {
        errors.push(ValidationError::new(
            "queue.sweep_interval_secs",
            "must be greater than 0",
        ));
    }

    if queue.poll_interval_ms == 0 {
        errors.push(ValidationError::new(
            "queue.poll_interval_ms",
            "must be greater than 0",
        ));
    }

    errors
}

fn validate_logging_config(logging: &LoggingConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if let Err(e) = validate_log_level(&logging.level) {
        errors.push(e);
    }

    if logging.fallback_buffer == 0 {
        errors.push(ValidationError::new(
            "logging.fallback_buffer",
            "must be greater than 0",
        ));
    }

    for (metric, threshold) in &logging.thresholds {
        if threshold.warning > threshold.critical {
            errors.push(ValidationError::new(
                format!("logging.thresholds.{metric}"),
                format!(
                    "warning ({}) must not exceed critical ({})",
                    threshold.warning, threshold.critical
                ),
            ));
        }
    }

    errors
}

/// Validate log level
fn validate_log_level(level: &str) -> std::result::Result<(), ValidationError> {
    match level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ValidationError::new(
            "logging.level",
            format!(
                "invalid log level '{level}', must be one of: trace, debug, info, warn, error"
            ),
        )),
    }
}

fn into_result(errors: Vec<ValidationError>) -> Result<()> {
    if !errors.is_empty() {
        let error_msg = errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        return Err(ConfigError::ValidationError(error_msg));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MetricThreshold, MetricsConfig};

    #[test]
    fn test_validate_default_config() {
        assert!(validate_config(&AppConfig::default()).is_ok());
    }

    #[test]
    fn test_validate_invalid_log_level() {
        let config = AppConfig {
            logging: LoggingConfig {
                level: "invalid".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };

        let err = validate_config(&config).unwrap_err().to_string();
        assert!(err.contains("logging.level"));
    }

    #[test]
    fn test_validate_collects_every_error() {
        let config = AppConfig {
            queue: QueueConfig {
                max_concurrent_requests: 0,
                jitter: 1.5,
                initial_retry_delay_ms: 60_000,
                ..Default::default()
            },
            ..Default::default()
        };

        let err = validate_config(&config).unwrap_err().to_string();
        assert!(err.contains("queue.max_concurrent_requests"));
        assert!(err.contains("queue.jitter"));
        assert!(err.contains("queue.initial_retry_delay_ms"));
    }

    #[test]
    fn test_validate_thresholds_ordering() {
        let mut logging = LoggingConfig::default();
        logging.thresholds.insert(
            "latency_ms".to_string(),
            MetricThreshold {
                warning: 10.0,
                critical: 5.0,
            },
        );

        let errors = validate_logging_config(&logging);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "logging.thresholds.latency_ms");
    }

    #[test]
    fn test_validate_metrics_addr() {
        let config = AppConfig {
            metrics: MetricsConfig {
                enabled: true,
                listen_addr: "localhost".to_string(),
            },
            ..Default::default()
        };
        assert!(validate_config(&config).is_err());

        let disabled = AppConfig {
            metrics: MetricsConfig {
                enabled: false,
                listen_addr: "localhost".to_string(),
            },
            ..Default::default()
        };
        assert!(validate_config(&disabled).is_ok());
    }

    #[test]
    fn test_validate_store_url() {
        let config = AppConfig {
            store: StoreConfig::Sqlite {
                url: "postgres://db".to_string(),
            },
            ..Default::default()
        };
        assert!(validate_config(&config).is_err());
    }
}
