use bulkflow_config::LoggingConfig;
use std::sync::Arc;
use tracing::{field::Visit, Event, Level, Subscriber};
use tracing_subscriber::{
    fmt,
    layer::{Context, SubscriberExt},
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

use crate::collector::MetricsCollector;

/// Initialize tracing with metrics integration
///
/// `RUST_LOG` wins over the configured filter; without either the
/// configured level applies with bulkflow crates at debug.
pub fn init_tracing(
    config: &LoggingConfig,
    collector: Arc<MetricsCollector>,
) -> Result<(), TracingError> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_directive(config))
            .map_err(|e| TracingError::InvalidFilter(e.to_string()))?,
    };

    let json_layer = config.json.then(|| {
        fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_level(true)
            .json()
    });
    let pretty_layer = (!config.json).then(|| fmt::layer().with_target(true).with_level(true));

    let metrics_layer = MetricsLayer::new(collector);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(pretty_layer)
        .with(metrics_layer)
        .try_init()
        .map_err(|e| TracingError::InitError(e.to_string()))?;

    Ok(())
}

fn default_directive(config: &LoggingConfig) -> String {
    if let Some(filter) = &config.filter {
        return filter.clone();
    }

    match config.level.to_lowercase().as_str() {
        level @ ("trace" | "debug") => level.to_string(),
        level => format!("{level},bulkflow=debug"),
    }
}

/// Tracing layer that counts ERROR events by their `error_category` field
pub struct MetricsLayer {
    collector: Arc<MetricsCollector>,
}

impl MetricsLayer {
    pub fn new(collector: Arc<MetricsCollector>) -> Self {
        Self { collector }
    }
}

impl<S> Layer<S> for MetricsLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() != Level::ERROR {
            return;
        }

        let mut visitor = ErrorCategoryVisitor::default();
        event.record(&mut visitor);

        let category = visitor.error_category.as_deref().unwrap_or("uncategorized");
        self.collector.record_error_event(category);
    }
}

#[derive(Default)]
struct ErrorCategoryVisitor {
    error_category: Option<String>,
}

impl Visit for ErrorCategoryVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "error_category" && self.error_category.is_none() {
            self.error_category = Some(format!("{value:?}").trim_matches('"').to_string());
        }
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "error_category" {
            self.error_category = Some(value.to_string());
        }
    }
}

/// Correlation ID for tracking one operation run across components
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CorrelationId(uuid::Uuid);

impl CorrelationId {
    /// Generate a new correlation ID
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Get the correlation ID as a string
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Span context wrapping one executor run
#[derive(Debug, Clone)]
pub struct OperationSpan {
    pub correlation_id: CorrelationId,
    pub operation_id: String,
}

impl OperationSpan {
    pub fn new(operation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: CorrelationId::new(),
            operation_id: operation_id.into(),
        }
    }

    /// Build the tracing span; attach it to futures with `Instrument`
    pub fn span(&self) -> tracing::Span {
        tracing::info_span!(
            "operation",
            correlation_id = %self.correlation_id,
            operation_id = %self.operation_id,
        )
    }
}

/// Error enrichment for adding context to errors
pub trait ErrorContext {
    /// Log the error with the run's correlation ID
    fn with_correlation_id(self, correlation_id: CorrelationId) -> Self;

    /// Log the error with the operation it belongs to
    fn with_operation_id(self, operation_id: &str) -> Self;
}

impl<T, E> ErrorContext for Result<T, E>
where
    E: std::fmt::Display,
{
    fn with_correlation_id(self, correlation_id: CorrelationId) -> Self {
        self.map_err(|e| {
            tracing::error!(
                correlation_id = %correlation_id,
                error = %e,
                "Error occurred"
            );
            e
        })
    }

    fn with_operation_id(self, operation_id: &str) -> Self {
        self.map_err(|e| {
            tracing::error!(
                operation_id = %operation_id,
                error = %e,
                "Error occurred"
            );
            e
        })
    }
}

/// Tracing error types
#[derive(Debug, thiserror::Error)]
pub enum TracingError {
    #[error("tracing initialization error: {0}")]
    InitError(String),
    #[error("invalid log filter: {0}")]
    InvalidFilter(String),
}
