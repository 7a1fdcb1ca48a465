//! Observability for bulkflow operations
//!
//! This crate provides the audit-trail logger, prometheus metrics and the
//! tracing setup shared by every bulkflow component.
//!
//! # Features
//!
//! - `OperationLogger`: one persisted log entry per stage start, error,
//!   recovery action and performance sample, with a fallback buffer when
//!   the store is down
//! - Prometheus metrics exposition over HTTP
//! - Tracing initialisation with correlation IDs and error counting
//!
//! # Example
//!
//! ```no_run
//! use bulkflow_metrics::{MetricsCollector, MetricsServer};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let collector = Arc::new(MetricsCollector::new());
//!     collector.record_operation_started();
//!
//!     let server = MetricsServer::new(collector.clone(), "0.0.0.0:9090".to_string());
//!     server.serve().await.unwrap();
//! }
//! ```

pub mod collector;
pub mod http;
pub mod logger;
pub mod metrics;
pub mod sinks;
pub mod tracing;

pub use collector::{MetricsCollector, MetricsError};
pub use http::{MetricsServer, MetricsServerError};
pub use logger::OperationLogger;
pub use sinks::{
    names as sample_names, AnalyticsEvent, AnalyticsSink, InMemoryAnalytics, InMemoryMetrics,
    MetricSample, MetricsSink, TracingAnalyticsSink,
};
pub use self::tracing::{init_tracing, CorrelationId, ErrorContext, OperationSpan, TracingError};
