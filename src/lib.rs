//! bulkflow: resilient execution of large, multi-stage bulk operations
//! against a rate-limited, fallible remote API.
//!
//! The member crates are re-exported under short module names. [`Engine`]
//! wires one shared queue, store, logger and recovery router from an
//! [`AppConfig`](config::AppConfig).
//!
//! ```no_run
//! use bulkflow::config::ConfigLoader;
//! use bulkflow::types::RecordedResource;
//! use bulkflow::Engine;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConfigLoader::from_file("config/default.toml".as_ref())?;
//!     let engine = Engine::builder(config)
//!         .with_tracing()
//!         .compensate_with(|resource: RecordedResource| async move {
//!             println!("deleting {}", resource.descriptor.remote_id);
//!             Ok(())
//!         })
//!         .build()
//!         .await?;
//!     println!("queue idle: {}", engine.queue().stats().await.is_idle());
//!     Ok(())
//! }
//! ```

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use thiserror::Error;
use tracing::info;

pub use bulkflow_config as config;
pub use bulkflow_metrics as metrics;
pub use bulkflow_orchestrator as orchestrator;
pub use bulkflow_queue as queue;
pub use bulkflow_ratelimit as ratelimit;
pub use bulkflow_store as store;
pub use bulkflow_types as types;

use bulkflow_config::{validate_config, AppConfig, ConfigError};
use bulkflow_metrics::{
    init_tracing, MetricsCollector, MetricsServer, OperationLogger, TracingError,
};
use bulkflow_orchestrator::{
    BulkExecutor, CompensationCall, Compensator, ContextError, ErrorClassifier, ExecutionContext,
    OperatorChannel, QueuedCompensator, RecoveryRouter, StateManager, TracingOperatorChannel,
};
use bulkflow_queue::{backoff_for, QueueError, RequestQueue};
use bulkflow_store::{StoreError, StoreHandle};
use bulkflow_types::{ApiFailure, RecordedResource, StageGraph};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("queue setup failed: {0}")]
    Queue(#[from] QueueError),

    #[error("store setup failed: {0}")]
    Store(#[from] StoreError),

    #[error("tracing setup failed: {0}")]
    Tracing(#[from] TracingError),

    #[error("no compensator configured")]
    MissingCompensator,
}

/// One shared queue, store, logger and router per process
pub struct Engine {
    config: AppConfig,
    queue: RequestQueue,
    store: StoreHandle,
    metrics: Arc<MetricsCollector>,
    logger: Arc<OperationLogger>,
    state: Arc<StateManager>,
    executor: BulkExecutor,
}

impl Engine {
    pub fn builder(config: AppConfig) -> EngineBuilder {
        EngineBuilder {
            config,
            compensator: None,
            compensation: None,
            channel: None,
            store: None,
            tracing: false,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn queue(&self) -> &RequestQueue {
        &self.queue
    }

    pub fn store(&self) -> &StoreHandle {
        &self.store
    }

    pub fn logger(&self) -> &Arc<OperationLogger> {
        &self.logger
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    pub fn executor(&self) -> &BulkExecutor {
        &self.executor
    }

    pub fn state(&self) -> &Arc<StateManager> {
        &self.state
    }

    /// Rebuild an operation's context from its latest snapshot, e.g. after a
    /// process restart. Pass the result to [`BulkExecutor::resume`].
    pub async fn recover(
        &self,
        operation_id: impl Into<String>,
        graph: StageGraph,
    ) -> Result<ExecutionContext, ContextError> {
        ExecutionContext::recover(operation_id, graph, Arc::clone(&self.state)).await
    }

    /// The `/metrics` server, when metrics are enabled
    pub fn metrics_server(&self) -> Option<MetricsServer> {
        self.config.metrics.enabled.then(|| {
            MetricsServer::new(
                Arc::clone(&self.metrics),
                self.config.metrics.listen_addr.clone(),
            )
        })
    }

    /// Stop dispatching and fail everything still waiting
    pub async fn shutdown(&self) {
        self.queue.shutdown().await;
        let flushed = self.logger.flush_fallback().await;
        info!(flushed, "Engine stopped");
    }
}

pub struct EngineBuilder {
    config: AppConfig,
    compensator: Option<Arc<dyn Compensator>>,
    compensation: Option<CompensationCall>,
    channel: Option<Arc<dyn OperatorChannel>>,
    store: Option<StoreHandle>,
    tracing: bool,
}

impl EngineBuilder {
    /// How created resources are undone during rollback
    pub fn compensator(mut self, compensator: Arc<dyn Compensator>) -> Self {
        self.compensator = Some(compensator);
        self
    }

    /// Undo resources with a remote call sent through the engine's own
    /// queue as urgent work
    pub fn compensate_with<F, Fut>(mut self, call: F) -> Self
    where
        F: Fn(RecordedResource) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ApiFailure>> + Send + 'static,
    {
        self.compensation = Some(Arc::new(
            move |resource: RecordedResource| -> BoxFuture<'static, Result<(), ApiFailure>> {
                Box::pin(call(resource))
            },
        ));
        self
    }

    /// Where incidents are announced; defaults to tracing
    pub fn operator_channel(mut self, channel: Arc<dyn OperatorChannel>) -> Self {
        self.channel = Some(channel);
        self
    }

    /// Use an already open store instead of the configured backend
    pub fn store(mut self, store: StoreHandle) -> Self {
        self.store = Some(store);
        self
    }

    /// Install the process-wide tracing subscriber from the `logging`
    /// section during [`build`](Self::build). Fails the build if a global
    /// subscriber is already set.
    pub fn with_tracing(mut self) -> Self {
        self.tracing = true;
        self
    }

    pub async fn build(self) -> Result<Engine, EngineError> {
        validate_config(&self.config)?;
        let queue = RequestQueue::try_new(self.config.queue.clone())?;
        let compensator: Arc<dyn Compensator> = match (self.compensator, self.compensation) {
            (Some(compensator), _) => compensator,
            (None, Some(call)) => {
                Arc::new(QueuedCompensator::new(queue.clone(), move |r| call(r)))
            }
            (None, None) => return Err(EngineError::MissingCompensator),
        };
        let store = match self.store {
            Some(store) => store,
            None => bulkflow_store::connect(&self.config.store).await?,
        };

        let metrics = Arc::new(MetricsCollector::new());
        if self.tracing {
            init_tracing(&self.config.logging, Arc::clone(&metrics))?;
        }
        let logger = Arc::new(
            OperationLogger::new(Arc::clone(&store.logs), &self.config.logging)
                .with_metrics_sink(metrics.clone()),
        );
        let state = Arc::new(StateManager::new(Arc::clone(&store.snapshots), compensator));
        let channel: Arc<dyn OperatorChannel> = match self.channel {
            Some(channel) => channel,
            None => Arc::new(TracingOperatorChannel),
        };
        let router = RecoveryRouter::with_defaults(
            queue.clone(),
            backoff_for(&self.config.queue),
            channel,
            &self.config.recovery,
            Arc::clone(&logger),
        );

        let mut executor = BulkExecutor::new(
            queue.clone(),
            Arc::clone(&state),
            ErrorClassifier::from_config(&self.config.recovery),
            Arc::new(router),
            Arc::clone(&logger),
        );
        if self.config.metrics.enabled {
            executor = executor.with_metrics(metrics.clone());
        }

        info!(
            max_concurrent = self.config.queue.max_concurrent_requests,
            max_per_minute = self.config.queue.max_requests_per_minute,
            "Engine ready"
        );

        Ok(Engine {
            config: self.config,
            queue,
            store,
            metrics,
            logger,
            state,
            executor,
        })
    }
}
