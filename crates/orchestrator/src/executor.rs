//! Drives an operation plan through its stages.
//!
//! Each stage's calls go through the shared queue as one batch. Successes
//! are recorded in the context; failures are classified and routed through
//! the recovery router one at a time. A rollback stops the run, which can be
//! picked up again with [`BulkExecutor::resume`].

use bulkflow_metrics::{ErrorContext, MetricsCollector, OperationLogger, OperationSpan};
use bulkflow_queue::{BatchOptions, ProgressEvent, QueueError, RequestQueue};
use bulkflow_types::{
    ApiFailure, CategorizedError, MetricUnit, PerformanceMetric, RecordedResource,
    RecoveryAction, RecoveryStrategy, ResourceDescriptor, ResourceKind, Stage, StageGraph,
};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, warn, Instrument};

use crate::classifier::{ClassificationContext, ErrorClassifier};
use crate::context::{
    resource_call, work_key, ContextError, ExecutionContext, PendingCall, ResourceCall,
};
use crate::recovery::{HandlerError, RecoveryError, RecoveryOutcome, RecoveryRouter};
use crate::state::StateManager;

// ═══════════════════════════════════════════════════════════════════════════
// PLAN
// ═══════════════════════════════════════════════════════════════════════════

/// One resource to create
#[derive(Clone)]
pub struct PlannedCall {
    pub kind: ResourceKind,
    pub local_key: String,
    pub call: ResourceCall,
}

impl PlannedCall {
    pub fn new<F, Fut>(kind: ResourceKind, local_key: impl Into<String>, call: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ResourceDescriptor, ApiFailure>> + Send + 'static,
    {
        Self {
            kind,
            local_key: local_key.into(),
            call: resource_call(call),
        }
    }

    pub fn work_key(&self) -> String {
        work_key(self.kind, &self.local_key)
    }
}

impl std::fmt::Debug for PlannedCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlannedCall")
            .field("kind", &self.kind)
            .field("local_key", &self.local_key)
            .finish_non_exhaustive()
    }
}

/// Calls issued while a stage is current
#[derive(Debug, Clone)]
pub struct StagePlan {
    pub stage: Stage,
    pub calls: Vec<PlannedCall>,
}

impl StagePlan {
    pub fn new(stage: Stage) -> Self {
        Self {
            stage,
            calls: Vec::new(),
        }
    }

    pub fn with_call(mut self, call: PlannedCall) -> Self {
        self.calls.push(call);
        self
    }
}

#[derive(Debug, Clone)]
pub struct OperationPlan {
    pub operation_id: String,
    pub graph: StageGraph,
    pub steps: Vec<StagePlan>,
}

impl OperationPlan {
    pub fn new(operation_id: impl Into<String>, graph: StageGraph) -> Self {
        Self {
            operation_id: operation_id.into(),
            graph,
            steps: Vec::new(),
        }
    }

    pub fn with_step(mut self, step: StagePlan) -> Self {
        self.steps.push(step);
        self
    }

    pub fn step_for(&self, stage: Stage) -> Option<&StagePlan> {
        self.steps.iter().find(|s| s.stage == stage)
    }

    pub fn total_calls(&self) -> usize {
        self.steps.iter().map(|s| s.calls.len()).sum()
    }

    /// Every step must name a graph stage, at most once, and local keys
    /// must be unique per resource kind
    pub fn validate(&self) -> Result<(), ExecutorError> {
        let mut stages = HashSet::new();
        let mut keys = HashSet::new();

        for step in &self.steps {
            if !self.graph.contains(step.stage) {
                return Err(ExecutorError::InvalidPlan(format!(
                    "stage {} is not part of the operation graph",
                    step.stage
                )));
            }
            if !stages.insert(step.stage) {
                return Err(ExecutorError::InvalidPlan(format!(
                    "stage {} is planned twice",
                    step.stage
                )));
            }
            for call in &step.calls {
                if !keys.insert(call.work_key()) {
                    return Err(ExecutorError::InvalidPlan(format!(
                        "duplicate call {}",
                        call.work_key()
                    )));
                }
            }
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// REPORT
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationStatus {
    /// Every planned call produced a resource
    Completed,
    /// The run reached its last stage with some calls unresolved
    CompletedWithFailures,
    /// The run stopped after compensating back to `stage`; a full rollback
    /// means the whole operation failed and was undone
    RolledBack { stage: Stage, full: bool },
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Completed => "completed",
            OperationStatus::CompletedWithFailures => "completed_with_failures",
            OperationStatus::RolledBack { full: true, .. } => "rolled_back_full",
            OperationStatus::RolledBack { full: false, .. } => "rolled_back_partial",
        }
    }
}

/// A planned call that did not end up with a resource
#[derive(Debug, Clone)]
pub struct FailedItem {
    pub kind: ResourceKind,
    pub local_key: String,
    pub stage: Stage,
    pub error: CategorizedError,
}

#[derive(Debug, Clone)]
pub struct OperationReport {
    pub operation_id: String,
    pub status: OperationStatus,
    /// Resources mapped at the end of the run, in creation order
    pub succeeded: Vec<RecordedResource>,
    pub failed: Vec<FailedItem>,
    pub final_stage: Stage,
    pub duration: Duration,
}

impl OperationReport {
    pub fn is_success(&self) -> bool {
        self.status == OperationStatus::Completed
    }
}

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("invalid plan: {0}")]
    InvalidPlan(String),

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error(transparent)]
    Recovery(#[from] RecoveryError),
}

// ═══════════════════════════════════════════════════════════════════════════
// EXECUTOR
// ═══════════════════════════════════════════════════════════════════════════

enum StageOutcome {
    Continue,
    RolledBack { target: Stage, full: bool },
}

enum ItemOutcome {
    Recovered,
    Failed(CategorizedError),
    RolledBack {
        target: Stage,
        full: bool,
        error: CategorizedError,
    },
}

pub struct BulkExecutor {
    queue: RequestQueue,
    state: Arc<StateManager>,
    classifier: ErrorClassifier,
    router: Arc<RecoveryRouter>,
    logger: Arc<OperationLogger>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl BulkExecutor {
    pub fn new(
        queue: RequestQueue,
        state: Arc<StateManager>,
        classifier: ErrorClassifier,
        router: Arc<RecoveryRouter>,
        logger: Arc<OperationLogger>,
    ) -> Self {
        Self {
            queue,
            state,
            classifier,
            router,
            logger,
            metrics: None,
        }
    }

    /// Also feed operation counters and queue gauges to prometheus
    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn queue(&self) -> &RequestQueue {
        &self.queue
    }

    /// Start a fresh context and run the plan from the graph's first stage
    pub async fn run(
        &self,
        plan: &OperationPlan,
    ) -> Result<(ExecutionContext, OperationReport), ExecutorError> {
        plan.validate()?;
        let mut ctx = ExecutionContext::start(
            plan.operation_id.clone(),
            plan.graph.clone(),
            Arc::clone(&self.state),
        )
        .await;

        let report = self.resume(plan, &mut ctx).await?;
        Ok((ctx, report))
    }

    /// Continue from the context's current stage. Calls whose resource is
    /// already mapped are skipped.
    pub async fn resume(
        &self,
        plan: &OperationPlan,
        ctx: &mut ExecutionContext,
    ) -> Result<OperationReport, ExecutorError> {
        plan.validate()?;
        if ctx.operation_id() != plan.operation_id {
            return Err(ExecutorError::InvalidPlan(format!(
                "plan is for {} but the context belongs to {}",
                plan.operation_id,
                ctx.operation_id()
            )));
        }

        let span = OperationSpan::new(plan.operation_id.clone());
        self.drive(plan, ctx)
            .instrument(span.span())
            .await
            .with_correlation_id(span.correlation_id)
    }

    async fn drive(
        &self,
        plan: &OperationPlan,
        ctx: &mut ExecutionContext,
    ) -> Result<OperationReport, ExecutorError> {
        let started = Instant::now();
        if let Some(metrics) = &self.metrics {
            metrics.record_operation_started();
        }
        info!(
            from_stage = %ctx.current_stage(),
            calls = plan.total_calls(),
            "Running operation"
        );

        let mut failed = Vec::new();
        let mut rolled_back = None;

        loop {
            let stage = ctx.current_stage();
            self.logger.log_operation_start(&ctx.summary(), stage).await;

            if let Some(step) = plan.step_for(stage) {
                if let StageOutcome::RolledBack { target, full } =
                    self.run_stage(step, ctx, &mut failed).await?
                {
                    rolled_back = Some((target, full));
                    break;
                }
            }

            match next_stage(plan, ctx) {
                Some(next) => ctx.advance_stage(next).await?,
                None => break,
            }
        }

        let status = match rolled_back {
            Some((stage, full)) => OperationStatus::RolledBack { stage, full },
            None if failed.is_empty() => OperationStatus::Completed,
            None => OperationStatus::CompletedWithFailures,
        };
        let duration = started.elapsed();
        if let Some(metrics) = &self.metrics {
            metrics.record_operation_finished(status.as_str(), duration);
        }

        let report = OperationReport {
            operation_id: plan.operation_id.clone(),
            status,
            succeeded: ctx.all_resources().into_iter().cloned().collect(),
            failed,
            final_stage: ctx.current_stage(),
            duration,
        };

        info!(
            status = status.as_str(),
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            final_stage = %report.final_stage,
            duration_ms = duration.as_millis() as u64,
            "Operation finished"
        );
        Ok(report)
    }

    async fn run_stage(
        &self,
        step: &StagePlan,
        ctx: &mut ExecutionContext,
        failed: &mut Vec<FailedItem>,
    ) -> Result<StageOutcome, ExecutorError> {
        let stage_started = Instant::now();
        let todo: Vec<&PlannedCall> = step
            .calls
            .iter()
            .filter(|c| ctx.resource(c.kind, &c.local_key).is_none())
            .collect();

        if todo.len() < step.calls.len() {
            info!(
                stage = %step.stage,
                skipped = step.calls.len() - todo.len(),
                "Skipping calls with recorded resources"
            );
        }

        let mut outcome = StageOutcome::Continue;
        if !todo.is_empty() {
            for planned in &todo {
                ctx.register_call(PendingCall::new(
                    planned.kind,
                    planned.local_key.clone(),
                    Arc::clone(&planned.call),
                ));
            }

            let units: Vec<_> = todo
                .iter()
                .map(|planned| {
                    let call = Arc::clone(&planned.call);
                    move || call()
                })
                .collect();
            let (events_tx, mut events) = mpsc::unbounded_channel();
            let options = BatchOptions::default()
                .with_operation(ctx.operation_id())
                .with_label(step.stage.as_str())
                .with_item_progress(move |index, _, event| {
                    if matches!(
                        event,
                        ProgressEvent::Retrying { .. } | ProgressEvent::Completed { .. }
                    ) {
                        let _ = events_tx.send((index, event.clone()));
                    }
                });
            let results = self.queue.batch_enqueue(units, options).await;

            while let Ok((index, event)) = events.try_recv() {
                if let Some(planned) = todo.get(index) {
                    self.log_queue_event(planned, &event, ctx).await;
                }
            }

            let mut failures = Vec::new();
            for (planned, result) in todo.into_iter().zip(results) {
                match result {
                    Ok(descriptor) => {
                        ctx.record_resource(planned.kind, planned.local_key.clone(), descriptor);
                        ctx.clear_call(&planned.work_key());
                    }
                    Err(e) => failures.push((planned, e)),
                }
            }
            ctx.checkpoint().await;

            let mut failures = failures.into_iter();
            for (planned, queue_error) in failures.by_ref() {
                match self.recover(planned, queue_error, ctx).await? {
                    ItemOutcome::Recovered => {}
                    ItemOutcome::Failed(error) => {
                        failed.push(failed_item(planned, step.stage, error))
                    }
                    ItemOutcome::RolledBack {
                        target,
                        full,
                        error,
                    } => {
                        failed.push(failed_item(planned, step.stage, error));
                        outcome = StageOutcome::RolledBack { target, full };
                        break;
                    }
                }
            }

            // left unrecovered once the stage has been rolled back
            for (planned, queue_error) in failures {
                let classification = ClassificationContext::from_context(ctx, 1)
                    .with_resource(planned.kind, planned.local_key.clone());
                let error = self
                    .classifier
                    .classify_queue_error(&queue_error, &classification);
                ctx.clear_call(&planned.work_key());
                failed.push(failed_item(planned, step.stage, error));
            }
        }

        self.sample_stage(step.stage, stage_started.elapsed(), ctx).await;
        Ok(outcome)
    }

    /// Classify one failed call and route it until it is resolved, handed
    /// off, or rolled back
    async fn recover(
        &self,
        planned: &PlannedCall,
        queue_error: QueueError,
        ctx: &mut ExecutionContext,
    ) -> Result<ItemOutcome, ExecutorError> {
        let mut attempt = queue_error.attempts().max(1);
        let mut error = self.classify(planned, &queue_error, attempt, ctx);

        loop {
            self.logger.log_error(&error, &ctx.summary()).await;
            ctx.record_error(error.clone());

            match self.router.execute_recovery(&error, ctx).await {
                Ok(RecoveryOutcome::Retried { .. }) => return Ok(ItemOutcome::Recovered),
                Ok(RecoveryOutcome::RolledBack {
                    target,
                    full,
                    escalated,
                    ..
                }) => {
                    if escalated {
                        self.record_incident();
                    }
                    ctx.clear_call(&planned.work_key());
                    return Ok(ItemOutcome::RolledBack {
                        target,
                        full,
                        error,
                    });
                }
                Ok(RecoveryOutcome::Escalated { .. }) => {
                    self.record_incident();
                    ctx.clear_call(&planned.work_key());
                    return Ok(ItemOutcome::Failed(error));
                }
                Err(RecoveryError::HandlerFailed {
                    source: HandlerError::Queue(retry_error),
                    ..
                }) if error.strategy().is_retry() => {
                    attempt += retry_error.attempts().max(1);
                    warn!(
                        work_key = %planned.work_key(),
                        attempt,
                        error = %retry_error,
                        "Retried call failed again"
                    );
                    error = self.classify(planned, &retry_error, attempt, ctx);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Audit-trail entries for retries the queue handled on its own
    async fn log_queue_event(
        &self,
        planned: &PlannedCall,
        event: &ProgressEvent,
        ctx: &ExecutionContext,
    ) {
        match *event {
            ProgressEvent::Retrying { attempt, delay } => {
                let strategy = if attempt <= 1 {
                    RecoveryStrategy::ImmediateRetry
                } else {
                    RecoveryStrategy::DelayedRetry
                };
                let action = RecoveryAction::new(
                    strategy,
                    format!(
                        "queue retry of {} after attempt {attempt} in {}ms",
                        planned.work_key(),
                        delay.as_millis()
                    ),
                )
                .with_attempt(attempt + 1);
                self.logger
                    .log_recovery_action(&action, &ctx.summary(), true)
                    .await;
            }
            ProgressEvent::Completed { attempts } if attempts > 1 => {
                self.logger
                    .log_unit_completed(&ctx.summary(), &planned.work_key(), attempts)
                    .await;
            }
            _ => {}
        }
    }

    fn classify(
        &self,
        planned: &PlannedCall,
        queue_error: &QueueError,
        attempt: u32,
        ctx: &ExecutionContext,
    ) -> CategorizedError {
        let classification = ClassificationContext::from_context(ctx, attempt)
            .with_resource(planned.kind, planned.local_key.clone());
        self.classifier
            .classify_queue_error(queue_error, &classification)
    }

    async fn sample_stage(&self, stage: Stage, elapsed: Duration, ctx: &ExecutionContext) {
        let stats = self.queue.stats().await;
        let summary = ctx.summary();

        self.logger
            .log_performance_metric(
                &PerformanceMetric::duration("stage_duration_ms", elapsed)
                    .with_tag("stage", stage.as_str()),
                &summary,
            )
            .await;
        self.logger
            .log_performance_metric(
                &PerformanceMetric::new("queue_depth", stats.outstanding() as f64, MetricUnit::Count)
                    .with_tag("stage", stage.as_str()),
                &summary,
            )
            .await;

        if let Some(metrics) = &self.metrics {
            metrics.record_queue_stats(&stats);
        }
    }

    fn record_incident(&self) {
        if let Some(metrics) = &self.metrics {
            metrics.record_incident_opened();
        }
    }
}

fn failed_item(planned: &PlannedCall, stage: Stage, error: CategorizedError) -> FailedItem {
    FailedItem {
        kind: planned.kind,
        local_key: planned.local_key.clone(),
        stage,
        error,
    }
}

/// The first reachable stage with planned work, else the next stage in
/// graph order
fn next_stage(plan: &OperationPlan, ctx: &ExecutionContext) -> Option<Stage> {
    let graph = ctx.graph();
    let current = ctx.current_stage();
    let reachable: Vec<Stage> = graph
        .stages()
        .iter()
        .copied()
        .filter(|stage| graph.is_adjacent(current, *stage))
        .collect();

    reachable
        .iter()
        .copied()
        .find(|stage| plan.step_for(*stage).is_some())
        .or_else(|| reachable.first().copied())
}
