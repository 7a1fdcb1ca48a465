use async_trait::async_trait;
use bulkflow_config::RecoveryConfig;
use bulkflow_metrics::OperationLogger;
use bulkflow_queue::{EnqueueOptions, QueueError, RequestQueue};
use bulkflow_ratelimit::ExponentialBackoff;
use bulkflow_types::{
    CategorizedError, ErrorCategory, ErrorCode, RecordedResource, RecoveryAction,
    RecoveryStrategy, Stage,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::context::{ContextError, ExecutionContext, RollbackReport};

/// What a recovery handler did to the context
#[derive(Debug, Clone)]
pub enum RecoveryOutcome {
    /// The failed unit was resubmitted and produced this resource
    Retried { resource: RecordedResource },

    /// Resources created since `target` were compensated
    RolledBack {
        target: Stage,
        full: bool,
        report: RollbackReport,
        /// Failed compensations were handed to an operator
        escalated: bool,
    },

    /// An operator has to resolve the failure
    Escalated { incident: Incident },
}

impl RecoveryOutcome {
    pub fn target_stage(&self) -> Option<Stage> {
        match self {
            RecoveryOutcome::RolledBack { target, .. } => Some(*target),
            _ => None,
        }
    }
}

/// Handler failure
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("no pending call registered for {0:?}")]
    MissingPendingCall(Option<String>),

    #[error("resubmitted call failed: {0}")]
    Queue(#[from] QueueError),

    #[error("context error: {0}")]
    Context(#[from] ContextError),

    #[error("operator notification failed: {0}")]
    Notification(#[from] NotifyError),
}

/// Recovery router errors
#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error("no handler registered for recovery strategy {strategy}")]
    UnregisteredStrategy { strategy: RecoveryStrategy },

    #[error("{strategy} handler failed while recovering from {original}")]
    HandlerFailed {
        strategy: RecoveryStrategy,
        original: Box<CategorizedError>,
        #[source]
        source: HandlerError,
    },
}

impl RecoveryError {
    pub fn strategy(&self) -> RecoveryStrategy {
        match self {
            RecoveryError::UnregisteredStrategy { strategy }
            | RecoveryError::HandlerFailed { strategy, .. } => *strategy,
        }
    }
}

#[async_trait]
pub trait RecoveryHandler: Send + Sync {
    async fn handle(
        &self,
        error: &CategorizedError,
        ctx: &mut ExecutionContext,
    ) -> Result<RecoveryOutcome, HandlerError>;
}

// ═══════════════════════════════════════════════════════════════════════════
// ROUTER
// ═══════════════════════════════════════════════════════════════════════════

/// Dispatches categorized errors to the handler registered for their
/// strategy. There is no fallback handler.
pub struct RecoveryRouter {
    handlers: HashMap<RecoveryStrategy, Arc<dyn RecoveryHandler>>,
    logger: Arc<OperationLogger>,
}

impl RecoveryRouter {
    /// Router with no handlers
    pub fn new(logger: Arc<OperationLogger>) -> Self {
        Self {
            handlers: HashMap::new(),
            logger,
        }
    }

    /// Router with retry, rollback and manual-intervention handlers wired
    /// to the given queue and operator channel
    pub fn with_defaults(
        queue: RequestQueue,
        backoff: ExponentialBackoff,
        channel: Arc<dyn OperatorChannel>,
        config: &RecoveryConfig,
        logger: Arc<OperationLogger>,
    ) -> Self {
        let manual = Arc::new(ManualInterventionHandler::new(channel));
        let retry = Arc::new(RetryHandler::new(queue, backoff));
        let rollback = Arc::new(RollbackHandler::new(
            Arc::clone(&manual),
            config.escalate_failed_compensation,
        ));

        Self::new(logger)
            .register(RecoveryStrategy::ImmediateRetry, retry.clone())
            .register(RecoveryStrategy::DelayedRetry, retry)
            .register(RecoveryStrategy::PartialRollback, rollback.clone())
            .register(RecoveryStrategy::FullRollback, rollback)
            .register(RecoveryStrategy::ManualIntervention, manual)
    }

    pub fn register(
        mut self,
        strategy: RecoveryStrategy,
        handler: Arc<dyn RecoveryHandler>,
    ) -> Self {
        self.handlers.insert(strategy, handler);
        self
    }

    pub fn has_handler(&self, strategy: RecoveryStrategy) -> bool {
        self.handlers.contains_key(&strategy)
    }

    /// Run the handler for the error's strategy, writing one recovery log
    /// entry whatever the outcome
    pub async fn execute_recovery(
        &self,
        err: &CategorizedError,
        ctx: &mut ExecutionContext,
    ) -> Result<RecoveryOutcome, RecoveryError> {
        let strategy = err.strategy();
        let attempt = err.details().attempt;

        let Some(handler) = self.handlers.get(&strategy).cloned() else {
            error!(
                operation_id = %ctx.operation_id(),
                strategy = strategy.as_str(),
                severity = "critical",
                error_category = "configuration",
                "No handler registered for recovery strategy"
            );
            let gap = CategorizedError::new(
                ErrorCode::Configuration,
                RecoveryStrategy::ManualIntervention,
                format!("no handler registered for {strategy}"),
            );
            self.logger.log_error(&gap, &ctx.summary()).await;
            self.logger
                .log_recovery_action(
                    &RecoveryAction::new(strategy, "unregistered strategy").with_attempt(attempt),
                    &ctx.summary(),
                    false,
                )
                .await;
            return Err(RecoveryError::UnregisteredStrategy { strategy });
        };

        info!(
            operation_id = %ctx.operation_id(),
            strategy = strategy.as_str(),
            code = err.code().as_str(),
            attempt,
            "Executing recovery"
        );

        let mut action = RecoveryAction::new(strategy, err.message()).with_attempt(attempt);
        match handler.handle(err, ctx).await {
            Ok(outcome) => {
                if let Some(target) = outcome.target_stage() {
                    action = action.with_target(target);
                }
                self.logger
                    .log_recovery_action(&action, &ctx.summary(), true)
                    .await;
                Ok(outcome)
            }
            Err(source) => {
                self.logger
                    .log_recovery_action(&action, &ctx.summary(), false)
                    .await;
                Err(RecoveryError::HandlerFailed {
                    strategy,
                    original: Box::new(err.clone()),
                    source,
                })
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// RETRY
// ═══════════════════════════════════════════════════════════════════════════

/// Resubmits the failed unit through the queue as an urgent item
pub struct RetryHandler {
    queue: RequestQueue,
    backoff: ExponentialBackoff,
}

impl RetryHandler {
    pub fn new(queue: RequestQueue, backoff: ExponentialBackoff) -> Self {
        Self { queue, backoff }
    }
}

#[async_trait]
impl RecoveryHandler for RetryHandler {
    async fn handle(
        &self,
        error: &CategorizedError,
        ctx: &mut ExecutionContext,
    ) -> Result<RecoveryOutcome, HandlerError> {
        let work_key = error.details().work_key.clone();
        let pending = work_key
            .as_deref()
            .and_then(|key| ctx.pending_call(key))
            .ok_or_else(|| HandlerError::MissingPendingCall(work_key.clone()))?;

        if error.strategy() == RecoveryStrategy::DelayedRetry {
            let delay = self
                .backoff
                .delay_for(error.details().attempt.saturating_sub(1));
            info!(
                operation_id = %ctx.operation_id(),
                work_key = %pending.work_key(),
                delay_ms = delay.as_millis() as u64,
                "Delaying retry"
            );
            tokio::time::sleep(delay).await;
        }

        if let Err(e) = ctx.restore_state(ctx.current_stage()).await {
            warn!(
                operation_id = %ctx.operation_id(),
                stage = %ctx.current_stage(),
                error = %e,
                "Could not resynchronise from snapshot before retry"
            );
            ctx.record_warning(format!("restore before retry failed: {e}"));
        }

        let call = Arc::clone(&pending.call);
        let options = EnqueueOptions::urgent()
            .with_operation(ctx.operation_id())
            .with_label(format!("retry {}", pending.work_key()));
        let descriptor = self.queue.enqueue(move || call(), options).await?;

        let resource = ctx
            .record_resource(pending.kind, pending.local_key.clone(), descriptor)
            .clone();
        ctx.clear_call(&pending.work_key());
        ctx.checkpoint().await;

        Ok(RecoveryOutcome::Retried { resource })
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// ROLLBACK
// ═══════════════════════════════════════════════════════════════════════════

/// Compensates back to the last stable stage, or to the first stage for a
/// full rollback
pub struct RollbackHandler {
    escalation: Arc<ManualInterventionHandler>,
    escalate_failed: bool,
}

impl RollbackHandler {
    pub fn new(escalation: Arc<ManualInterventionHandler>, escalate_failed: bool) -> Self {
        Self {
            escalation,
            escalate_failed,
        }
    }

    fn target(error: &CategorizedError, ctx: &ExecutionContext) -> (Stage, bool) {
        let first = ctx.graph().first();
        if error.strategy() == RecoveryStrategy::FullRollback {
            return (first, true);
        }
        match error.details().last_stable_stage.or(ctx.last_stable_stage()) {
            Some(stage) => (stage, stage == first),
            None => (first, true),
        }
    }
}

#[async_trait]
impl RecoveryHandler for RollbackHandler {
    async fn handle(
        &self,
        error: &CategorizedError,
        ctx: &mut ExecutionContext,
    ) -> Result<RecoveryOutcome, HandlerError> {
        let (target, full) = Self::target(error, ctx);
        let report = ctx.rollback_to(target).await?;

        let mut escalated = false;
        if !report.is_clean() && self.escalate_failed {
            for (_, failure) in &report.failed {
                self.escalation.open_incident(failure, ctx).await?;
            }
            escalated = true;
        }

        Ok(RecoveryOutcome::RolledBack {
            target,
            full,
            report,
            escalated,
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// MANUAL INTERVENTION
// ═══════════════════════════════════════════════════════════════════════════

/// Record of a failure handed to an operator
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Incident {
    pub id: Uuid,
    pub operation_id: String,
    pub stage: Stage,
    pub code: ErrorCode,
    pub category: ErrorCategory,
    pub message: String,
    pub resource_id: Option<String>,
    pub opened_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct NotifyError(pub String);

/// Where incidents are announced
#[async_trait]
pub trait OperatorChannel: Send + Sync {
    async fn notify(&self, incident: &Incident) -> Result<(), NotifyError>;
}

/// Announces incidents as error-level tracing events
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingOperatorChannel;

#[async_trait]
impl OperatorChannel for TracingOperatorChannel {
    async fn notify(&self, incident: &Incident) -> Result<(), NotifyError> {
        error!(
            incident_id = %incident.id,
            operation_id = %incident.operation_id,
            stage = %incident.stage,
            code = incident.code.as_str(),
            error_category = incident.category.as_str(),
            "Manual intervention required: {}", incident.message
        );
        Ok(())
    }
}

/// Opens incidents and notifies an operator; never touches the context
pub struct ManualInterventionHandler {
    channel: Arc<dyn OperatorChannel>,
    incidents: Mutex<Vec<Incident>>,
}

impl ManualInterventionHandler {
    pub fn new(channel: Arc<dyn OperatorChannel>) -> Self {
        Self {
            channel,
            incidents: Mutex::new(Vec::new()),
        }
    }

    pub async fn open_incident(
        &self,
        error: &CategorizedError,
        ctx: &ExecutionContext,
    ) -> Result<Incident, HandlerError> {
        let incident = Incident {
            id: Uuid::new_v4(),
            operation_id: ctx.operation_id().to_string(),
            stage: error.details().stage.unwrap_or(ctx.current_stage()),
            code: error.code(),
            category: error.category(),
            message: error.message().to_string(),
            resource_id: error.details().resource_id.clone(),
            opened_at: Utc::now(),
        };

        self.incidents
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(incident.clone());
        self.channel.notify(&incident).await?;

        Ok(incident)
    }

    /// Incidents opened so far, oldest first
    pub fn incidents(&self) -> Vec<Incident> {
        self.incidents
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl RecoveryHandler for ManualInterventionHandler {
    async fn handle(
        &self,
        error: &CategorizedError,
        ctx: &mut ExecutionContext,
    ) -> Result<RecoveryOutcome, HandlerError> {
        let incident = self.open_incident(error, ctx).await?;
        Ok(RecoveryOutcome::Escalated { incident })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{ClassificationContext, ErrorClassifier};
    use crate::context::{resource_call, work_key, PendingCall};
    use crate::testing::{campaign_graph, fast_queue, state_manager, RecordingCompensator};
    use bulkflow_config::LoggingConfig;
    use bulkflow_store::{InMemoryStore, LogStore};
    use bulkflow_types::{
        ApiFailure, ErrorDetails, LogCategory, LogDetails, ResourceDescriptor, ResourceKind,
    };
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct FailingChannel;

    #[async_trait]
    impl OperatorChannel for FailingChannel {
        async fn notify(&self, _incident: &Incident) -> Result<(), NotifyError> {
            Err(NotifyError("pager offline".into()))
        }
    }

    fn logger() -> (Arc<OperationLogger>, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        let logger = OperationLogger::new(store.clone(), &LoggingConfig::default());
        (Arc::new(logger), store)
    }

    fn backoff() -> ExponentialBackoff {
        ExponentialBackoff::new(Duration::from_millis(1), Duration::from_millis(5))
    }

    fn router(escalate: bool) -> (RecoveryRouter, Arc<InMemoryStore>) {
        let (logger, logs) = logger();
        let config = RecoveryConfig {
            escalate_failed_compensation: escalate,
            ..Default::default()
        };
        let router = RecoveryRouter::with_defaults(
            fast_queue(0),
            backoff(),
            Arc::new(TracingOperatorChannel),
            &config,
            logger,
        );
        (router, logs)
    }

    async fn ad_group_context(compensator: Arc<RecordingCompensator>) -> ExecutionContext {
        let (state, _) = state_manager(compensator);
        let mut ctx = ExecutionContext::start("op-1", campaign_graph(), state).await;
        ctx.advance_stage(Stage::CampaignCreation).await.unwrap();
        ctx.record_resource(ResourceKind::Campaign, "c-1", ResourceDescriptor::new("r-c1"));
        ctx.advance_stage(Stage::AdGroupCreation).await.unwrap();
        ctx.record_resource(ResourceKind::AdGroup, "g-1", ResourceDescriptor::new("r-g1"));
        ctx.checkpoint().await;
        ctx
    }

    fn recovery_entries(entries: &[bulkflow_types::LogEntry]) -> Vec<(RecoveryStrategy, bool)> {
        entries
            .iter()
            .filter(|e| e.category == LogCategory::Recovery)
            .filter_map(|e| match &e.details {
                LogDetails::Recovery {
                    strategy, success, ..
                } => Some((*strategy, *success)),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_unregistered_strategy_is_fatal() {
        let (logger, logs) = logger();
        let router = RecoveryRouter::new(logger);
        let mut ctx = ad_group_context(Arc::new(RecordingCompensator::default())).await;
        let err = CategorizedError::new(
            ErrorCode::Validation,
            RecoveryStrategy::PartialRollback,
            "bad input",
        );

        let result = router.execute_recovery(&err, &mut ctx).await;

        assert!(matches!(
            result,
            Err(RecoveryError::UnregisteredStrategy {
                strategy: RecoveryStrategy::PartialRollback
            })
        ));
        let entries = logs.list_for_operation("op-1").await.unwrap();
        assert_eq!(
            recovery_entries(&entries),
            vec![(RecoveryStrategy::PartialRollback, false)]
        );
        assert_eq!(ctx.resources(ResourceKind::AdGroup).len(), 1);
    }

    #[tokio::test]
    async fn test_retry_resubmits_pending_call() {
        let (router, logs) = router(true);
        let mut ctx = ad_group_context(Arc::new(RecordingCompensator::default())).await;
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let call = resource_call(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(ResourceDescriptor::new("r-g2")) }
        });
        ctx.register_call(PendingCall::new(ResourceKind::AdGroup, "g-2", call));

        let classification =
            ClassificationContext::from_context(&ctx, 2).with_resource(ResourceKind::AdGroup, "g-2");
        let err = ErrorClassifier::new(3)
            .classify(&ApiFailure::with_status(503, "unavailable"), &classification);
        assert_eq!(err.strategy(), RecoveryStrategy::DelayedRetry);

        let outcome = router.execute_recovery(&err, &mut ctx).await.unwrap();

        let RecoveryOutcome::Retried { resource } = outcome else {
            panic!("expected a retry outcome");
        };
        assert_eq!(resource.descriptor.remote_id, "r-g2");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(ctx.resource(ResourceKind::AdGroup, "g-2").is_some());
        assert!(ctx
            .pending_call(&work_key(ResourceKind::AdGroup, "g-2"))
            .is_none());

        let entries = logs.list_for_operation("op-1").await.unwrap();
        assert_eq!(
            recovery_entries(&entries),
            vec![(RecoveryStrategy::DelayedRetry, true)]
        );
    }

    #[tokio::test]
    async fn test_retry_after_failed_checkpoint_keeps_earlier_mappings() {
        let (state, store) = state_manager(Arc::new(RecordingCompensator::default()));
        let mut ctx =
            ExecutionContext::start("op-1", campaign_graph(), Arc::clone(&state)).await;
        ctx.advance_stage(Stage::CampaignCreation).await.unwrap();
        ctx.record_resource(ResourceKind::Campaign, "c-1", ResourceDescriptor::new("r-c1"));
        store.set_unavailable(true);
        ctx.checkpoint().await;
        store.set_unavailable(false);

        let call = resource_call(|| async { Ok(ResourceDescriptor::new("r-c2")) });
        ctx.register_call(PendingCall::new(ResourceKind::Campaign, "c-2", call));
        let err = CategorizedError::new(
            ErrorCode::RateLimit,
            RecoveryStrategy::ImmediateRetry,
            "slow down",
        )
        .with_details(ErrorDetails {
            attempt: 1,
            work_key: Some(work_key(ResourceKind::Campaign, "c-2")),
            ..Default::default()
        });

        let handler = RetryHandler::new(fast_queue(0), backoff());
        let outcome = handler.handle(&err, &mut ctx).await.unwrap();

        assert!(matches!(outcome, RecoveryOutcome::Retried { .. }));
        let mapped: Vec<_> = ctx
            .resources(ResourceKind::Campaign)
            .iter()
            .map(|r| r.local_key.clone())
            .collect();
        assert_eq!(mapped, vec!["c-1", "c-2"]);
        assert_eq!(ctx.warnings().len(), 2);
        assert!(ctx.warnings()[1].starts_with("restore before retry failed"));

        // the retry's own checkpoint persists both
        let recovered = ExecutionContext::recover("op-1", campaign_graph(), state)
            .await
            .unwrap();
        assert_eq!(recovered.resources(ResourceKind::Campaign).len(), 2);
    }

    #[tokio::test]
    async fn test_retry_without_pending_call_wraps_original() {
        let (router, logs) = router(true);
        let mut ctx = ad_group_context(Arc::new(RecordingCompensator::default())).await;
        let err = CategorizedError::new(
            ErrorCode::RateLimit,
            RecoveryStrategy::ImmediateRetry,
            "slow down",
        )
        .with_details(ErrorDetails {
            attempt: 1,
            work_key: Some("ad_group:missing".into()),
            ..Default::default()
        });

        let result = router.execute_recovery(&err, &mut ctx).await;

        match result {
            Err(RecoveryError::HandlerFailed {
                strategy,
                original,
                source: HandlerError::MissingPendingCall(Some(key)),
            }) => {
                assert_eq!(strategy, RecoveryStrategy::ImmediateRetry);
                assert_eq!(original.code(), ErrorCode::RateLimit);
                assert_eq!(key, "ad_group:missing");
            }
            other => panic!("unexpected result: {other:?}"),
        }
        let entries = logs.list_for_operation("op-1").await.unwrap();
        assert_eq!(
            recovery_entries(&entries),
            vec![(RecoveryStrategy::ImmediateRetry, false)]
        );
    }

    #[tokio::test]
    async fn test_partial_rollback_targets_last_stable_stage() {
        let (router, _) = router(true);
        let compensator = Arc::new(RecordingCompensator::default());
        let mut ctx = ad_group_context(Arc::clone(&compensator)).await;
        let err = ErrorClassifier::new(3).classify(
            &ApiFailure::with_status(400, "invalid bid"),
            &ClassificationContext::from_context(&ctx, 1),
        );
        assert_eq!(err.strategy(), RecoveryStrategy::PartialRollback);

        let outcome = router.execute_recovery(&err, &mut ctx).await.unwrap();

        match outcome {
            RecoveryOutcome::RolledBack {
                target,
                full,
                escalated,
                report,
            } => {
                assert_eq!(target, Stage::CampaignCreation);
                assert!(!full);
                assert!(!escalated);
                assert_eq!(report.compensated.len(), 2);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(compensator.calls(), vec!["g-1", "c-1"]);
        assert_eq!(ctx.current_stage(), Stage::CampaignCreation);
    }

    #[tokio::test]
    async fn test_full_rollback_returns_to_first_stage() {
        let (router, _) = router(true);
        let compensator = Arc::new(RecordingCompensator::default());
        let mut ctx = ad_group_context(Arc::clone(&compensator)).await;
        let err = CategorizedError::new(
            ErrorCode::Authorization,
            RecoveryStrategy::FullRollback,
            "account suspended",
        );

        let outcome = router.execute_recovery(&err, &mut ctx).await.unwrap();

        assert!(matches!(
            outcome,
            RecoveryOutcome::RolledBack {
                target: Stage::Validation,
                full: true,
                ..
            }
        ));
        assert!(ctx.all_resources().is_empty());
        assert_eq!(ctx.current_stage(), Stage::Validation);
    }

    #[tokio::test]
    async fn test_failed_compensation_escalates() {
        let (logger, _) = logger();
        let manual = Arc::new(ManualInterventionHandler::new(Arc::new(
            TracingOperatorChannel,
        )));
        let router = RecoveryRouter::new(logger).register(
            RecoveryStrategy::FullRollback,
            Arc::new(RollbackHandler::new(Arc::clone(&manual), true)),
        );
        let mut ctx = ad_group_context(Arc::new(RecordingCompensator::failing_on(["c-1"]))).await;
        let err = CategorizedError::new(
            ErrorCode::Authorization,
            RecoveryStrategy::FullRollback,
            "account suspended",
        );

        let outcome = router.execute_recovery(&err, &mut ctx).await.unwrap();

        assert!(matches!(
            outcome,
            RecoveryOutcome::RolledBack {
                escalated: true,
                ..
            }
        ));
        let incidents = manual.incidents();
        assert_eq!(incidents.len(), 1);
        assert_eq!(incidents[0].code, ErrorCode::RollbackFailed);
        assert_eq!(incidents[0].resource_id.as_deref(), Some("c-1"));
        assert!(ctx.resource(ResourceKind::Campaign, "c-1").is_some());
    }

    #[tokio::test]
    async fn test_escalation_can_be_disabled() {
        let (router, _) = router(false);
        let mut ctx = ad_group_context(Arc::new(RecordingCompensator::failing_on(["g-1"]))).await;
        let err = CategorizedError::new(
            ErrorCode::Validation,
            RecoveryStrategy::PartialRollback,
            "bad input",
        );

        let outcome = router.execute_recovery(&err, &mut ctx).await.unwrap();

        match outcome {
            RecoveryOutcome::RolledBack {
                escalated, report, ..
            } => {
                assert!(!escalated);
                assert_eq!(report.failed.len(), 1);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_manual_intervention_leaves_context_alone() {
        let (router, _) = router(true);
        let compensator = Arc::new(RecordingCompensator::default());
        let mut ctx = ad_group_context(Arc::clone(&compensator)).await;
        let before = ctx.summary();
        let err = CategorizedError::new(
            ErrorCode::RollbackFailed,
            RecoveryStrategy::ManualIntervention,
            "orphaned ad group",
        );

        let outcome = router.execute_recovery(&err, &mut ctx).await.unwrap();

        let RecoveryOutcome::Escalated { incident } = outcome else {
            panic!("expected an incident");
        };
        assert_eq!(incident.operation_id, "op-1");
        assert_eq!(incident.stage, Stage::AdGroupCreation);
        assert_eq!(incident.category, ErrorCategory::System);
        assert_eq!(ctx.summary(), before);
        assert!(compensator.calls().is_empty());
    }

    #[tokio::test]
    async fn test_notification_failure_is_wrapped() {
        let (logger, _) = logger();
        let manual = Arc::new(ManualInterventionHandler::new(Arc::new(FailingChannel)));
        let router =
            RecoveryRouter::new(logger).register(RecoveryStrategy::ManualIntervention, manual.clone());
        let mut ctx = ad_group_context(Arc::new(RecordingCompensator::default())).await;
        let err = CategorizedError::new(
            ErrorCode::Unknown,
            RecoveryStrategy::ManualIntervention,
            "boom",
        );

        let result = router.execute_recovery(&err, &mut ctx).await;

        assert!(matches!(
            result,
            Err(RecoveryError::HandlerFailed {
                source: HandlerError::Notification(_),
                ..
            })
        ));
        assert_eq!(manual.incidents().len(), 1);
    }
}
