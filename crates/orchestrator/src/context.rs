use bulkflow_store::StoreError;
use bulkflow_types::{
    ApiFailure, CategorizedError, ContextSummary, ErrorCode, ErrorDetails, RecordedResource,
    RecoveryStrategy, ResourceDescriptor, ResourceKind, Stage, StageEntry, StageGraph,
    StageSnapshot,
};
use chrono::Utc;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::state::StateManager;

/// Remote call creating one resource
pub type ResourceCall =
    Arc<dyn Fn() -> BoxFuture<'static, Result<ResourceDescriptor, ApiFailure>> + Send + Sync>;

/// Box a closure into a [`ResourceCall`]
pub fn resource_call<F, Fut>(call: F) -> ResourceCall
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ResourceDescriptor, ApiFailure>> + Send + 'static,
{
    Arc::new(move || -> BoxFuture<'static, Result<ResourceDescriptor, ApiFailure>> {
        Box::pin(call())
    })
}

/// Key under which a pending unit of work is registered
pub fn work_key(kind: ResourceKind, local_key: &str) -> String {
    format!("{kind}:{local_key}")
}

/// A unit of work that can be resubmitted by the retry handler
#[derive(Clone)]
pub struct PendingCall {
    pub kind: ResourceKind,
    pub local_key: String,
    pub call: ResourceCall,
}

impl PendingCall {
    pub fn new(kind: ResourceKind, local_key: impl Into<String>, call: ResourceCall) -> Self {
        Self {
            kind,
            local_key: local_key.into(),
            call,
        }
    }

    pub fn work_key(&self) -> String {
        work_key(self.kind, &self.local_key)
    }
}

impl std::fmt::Debug for PendingCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingCall")
            .field("kind", &self.kind)
            .field("local_key", &self.local_key)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("invalid stage transition {from} -> {to}")]
    InvalidTransition { from: Stage, to: Stage },

    #[error("stage {0} was never entered by this operation")]
    StageNotEntered(Stage),

    #[error("cannot roll back from {current} forward to {target}")]
    NotBehind { current: Stage, target: Stage },

    #[error("no snapshot of operation {operation_id} at stage {stage}")]
    SnapshotMissing { operation_id: String, stage: Stage },

    #[error(
        "snapshot of operation {operation_id} at stage {stage} predates {unpersisted} recorded resources"
    )]
    StaleSnapshot {
        operation_id: String,
        stage: Stage,
        unpersisted: usize,
    },

    #[error("snapshot store error: {0}")]
    Store(#[from] StoreError),
}

impl ContextError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ContextError::InvalidTransition { .. } | ContextError::NotBehind { .. } => {
                ErrorCode::InvalidTransition
            }
            _ => ErrorCode::Unknown,
        }
    }
}

/// Outcome of [`ExecutionContext::rollback_to`]
#[derive(Debug, Clone)]
pub struct RollbackReport {
    pub target: Stage,
    /// Resources undone, in the order they were compensated
    pub compensated: Vec<RecordedResource>,
    /// Resources whose compensation failed; they stay mapped
    pub failed: Vec<(RecordedResource, CategorizedError)>,
}

impl RollbackReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Everything one operation has created so far, and how to undo it.
///
/// Owned by a single operation; all mutation goes through `&mut self`.
pub struct ExecutionContext {
    operation_id: String,
    graph: StageGraph,
    current_stage: Stage,
    resources: HashMap<ResourceKind, HashMap<String, RecordedResource>>,
    entries: Vec<StageEntry>,
    next_sequence: u64,
    errors: Vec<CategorizedError>,
    warnings: Vec<String>,
    pending: HashMap<String, PendingCall>,
    state: Arc<StateManager>,
}

impl ExecutionContext {
    /// Enter the graph's first stage and checkpoint it
    pub async fn start(
        operation_id: impl Into<String>,
        graph: StageGraph,
        state: Arc<StateManager>,
    ) -> Self {
        let first = graph.first();
        let mut ctx = Self {
            operation_id: operation_id.into(),
            current_stage: first,
            graph,
            resources: HashMap::new(),
            entries: vec![StageEntry {
                stage: first,
                watermark: 0,
                entered_at: Utc::now(),
            }],
            next_sequence: 0,
            errors: Vec::new(),
            warnings: Vec::new(),
            pending: HashMap::new(),
            state,
        };

        info!(operation_id = %ctx.operation_id, stage = %first, "Operation started");
        ctx.checkpoint().await;
        ctx
    }

    /// Rebuild a context from its latest persisted stage, e.g. after a
    /// process restart
    pub async fn recover(
        operation_id: impl Into<String>,
        graph: StageGraph,
        state: Arc<StateManager>,
    ) -> Result<Self, ContextError> {
        let operation_id = operation_id.into();
        let latest = state
            .saved_stages(&operation_id)
            .await?
            .into_iter()
            .filter(|stage| graph.contains(*stage))
            .last()
            .ok_or(ContextError::SnapshotMissing {
                operation_id: operation_id.clone(),
                stage: graph.first(),
            })?;

        let mut ctx = Self {
            operation_id,
            current_stage: graph.first(),
            graph,
            resources: HashMap::new(),
            entries: Vec::new(),
            next_sequence: 0,
            errors: Vec::new(),
            warnings: Vec::new(),
            pending: HashMap::new(),
            state,
        };
        ctx.restore_state(latest).await?;
        Ok(ctx)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // ACCESSORS
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn operation_id(&self) -> &str {
        &self.operation_id
    }

    pub fn current_stage(&self) -> Stage {
        self.current_stage
    }

    pub fn graph(&self) -> &StageGraph {
        &self.graph
    }

    pub fn errors(&self) -> &[CategorizedError] {
        &self.errors
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Stages entered so far, oldest first
    pub fn entered_stages(&self) -> Vec<Stage> {
        self.entries.iter().map(|e| e.stage).collect()
    }

    /// Resources of one kind in creation order
    pub fn resources(&self, kind: ResourceKind) -> Vec<&RecordedResource> {
        let mut list: Vec<_> = self
            .resources
            .get(&kind)
            .map(|m| m.values().collect())
            .unwrap_or_default();
        list.sort_by_key(|r| r.sequence);
        list
    }

    pub fn resource(&self, kind: ResourceKind, local_key: &str) -> Option<&RecordedResource> {
        self.resources.get(&kind).and_then(|m| m.get(local_key))
    }

    /// Every recorded resource in creation order
    pub fn all_resources(&self) -> Vec<&RecordedResource> {
        let mut list: Vec<_> = self.resources.values().flat_map(|m| m.values()).collect();
        list.sort_by_key(|r| r.sequence);
        list
    }

    /// Resources created since the current stage was entered
    pub fn created_in_current_stage(&self) -> usize {
        let watermark = self.current_watermark();
        self.resources
            .values()
            .flat_map(|m| m.values())
            .filter(|r| r.sequence >= watermark)
            .count()
    }

    /// The stage entered before the current one, if any
    pub fn last_stable_stage(&self) -> Option<Stage> {
        self.entries
            .len()
            .checked_sub(2)
            .map(|index| self.entries[index].stage)
    }

    pub fn summary(&self) -> ContextSummary {
        ContextSummary {
            operation_id: self.operation_id.clone(),
            stage: Some(self.current_stage),
            resource_counts: self
                .resources
                .iter()
                .filter(|(_, m)| !m.is_empty())
                .map(|(kind, m)| (*kind, m.len()))
                .collect(),
            error_count: self.errors.len(),
            warning_count: self.warnings.len(),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // MUTATION
    // ═══════════════════════════════════════════════════════════════════════════

    /// Map a created remote resource; re-recording the same key replaces the
    /// entry and gives it a fresh creation sequence
    pub fn record_resource(
        &mut self,
        kind: ResourceKind,
        local_key: impl Into<String>,
        descriptor: ResourceDescriptor,
    ) -> &RecordedResource {
        let local_key = local_key.into();
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        debug!(
            operation_id = %self.operation_id,
            kind = %kind,
            local_key = %local_key,
            remote_id = %descriptor.remote_id,
            sequence,
            "Resource recorded"
        );

        let slot = self.resources.entry(kind).or_default();
        slot.insert(
            local_key.clone(),
            RecordedResource {
                kind,
                local_key: local_key.clone(),
                descriptor,
                sequence,
            },
        );
        &slot[&local_key]
    }

    pub fn record_error(&mut self, error: CategorizedError) {
        self.errors.push(error);
    }

    pub fn record_warning(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    pub fn register_call(&mut self, call: PendingCall) {
        self.pending.insert(call.work_key(), call);
    }

    pub fn pending_call(&self, work_key: &str) -> Option<PendingCall> {
        self.pending.get(work_key).cloned()
    }

    pub fn clear_call(&mut self, work_key: &str) -> Option<PendingCall> {
        self.pending.remove(work_key)
    }

    /// Move to a stage adjacent to the current one in the graph
    pub async fn advance_stage(&mut self, next: Stage) -> Result<(), ContextError> {
        if !self.graph.is_adjacent(self.current_stage, next) {
            return Err(ContextError::InvalidTransition {
                from: self.current_stage,
                to: next,
            });
        }

        self.entries.push(StageEntry {
            stage: next,
            watermark: self.next_sequence,
            entered_at: Utc::now(),
        });
        info!(
            operation_id = %self.operation_id,
            from = %self.current_stage,
            to = %next,
            "Stage advanced"
        );
        self.current_stage = next;
        self.checkpoint().await;
        Ok(())
    }

    /// Undo every resource created since `stage` was entered, newest first,
    /// then make `stage` current again.
    ///
    /// A compensation that fails keeps its mapping and is recorded as a
    /// `RollbackFailed` error instead of aborting the rollback.
    pub async fn rollback_to(&mut self, stage: Stage) -> Result<RollbackReport, ContextError> {
        if self.graph.precedes(self.current_stage, stage) {
            return Err(ContextError::NotBehind {
                current: self.current_stage,
                target: stage,
            });
        }
        let position = self
            .entries
            .iter()
            .rposition(|e| e.stage == stage)
            .ok_or(ContextError::StageNotEntered(stage))?;
        let watermark = self.entries[position].watermark;

        let mut doomed: Vec<RecordedResource> = self
            .resources
            .values()
            .flat_map(|m| m.values())
            .filter(|r| r.sequence >= watermark)
            .cloned()
            .collect();
        doomed.sort_by(|a, b| b.sequence.cmp(&a.sequence));

        info!(
            operation_id = %self.operation_id,
            from = %self.current_stage,
            target = %stage,
            resources = doomed.len(),
            "Rolling back"
        );

        let mut report = RollbackReport {
            target: stage,
            compensated: Vec::new(),
            failed: Vec::new(),
        };

        for resource in doomed {
            match self.state.compensate(&self.operation_id, &resource).await {
                Ok(()) => {
                    if let Some(kind_map) = self.resources.get_mut(&resource.kind) {
                        if kind_map
                            .get(&resource.local_key)
                            .is_some_and(|r| r.sequence == resource.sequence)
                        {
                            kind_map.remove(&resource.local_key);
                        }
                    }
                    report.compensated.push(resource);
                }
                Err(failure) => {
                    warn!(
                        operation_id = %self.operation_id,
                        kind = %resource.kind,
                        local_key = %resource.local_key,
                        error = %failure,
                        "Compensation failed, keeping resource mapping"
                    );
                    let error = CategorizedError::new(
                        ErrorCode::RollbackFailed,
                        RecoveryStrategy::ManualIntervention,
                        format!(
                            "failed to compensate {} {}: {}",
                            resource.kind, resource.local_key, failure.message
                        ),
                    )
                    .with_details(ErrorDetails {
                        attempt: 1,
                        stage: Some(self.current_stage),
                        operation_id: Some(self.operation_id.clone()),
                        resource_kind: Some(resource.kind),
                        resource_id: Some(resource.local_key.clone()),
                        status: failure.status,
                        ..Default::default()
                    })
                    .with_cause(Arc::new(failure));
                    self.errors.push(error.clone());
                    report.failed.push((resource, error));
                }
            }
        }

        let abandoned: Vec<Stage> = self.entries[position + 1..]
            .iter()
            .map(|e| e.stage)
            .filter(|s| *s != stage)
            .collect();
        self.entries.truncate(position + 1);
        self.current_stage = stage;
        self.checkpoint().await;

        // later snapshots would resurrect compensated resources on recover
        for abandoned_stage in abandoned {
            if let Err(e) = self.state.discard(&self.operation_id, abandoned_stage).await {
                self.warnings.push(format!(
                    "discarding snapshot of {abandoned_stage} failed: {e}"
                ));
            }
        }

        Ok(report)
    }

    /// Reload the in-memory state persisted at `stage` without any remote
    /// calls. Errors and warnings are kept.
    ///
    /// Refuses with [`ContextError::StaleSnapshot`] when the snapshot is
    /// missing resources this context has recorded, e.g. after a failed
    /// checkpoint; those mappings are only ever dropped by compensation.
    pub async fn restore_state(&mut self, stage: Stage) -> Result<(), ContextError> {
        let snapshot = self
            .state
            .load(&self.operation_id, stage)
            .await?
            .ok_or_else(|| ContextError::SnapshotMissing {
                operation_id: self.operation_id.clone(),
                stage,
            })?;

        let unpersisted = self
            .resources
            .values()
            .flat_map(|m| m.values())
            .filter(|r| r.sequence >= snapshot.next_sequence)
            .count();
        if unpersisted > 0 {
            warn!(
                operation_id = %self.operation_id,
                stage = %stage,
                unpersisted,
                "Snapshot is behind recorded resources, keeping in-memory state"
            );
            return Err(ContextError::StaleSnapshot {
                operation_id: self.operation_id.clone(),
                stage,
                unpersisted,
            });
        }

        let mut resources: HashMap<ResourceKind, HashMap<String, RecordedResource>> =
            HashMap::new();
        for resource in snapshot.resources {
            resources
                .entry(resource.kind)
                .or_default()
                .insert(resource.local_key.clone(), resource);
        }

        self.resources = resources;
        self.entries = snapshot.entries;
        self.next_sequence = snapshot.next_sequence;
        self.current_stage = snapshot.stage;

        debug!(
            operation_id = %self.operation_id,
            stage = %stage,
            resources = self.all_resources().len(),
            "State restored from snapshot"
        );
        Ok(())
    }

    /// Persist the current state as the snapshot of the current stage.
    /// A failed write becomes a warning.
    pub async fn checkpoint(&mut self) {
        let snapshot = self.snapshot();
        if let Err(e) = self.state.save(&snapshot).await {
            warn!(
                operation_id = %self.operation_id,
                stage = %self.current_stage,
                error = %e,
                "Checkpoint failed"
            );
            self.warnings.push(format!(
                "checkpoint at {} failed: {e}",
                self.current_stage
            ));
        }
    }

    pub fn snapshot(&self) -> StageSnapshot {
        StageSnapshot {
            operation_id: self.operation_id.clone(),
            stage: self.current_stage,
            resources: self.all_resources().into_iter().cloned().collect(),
            entries: self.entries.clone(),
            next_sequence: self.next_sequence,
            taken_at: Utc::now(),
        }
    }

    fn current_watermark(&self) -> u64 {
        self.entries
            .iter()
            .rev()
            .find(|e| e.stage == self.current_stage)
            .map(|e| e.watermark)
            .unwrap_or(0)
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("operation_id", &self.operation_id)
            .field("current_stage", &self.current_stage)
            .field("resources", &self.all_resources().len())
            .field("errors", &self.errors.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{campaign_graph, state_manager, RecordingCompensator};
    use bulkflow_store::{InMemoryStore, SnapshotStore};

    async fn at_ad_groups(compensator: Arc<RecordingCompensator>) -> ExecutionContext {
        let (state, _) = state_manager(compensator);
        let mut ctx = ExecutionContext::start("op-1", campaign_graph(), state).await;
        ctx.advance_stage(Stage::CampaignCreation).await.unwrap();
        ctx.record_resource(ResourceKind::Campaign, "c-1", ResourceDescriptor::new("r-c1"));
        ctx.advance_stage(Stage::AdGroupCreation).await.unwrap();
        ctx.record_resource(ResourceKind::AdGroup, "g-1", ResourceDescriptor::new("r-g1"));
        ctx.record_resource(ResourceKind::AdGroup, "g-2", ResourceDescriptor::new("r-g2"));
        ctx
    }

    #[tokio::test]
    async fn test_start_enters_first_stage_and_checkpoints() {
        let (state, store) = state_manager(Arc::new(RecordingCompensator::default()));
        let ctx = ExecutionContext::start("op-1", campaign_graph(), state).await;

        assert_eq!(ctx.current_stage(), Stage::Validation);
        assert_eq!(ctx.last_stable_stage(), None);
        assert_eq!(
            store.list_stages("op-1").await.unwrap(),
            vec![Stage::Validation]
        );
    }

    #[tokio::test]
    async fn test_record_resource_is_idempotent_per_key() {
        let mut ctx = at_ad_groups(Arc::new(RecordingCompensator::default())).await;

        let replaced = ctx
            .record_resource(ResourceKind::AdGroup, "g-1", ResourceDescriptor::new("r-g1b"))
            .clone();

        let groups = ctx.resources(ResourceKind::AdGroup);
        assert_eq!(groups.len(), 2);
        assert_eq!(replaced.sequence, 3);
        assert_eq!(groups.last().unwrap().descriptor.remote_id, "r-g1b");
        assert_eq!(ctx.summary().total_resources(), 3);
    }

    #[tokio::test]
    async fn test_advance_rejects_non_adjacent_stage() {
        let mut ctx = at_ad_groups(Arc::new(RecordingCompensator::default())).await;

        let err = ctx.advance_stage(Stage::Completion).await.unwrap_err();
        assert!(matches!(
            err,
            ContextError::InvalidTransition {
                from: Stage::AdGroupCreation,
                to: Stage::Completion
            }
        ));
        assert_eq!(err.code(), ErrorCode::InvalidTransition);

        let err = ctx.advance_stage(Stage::Validation).await.unwrap_err();
        assert!(matches!(err, ContextError::InvalidTransition { .. }));
        assert_eq!(ctx.current_stage(), Stage::AdGroupCreation);
    }

    #[tokio::test]
    async fn test_stage_bookkeeping() {
        let ctx = at_ad_groups(Arc::new(RecordingCompensator::default())).await;

        assert_eq!(ctx.created_in_current_stage(), 2);
        assert_eq!(ctx.last_stable_stage(), Some(Stage::CampaignCreation));
        assert_eq!(
            ctx.entered_stages(),
            vec![Stage::Validation, Stage::CampaignCreation, Stage::AdGroupCreation]
        );
    }

    #[tokio::test]
    async fn test_rollback_compensates_newest_first() {
        let compensator = Arc::new(RecordingCompensator::default());
        let mut ctx = at_ad_groups(Arc::clone(&compensator)).await;

        let report = ctx.rollback_to(Stage::CampaignCreation).await.unwrap();

        assert!(report.is_clean());
        assert_eq!(compensator.calls(), vec!["g-2", "g-1", "c-1"]);
        assert_eq!(ctx.current_stage(), Stage::CampaignCreation);
        assert!(ctx.all_resources().is_empty());
        assert_eq!(
            ctx.entered_stages(),
            vec![Stage::Validation, Stage::CampaignCreation]
        );
    }

    #[tokio::test]
    async fn test_rollback_to_current_stage_keeps_earlier_resources() {
        let compensator = Arc::new(RecordingCompensator::default());
        let mut ctx = at_ad_groups(Arc::clone(&compensator)).await;

        ctx.rollback_to(Stage::AdGroupCreation).await.unwrap();

        assert_eq!(compensator.calls(), vec!["g-2", "g-1"]);
        assert!(ctx.resource(ResourceKind::Campaign, "c-1").is_some());
        assert_eq!(ctx.created_in_current_stage(), 0);
    }

    #[tokio::test]
    async fn test_failed_compensation_is_recorded_not_raised() {
        let compensator = Arc::new(RecordingCompensator::failing_on(["g-1"]));
        let mut ctx = at_ad_groups(Arc::clone(&compensator)).await;

        let report = ctx.rollback_to(Stage::CampaignCreation).await.unwrap();

        assert_eq!(report.compensated.len(), 2);
        assert_eq!(report.failed.len(), 1);
        let (kept, error) = &report.failed[0];
        assert_eq!(kept.local_key, "g-1");
        assert_eq!(error.code(), ErrorCode::RollbackFailed);
        assert_eq!(error.strategy(), RecoveryStrategy::ManualIntervention);
        assert!(ctx.resource(ResourceKind::AdGroup, "g-1").is_some());
        assert_eq!(ctx.errors().len(), 1);
    }

    #[tokio::test]
    async fn test_rollback_rejects_unentered_or_future_stage() {
        let mut ctx = at_ad_groups(Arc::new(RecordingCompensator::default())).await;

        assert!(matches!(
            ctx.rollback_to(Stage::Completion).await,
            Err(ContextError::NotBehind { .. })
        ));
        assert!(matches!(
            ctx.rollback_to(Stage::Preparation).await,
            Err(ContextError::StageNotEntered(Stage::Preparation))
        ));
    }

    #[tokio::test]
    async fn test_restore_state_reloads_snapshot_without_remote_calls() {
        let compensator = Arc::new(RecordingCompensator::default());
        let mut ctx = at_ad_groups(Arc::clone(&compensator)).await;
        ctx.checkpoint().await;

        ctx.record_warning("kept across restore");
        ctx.restore_state(Stage::CampaignCreation).await.unwrap_err();
        ctx.restore_state(Stage::AdGroupCreation).await.unwrap();

        assert_eq!(ctx.current_stage(), Stage::AdGroupCreation);
        assert_eq!(ctx.resources(ResourceKind::AdGroup).len(), 2);
        assert_eq!(ctx.warnings().len(), 1);
        assert!(compensator.calls().is_empty());

        // sequences continue past the restored watermark
        let next = ctx
            .record_resource(ResourceKind::AdGroup, "g-3", ResourceDescriptor::new("r-g3"))
            .sequence;
        assert_eq!(next, 3);
    }

    #[tokio::test]
    async fn test_restore_keeps_resources_missing_from_snapshot() {
        let (state, store) = state_manager(Arc::new(RecordingCompensator::default()));
        let mut ctx = ExecutionContext::start("op-1", campaign_graph(), state).await;
        ctx.advance_stage(Stage::CampaignCreation).await.unwrap();
        ctx.record_resource(ResourceKind::Campaign, "c-1", ResourceDescriptor::new("r-c1"));

        store.set_unavailable(true);
        ctx.checkpoint().await;
        store.set_unavailable(false);

        let err = ctx
            .restore_state(Stage::CampaignCreation)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ContextError::StaleSnapshot {
                stage: Stage::CampaignCreation,
                unpersisted: 1,
                ..
            }
        ));
        assert_eq!(ctx.warnings().len(), 1);
        assert_eq!(
            ctx.resource(ResourceKind::Campaign, "c-1")
                .map(|r| r.descriptor.remote_id.as_str()),
            Some("r-c1")
        );

        // a replaced mapping is just as unpersisted as a new one
        ctx.checkpoint().await;
        ctx.record_resource(ResourceKind::Campaign, "c-1", ResourceDescriptor::new("r-c1b"));
        assert!(ctx.restore_state(Stage::CampaignCreation).await.is_err());
        assert_eq!(
            ctx.resource(ResourceKind::Campaign, "c-1")
                .map(|r| r.descriptor.remote_id.as_str()),
            Some("r-c1b")
        );
    }

    #[tokio::test]
    async fn test_restore_missing_snapshot() {
        let mut ctx = at_ad_groups(Arc::new(RecordingCompensator::default())).await;

        assert!(matches!(
            ctx.restore_state(Stage::Verification).await,
            Err(ContextError::SnapshotMissing { .. })
        ));
    }

    #[tokio::test]
    async fn test_checkpoint_failure_becomes_warning() {
        let store = Arc::new(InMemoryStore::new());
        let state = Arc::new(StateManager::new(
            store.clone(),
            Arc::new(RecordingCompensator::default()),
        ));
        let mut ctx = ExecutionContext::start("op-1", campaign_graph(), state).await;

        store.set_unavailable(true);
        ctx.advance_stage(Stage::CampaignCreation).await.unwrap();

        assert_eq!(ctx.warnings().len(), 1);
        assert_eq!(ctx.current_stage(), Stage::CampaignCreation);
    }

    #[tokio::test]
    async fn test_recover_from_latest_snapshot() {
        let (state, _) = state_manager(Arc::new(RecordingCompensator::default()));
        {
            let mut ctx =
                ExecutionContext::start("op-1", campaign_graph(), Arc::clone(&state)).await;
            ctx.advance_stage(Stage::CampaignCreation).await.unwrap();
            ctx.record_resource(ResourceKind::Campaign, "c-1", ResourceDescriptor::new("r-c1"));
            ctx.checkpoint().await;
        }

        let ctx = ExecutionContext::recover("op-1", campaign_graph(), state)
            .await
            .unwrap();
        assert_eq!(ctx.current_stage(), Stage::CampaignCreation);
        assert!(ctx.resource(ResourceKind::Campaign, "c-1").is_some());
    }

    #[tokio::test]
    async fn test_rollback_discards_later_snapshots() {
        let (state, store) = state_manager(Arc::new(RecordingCompensator::default()));
        let mut ctx = ExecutionContext::start("op-1", campaign_graph(), Arc::clone(&state)).await;
        ctx.advance_stage(Stage::CampaignCreation).await.unwrap();
        ctx.record_resource(ResourceKind::Campaign, "c-1", ResourceDescriptor::new("r-c1"));
        ctx.advance_stage(Stage::AdGroupCreation).await.unwrap();
        ctx.record_resource(ResourceKind::AdGroup, "g-1", ResourceDescriptor::new("r-g1"));
        ctx.advance_stage(Stage::KeywordCreation).await.unwrap();

        ctx.rollback_to(Stage::CampaignCreation).await.unwrap();

        assert_eq!(
            store.list_stages("op-1").await.unwrap(),
            vec![Stage::Validation, Stage::CampaignCreation]
        );
        assert!(ctx.warnings().is_empty());

        let recovered = ExecutionContext::recover("op-1", campaign_graph(), state)
            .await
            .unwrap();
        assert_eq!(recovered.current_stage(), Stage::CampaignCreation);
        assert!(recovered.all_resources().is_empty());
    }

    #[tokio::test]
    async fn test_pending_calls() {
        let mut ctx = at_ad_groups(Arc::new(RecordingCompensator::default())).await;
        let call = resource_call(|| async { Ok(ResourceDescriptor::new("r-k1")) });

        ctx.register_call(PendingCall::new(ResourceKind::Keyword, "k-1", call));
        let key = work_key(ResourceKind::Keyword, "k-1");

        assert_eq!(key, "keyword:k-1");
        assert!(ctx.pending_call(&key).is_some());
        assert!(ctx.clear_call(&key).is_some());
        assert!(ctx.pending_call(&key).is_none());
    }
}
