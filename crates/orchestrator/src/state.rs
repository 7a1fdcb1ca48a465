use async_trait::async_trait;
use bulkflow_queue::{EnqueueOptions, RequestQueue};
use bulkflow_store::{SnapshotStore, StoreError};
use bulkflow_types::{ApiFailure, RecordedResource, Stage, StageSnapshot};
use futures::future::BoxFuture;
use std::sync::Arc;
use tracing::debug;

/// Undoes one remote resource, e.g. by deleting or disabling it
#[async_trait]
pub trait Compensator: Send + Sync {
    async fn compensate(
        &self,
        operation_id: &str,
        resource: &RecordedResource,
    ) -> Result<(), ApiFailure>;
}

/// Snapshot persistence plus the compensating side of every operation
pub struct StateManager {
    snapshots: Arc<dyn SnapshotStore>,
    compensator: Arc<dyn Compensator>,
}

impl StateManager {
    pub fn new(snapshots: Arc<dyn SnapshotStore>, compensator: Arc<dyn Compensator>) -> Self {
        Self {
            snapshots,
            compensator,
        }
    }

    pub async fn save(&self, snapshot: &StageSnapshot) -> Result<(), StoreError> {
        self.snapshots.save(snapshot).await
    }

    pub async fn load(
        &self,
        operation_id: &str,
        stage: Stage,
    ) -> Result<Option<StageSnapshot>, StoreError> {
        self.snapshots.load(operation_id, stage).await
    }

    /// Stages with a persisted snapshot, in lifecycle order
    pub async fn saved_stages(&self, operation_id: &str) -> Result<Vec<Stage>, StoreError> {
        self.snapshots.list_stages(operation_id).await
    }

    pub async fn discard(&self, operation_id: &str, stage: Stage) -> Result<bool, StoreError> {
        self.snapshots.delete_stage(operation_id, stage).await
    }

    /// Drop an operation's snapshots once it is finished for good
    pub async fn archive(&self, operation_id: &str) -> Result<usize, StoreError> {
        self.snapshots.delete_operation(operation_id).await
    }

    pub async fn compensate(
        &self,
        operation_id: &str,
        resource: &RecordedResource,
    ) -> Result<(), ApiFailure> {
        self.compensator.compensate(operation_id, resource).await
    }
}

/// Remote call that undoes one resource
pub type CompensationCall =
    Arc<dyn Fn(RecordedResource) -> BoxFuture<'static, Result<(), ApiFailure>> + Send + Sync>;

/// Sends compensating calls through the shared request queue as urgent
/// items, so they obey the same rate and concurrency ceilings
pub struct QueuedCompensator {
    queue: RequestQueue,
    call: CompensationCall,
}

impl QueuedCompensator {
    pub fn new<F, Fut>(queue: RequestQueue, call: F) -> Self
    where
        F: Fn(RecordedResource) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<(), ApiFailure>> + Send + 'static,
    {
        Self {
            queue,
            call: Arc::new(
                move |resource: RecordedResource| -> BoxFuture<'static, Result<(), ApiFailure>> {
                    Box::pin(call(resource))
                },
            ),
        }
    }
}

#[async_trait]
impl Compensator for QueuedCompensator {
    async fn compensate(
        &self,
        operation_id: &str,
        resource: &RecordedResource,
    ) -> Result<(), ApiFailure> {
        debug!(
            operation_id = %operation_id,
            kind = %resource.kind,
            local_key = %resource.local_key,
            remote_id = %resource.descriptor.remote_id,
            "Queueing compensating call"
        );

        let call = Arc::clone(&self.call);
        let target = resource.clone();
        let options = EnqueueOptions::urgent()
            .with_operation(operation_id)
            .with_label(format!("compensate {}:{}", resource.kind, resource.local_key));

        self.queue
            .enqueue(move || call(target.clone()), options)
            .await
            .map_err(|e| {
                if let Some(failure) = e.failure() {
                    return failure.clone();
                }
                ApiFailure::new(e.to_string()).with_cause(e)
            })
    }
}
