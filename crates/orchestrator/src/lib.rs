//! Stage-aware execution of bulk operations: resource bookkeeping with
//! snapshots and compensation, error classification, recovery routing and
//! the executor that ties them to the request queue.

pub mod classifier;
pub mod context;
pub mod executor;
pub mod recovery;
pub mod state;

#[cfg(test)]
mod testing;

// Re-export main types
pub use classifier::{ClassificationContext, ErrorClassifier};
pub use context::{
    resource_call, work_key, ContextError, ExecutionContext, PendingCall, ResourceCall,
    RollbackReport,
};
pub use executor::{
    BulkExecutor, ExecutorError, FailedItem, OperationPlan, OperationReport, OperationStatus,
    PlannedCall, StagePlan,
};
pub use recovery::{
    HandlerError, Incident, ManualInterventionHandler, NotifyError, OperatorChannel,
    RecoveryError, RecoveryHandler, RecoveryOutcome, RecoveryRouter, RetryHandler,
    RollbackHandler, TracingOperatorChannel,
};
pub use state::{CompensationCall, Compensator, QueuedCompensator, StateManager};
