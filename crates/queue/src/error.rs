use bulkflow_types::{ApiFailure, ErrorCode};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Terminal outcome of a queued unit that did not succeed
#[derive(Debug, Clone, Error)]
pub enum QueueError {
    #[error("request {id} failed with non-retryable {code}")]
    NonRetryable {
        id: Uuid,
        code: ErrorCode,
        attempts: u32,
        #[source]
        failure: ApiFailure,
    },

    #[error("request {id} failed after {attempts} attempts ({code})")]
    RetriesExhausted {
        id: Uuid,
        code: ErrorCode,
        attempts: u32,
        #[source]
        failure: ApiFailure,
    },

    #[error("request {id} timed out after {timeout:?} without starting")]
    TimedOut { id: Uuid, timeout: Duration },

    #[error("request {id} cancelled after {attempts} attempts")]
    Cancelled { id: Uuid, attempts: u32 },

    #[error("queue is shut down")]
    Closed,

    #[error("invalid queue configuration: {0}")]
    InvalidConfig(String),

    #[error("request {id} produced an output of an unexpected type")]
    OutputType { id: Uuid },

    #[error("completion channel for request {id} was dropped")]
    Dropped { id: Uuid },
}

impl QueueError {
    /// Executions performed before the unit reached this outcome
    pub fn attempts(&self) -> u32 {
        match self {
            QueueError::NonRetryable { attempts, .. }
            | QueueError::RetriesExhausted { attempts, .. }
            | QueueError::Cancelled { attempts, .. } => *attempts,
            _ => 0,
        }
    }

    /// The last remote failure, if the unit ever ran
    pub fn failure(&self) -> Option<&ApiFailure> {
        match self {
            QueueError::NonRetryable { failure, .. }
            | QueueError::RetriesExhausted { failure, .. } => Some(failure),
            _ => None,
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            QueueError::NonRetryable { code, .. } | QueueError::RetriesExhausted { code, .. } => {
                *code
            }
            QueueError::TimedOut { .. } => ErrorCode::QueueTimeout,
            QueueError::Cancelled { .. } | QueueError::Closed => ErrorCode::Cancelled,
            QueueError::InvalidConfig(_) => ErrorCode::Configuration,
            QueueError::OutputType { .. } | QueueError::Dropped { .. } => ErrorCode::Unknown,
        }
    }

    pub fn request_id(&self) -> Option<Uuid> {
        match self {
            QueueError::NonRetryable { id, .. }
            | QueueError::RetriesExhausted { id, .. }
            | QueueError::TimedOut { id, .. }
            | QueueError::Cancelled { id, .. }
            | QueueError::OutputType { id }
            | QueueError::Dropped { id } => Some(*id),
            QueueError::Closed | QueueError::InvalidConfig(_) => None,
        }
    }
}
