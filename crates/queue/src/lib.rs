//! Request queue for bulk remote calls
//!
//! Dispatches type-erased work units in priority order (urgent before
//! normal, FIFO within a level) while holding three ceilings: concurrent
//! in-flight units, dispatches per rolling minute, and a minimum spacing
//! between dispatches. Retryable failures are re-enqueued after an
//! exponential, jittered backoff.

mod error;
mod item;
mod queue;
mod stats;

pub use error::QueueError;
pub use item::{
    BatchItemCallback, BatchOptions, BatchProgress, BatchProgressCallback, EnqueueOptions, Output, Priority,
    ProgressCallback, ProgressEvent, Unit, UnitFuture, WorkItem,
};
pub use queue::{backoff_for, RequestQueue};
pub use stats::QueueStats;
