use crate::QueueError;
use bulkflow_types::ApiFailure;
use futures::future::BoxFuture;
use std::any::Any;
use std::cmp::{Ordering, Reverse};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Type-erased success value of a unit
pub type Output = Box<dyn Any + Send>;

/// One execution of a unit
pub type UnitFuture = BoxFuture<'static, Result<Output, ApiFailure>>;

/// Retryable work: every call starts a fresh attempt
pub type Unit = Arc<dyn Fn() -> UnitFuture + Send + Sync>;

/// Per-request progress observer
pub type ProgressCallback = Arc<dyn Fn(Uuid, &ProgressEvent) + Send + Sync>;

/// Aggregate progress observer for a batch
pub type BatchProgressCallback = Arc<dyn Fn(BatchProgress) + Send + Sync>;

/// Per-unit observer for a batch; receives the unit's input index
pub type BatchItemCallback = Arc<dyn Fn(usize, Uuid, &ProgressEvent) + Send + Sync>;

pub(crate) type Completion = oneshot::Sender<Result<Output, QueueError>>;

/// Dispatch priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Normal = 1,
    Urgent = 2,
}

/// Lifecycle notifications for a single request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    Queued,
    /// Attempt number, starting at 1
    Started { attempt: u32 },
    /// `attempt` failed and the next one starts after `delay`
    Retrying { attempt: u32, delay: Duration },
    Completed { attempts: u32 },
    Failed { attempts: u32 },
}

/// Completed units out of the batch total; never decreases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchProgress {
    pub completed: usize,
    pub total: usize,
}

impl BatchProgress {
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.completed as f64 / self.total as f64
        }
    }
}

#[derive(Clone, Default)]
pub struct EnqueueOptions {
    pub urgent: bool,
    /// Fail with `QueueError::TimedOut` if the unit has not started by then
    pub timeout: Option<Duration>,
    pub operation_id: Option<String>,
    pub label: Option<String>,
    pub on_progress: Option<ProgressCallback>,
}

impl EnqueueOptions {
    pub fn urgent() -> Self {
        Self {
            urgent: true,
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_operation(mut self, operation_id: impl Into<String>) -> Self {
        self.operation_id = Some(operation_id.into());
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(Uuid, &ProgressEvent) + Send + Sync + 'static,
    {
        self.on_progress = Some(Arc::new(callback));
        self
    }
}

impl fmt::Debug for EnqueueOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnqueueOptions")
            .field("urgent", &self.urgent)
            .field("timeout", &self.timeout)
            .field("operation_id", &self.operation_id)
            .field("label", &self.label)
            .field("on_progress", &self.on_progress.is_some())
            .finish()
    }
}

#[derive(Clone, Default)]
pub struct BatchOptions {
    /// Chunk size; defaults to the queue's concurrency ceiling
    pub concurrency: Option<usize>,
    pub batch_label: Option<String>,
    pub operation_id: Option<String>,
    pub urgent: bool,
    pub on_progress: Option<BatchProgressCallback>,
    pub on_item_progress: Option<BatchItemCallback>,
}

impl BatchOptions {
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = Some(concurrency);
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.batch_label = Some(label.into());
        self
    }

    pub fn with_operation(mut self, operation_id: impl Into<String>) -> Self {
        self.operation_id = Some(operation_id.into());
        self
    }

    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(BatchProgress) + Send + Sync + 'static,
    {
        self.on_progress = Some(Arc::new(callback));
        self
    }

    pub fn with_item_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(usize, Uuid, &ProgressEvent) + Send + Sync + 'static,
    {
        self.on_item_progress = Some(Arc::new(callback));
        self
    }
}

impl fmt::Debug for BatchOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchOptions")
            .field("concurrency", &self.concurrency)
            .field("batch_label", &self.batch_label)
            .field("operation_id", &self.operation_id)
            .field("urgent", &self.urgent)
            .field("on_item_progress", &self.on_item_progress.is_some())
            .finish()
    }
}

/// A unit owned by the queue from enqueue until its terminal outcome
pub struct WorkItem {
    pub(crate) id: Uuid,
    pub(crate) priority: Priority,
    pub(crate) sequence: u64,
    pub(crate) retry_count: u32,
    pub(crate) enqueued_at: Instant,
    pub(crate) operation_id: Option<String>,
    pub(crate) label: Option<String>,
    pub(crate) on_progress: Option<ProgressCallback>,
    pub(crate) unit: Unit,
    pub(crate) completion: Completion,
    /// Cancels the queue-timeout timer once the item is dispatched
    pub(crate) timeout_guard: Option<CancellationToken>,
}

impl WorkItem {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn enqueued_at(&self) -> Instant {
        self.enqueued_at
    }

    pub fn operation_id(&self) -> Option<&str> {
        self.operation_id.as_deref()
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub(crate) fn emit(&self, event: ProgressEvent) {
        if let Some(callback) = &self.on_progress {
            callback(self.id, &event);
        }
    }

    /// Deliver the terminal outcome; the caller may have gone away
    pub(crate) fn finish(self, outcome: Result<Output, QueueError>) {
        let _ = self.completion.send(outcome);
    }

    fn heap_key(&self) -> (Priority, Reverse<u64>) {
        (self.priority, Reverse(self.sequence))
    }
}

impl fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkItem")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("sequence", &self.sequence)
            .field("retry_count", &self.retry_count)
            .field("operation_id", &self.operation_id)
            .field("label", &self.label)
            .finish()
    }
}

impl PartialEq for WorkItem {
    fn eq(&self, other: &Self) -> bool {
        self.heap_key() == other.heap_key()
    }
}

impl Eq for WorkItem {}

impl PartialOrd for WorkItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Max-heap order: higher priority first, then lower sequence (FIFO)
impl Ord for WorkItem {
    fn cmp(&self, other: &Self) -> Ordering {
        self.heap_key().cmp(&other.heap_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::collections::BinaryHeap;

    fn item(priority: Priority, sequence: u64) -> WorkItem {
        let (completion, _rx) = oneshot::channel();
        let unit: Unit = Arc::new(|| async { Ok(Box::new(()) as Output) }.boxed());
        WorkItem {
            id: Uuid::new_v4(),
            priority,
            sequence,
            retry_count: 0,
            enqueued_at: Instant::now(),
            operation_id: None,
            label: Some(format!("{priority:?}-{sequence}")),
            on_progress: None,
            unit,
            completion,
            timeout_guard: None,
        }
    }

    #[test]
    fn test_priority_then_fifo() {
        let mut heap = BinaryHeap::new();
        heap.push(item(Priority::Normal, 1));
        heap.push(item(Priority::Urgent, 4));
        heap.push(item(Priority::Normal, 2));
        heap.push(item(Priority::Urgent, 3));

        let order: Vec<_> = std::iter::from_fn(|| heap.pop())
            .map(|i| (i.priority, i.sequence))
            .collect();

        assert_eq!(
            order,
            vec![
                (Priority::Urgent, 3),
                (Priority::Urgent, 4),
                (Priority::Normal, 1),
                (Priority::Normal, 2),
            ]
        );
    }

    #[test]
    fn test_batch_progress_fraction() {
        assert_eq!(BatchProgress { completed: 0, total: 0 }.fraction(), 1.0);
        assert_eq!(BatchProgress { completed: 1, total: 4 }.fraction(), 0.25);
    }
}
