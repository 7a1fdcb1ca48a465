use crate::item::{
    BatchOptions, BatchProgress, Completion, EnqueueOptions, Output, Priority, ProgressCallback,
    ProgressEvent, Unit, WorkItem,
};
use crate::stats::{Counters, QueueStats};
use crate::QueueError;
use bulkflow_config::{validate_queue_config, QueueConfig, QueueConfigPatch};
use bulkflow_ratelimit::{ExponentialBackoff, SlidingWindowLimiter};
use bulkflow_types::{ApiFailure, ErrorCode};
use futures::future::join_all;
use futures::FutureExt;
use std::collections::BinaryHeap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{oneshot, Mutex, Notify};
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// Concurrency-bounded, rate-limited work queue with retry.
///
/// Cloning is cheap; every clone drives the same queue. The dispatcher and
/// the rate-window sweeper are spawned on the first enqueue and stop on
/// `shutdown` or once every handle is dropped.
#[derive(Clone)]
pub struct RequestQueue {
    inner: Arc<Inner>,
}

struct Inner {
    state: Mutex<QueueState>,
    wake: Notify,
    shutdown: CancellationToken,
}

struct QueueState {
    config: QueueConfig,
    backoff: ExponentialBackoff,
    window: SlidingWindowLimiter,
    pending: BinaryHeap<WorkItem>,
    active: usize,
    scheduled_retries: usize,
    paused: bool,
    closed: bool,
    started: bool,
    last_dispatch: Option<Instant>,
    next_sequence: u64,
    counters: Counters,
    /// Cancelled by `clear_queue` to abort every pending retry wait
    retry_token: CancellationToken,
}

enum Dispatch {
    Ready(WorkItem),
    Wait(Option<Duration>),
}

enum AttemptOutcome {
    Retry {
        delay: Duration,
        token: CancellationToken,
    },
    Fail(QueueError),
}

/// Backoff schedule described by a queue configuration
pub fn backoff_for(config: &QueueConfig) -> ExponentialBackoff {
    ExponentialBackoff::new(config.initial_retry_delay(), config.max_retry_delay())
        .with_multiplier(config.backoff_factor)
        .with_jitter(config.jitter)
}

impl QueueState {
    fn new(config: QueueConfig, shutdown: &CancellationToken) -> Self {
        Self {
            backoff: backoff_for(&config),
            window: SlidingWindowLimiter::per_minute(config.max_requests_per_minute),
            config,
            pending: BinaryHeap::new(),
            active: 0,
            scheduled_retries: 0,
            paused: false,
            closed: false,
            started: false,
            last_dispatch: None,
            next_sequence: 0,
            counters: Counters::default(),
            retry_token: shutdown.child_token(),
        }
    }

    fn take_sequence(&mut self) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        sequence
    }

    /// Pop the next item if every admission ceiling allows it, otherwise say
    /// how long to wait (`None` means until woken)
    fn next_dispatch(&mut self, now: Instant) -> Dispatch {
        if self.paused || self.pending.is_empty() {
            return Dispatch::Wait(None);
        }

        if self.active >= self.config.max_concurrent_requests.max(1) {
            return Dispatch::Wait(None);
        }

        let rate_wait = self.window.time_until_available(now);
        if !rate_wait.is_zero() {
            return Dispatch::Wait(Some(rate_wait));
        }

        if let Some(last) = self.last_dispatch {
            let since = now.saturating_duration_since(last);
            let minimum = self.config.minimum_delay();
            if since < minimum {
                return Dispatch::Wait(Some(minimum - since));
            }
        }

        let Some(mut item) = self.pending.pop() else {
            return Dispatch::Wait(None);
        };

        if let Some(guard) = item.timeout_guard.take() {
            guard.cancel();
        }
        self.window.try_acquire(now);
        self.last_dispatch = Some(now);
        self.active += 1;
        self.counters.dispatched += 1;
        self.counters.started_at.get_or_insert(now);

        Dispatch::Ready(item)
    }

    fn remove_pending(&mut self, id: Uuid) -> Option<WorkItem> {
        let (mut hit, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_vec()
            .into_iter()
            .partition(|item| item.id == id);
        self.pending = BinaryHeap::from(rest);
        hit.pop()
    }

    fn drain_pending(&mut self) -> Vec<WorkItem> {
        std::mem::take(&mut self.pending).into_vec()
    }

    fn stats(&mut self, now: Instant) -> QueueStats {
        let queue_length = self.pending.len();
        let remaining = queue_length + self.scheduled_retries + self.active;

        QueueStats {
            queue_length,
            scheduled_retries: self.scheduled_retries,
            active_requests: self.active,
            requests_in_last_minute: self.window.count(now),
            total_dispatched: self.counters.dispatched,
            total_completed: self.counters.completed,
            total_failed: self.counters.failed,
            total_retries: self.counters.retries,
            retry_rate: self.counters.retry_rate(),
            estimated_time_to_completion: self.counters.estimate_remaining(
                remaining,
                self.config.max_requests_per_minute,
                now,
            ),
            paused: self.paused,
        }
    }
}

impl RequestQueue {
    pub fn new(config: QueueConfig) -> Self {
        let shutdown = CancellationToken::new();
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(QueueState::new(config, &shutdown)),
                wake: Notify::new(),
                shutdown,
            }),
        }
    }

    /// Validate the configuration before building the queue
    pub fn try_new(config: QueueConfig) -> Result<Self, QueueError> {
        check_config(&config)?;
        Ok(Self::new(config))
    }

    /// Run `unit` under the queue's ceilings, retrying retryable failures.
    ///
    /// The unit executes at most `retry_limit + 1` times. Each call of `unit`
    /// must start a fresh attempt.
    pub async fn enqueue<F, Fut, T>(&self, unit: F, options: EnqueueOptions) -> Result<T, QueueError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, ApiFailure>> + Send + 'static,
        T: Send + 'static,
    {
        let (completion, outcome) = oneshot::channel();
        let id = self.submit(erase(unit), options, completion).await?;

        match outcome.await {
            Ok(Ok(output)) => output
                .downcast::<T>()
                .map(|value| *value)
                .map_err(|_| QueueError::OutputType { id }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(QueueError::Dropped { id }),
        }
    }

    /// Enqueue `units` in chunks of `concurrency`, returning results in
    /// input order. A failure never aborts sibling units.
    pub async fn batch_enqueue<F, Fut, T>(
        &self,
        units: Vec<F>,
        options: BatchOptions,
    ) -> Vec<Result<T, QueueError>>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, ApiFailure>> + Send + 'static,
        T: Send + 'static,
    {
        let total = units.len();
        let chunk_size = match options.concurrency {
            Some(concurrency) => concurrency.max(1),
            None => self.config().await.max_concurrent_requests.max(1),
        };
        let label = options.batch_label.as_deref().unwrap_or("batch");

        info!(batch = %label, total, chunk_size, "Starting batch");

        let completed = AtomicUsize::new(0);
        let mut results = Vec::with_capacity(total);
        let mut units = units.into_iter().enumerate().peekable();

        while units.peek().is_some() {
            let chunk: Vec<_> = units.by_ref().take(chunk_size).collect();
            let attempts = chunk.into_iter().map(|(index, unit)| {
                let item_options = EnqueueOptions {
                    urgent: options.urgent,
                    timeout: None,
                    operation_id: options.operation_id.clone(),
                    label: Some(format!("{label}#{index}")),
                    on_progress: options.on_item_progress.clone().map(|callback| {
                        Arc::new(move |id: Uuid, event: &ProgressEvent| callback(index, id, event))
                            as ProgressCallback
                    }),
                };
                let completed = &completed;
                let on_progress = options.on_progress.as_ref();

                async move {
                    let result = self.enqueue(unit, item_options).await;
                    // join_all polls on this task, so counts arrive in order
                    let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                    if let Some(callback) = on_progress {
                        callback(BatchProgress {
                            completed: done,
                            total,
                        });
                    }
                    result
                }
            });
            results.extend(join_all(attempts).await);
        }

        let failed = results.iter().filter(|r| r.is_err()).count();
        info!(batch = %label, total, failed, "Batch finished");
        results
    }

    async fn submit(
        &self,
        unit: Unit,
        options: EnqueueOptions,
        completion: Completion,
    ) -> Result<Uuid, QueueError> {
        let id = Uuid::new_v4();
        let timeout_guard = options
            .timeout
            .map(|_| self.inner.shutdown.child_token());

        {
            let mut state = self.inner.state.lock().await;
            if state.closed {
                return Err(QueueError::Closed);
            }

            let item = WorkItem {
                id,
                priority: if options.urgent {
                    Priority::Urgent
                } else {
                    Priority::Normal
                },
                sequence: state.take_sequence(),
                retry_count: 0,
                enqueued_at: Instant::now(),
                operation_id: options.operation_id,
                label: options.label,
                on_progress: options.on_progress,
                unit,
                completion,
                timeout_guard: timeout_guard.clone(),
            };

            trace!(
                request_id = %id,
                priority = ?item.priority,
                sequence = item.sequence,
                label = ?item.label,
                "Request queued"
            );
            item.emit(ProgressEvent::Queued);
            state.pending.push(item);

            if !state.started {
                state.started = true;
                self.spawn_workers(state.config.sweep_interval());
            }
        }

        self.inner.wake.notify_one();

        if let (Some(timeout), Some(guard)) = (options.timeout, timeout_guard) {
            tokio::spawn(expire_after(
                Arc::downgrade(&self.inner),
                id,
                timeout,
                guard,
            ));
        }

        Ok(id)
    }

    fn spawn_workers(&self, sweep_interval: Duration) {
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(dispatch_loop(weak.clone(), self.inner.shutdown.clone()));
        tokio::spawn(sweep_loop(weak, self.inner.shutdown.clone(), sweep_interval));
    }

    pub async fn stats(&self) -> QueueStats {
        self.inner.state.lock().await.stats(Instant::now())
    }

    /// Stop dispatching; in-flight units keep running
    pub async fn pause(&self) {
        self.inner.state.lock().await.paused = true;
        info!("Queue paused");
    }

    pub async fn resume(&self) {
        self.inner.state.lock().await.paused = false;
        self.inner.wake.notify_one();
        info!("Queue resumed");
    }

    pub async fn is_paused(&self) -> bool {
        self.inner.state.lock().await.paused
    }

    /// Fail every pending item with `QueueError::Cancelled` and abort every
    /// retry wait; returns how many pending items were dropped
    pub async fn clear_queue(&self) -> usize {
        let drained = {
            let mut state = self.inner.state.lock().await;
            state.retry_token.cancel();
            state.retry_token = self.inner.shutdown.child_token();
            state.drain_pending()
        };

        let count = drained.len();
        for item in drained {
            if let Some(guard) = &item.timeout_guard {
                guard.cancel();
            }
            let attempts = item.retry_count;
            item.emit(ProgressEvent::Failed { attempts });
            let id = item.id;
            item.finish(Err(QueueError::Cancelled { id, attempts }));
        }

        info!(cleared = count, "Queue cleared");
        count
    }

    pub async fn reset_stats(&self) {
        self.inner.state.lock().await.counters = Counters::default();
        debug!("Queue statistics reset");
    }

    pub async fn config(&self) -> QueueConfig {
        self.inner.state.lock().await.config.clone()
    }

    /// Apply a partial configuration to the running queue
    pub async fn update_config(&self, patch: QueueConfigPatch) -> Result<(), QueueError> {
        {
            let mut state = self.inner.state.lock().await;
            let mut next = state.config.clone();
            patch.apply(&mut next);
            check_config(&next)?;

            state.backoff = backoff_for(&next);
            state.window.set_max_requests(next.max_requests_per_minute);
            info!(
                max_concurrent_requests = next.max_concurrent_requests,
                max_requests_per_minute = next.max_requests_per_minute,
                retry_limit = next.retry_limit,
                "Queue configuration updated"
            );
            state.config = next;
        }

        self.inner.wake.notify_one();
        Ok(())
    }

    /// Refuse new work, fail pending items with `QueueError::Closed` and stop
    /// the background tasks. In-flight attempts run to completion.
    pub async fn shutdown(&self) {
        let drained = {
            let mut state = self.inner.state.lock().await;
            if state.closed {
                return;
            }
            state.closed = true;
            state.drain_pending()
        };

        self.inner.shutdown.cancel();
        let count = drained.len();
        for item in drained {
            let attempts = item.retry_count;
            item.emit(ProgressEvent::Failed { attempts });
            item.finish(Err(QueueError::Closed));
        }

        info!(dropped = count, "Queue shut down");
    }

    pub async fn is_closed(&self) -> bool {
        self.inner.state.lock().await.closed
    }
}

impl std::fmt::Debug for RequestQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestQueue").finish_non_exhaustive()
    }
}

fn check_config(config: &QueueConfig) -> Result<(), QueueError> {
    let errors = validate_queue_config(config);
    if errors.is_empty() {
        return Ok(());
    }

    Err(QueueError::InvalidConfig(
        errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; "),
    ))
}

fn erase<F, Fut, T>(unit: F) -> Unit
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, ApiFailure>> + Send + 'static,
    T: Send + 'static,
{
    Arc::new(move || {
        let attempt = unit();
        async move { attempt.await.map(|value| Box::new(value) as Output) }.boxed()
    })
}

async fn dispatch_loop(inner: Weak<Inner>, shutdown: CancellationToken) {
    loop {
        let Some(inner) = inner.upgrade() else {
            break;
        };

        let next = {
            let mut state = inner.state.lock().await;
            let poll = state.config.poll_interval();
            match state.next_dispatch(Instant::now()) {
                Dispatch::Ready(item) => Ok(item),
                Dispatch::Wait(wait) => Err(wait.map_or(poll, |w| w.min(poll))),
            }
        };

        match next {
            Ok(item) => {
                tokio::spawn(run_attempt(Arc::clone(&inner), item));
            }
            Err(wait) => {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = inner.wake.notified() => {}
                    _ = sleep(wait) => {}
                }
            }
        }
    }

    debug!("Queue dispatcher stopped");
}

async fn sweep_loop(inner: Weak<Inner>, shutdown: CancellationToken, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    // the first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let Some(inner) = inner.upgrade() else {
            break;
        };
        let purged = inner.state.lock().await.window.purge(Instant::now());
        trace!(purged, "Rate window swept");
    }
}

async fn expire_after(
    inner: Weak<Inner>,
    id: Uuid,
    timeout: Duration,
    guard: CancellationToken,
) {
    tokio::select! {
        _ = guard.cancelled() => return,
        _ = sleep(timeout) => {}
    }

    let Some(inner) = inner.upgrade() else {
        return;
    };

    let expired = {
        let mut state = inner.state.lock().await;
        let removed = state.remove_pending(id);
        if removed.is_some() {
            state.counters.failed += 1;
        }
        removed
    };

    if let Some(item) = expired {
        warn!(
            request_id = %id,
            label = ?item.label,
            timeout_ms = timeout.as_millis() as u64,
            "Request timed out before dispatch"
        );
        item.emit(ProgressEvent::Failed { attempts: 0 });
        item.finish(Err(QueueError::TimedOut { id, timeout }));
    }
}

/// Execute one attempt, then complete, fail, or schedule the retry
async fn run_attempt(inner: Arc<Inner>, mut item: WorkItem) {
    let attempt = item.retry_count + 1;
    item.emit(ProgressEvent::Started { attempt });
    debug!(
        request_id = %item.id,
        operation_id = ?item.operation_id,
        label = ?item.label,
        attempt,
        "Dispatching request"
    );

    let result = match AssertUnwindSafe((item.unit)()).catch_unwind().await {
        Ok(result) => result,
        Err(_) => Err(ApiFailure::new("work unit panicked")),
    };

    let failure = match result {
        Ok(output) => {
            {
                let mut state = inner.state.lock().await;
                state.active -= 1;
                state.counters.completed += 1;
            }
            inner.wake.notify_one();

            debug!(request_id = %item.id, attempts = attempt, "Request completed");
            item.emit(ProgressEvent::Completed { attempts: attempt });
            item.finish(Ok(output));
            return;
        }
        Err(failure) => failure,
    };

    let code = ErrorCode::from_failure(&failure);
    let outcome = {
        let mut state = inner.state.lock().await;
        state.active -= 1;

        if state.closed {
            state.counters.failed += 1;
            AttemptOutcome::Fail(QueueError::Closed)
        } else if code.is_retryable() && item.retry_count < state.config.retry_limit {
            state.counters.retries += 1;
            state.scheduled_retries += 1;
            AttemptOutcome::Retry {
                delay: state.backoff.delay_for(item.retry_count),
                token: state.retry_token.clone(),
            }
        } else {
            state.counters.failed += 1;
            let id = item.id;
            AttemptOutcome::Fail(if code.is_retryable() {
                QueueError::RetriesExhausted {
                    id,
                    code,
                    attempts: attempt,
                    failure,
                }
            } else {
                QueueError::NonRetryable {
                    id,
                    code,
                    attempts: attempt,
                    failure,
                }
            })
        }
    };
    inner.wake.notify_one();

    let (delay, token) = match outcome {
        AttemptOutcome::Fail(error) => {
            warn!(
                request_id = %item.id,
                operation_id = ?item.operation_id,
                code = %error.code(),
                attempts = attempt,
                error = %error,
                "Request failed"
            );
            item.emit(ProgressEvent::Failed { attempts: attempt });
            item.finish(Err(error));
            return;
        }
        AttemptOutcome::Retry { delay, token } => (delay, token),
    };

    item.retry_count += 1;
    item.emit(ProgressEvent::Retrying { attempt, delay });
    info!(
        request_id = %item.id,
        operation_id = ?item.operation_id,
        code = %code,
        attempt,
        delay_ms = delay.as_millis() as u64,
        "Retrying request after backoff"
    );

    let interrupted = tokio::select! {
        _ = token.cancelled() => true,
        _ = sleep(delay) => false,
    };

    let mut state = inner.state.lock().await;
    state.scheduled_retries -= 1;

    if interrupted || token.is_cancelled() || state.closed {
        let closed = state.closed;
        drop(state);

        let id = item.id;
        debug!(request_id = %id, closed, "Retry wait cancelled");
        item.emit(ProgressEvent::Failed { attempts: attempt });
        item.finish(Err(if closed {
            QueueError::Closed
        } else {
            QueueError::Cancelled {
                id,
                attempts: attempt,
            }
        }));
        return;
    }

    // a retried item re-enters behind everything already waiting at its priority
    item.sequence = state.take_sequence();
    state.pending.push(item);
    drop(state);
    inner.wake.notify_one();
}
