use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;

/// Point-in-time view of the queue
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueStats {
    /// Items waiting for dispatch
    pub queue_length: usize,
    /// Items sleeping before their next attempt
    pub scheduled_retries: usize,
    pub active_requests: usize,
    pub requests_in_last_minute: usize,
    pub total_dispatched: u64,
    pub total_completed: u64,
    pub total_failed: u64,
    pub total_retries: u64,
    /// Retries per dispatched attempt
    pub retry_rate: f64,
    pub estimated_time_to_completion: Duration,
    pub paused: bool,
}

impl QueueStats {
    /// Units that have not reached a terminal outcome
    pub fn outstanding(&self) -> usize {
        self.queue_length + self.scheduled_retries + self.active_requests
    }

    pub fn is_idle(&self) -> bool {
        self.outstanding() == 0
    }
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub dispatched: u64,
    pub completed: u64,
    pub failed: u64,
    pub retries: u64,
    /// First dispatch since the last reset, the throughput baseline
    pub started_at: Option<Instant>,
}

impl Counters {
    pub fn retry_rate(&self) -> f64 {
        if self.dispatched == 0 {
            0.0
        } else {
            self.retries as f64 / self.dispatched as f64
        }
    }

    /// Remaining work divided by observed throughput; before anything has
    /// completed the configured rate ceiling stands in for throughput
    pub fn estimate_remaining(
        &self,
        remaining: usize,
        max_requests_per_minute: u32,
        now: Instant,
    ) -> Duration {
        if remaining == 0 {
            return Duration::ZERO;
        }

        let observed = self.started_at.and_then(|started| {
            let elapsed = now.saturating_duration_since(started).as_secs_f64();
            (self.completed > 0 && elapsed > 0.0).then(|| self.completed as f64 / elapsed)
        });
        let per_second = observed.unwrap_or(max_requests_per_minute.max(1) as f64 / 60.0);

        Duration::from_secs_f64(remaining as f64 / per_second)
    }
}
