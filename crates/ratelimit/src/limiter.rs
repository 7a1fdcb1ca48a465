use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Rolling-window request counter.
///
/// Keeps the dispatch timestamps of the last `window` and admits a new
/// request only while fewer than `max_requests` fall inside it. Expired
/// timestamps are dropped lazily on every check and eagerly by `purge`.
#[derive(Debug, Clone)]
pub struct SlidingWindowLimiter {
    max_requests: u32,
    window: Duration,
    history: VecDeque<Instant>,
}

impl SlidingWindowLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            history: VecDeque::new(),
        }
    }

    pub fn per_minute(max_requests: u32) -> Self {
        Self::new(max_requests, Duration::from_secs(60))
    }

    pub fn set_max_requests(&mut self, max_requests: u32) {
        self.max_requests = max_requests;
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Drop timestamps older than the window, returns how many were removed
    pub fn purge(&mut self, now: Instant) -> usize {
        let before = self.history.len();
        while let Some(oldest) = self.history.front() {
            if now.saturating_duration_since(*oldest) >= self.window {
                self.history.pop_front();
            } else {
                break;
            }
        }
        before - self.history.len()
    }

    /// Requests dispatched inside the window ending at `now`
    pub fn count(&mut self, now: Instant) -> usize {
        self.purge(now);
        self.history.len()
    }

    pub fn has_capacity(&mut self, now: Instant) -> bool {
        self.count(now) < self.max_requests as usize
    }

    /// Record a dispatch if the window has room
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        if self.has_capacity(now) {
            self.history.push_back(now);
            true
        } else {
            false
        }
    }

    /// How long until the oldest timestamp leaves the window; zero when there
    /// is capacity already
    pub fn time_until_available(&mut self, now: Instant) -> Duration {
        if self.has_capacity(now) {
            return Duration::ZERO;
        }
        if self.max_requests == 0 {
            return self.window;
        }
        let excess = self.history.len() + 1 - self.max_requests as usize;
        self.history
            .get(excess - 1)
            .map(|ts| (*ts + self.window).saturating_duration_since(now))
            .unwrap_or(self.window)
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }
}
