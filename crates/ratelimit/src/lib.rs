//! Request-flow primitives for bulkflow
//!
//! - `ExponentialBackoff`: exponential retry delays with centered jitter
//! - `SlidingWindowLimiter`: rolling-window request ceiling

pub mod backoff;
pub mod limiter;

pub use backoff::ExponentialBackoff;
pub use limiter::SlidingWindowLimiter;

#[cfg(test)]
mod integration_tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::{sleep, Instant};

    #[tokio::test]
    async fn test_window_with_backoff_wait() {
        let mut limiter = SlidingWindowLimiter::new(2, Duration::from_millis(100));
        let backoff = ExponentialBackoff::new(Duration::from_millis(20), Duration::from_millis(200))
            .with_jitter(0.0);

        assert!(limiter.try_acquire(Instant::now()));
        assert!(limiter.try_acquire(Instant::now()));
        assert!(!limiter.try_acquire(Instant::now()));

        let mut retry = 0;
        loop {
            sleep(backoff.delay_for(retry)).await;
            if limiter.try_acquire(Instant::now()) {
                break;
            }
            retry += 1;
            assert!(retry < 10, "window never drained");
        }

        // 20 + 40 + 80 >= 100, so at most three waits
        assert!(retry <= 2);
    }
}
