use rand::Rng;
use std::time::Duration;

/// Exponential backoff with centered jitter.
///
/// The base delay for retry `n` is `min(max, initial * multiplier^n)`; the
/// jittered delay is drawn uniformly from `base * [1 - jitter, 1 + jitter]`
/// and clamped to `max`.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial: Duration,
    max: Duration,
    multiplier: f64,
    jitter: f64,
}

impl ExponentialBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            multiplier: 2.0,
            jitter: 0.2,
        }
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Jitter as a fraction of the base delay, clamped to `[0, 1]`
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Delay before retry number `retry_count`, without jitter
    pub fn base_delay(&self, retry_count: u32) -> Duration {
        let exponent = retry_count.min(i32::MAX as u32) as i32;
        let delay_ms = self.initial.as_millis() as f64 * self.multiplier.powi(exponent);
        let delay_ms = delay_ms.min(self.max.as_millis() as f64);
        Duration::from_millis(delay_ms as u64)
    }

    /// Delay before retry number `retry_count`, with jitter applied
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let base = self.base_delay(retry_count);
        if self.jitter == 0.0 || base.is_zero() {
            return base;
        }

        let factor = rand::thread_rng().gen_range((1.0 - self.jitter)..=(1.0 + self.jitter));
        base.mul_f64(factor).min(self.max)
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(1000), Duration::from_secs(30))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_delay_progression() {
        let backoff =
            ExponentialBackoff::new(Duration::from_millis(100), Duration::from_secs(10));

        assert_eq!(backoff.base_delay(0), Duration::from_millis(100));
        assert_eq!(backoff.base_delay(1), Duration::from_millis(200));
        assert_eq!(backoff.base_delay(2), Duration::from_millis(400));
        assert_eq!(backoff.base_delay(3), Duration::from_millis(800));
    }

    #[test]
    fn test_base_delay_max_cap() {
        let backoff = ExponentialBackoff::new(Duration::from_millis(100), Duration::from_secs(1));

        assert_eq!(backoff.base_delay(4), Duration::from_secs(1));
        assert_eq!(backoff.base_delay(40), Duration::from_secs(1));
    }

    #[test]
    fn test_jittered_delay_stays_in_band() {
        let backoff =
            ExponentialBackoff::new(Duration::from_millis(100), Duration::from_secs(60));

        for retry_count in 0..6 {
            let base = backoff.base_delay(retry_count).as_millis() as f64;
            for _ in 0..200 {
                let delay = backoff.delay_for(retry_count).as_secs_f64() * 1000.0;
                // 1ms slack for float to Duration rounding
                assert!(delay >= base * 0.8 - 1.0, "{delay} below band for {base}");
                assert!(delay <= base * 1.2 + 1.0, "{delay} above band for {base}");
            }
        }
    }

    #[test]
    fn test_jittered_delay_never_exceeds_max() {
        let backoff = ExponentialBackoff::new(Duration::from_millis(500), Duration::from_secs(2));

        for _ in 0..500 {
            assert!(backoff.delay_for(10) <= Duration::from_secs(2));
        }
    }

    #[test]
    fn test_zero_jitter_is_deterministic() {
        let backoff = ExponentialBackoff::new(Duration::from_millis(50), Duration::from_secs(5))
            .with_jitter(0.0)
            .with_multiplier(3.0);

        assert_eq!(backoff.delay_for(0), Duration::from_millis(50));
        assert_eq!(backoff.delay_for(1), Duration::from_millis(150));
        assert_eq!(backoff.delay_for(2), Duration::from_millis(450));
        assert_eq!(backoff.delay_for(2), Duration::from_millis(450));
    }

    #[test]
    fn test_default() {
        let backoff = ExponentialBackoff::default();
        assert_eq!(backoff.base_delay(0), Duration::from_secs(1));
        assert_eq!(backoff.base_delay(20), Duration::from_secs(30));
        let delay = backoff.delay_for(0);
        assert!(delay >= Duration::from_millis(800) && delay <= Duration::from_millis(1200));
    }
}
