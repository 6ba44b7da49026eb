use rand::Rng;
use std::time::Duration;

/// Exponential backoff with a cap, optional jitter and a bounded attempt
/// count. Shared by the producer accept path (local retries against the
/// stores), the queue's redelivery scheduling and client reconnect loops.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: f64,
    pub jitter: bool,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial: Duration, max: Duration) -> Self {
        RetryPolicy {
            max_attempts,
            initial,
            max,
            multiplier: 2.0,
            jitter: true,
        }
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// True while `attempt` failures still leave retries in the budget.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Delay before retry number `attempt` (1-indexed). Attempt 0 is the
    /// initial try and waits nothing.
    pub fn delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_ms = self.initial.as_millis() as f64 * self.multiplier.powi(attempt as i32 - 1);
        let capped = Duration::from_millis(base_ms as u64).min(self.max);

        if self.jitter {
            // Shave up to 25% so a fleet of retriers does not stampede.
            let factor = rand::rng().random_range(0.75..=1.0);
            Duration::from_millis((capped.as_millis() as f64 * factor) as u64)
        } else {
            capped
        }
    }

    /// Delay for the next retry, or `None` once the attempt budget is spent
    /// and the caller should surface a persistent error.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if self.should_retry(attempt) {
            Some(self.delay(attempt))
        } else {
            None
        }
    }
}
