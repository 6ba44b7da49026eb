use std::time::Duration;

use courier_core::retry::RetryPolicy;

/// Outcome of a failed connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconnect {
    /// Try again after this delay.
    After(Duration),
    /// Attempt budget spent; surface a persistent-error state to the UI.
    GiveUp,
}

/// Client-side reconnection schedule: exponential backoff with a cap and
/// jitter, bounded attempts. A successful connect resets the schedule.
#[derive(Debug)]
pub struct ReconnectPolicy {
    retry: RetryPolicy,
    attempt: u32,
}

impl ReconnectPolicy {
    pub fn new(max_attempts: u32) -> Self {
        ReconnectPolicy {
            retry: RetryPolicy::new(
                max_attempts,
                Duration::from_millis(500),
                Duration::from_secs(30),
            ),
            attempt: 0,
        }
    }

    /// Advances the schedule after a failed attempt.
    pub fn next(&mut self) -> Reconnect {
        self.attempt += 1;
        match self.retry.next_delay(self.attempt) {
            Some(delay) => Reconnect::After(delay),
            None => Reconnect::GiveUp,
        }
    }

    /// Call on a successful connection.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempt
    }
}
