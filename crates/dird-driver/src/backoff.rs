//! Exponential backoff for reconnection and per-frame retry

use std::time::Duration;

/// Exponential backoff with jitter for reconnection attempts
pub struct ExponentialBackoff {
    /// Current delay
    current: Duration,
    /// Maximum delay
    max: Duration,
    /// Multiplier
    multiplier: f64,
    /// Jitter factor (0.0 to 1.0)
    jitter: f64,
}

impl ExponentialBackoff {
    /// Create a new backoff with custom parameters
    pub fn new(initial: Duration, max: Duration, multiplier: f64, jitter: f64) -> Self {
        Self {
            current: initial,
            max,
            multiplier,
            jitter,
        }
    }

    /// Reconnect schedule: 1s doubling to 60s with 25% jitter
    pub fn reconnect() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(60), 2.0, 0.25)
    }

    /// Get the next delay and advance the backoff
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;

        // Calculate next delay with multiplier
        let next = Duration::from_secs_f64(self.current.as_secs_f64() * self.multiplier);
        self.current = std::cmp::min(next, self.max);

        // Add jitter
        let jitter_amount = delay.as_secs_f64() * self.jitter * rand::random::<f64>();
        delay + Duration::from_secs_f64(jitter_amount)
    }

    /// Reset the backoff to the given initial delay
    pub fn reset(&mut self, initial: Duration) {
        self.current = initial;
    }
}

/// Bounded retry schedule for individual frames.
///
/// A frame that still fails after `max_attempts` is declared undeliverable
/// and surfaces as a NACK at the return manager.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// First retry delay
    pub initial: Duration,
    /// Delay cap
    pub max: Duration,
    /// Attempts before giving up
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry following attempt number `attempt` (0-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.initial.as_secs_f64() * 2f64.powi(attempt as i32);
        Duration::from_secs_f64(exp.min(self.max.as_secs_f64()))
    }
}
