// src/retry.rs
//! Bounded exponential backoff shared by the fetcher, the scorer and webhook delivery.

use std::time::Duration;

/// How many times to try an outbound call and how long to wait in between.
///
/// Attempt `n` (1-based) that failed transiently sleeps `base_delay << (n - 1)`,
/// capped at `max_delay`, before attempt `n + 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            ..Self::default()
        }
    }

    /// No sleeping between attempts. Used by tests and fixture runs.
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO)
    }

    /// Delay after the failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let millis = (self.base_delay.as_millis() as u64).saturating_mul(1u64 << shift);
        Duration::from_millis(millis).min(self.max_delay)
    }

    /// True if another attempt is allowed after `attempt` failed.
    pub fn can_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Sleep for the backoff after `attempt`, honouring a server hint when it is longer.
    pub async fn backoff(&self, attempt: u32, hint: Option<Duration>) {
        let mut delay = self.delay_after(attempt);
        if let Some(h) = hint {
            if !self.base_delay.is_zero() {
                delay = delay.max(h.min(self.max_delay));
            }
        }
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}
