//! Exponential backoff policy

use std::time::Duration;

/// Retry settings shared by every request of one client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per request, including the first one
    pub max_retries: u32,
    /// Base delay; attempt `n` waits `retry_delay * 2^n`
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, retry_delay: Duration) -> Self {
        Self {
            max_retries,
            retry_delay,
        }
    }

    /// Delay to wait after the failed attempt `attempt` (0-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.retry_delay
            .saturating_mul(2u32.saturating_pow(attempt))
    }

    /// Attempts actually made; a zero setting still sends one request
    pub fn attempts(&self) -> u32 {
        self.max_retries.max(1)
    }

    /// Whether a response status should be retried
    pub fn is_retryable_status(status: u16) -> bool {
        status >= 500
    }
}
