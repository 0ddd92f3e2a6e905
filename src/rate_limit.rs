//! Conversation turn rate limiting
//!
//! A token bucket shared by every turn of a process:
//!
//! ```text
//! ┌─────────────┐
//! │   Bucket    │ ← holds up to `capacity` tokens
//! │  ● ● ● ●    │ ← refills continuously at `refill_rate` per second
//! └─────────────┘
//!        │
//!        ▼
//!  turn arrives: token available → consume it and proceed
//!                bucket empty    → RateLimited { retry_after }
//! ```
//!
//! [`RateLimiter::per_minute`] sizes the bucket so a full minute's quota
//! may be spent in one burst.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use thiserror::Error;

/// Tokens are stored multiplied by this to keep fractional refills
const SCALE: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Error)]
#[error("rate limited, retry after {:.1}s", .retry_after.as_secs_f64())]
pub struct RateLimited {
    pub retry_after: Duration,
}

/// Thread-safe token bucket
#[derive(Debug)]
pub struct RateLimiter {
    capacity: u64,
    /// Tokens added per second
    refill_rate: f64,
    tokens_scaled: AtomicU64,
    last_refill: Mutex<Instant>,
}

impl RateLimiter {
    /// Create a full bucket
    ///
    /// # Arguments
    /// * `capacity` - burst size
    /// * `refill_rate` - tokens added per second
    pub fn new(capacity: u64, refill_rate: f64) -> Self {
        Self {
            capacity,
            refill_rate,
            tokens_scaled: AtomicU64::new(capacity.saturating_mul(SCALE)),
            last_refill: Mutex::new(Instant::now()),
        }
    }

    /// `requests_per_minute` burst, refilled evenly over a minute
    pub fn per_minute(requests_per_minute: u32) -> Self {
        Self::new(u64::from(requests_per_minute), f64::from(requests_per_minute) / 60.0)
    }

    /// Consume one token if available
    pub fn try_acquire(&self) -> bool {
        self.refill();

        loop {
            let current = self.tokens_scaled.load(Ordering::Relaxed);
            if current < SCALE {
                return false;
            }
            if self
                .tokens_scaled
                .compare_exchange(current, current - SCALE, Ordering::SeqCst, Ordering::Relaxed)
                .is_ok()
            {
                return true;
            }
        }
    }

    /// Consume one token, or report how long until one is available
    pub fn check(&self) -> Result<(), RateLimited> {
        if self.try_acquire() {
            return Ok(());
        }
        let missing = SCALE.saturating_sub(self.tokens_scaled.load(Ordering::Relaxed));
        let retry_after = if self.refill_rate > 0.0 {
            Duration::from_secs_f64(missing as f64 / SCALE as f64 / self.refill_rate)
        } else {
            Duration::from_secs(60)
        };
        Err(RateLimited { retry_after })
    }

    fn refill(&self) {
        let now = Instant::now();
        let mut last = self
            .last_refill
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let elapsed = now.duration_since(*last);

        let tokens_to_add = (elapsed.as_secs_f64() * self.refill_rate * SCALE as f64) as u64;
        if tokens_to_add == 0 {
            return;
        }
        *last = now;

        let max_scaled = self.capacity.saturating_mul(SCALE);
        loop {
            let current = self.tokens_scaled.load(Ordering::Relaxed);
            let new = current.saturating_add(tokens_to_add).min(max_scaled);
            if self
                .tokens_scaled
                .compare_exchange(current, new, Ordering::SeqCst, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
        }
    }

    /// Whole tokens currently available
    pub fn available_tokens(&self) -> u64 {
        self.tokens_scaled.load(Ordering::Relaxed) / SCALE
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }
}
