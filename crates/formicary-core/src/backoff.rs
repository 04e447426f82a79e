//! Exponential backoff for retry re-queueing.
//!
//! The delay schedule is a pure function of (base, multiplier, cap,
//! attempt), so tests can assert exact values. Jitter is applied
//! separately, on top, to avoid synchronized retry storms against a host.

use std::time::Duration;

/// Backoff parameters. Immutable after construction.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay for the first retry.
    pub base: Duration,

    /// Growth factor per attempt.
    pub multiplier: f64,

    /// Ceiling on the computed delay.
    pub cap: Duration,

    /// Maximum uniform jitter added on top of the computed delay.
    /// `Duration::ZERO` disables it.
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            multiplier: 2.0,
            cap: Duration::from_secs(60),
            jitter: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry attempt `attempt` (1-indexed), pre-jitter:
    /// `min(base * multiplier^(attempt-1), cap)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exp = self.base.as_secs_f64() * self.multiplier.powi(attempt as i32 - 1);
        Duration::from_secs_f64(exp.min(self.cap.as_secs_f64()))
    }

    /// `delay_for_attempt` plus uniform random jitter in `[0, jitter]`.
    pub fn jittered_delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.delay_for_attempt(attempt);
        if self.jitter.is_zero() {
            return delay;
        }
        delay + Duration::from_millis(rand_jitter_ms(self.jitter.as_millis() as u64))
    }
}

// ---------------------------------------------------------------------------
// Deterministic jitter based on std — avoids pulling in the `rand` crate.
// Uses a simple xorshift seeded from the current time.
// ---------------------------------------------------------------------------

pub(crate) fn rand_jitter_ms(max_ms: u64) -> u64 {
    if max_ms == 0 {
        return 0;
    }
    // Seed from high-resolution clock — good enough for jitter, not crypto.
    let mut x = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    // xorshift64
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    x % max_ms
}
