//! Bounded exponential backoff for calls to rate-limited services.
//!
//! The policy is a plain value: the embedder and every remote backend carry
//! their own copy and run blocking calls through [`RetryPolicy::run`].

use std::thread::sleep;
use std::time::Duration;

use rand::Rng;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 4;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(8);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first call included. Always at least 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Adds up to `base_delay` of random delay to each backoff.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            jitter: true,
        }
    }
}

/// The last error seen by [`RetryPolicy::run`] and how many attempts were made.
#[derive(Debug)]
pub struct Attempted<E> {
    pub error: E,
    pub attempts: u32,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: DEFAULT_MAX_DELAY.max(base_delay),
            jitter: true,
        }
    }

    /// Single attempt, no waiting.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: false,
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before retry number `retry` (1-based), jitter excluded.
    /// Doubles from `base_delay` and saturates at `max_delay`.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    /// Runs `op` until it succeeds, fails with a non-transient error, or the
    /// attempt budget is spent. Blocks the calling thread while backing off.
    pub fn run<T, E: std::fmt::Display>(
        &self,
        what: &str,
        mut op: impl FnMut() -> Result<T, E>,
        is_transient: impl Fn(&E) -> bool,
    ) -> Result<T, Attempted<E>> {
        let max_attempts = self.max_attempts.max(1);
        let mut attempts = 0;
        loop {
            attempts += 1;
            match op() {
                Ok(value) => return Ok(value),
                Err(error) if attempts < max_attempts && is_transient(&error) => {
                    let delay = self.delay_for_retry(attempts) + self.jitter_delay();
                    tracing::warn!(
                        "{what} failed (attempt {attempts}/{max_attempts}): {error}; retrying in {delay:?}"
                    );
                    sleep(delay);
                }
                Err(error) => return Err(Attempted { error, attempts }),
            }
        }
    }

    fn jitter_delay(&self) -> Duration {
        if !self.jitter || self.base_delay.is_zero() {
            return Duration::ZERO;
        }
        let base_ms = self.base_delay.as_millis() as u64;
        Duration::from_millis(rand::rng().random_range(0..=base_ms))
    }
}
