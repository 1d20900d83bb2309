//! Fixed exponential backoff schedule for connection attempts

use std::time::Duration;

/// Default delays between attempts, in milliseconds
pub const DEFAULT_DELAYS_MS: [u64; 3] = [500, 1000, 2000];

/// Default number of retries after the initial attempt
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Ordered backoff delays plus the retry bound.
///
/// The delay slept after failed attempt `n` (0-indexed) is `delays[n]`;
/// indices past the end reuse the last delay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrySchedule {
    delays: Vec<Duration>,
    max_retries: u32,
}

impl RetrySchedule {
    /// Create a schedule from explicit delays
    pub fn new(delays: Vec<Duration>, max_retries: u32) -> Self {
        Self { delays, max_retries }
    }

    /// Create a schedule from millisecond delays
    pub fn from_millis(delays_ms: &[u64], max_retries: u32) -> Self {
        Self::new(
            delays_ms.iter().copied().map(Duration::from_millis).collect(),
            max_retries,
        )
    }

    /// Retries allowed after the first attempt
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Total attempts in one cycle: the initial attempt plus every retry
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Delay to sleep after the given failed attempt before starting the next one
    pub fn backoff_after(&self, failed_attempt: u32) -> Duration {
        let Some(last) = self.delays.last() else {
            return Duration::ZERO;
        };
        self.delays
            .get(failed_attempt as usize)
            .copied()
            .unwrap_or(*last)
    }

    /// Configured delays
    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }
}

impl Default for RetrySchedule {
    fn default() -> Self {
        Self::from_millis(&DEFAULT_DELAYS_MS, DEFAULT_MAX_RETRIES)
    }
}
