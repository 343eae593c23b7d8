use std::time::Duration;

/// Capped geometric backoff for lock contention on the store file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: usize,
    pub base_delay: Duration,
}

pub trait BackoffPolicy {
    /// Delay to wait after the failed attempt number `attempt` (0-based).
    fn delay_for_attempt(&self, attempt: usize) -> Duration;

    fn total_attempts(&self) -> usize;
}

impl RetryPolicy {
    pub fn new(max_retries: usize, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Sum of every delay in the schedule: the longest an acquire can block.
    pub fn budget(&self) -> Duration {
        (0..self.max_retries)
            .map(|attempt| self.delay_for_attempt(attempt))
            .sum()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
        }
    }
}

impl BackoffPolicy for RetryPolicy {
    fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt as u32).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    fn total_attempts(&self) -> usize {
        self.max_retries + 1
    }
}
