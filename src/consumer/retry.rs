use std::time::Duration;

pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Largest exponent applied to the backoff unit
const MAX_BACKOFF_EXPONENT: u32 = 16;

/// What to do with a message that failed processing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
    /// Wait `delay`, then republish with `retry_count` as the new count
    Retry { retry_count: u32, delay: Duration },
    /// Retries exhausted; quarantine
    DeadLetter { retry_count: u32 },
}

/// Bounded retry with exponential backoff
///
/// The retry count is read from each delivery's headers, so the policy itself
/// holds no per-message state.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_retries: u32,
    backoff_unit: Duration,
    jitter: bool,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff_unit: Duration) -> Self {
        Self {
            max_retries,
            backoff_unit,
            jitter: false,
        }
    }

    /// Add up to one backoff unit of random delay to every retry
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Delay before publishing retry number `retry_count`: unit × 2^retry_count
    pub fn backoff_delay(&self, retry_count: u32) -> Duration {
        let factor = 1u32 << retry_count.min(MAX_BACKOFF_EXPONENT);
        self.backoff_unit.saturating_mul(factor)
    }

    /// Decide the next step for a message that failed with `retry_count`
    /// previous retries
    pub fn on_failure(&self, retry_count: u32) -> FailureAction {
        if retry_count < self.max_retries {
            let next = retry_count + 1;
            FailureAction::Retry {
                retry_count: next,
                delay: self.jittered(self.backoff_delay(next)),
            }
        } else {
            FailureAction::DeadLetter { retry_count }
        }
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter {
            delay.saturating_add(self.backoff_unit.mul_f64(rand::random::<f64>()))
        } else {
            delay
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES, Duration::from_secs(1))
    }
}
