use crate::feed::types::{DEFAULT_BACKOFF_BASE_MS, DEFAULT_BACKOFF_CAP_MS};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    base: Duration,
    cap: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(
            Duration::from_millis(DEFAULT_BACKOFF_BASE_MS),
            Duration::from_millis(DEFAULT_BACKOFF_CAP_MS),
        )
    }
}

impl BackoffPolicy {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap: cap.max(base),
        }
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    pub fn cap(&self) -> Duration {
        self.cap
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        backoff_delay(attempt, self.base, self.cap)
    }
}

pub fn backoff_delay(attempt: u32, base: Duration, cap: Duration) -> Duration {
    base.saturating_mul(attempt.saturating_add(1)).min(cap)
}
