use crate::error::AppError;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct HeartbeatScheduler {
    interval: Duration,
    next_due: Instant,
    ticks: u64,
}

impl HeartbeatScheduler {
    pub fn start(interval: Duration, now: Instant) -> Self {
        Self {
            interval,
            next_due: now + interval,
            ticks: 0,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn next_due(&self) -> Instant {
        self.next_due
    }

    pub fn is_due(&self, now: Instant) -> bool {
        now >= self.next_due
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn advance(&mut self, now: Instant) {
        self.ticks = self.ticks.saturating_add(1);
        self.next_due += self.interval;
        if self.next_due <= now {
            self.next_due = now + self.interval;
        }
    }
}

pub fn ping_payload(key: &str, timestamp_ms: i64) -> Result<String, AppError> {
    let mut payload = BTreeMap::new();
    payload.insert(key, timestamp_ms);
    Ok(simd_json::serde::to_string(&payload)?)
}
