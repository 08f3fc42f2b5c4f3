use std::time::Duration;

use crate::config::SyncConfig;

/// Exponential reconnect schedule: floor, 2x floor, 4x floor ... capped at
/// the ceiling, for at most `max_attempts` automatic attempts per outage.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    floor: Duration,
    ceiling: Duration,
    max_attempts: u32,
    attempts: u32,
    interval: Duration,
}

impl ReconnectPolicy {
    pub fn new(floor: Duration, ceiling: Duration, max_attempts: u32) -> Self {
        Self {
            floor,
            ceiling,
            max_attempts,
            attempts: 0,
            interval: floor,
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(
            config.reconnect_floor,
            config.reconnect_ceiling,
            config.max_reconnect_attempts,
        )
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    /// Claims the next attempt and returns its delay, or `None` once the
    /// budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.exhausted() {
            return None;
        }
        let delay = self.interval;
        self.interval = self.interval.saturating_mul(2).min(self.ceiling);
        self.attempts += 1;
        Some(delay)
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
        self.interval = self.floor;
    }
}
