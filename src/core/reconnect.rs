use std::time::Duration;

use super::config::ConnectionConfig;

/// Exponential reconnect backoff with no attempt limit.
///
/// `next_delay` hands out the current delay and then grows it by `factor`,
/// capped at `max`. The sequence is non-decreasing and only returns to `base`
/// through `reset`, which the manager calls after every successful open.
#[derive(Clone, Debug)]
pub struct ExponentialBackoff {
    base: Duration,
    max: Duration,
    factor: f64,
    current: Duration,
}

impl ExponentialBackoff {
    pub fn new(base: Duration, max: Duration, factor: f64) -> Self {
        let factor = if factor.is_finite() && factor >= 1.0 {
            factor
        } else {
            1.5
        };
        let max = max.max(base);
        Self {
            base,
            max,
            factor,
            current: base,
        }
    }

    pub fn from_config(config: &ConnectionConfig) -> Self {
        Self::new(
            Duration::from_millis(config.reconnect_delay),
            Duration::from_millis(config.max_reconnect_delay),
            config.reconnect_backoff,
        )
    }

    /// Delay the next scheduled attempt will wait.
    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        let grown_ms = (self.current.as_millis() as f64 * self.factor).round();
        let grown = if grown_ms >= u64::MAX as f64 {
            self.max
        } else {
            Duration::from_millis(grown_ms as u64)
        };
        self.current = grown.min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.base;
    }

    /// Adopt new tuning. An in-progress sequence keeps its position but is
    /// clamped to the new bounds.
    pub fn reconfigure(&mut self, config: &ConnectionConfig) {
        let current = self.current;
        *self = Self::from_config(config);
        self.current = current.clamp(self.base, self.max);
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::from_config(&ConnectionConfig::default())
    }
}
