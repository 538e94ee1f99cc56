use hdrhistogram::Histogram;
use std::time::Duration;
use tokio::time::Instant;

use super::types::WsConnectionStats;

/// Traffic and liveness bookkeeping for the managed connection.
///
/// Uses tokio's clock so paused-time tests drive the inactivity watchdog
/// deterministically.
#[derive(Debug)]
pub struct ActivityMonitor {
    connection_started: Instant,
    last_activity: Instant,
    messages_received: u64,
    messages_sent: u64,
    error_count: u64,
    reconnect_count: u64,
    rtt_histogram: Histogram<u64>,
}

impl ActivityMonitor {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            connection_started: now,
            last_activity: now,
            messages_received: 0,
            messages_sent: 0,
            error_count: 0,
            reconnect_count: 0,
            rtt_histogram: Histogram::new_with_bounds(1, 60_000_000, 3)
                .expect("histogram bounds are valid"),
        }
    }

    /// Called on every successful open.
    pub fn connection_opened(&mut self) {
        let now = Instant::now();
        self.connection_started = now;
        self.last_activity = now;
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn record_received(&mut self) {
        self.touch();
        self.messages_received = self.messages_received.saturating_add(1);
    }

    pub fn record_sent(&mut self) {
        self.touch();
        self.messages_sent = self.messages_sent.saturating_add(1);
    }

    pub fn record_error(&mut self) {
        self.error_count = self.error_count.saturating_add(1);
    }

    pub fn record_reconnect(&mut self) {
        self.reconnect_count = self.reconnect_count.saturating_add(1);
    }

    pub fn record_rtt(&mut self, rtt: Duration) {
        let micros = rtt.as_micros().clamp(1, u64::MAX as u128) as u64;
        let _ = self.rtt_histogram.record(micros);
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.elapsed()
    }

    /// Strictly longer than `limit` without traffic.
    pub fn is_idle(&self, limit: Duration) -> bool {
        self.idle_for() > limit
    }

    pub fn stats(&self, connected: bool) -> WsConnectionStats {
        let rtt_samples = self.rtt_histogram.len();
        let (p50, p99) = if rtt_samples == 0 {
            (0, 0)
        } else {
            (
                self.rtt_histogram.value_at_percentile(50.0),
                self.rtt_histogram.value_at_percentile(99.0),
            )
        };

        WsConnectionStats {
            uptime: if connected {
                self.connection_started.elapsed()
            } else {
                Duration::ZERO
            },
            messages_received: self.messages_received,
            messages_sent: self.messages_sent,
            errors: self.error_count,
            reconnects: self.reconnect_count,
            last_activity_age: self.idle_for(),
            p50_rtt_us: p50,
            p99_rtt_us: p99,
            rtt_samples,
        }
    }
}

impl Default for ActivityMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_rtt_percentiles() {
        let mut monitor = ActivityMonitor::new();
        monitor.record_rtt(Duration::from_micros(100));
        monitor.record_rtt(Duration::from_micros(200));
        monitor.record_rtt(Duration::from_micros(300));

        let stats = monitor.stats(true);
        assert_eq!(stats.rtt_samples, 3);
        assert_eq!(stats.p50_rtt_us, 200);
        assert_eq!(stats.p99_rtt_us, 300);
    }

    #[test]
    fn counts_traffic_and_errors() {
        let mut monitor = ActivityMonitor::new();
        monitor.record_received();
        monitor.record_received();
        monitor.record_sent();
        monitor.record_error();
        monitor.record_reconnect();

        let stats = monitor.stats(false);
        assert_eq!(stats.messages_received, 2);
        assert_eq!(stats.messages_sent, 1);
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.reconnects, 1);
        assert_eq!(stats.uptime, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn traffic_resets_idle_deadline() {
        let mut monitor = ActivityMonitor::new();
        let limit = Duration::from_secs(2);

        tokio::time::advance(Duration::from_millis(1_500)).await;
        assert!(!monitor.is_idle(limit));
        monitor.touch();

        tokio::time::advance(Duration::from_millis(1_500)).await;
        assert!(!monitor.is_idle(limit));

        tokio::time::advance(Duration::from_millis(600)).await;
        assert!(monitor.is_idle(limit));
    }
}
