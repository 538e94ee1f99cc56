use bytes::Bytes;
use std::time::Duration;
use tokio::time::Instant;

use super::config::{ConnectionConfig, KeepAliveMode};
use super::frame::WsFrame;

/// Payload recorded for an on-demand protocol probe.
pub const PROBE_LABEL: &str = "ping";

/// What the manager should do with an inbound control frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlResult {
    NotControl,
    /// Peer pinged; answer with this frame.
    Reply(WsFrame),
    /// Peer answered a probe. Carries the round trip when a probe was outstanding.
    PongReceived(Option<Duration>),
}

/// Frame produced by one keep-alive tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeepAliveTick {
    pub frame: WsFrame,
    /// Set in `message` mode: the payload to report as a heartbeat.
    pub heartbeat: Option<String>,
}

/// Keep-alive prober for one connection: builds probe frames and matches pongs
/// against the most recent protocol ping.
#[derive(Debug, Clone)]
pub struct KeepAliveProbe {
    mode: KeepAliveMode,
    message: String,
    interval: Duration,
    last_ping: Option<Instant>,
}

impl KeepAliveProbe {
    pub fn new(mode: KeepAliveMode, message: impl Into<String>, interval: Duration) -> Self {
        Self {
            mode,
            message: message.into(),
            interval,
            last_ping: None,
        }
    }

    pub fn from_config(config: &ConnectionConfig) -> Self {
        Self::new(
            config.keep_alive_mode,
            config.keep_alive_message.clone(),
            config.keep_alive_period(),
        )
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn mode(&self) -> KeepAliveMode {
        self.mode
    }

    pub fn tick(&mut self) -> KeepAliveTick {
        match self.mode {
            KeepAliveMode::Message => KeepAliveTick {
                frame: WsFrame::text(self.message.clone()),
                heartbeat: Some(self.message.clone()),
            },
            KeepAliveMode::ProtocolPing => KeepAliveTick {
                frame: self.ping(),
                heartbeat: None,
            },
        }
    }

    /// Protocol ping used by both the periodic timer and one-shot probes.
    pub fn ping(&mut self) -> WsFrame {
        self.last_ping = Some(Instant::now());
        WsFrame::Ping(Bytes::new())
    }

    pub fn handle_inbound(&mut self, frame: &WsFrame) -> ControlResult {
        match frame {
            WsFrame::Ping(payload) => ControlResult::Reply(WsFrame::Pong(payload.clone())),
            WsFrame::Pong(_) => {
                let rtt = self.last_ping.take().map(|sent| sent.elapsed());
                ControlResult::PongReceived(rtt)
            }
            _ => ControlResult::NotControl,
        }
    }

    pub fn reset(&mut self) {
        self.last_ping = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_mode_ticks_send_payload_as_text() {
        let mut probe =
            KeepAliveProbe::new(KeepAliveMode::Message, "hb", Duration::from_secs(5));
        let tick = probe.tick();
        assert_eq!(tick.frame, WsFrame::text("hb"));
        assert_eq!(tick.heartbeat.as_deref(), Some("hb"));
    }

    #[test]
    fn protocol_mode_ticks_send_ping_without_heartbeat() {
        let mut probe =
            KeepAliveProbe::new(KeepAliveMode::ProtocolPing, "ignored", Duration::from_secs(5));
        let tick = probe.tick();
        assert!(matches!(tick.frame, WsFrame::Ping(_)));
        assert!(tick.heartbeat.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn pong_after_ping_reports_round_trip() {
        let mut probe = KeepAliveProbe::from_config(&ConnectionConfig::default());
        probe.ping();
        tokio::time::advance(Duration::from_millis(40)).await;

        match probe.handle_inbound(&WsFrame::Pong(Bytes::new())) {
            ControlResult::PongReceived(Some(rtt)) => assert_eq!(rtt, Duration::from_millis(40)),
            other => panic!("expected rtt, got {other:?}"),
        }
        // Unsolicited pong has nothing to match.
        assert_eq!(
            probe.handle_inbound(&WsFrame::Pong(Bytes::new())),
            ControlResult::PongReceived(None)
        );
    }

    #[test]
    fn inbound_ping_is_answered_with_same_payload() {
        let mut probe = KeepAliveProbe::from_config(&ConnectionConfig::default());
        assert_eq!(
            probe.handle_inbound(&WsFrame::Ping(Bytes::from_static(b"abc"))),
            ControlResult::Reply(WsFrame::Pong(Bytes::from_static(b"abc")))
        );
        assert_eq!(
            probe.handle_inbound(&WsFrame::text("data")),
            ControlResult::NotControl
        );
    }
}
