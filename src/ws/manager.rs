//! Connection lifecycle actor.
//!
//! The actor owns the single upstream connection together with its reconnect
//! backoff, keep-alive prober and inactivity watchdog. Transport IO runs in
//! spawned tasks; every timer is a spawned task held in a [`TimerSlot`]. Both
//! report back through actor messages, so the mailbox serializes every state
//! transition.

use std::time::Duration;

use kameo::prelude::{Actor, ActorRef, Context, Message as KameoMessage, WeakActorRef};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::io::{spawn_reader, spawn_writer};
use crate::codec::WirePayload;
use crate::core::{
    ABNORMAL_CLOSURE, ActivityMonitor, ConnectionConfig, ConnectionEvent, ConnectionSnapshot,
    ConnectionState, ControlResult, EventEnvelope, ExponentialBackoff, KeepAliveProbe,
    NO_STATUS_RECEIVED, NORMAL_CLOSURE, PROBE_LABEL, TimerSlot, WebSocketBufferConfig,
    WebSocketError, WebSocketResult, WsFrame, WsTlsConfig, display_payload, spawn_after,
    spawn_every,
};
use crate::transport::{TungsteniteTransport, WsTransport};

/// Period of the inactivity check, independent of the configured timeout.
pub const WATCHDOG_TICK: Duration = Duration::from_millis(1_000);
/// How long a requested close may take before the connection is dropped.
pub const CLOSE_GRACE: Duration = Duration::from_secs(5);
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Reason sent in the close frame when the operator disconnects.
pub const CLIENT_DISCONNECT_REASON: &str = "client disconnect";

pub type EventSender = mpsc::UnboundedSender<EventEnvelope>;
pub type EventReceiver = mpsc::UnboundedReceiver<EventEnvelope>;

/// Arguments passed when constructing a connection manager.
pub struct ConnectionManagerArgs<T: WsTransport = TungsteniteTransport> {
    pub config: ConnectionConfig,
    pub transport: T,
    pub tls: WsTlsConfig,
    pub buffers: WebSocketBufferConfig,
    pub events: EventSender,
}

impl<T: WsTransport> ConnectionManagerArgs<T> {
    pub fn new(config: ConnectionConfig, transport: T, events: EventSender) -> Self {
        Self {
            config,
            transport,
            tls: WsTlsConfig::default(),
            buffers: WebSocketBufferConfig::default(),
            events,
        }
    }
}

pub struct ConnectionManager<T: WsTransport = TungsteniteTransport> {
    config: ConnectionConfig,
    transport: T,
    tls: WsTlsConfig,
    buffers: WebSocketBufferConfig,
    events: EventSender,
    actor_ref: ActorRef<Self>,
    state: ConnectionState,
    /// Bumped on every connection attempt; IO reports from older epochs are dropped.
    epoch: u64,
    manual_close: bool,
    backoff: ExponentialBackoff,
    probe: KeepAliveProbe,
    activity: ActivityMonitor,
    reconnect_timer: TimerSlot,
    keep_alive_timer: TimerSlot,
    watchdog_timer: TimerSlot,
    close_grace_timer: TimerSlot,
    connect_task: Option<JoinHandle<()>>,
    reader_task: Option<JoinHandle<()>>,
    writer_task: Option<JoinHandle<()>>,
    outbound: Option<mpsc::UnboundedSender<WsFrame>>,
    connect_attempts: u64,
}

impl<T: WsTransport> Actor for ConnectionManager<T> {
    type Args = ConnectionManagerArgs<T>;
    type Error = WebSocketError;

    fn name() -> &'static str {
        "ConnectionManager"
    }

    async fn on_start(args: Self::Args, actor_ref: ActorRef<Self>) -> WebSocketResult<Self> {
        let ConnectionManagerArgs {
            config,
            transport,
            tls,
            buffers,
            events,
        } = args;

        Ok(Self {
            backoff: ExponentialBackoff::from_config(&config),
            probe: KeepAliveProbe::from_config(&config),
            config,
            transport,
            tls,
            buffers,
            events,
            actor_ref,
            state: ConnectionState::Closed,
            epoch: 0,
            manual_close: false,
            activity: ActivityMonitor::new(),
            reconnect_timer: TimerSlot::new(),
            keep_alive_timer: TimerSlot::new(),
            watchdog_timer: TimerSlot::new(),
            close_grace_timer: TimerSlot::new(),
            connect_task: None,
            reader_task: None,
            writer_task: None,
            outbound: None,
            connect_attempts: 0,
        })
    }

    async fn on_stop(
        &mut self,
        _ctx: WeakActorRef<Self>,
        _reason: kameo::error::ActorStopReason,
    ) -> WebSocketResult<()> {
        self.clear_timers();
        self.close_grace_timer.cancel();
        if let Some(task) = self.connect_task.take() {
            task.abort();
        }
        self.stop_io();
        Ok(())
    }
}

/// Open the connection. No-op while `OPEN` or `CONNECTING`.
#[derive(Debug, Clone, Copy)]
pub struct Connect;

/// Close the connection with a normal closure and stop reconnecting.
#[derive(Debug, Clone, Copy)]
pub struct Disconnect;

/// Replace the configuration snapshot used by subsequent connection attempts.
#[derive(Debug, Clone)]
pub struct UpdateConfig(pub ConnectionConfig);

/// Send a payload, rejecting it above `maxPayloadBytes`.
#[derive(Debug, Clone)]
pub struct SendPayload(pub WirePayload);

/// Send an encoded envelope whose content was already checked against the
/// size limit upstream; the envelope itself is not capped.
#[derive(Debug, Clone)]
pub struct SendEnvelope(pub WirePayload);

#[derive(Debug, Clone, Copy)]
pub struct EnableKeepAlive;

#[derive(Debug, Clone, Copy)]
pub struct DisableKeepAlive;

/// One protocol ping outside the keep-alive schedule.
#[derive(Debug, Clone, Copy)]
pub struct SendProbe;

/// One keep-alive message outside the schedule; `None` uses the configured payload.
#[derive(Debug, Clone, Default)]
pub struct SendHeartbeatOnce {
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct GetStatus;

/// Transport handed over by a successful connection attempt.
pub struct ConnectionEstablished<T: WsTransport> {
    pub epoch: u64,
    pub reader: T::Reader,
    pub writer: T::Writer,
}

/// Notifications from IO tasks and timers.
#[derive(Debug, Clone)]
pub enum ManagerSignal {
    ConnectionFailed { epoch: u64, error: String },
    Inbound { epoch: u64, frame: WsFrame },
    ReaderEnded { epoch: u64, error: Option<String> },
    WriterFailed { epoch: u64, error: String },
    WriterClosed { epoch: u64 },
    ReconnectDue { id: u64 },
    KeepAliveTick { id: u64 },
    WatchdogTick { id: u64 },
    CloseGraceElapsed { id: u64 },
}

impl<T: WsTransport> ConnectionManager<T> {
    fn emit(&self, event: ConnectionEvent) {
        debug!(event = event.name(), state = %self.state, "connection event");
        // The receiver going away only means nobody is observing.
        let _ = self.events.send(EventEnvelope::now(event));
    }

    fn emit_error(&mut self, message: impl Into<String>) {
        self.activity.record_error();
        self.emit(ConnectionEvent::Error {
            message: message.into(),
        });
    }

    fn clear_timers(&mut self) {
        self.reconnect_timer.cancel();
        self.keep_alive_timer.cancel();
        self.watchdog_timer.cancel();
    }

    fn stop_io(&mut self) {
        self.outbound = None;
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
        if let Some(task) = self.writer_task.take() {
            task.abort();
        }
    }

    fn queue(&self, frame: WsFrame) -> WebSocketResult<()> {
        let outbound = self.outbound.as_ref().ok_or(WebSocketError::NotConnected)?;
        outbound
            .send(frame)
            .map_err(|_| WebSocketError::InvalidState("writer stopped".to_string()))
    }

    fn require_open(&self) -> WebSocketResult<()> {
        if self.state == ConnectionState::Open {
            Ok(())
        } else {
            Err(WebSocketError::NotConnected)
        }
    }

    fn handle_connect(&mut self) -> WebSocketResult<()> {
        match self.state {
            ConnectionState::Open | ConnectionState::Connecting => return Ok(()),
            ConnectionState::Closing => self.finish_close(),
            ConnectionState::Closed => {}
        }

        let request = self
            .config
            .validate()
            .and_then(|_| self.config.connect_request(self.tls));
        let request = match request {
            Ok(request) => request,
            Err(err) => {
                warn!(error = %err, "refusing to connect with invalid configuration");
                self.emit_error(err.to_string());
                return Err(err);
            }
        };

        self.manual_close = false;
        self.reconnect_timer.cancel();
        self.state = ConnectionState::Connecting;
        self.epoch += 1;
        self.connect_attempts += 1;
        let epoch = self.epoch;
        info!(url = %request.url, epoch, attempt = self.connect_attempts, "connecting");

        let connecting = self.transport.connect(request, self.buffers);
        let actor_ref = self.actor_ref.clone();
        self.connect_task = Some(tokio::spawn(async move {
            let outcome = match tokio::time::timeout(CONNECT_TIMEOUT, connecting).await {
                Ok(outcome) => outcome,
                Err(_) => Err(WebSocketError::ConnectionFailed(format!(
                    "timed out after {}s",
                    CONNECT_TIMEOUT.as_secs()
                ))),
            };
            match outcome {
                Ok((reader, writer)) => {
                    let _ = actor_ref
                        .tell(ConnectionEstablished::<T> {
                            epoch,
                            reader,
                            writer,
                        })
                        .send()
                        .await;
                }
                Err(err) => {
                    let _ = actor_ref
                        .tell(ManagerSignal::ConnectionFailed {
                            epoch,
                            error: err.to_string(),
                        })
                        .send()
                        .await;
                }
            }
        }));
        Ok(())
    }

    fn handle_established(&mut self, reader: T::Reader, writer: T::Writer) {
        self.connect_task = None;
        self.state = ConnectionState::Open;
        self.backoff.reset();
        self.activity.connection_opened();
        self.probe.reset();

        let (tx, rx) = mpsc::unbounded_channel();
        self.outbound = Some(tx);
        self.reader_task = Some(spawn_reader(reader, self.actor_ref.clone(), self.epoch));
        self.writer_task = Some(spawn_writer(writer, rx, self.actor_ref.clone(), self.epoch));

        self.sync_watchdog();
        info!(epoch = self.epoch, url = %self.config.url, "connection open");
        self.emit(ConnectionEvent::Open);
    }

    fn handle_connection_failed(&mut self, error: String) {
        self.connect_task = None;
        self.state = ConnectionState::Closed;
        warn!(error = %error, "connection attempt failed");
        self.emit_error(error);
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        if self.reconnect_timer.is_armed() || self.manual_close {
            return;
        }
        let delay = self.backoff.current();
        let actor_ref = self.actor_ref.clone();
        self.reconnect_timer.arm(|id| {
            spawn_after(delay, move || async move {
                let _ = actor_ref.tell(ManagerSignal::ReconnectDue { id }).send().await;
            })
        });
        warn!(
            delay_ms = delay.as_millis() as u64,
            attempt = self.connect_attempts + 1,
            "scheduling reconnect"
        );
    }

    fn handle_reconnect_due(&mut self, id: u64) {
        if !self.reconnect_timer.fired(id) {
            return;
        }
        self.backoff.next_delay();
        self.activity.record_reconnect();
        // Failures were already reported as events.
        let _ = self.handle_connect();
    }

    fn handle_inbound(&mut self, frame: WsFrame) {
        if self.state != ConnectionState::Open {
            return;
        }

        match frame {
            WsFrame::Text(_) | WsFrame::Binary(_) => {
                self.activity.record_received();
                self.emit(ConnectionEvent::Message {
                    payload: display_payload(&frame),
                    is_binary: frame.is_binary(),
                });
            }
            WsFrame::Ping(_) | WsFrame::Pong(_) => {
                self.activity.touch();
                let payload = display_payload(&frame);
                match self.probe.handle_inbound(&frame) {
                    ControlResult::Reply(pong) => {
                        self.emit(ConnectionEvent::Ping { payload });
                        if let Err(err) = self.queue(pong) {
                            debug!(error = %err, "could not queue pong");
                        }
                    }
                    ControlResult::PongReceived(rtt) => {
                        if let Some(rtt) = rtt {
                            self.activity.record_rtt(rtt);
                        }
                        self.emit(ConnectionEvent::Pong { payload });
                    }
                    ControlResult::NotControl => {}
                }
            }
            WsFrame::Close(close) => {
                let (code, reason) = match close {
                    Some(close) => (close.code, close.reason_lossy()),
                    None => (NO_STATUS_RECEIVED, String::new()),
                };
                info!(code, reason = %reason, "peer closed connection");
                self.handle_transport_closed(code, reason);
            }
        }
    }

    /// The transport is gone without us asking for it.
    fn handle_transport_closed(&mut self, code: u16, reason: String) {
        if self.state != ConnectionState::Open {
            return;
        }
        self.keep_alive_timer.cancel();
        self.watchdog_timer.cancel();
        self.stop_io();
        self.state = ConnectionState::Closed;
        self.emit(ConnectionEvent::Close {
            code,
            reason: reason.clone(),
        });

        if !self.manual_close && code != NORMAL_CLOSURE {
            self.schedule_reconnect();
        } else {
            info!(code, reason = %reason, "connection closed");
        }
    }

    fn handle_disconnect(&mut self) {
        self.manual_close = true;
        self.clear_timers();

        match self.state {
            ConnectionState::Closed | ConnectionState::Closing => {}
            ConnectionState::Connecting => {
                if let Some(task) = self.connect_task.take() {
                    task.abort();
                }
                // Drop whatever the aborted attempt may still deliver.
                self.epoch += 1;
                self.state = ConnectionState::Closed;
                info!("connection attempt abandoned");
                self.emit(ConnectionEvent::Close {
                    code: NORMAL_CLOSURE,
                    reason: CLIENT_DISCONNECT_REASON.to_string(),
                });
            }
            ConnectionState::Open => {
                self.state = ConnectionState::Closing;
                if let Some(task) = self.reader_task.take() {
                    task.abort();
                }
                let queued = self.queue(WsFrame::close(NORMAL_CLOSURE, CLIENT_DISCONNECT_REASON));
                // The writer exits after the close frame once the channel is dropped.
                self.outbound = None;
                if queued.is_err() {
                    self.finish_close();
                    return;
                }
                let actor_ref = self.actor_ref.clone();
                self.close_grace_timer.arm(|id| {
                    spawn_after(CLOSE_GRACE, move || async move {
                        let _ = actor_ref
                            .tell(ManagerSignal::CloseGraceElapsed { id })
                            .send()
                            .await;
                    })
                });
                info!(epoch = self.epoch, "closing connection");
            }
        }
    }

    /// Complete an operator-requested close.
    fn finish_close(&mut self) {
        if self.state != ConnectionState::Closing {
            return;
        }
        self.close_grace_timer.cancel();
        self.stop_io();
        self.state = ConnectionState::Closed;
        info!(epoch = self.epoch, "connection closed");
        self.emit(ConnectionEvent::Close {
            code: NORMAL_CLOSURE,
            reason: CLIENT_DISCONNECT_REASON.to_string(),
        });
    }

    fn handle_send(&mut self, payload: WirePayload, capped: bool) -> WebSocketResult<()> {
        self.require_open()?;
        let max = self.config.max_payload_bytes;
        if capped && payload.len() > max {
            return Err(WebSocketError::CapacityExceeded {
                size: payload.len(),
                max,
            });
        }

        let frame = payload.into_frame();
        let event = ConnectionEvent::Sent {
            payload: display_payload(&frame),
            is_binary: frame.is_binary(),
        };
        self.queue(frame)?;
        self.activity.record_sent();
        self.emit(event);
        Ok(())
    }

    fn enable_keep_alive(&mut self) -> WebSocketResult<()> {
        self.require_open()?;
        self.probe = KeepAliveProbe::from_config(&self.config);
        let period = self.probe.interval();
        let actor_ref = self.actor_ref.clone();
        self.keep_alive_timer.arm(|id| {
            spawn_every(period, move || {
                let actor_ref = actor_ref.clone();
                async move {
                    actor_ref
                        .tell(ManagerSignal::KeepAliveTick { id })
                        .send()
                        .await
                        .is_ok()
                }
            })
        });
        info!(
            interval_ms = period.as_millis() as u64,
            mode = ?self.probe.mode(),
            "keep-alive started"
        );
        Ok(())
    }

    fn handle_keep_alive_tick(&mut self, id: u64) {
        if !self.keep_alive_timer.is_current(id) || self.state != ConnectionState::Open {
            return;
        }
        let tick = self.probe.tick();
        if let Err(err) = self.queue(tick.frame) {
            debug!(error = %err, "keep-alive frame dropped");
            return;
        }
        if let Some(payload) = tick.heartbeat {
            self.activity.record_sent();
            self.emit(ConnectionEvent::Heartbeat { payload });
        }
    }

    fn send_probe(&mut self) -> WebSocketResult<()> {
        self.require_open()?;
        let ping = self.probe.ping();
        self.queue(ping)?;
        self.activity.touch();
        self.emit(ConnectionEvent::Ping {
            payload: PROBE_LABEL.to_string(),
        });
        Ok(())
    }

    fn send_heartbeat_once(&mut self, message: Option<String>) -> WebSocketResult<()> {
        self.require_open()?;
        let payload = message.unwrap_or_else(|| self.config.keep_alive_message.clone());
        self.queue(WsFrame::text(payload.clone()))?;
        self.activity.record_sent();
        self.emit(ConnectionEvent::Heartbeat { payload });
        Ok(())
    }

    /// Arm or cancel the watchdog to match the current state and config.
    fn sync_watchdog(&mut self) {
        let wanted = self.state == ConnectionState::Open && self.config.inactivity_limit().is_some();
        if !wanted {
            self.watchdog_timer.cancel();
            return;
        }
        if self.watchdog_timer.is_armed() {
            return;
        }
        let actor_ref = self.actor_ref.clone();
        self.watchdog_timer.arm(|id| {
            spawn_every(WATCHDOG_TICK, move || {
                let actor_ref = actor_ref.clone();
                async move {
                    actor_ref
                        .tell(ManagerSignal::WatchdogTick { id })
                        .send()
                        .await
                        .is_ok()
                }
            })
        });
    }

    fn handle_watchdog_tick(&mut self, id: u64) {
        if !self.watchdog_timer.is_current(id) || self.state != ConnectionState::Open {
            return;
        }
        let Some(limit) = self.config.inactivity_limit() else {
            return;
        };
        if self.activity.is_idle(limit) {
            warn!(
                idle_ms = self.activity.idle_for().as_millis() as u64,
                timeout_ms = self.config.inactivity_timeout,
                "inactivity timeout, disconnecting"
            );
            self.handle_disconnect();
            self.emit(ConnectionEvent::IdleTimeout);
        }
    }

    fn handle_update_config(&mut self, config: ConnectionConfig) -> WebSocketResult<()> {
        config.validate()?;
        self.backoff.reconfigure(&config);
        self.config = config;
        self.sync_watchdog();
        debug!(url = %self.config.url, "configuration updated");
        Ok(())
    }

    fn snapshot(&self) -> ConnectionSnapshot {
        ConnectionSnapshot {
            state: self.state,
            keep_alive_running: self.keep_alive_timer.is_armed(),
            stats: self.activity.stats(self.state == ConnectionState::Open),
        }
    }
}

impl<T: WsTransport> KameoMessage<Connect> for ConnectionManager<T> {
    type Reply = WebSocketResult<()>;

    async fn handle(&mut self, _msg: Connect, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        self.handle_connect()
    }
}

impl<T: WsTransport> KameoMessage<Disconnect> for ConnectionManager<T> {
    type Reply = WebSocketResult<()>;

    async fn handle(
        &mut self,
        _msg: Disconnect,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.handle_disconnect();
        Ok(())
    }
}

impl<T: WsTransport> KameoMessage<UpdateConfig> for ConnectionManager<T> {
    type Reply = WebSocketResult<()>;

    async fn handle(
        &mut self,
        msg: UpdateConfig,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.handle_update_config(msg.0)
    }
}

impl<T: WsTransport> KameoMessage<SendPayload> for ConnectionManager<T> {
    type Reply = WebSocketResult<()>;

    async fn handle(
        &mut self,
        msg: SendPayload,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.handle_send(msg.0, true)
    }
}

impl<T: WsTransport> KameoMessage<SendEnvelope> for ConnectionManager<T> {
    type Reply = WebSocketResult<()>;

    async fn handle(
        &mut self,
        msg: SendEnvelope,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.handle_send(msg.0, false)
    }
}

impl<T: WsTransport> KameoMessage<EnableKeepAlive> for ConnectionManager<T> {
    type Reply = WebSocketResult<()>;

    async fn handle(
        &mut self,
        _msg: EnableKeepAlive,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.enable_keep_alive()
    }
}

impl<T: WsTransport> KameoMessage<DisableKeepAlive> for ConnectionManager<T> {
    type Reply = WebSocketResult<()>;

    async fn handle(
        &mut self,
        _msg: DisableKeepAlive,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        if self.keep_alive_timer.cancel() {
            info!("keep-alive stopped");
        }
        Ok(())
    }
}

impl<T: WsTransport> KameoMessage<SendProbe> for ConnectionManager<T> {
    type Reply = WebSocketResult<()>;

    async fn handle(
        &mut self,
        _msg: SendProbe,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.send_probe()
    }
}

impl<T: WsTransport> KameoMessage<SendHeartbeatOnce> for ConnectionManager<T> {
    type Reply = WebSocketResult<()>;

    async fn handle(
        &mut self,
        msg: SendHeartbeatOnce,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.send_heartbeat_once(msg.message)
    }
}

impl<T: WsTransport> KameoMessage<GetStatus> for ConnectionManager<T> {
    type Reply = WebSocketResult<ConnectionSnapshot>;

    async fn handle(
        &mut self,
        _msg: GetStatus,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        Ok(self.snapshot())
    }
}

impl<T: WsTransport> KameoMessage<ConnectionEstablished<T>> for ConnectionManager<T> {
    type Reply = WebSocketResult<()>;

    async fn handle(
        &mut self,
        msg: ConnectionEstablished<T>,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        if msg.epoch != self.epoch || self.state != ConnectionState::Connecting {
            debug!(epoch = msg.epoch, current = self.epoch, "dropping superseded connection");
            return Ok(());
        }
        self.handle_established(msg.reader, msg.writer);
        Ok(())
    }
}

impl<T: WsTransport> KameoMessage<ManagerSignal> for ConnectionManager<T> {
    type Reply = WebSocketResult<()>;

    async fn handle(
        &mut self,
        msg: ManagerSignal,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        match msg {
            ManagerSignal::ConnectionFailed { epoch, error } => {
                if epoch == self.epoch && self.state == ConnectionState::Connecting {
                    self.handle_connection_failed(error);
                }
            }
            ManagerSignal::Inbound { epoch, frame } => {
                if epoch == self.epoch {
                    self.handle_inbound(frame);
                }
            }
            ManagerSignal::ReaderEnded { epoch, error } => {
                if epoch == self.epoch && self.state == ConnectionState::Open {
                    match error {
                        Some(error) => {
                            warn!(error = %error, "read failed");
                            self.emit_error(error.clone());
                            self.handle_transport_closed(ABNORMAL_CLOSURE, error);
                        }
                        None => {
                            warn!("connection lost without close frame");
                            self.handle_transport_closed(
                                ABNORMAL_CLOSURE,
                                "connection lost".to_string(),
                            );
                        }
                    }
                }
            }
            ManagerSignal::WriterFailed { epoch, error } => {
                if epoch != self.epoch {
                    return Ok(());
                }
                match self.state {
                    ConnectionState::Open => {
                        warn!(error = %error, "write failed");
                        self.emit_error(error.clone());
                        self.handle_transport_closed(ABNORMAL_CLOSURE, error);
                    }
                    ConnectionState::Closing => self.finish_close(),
                    _ => {}
                }
            }
            ManagerSignal::WriterClosed { epoch } => {
                if epoch == self.epoch {
                    self.finish_close();
                }
            }
            ManagerSignal::ReconnectDue { id } => self.handle_reconnect_due(id),
            ManagerSignal::KeepAliveTick { id } => self.handle_keep_alive_tick(id),
            ManagerSignal::WatchdogTick { id } => self.handle_watchdog_tick(id),
            ManagerSignal::CloseGraceElapsed { id } => {
                if self.close_grace_timer.fired(id) {
                    warn!(epoch = self.epoch, "close handshake timed out");
                    self.finish_close();
                }
            }
        }
        Ok(())
    }
}
