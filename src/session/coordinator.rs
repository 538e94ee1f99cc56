//! Operator-facing facade over the connection manager.
//!
//! The coordinator owns the manager actor, the traffic journal and the config
//! store. A pump task turns every manager event into a journal entry and a
//! notification. Operations never fail past this boundary: each one answers an
//! [`Outcome`].

use std::sync::{Arc, RwLock};

use kameo::Actor;
use kameo::prelude::ActorRef;
use serde::Serialize;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::files::{FileInfo, FileUpload, build_file_message};
use super::notify::{
    ErrorNotice, IDLE_TIMEOUT_DETAIL, Notification, NotificationSink, NullSink, StatusUpdate,
};
use super::store::ConfigStore;
use crate::codec::{Codec, EncodeOptions, MessageFormat, MessageValue, WirePayload};
use crate::core::{
    ConfigPatch, ConnectionConfig, ConnectionEvent, ConnectionState, EventEnvelope,
    KeepAliveMode, WebSocketError, WebSocketResult, WsConnectionStats, WsTlsConfig,
};
use crate::journal::{DEFAULT_JOURNAL_CAPACITY, EntryKind, Journal, JournalEntry, JournalQuery};
use crate::transport::{TungsteniteTransport, WsTransport};
use crate::ws::{
    Connect, ConnectionManager, ConnectionManagerArgs, DisableKeepAlive, Disconnect,
    EnableKeepAlive, EventReceiver, GetStatus, SendEnvelope, SendHeartbeatOnce, SendPayload,
    SendProbe, UpdateConfig, flatten_send_error,
};

/// Uniform result of a coordinator operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Outcome<T = ()> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// One message per violated invariant, for configuration failures.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<String>>,
}

impl<T> Outcome<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            errors: None,
        }
    }

    pub fn done() -> Self {
        Self {
            success: true,
            data: None,
            error: None,
            errors: None,
        }
    }

    pub fn failed(err: &WebSocketError) -> Self {
        let errors = match err {
            WebSocketError::ConfigInvalid { errors } => Some(errors.clone()),
            _ => None,
        };
        Self {
            success: false,
            data: None,
            error: Some(err.to_string()),
            errors,
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }
}

impl<T> From<WebSocketResult<T>> for Outcome<T> {
    fn from(result: WebSocketResult<T>) -> Self {
        match result {
            Ok(data) => Outcome::ok(data),
            Err(err) => Outcome::failed(&err),
        }
    }
}

fn unit(result: WebSocketResult<()>) -> Outcome {
    match result {
        Ok(()) => Outcome::done(),
        Err(err) => Outcome::failed(&err),
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub state: ConnectionState,
    pub config: ConnectionConfig,
    pub message_count: usize,
    pub keep_alive_running: bool,
    pub stats: WsConnectionStats,
}

/// Arguments for [`SessionCoordinator::start`].
pub struct SessionArgs<T: WsTransport = TungsteniteTransport> {
    /// Baseline configuration; the saved configuration is merged over it.
    pub defaults: ConnectionConfig,
    pub transport: T,
    pub tls: WsTlsConfig,
    pub store: ConfigStore,
    pub journal_capacity: usize,
    pub sink: Arc<dyn NotificationSink>,
}

impl<T: WsTransport> SessionArgs<T> {
    pub fn new(transport: T) -> Self {
        Self {
            defaults: ConnectionConfig::default(),
            transport,
            tls: WsTlsConfig::default(),
            store: ConfigStore::memory(),
            journal_capacity: DEFAULT_JOURNAL_CAPACITY,
            sink: Arc::new(NullSink),
        }
    }
}

struct Inner<T: WsTransport> {
    manager: ActorRef<ConnectionManager<T>>,
    journal: Arc<Mutex<Journal>>,
    store: ConfigStore,
    codec: RwLock<Codec>,
    config: Mutex<ConnectionConfig>,
    pump: JoinHandle<()>,
}

impl<T: WsTransport> Drop for Inner<T> {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

/// Cloneable handle; all clones share one manager and journal.
pub struct SessionCoordinator<T: WsTransport = TungsteniteTransport> {
    inner: Arc<Inner<T>>,
}

impl<T: WsTransport> Clone for SessionCoordinator<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: WsTransport> SessionCoordinator<T> {
    /// Load the saved configuration, spawn the manager and start the event pump.
    pub async fn start(args: SessionArgs<T>) -> Self {
        let SessionArgs {
            defaults,
            transport,
            tls,
            store,
            journal_capacity,
            sink,
        } = args;

        let config = match store.load().await {
            Some(saved) => {
                let candidate = defaults.merged(&ConfigPatch::from(saved));
                match candidate.validate() {
                    Ok(()) => {
                        info!(url = %candidate.url, "loaded saved configuration");
                        candidate
                    }
                    Err(err) => {
                        warn!(error = %err, "ignoring invalid saved configuration");
                        defaults
                    }
                }
            }
            None => defaults,
        };

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let mut manager_args = ConnectionManagerArgs::new(config.clone(), transport, events_tx);
        manager_args.tls = tls;
        let manager = ConnectionManager::<T>::spawn(manager_args);

        let journal = Arc::new(Mutex::new(Journal::new(journal_capacity)));
        let pump = tokio::spawn(pump_events(events_rx, journal.clone(), sink));

        Self {
            inner: Arc::new(Inner {
                manager,
                journal,
                store,
                codec: RwLock::new(Codec::new()),
                config: Mutex::new(config),
                pump,
            }),
        }
    }

    pub async fn config(&self) -> ConnectionConfig {
        self.inner.config.lock().await.clone()
    }

    pub fn store(&self) -> &ConfigStore {
        &self.inner.store
    }

    pub async fn get_status(&self) -> Outcome<StatusReport> {
        let snapshot = match self.inner.manager.ask(GetStatus).await {
            Ok(snapshot) => snapshot,
            Err(err) => return Outcome::failed(&flatten_send_error(err)),
        };
        Outcome::ok(StatusReport {
            state: snapshot.state,
            config: self.config().await,
            message_count: self.inner.journal.lock().await.len(),
            keep_alive_running: snapshot.keep_alive_running,
            stats: snapshot.stats,
        })
    }

    /// Merge, validate and apply a configuration patch, then persist it.
    ///
    /// Nothing is applied when validation fails. A failed save is logged and
    /// does not fail the update.
    pub async fn update_config(&self, patch: ConfigPatch) -> Outcome {
        let mut current = self.inner.config.lock().await;
        let candidate = current.merged(&patch);
        if let Err(err) = candidate.validate() {
            debug!(error = %err, "configuration update rejected");
            return Outcome::failed(&err);
        }
        if let Err(err) = self
            .inner
            .manager
            .ask(UpdateConfig(candidate.clone()))
            .await
            .map_err(flatten_send_error)
        {
            return Outcome::failed(&err);
        }
        *current = candidate;
        let persisted = current.persisted();
        drop(current);

        if let Err(err) = self.inner.store.save(&persisted).await {
            warn!(error = %err, "could not persist configuration");
        }
        info!(url = %persisted.url, "configuration updated");
        Outcome::done()
    }

    /// Connect, optionally to a different url. The override is not persisted.
    pub async fn connect(&self, url: Option<String>) -> Outcome {
        unit(self.try_connect(url).await)
    }

    async fn try_connect(&self, url: Option<String>) -> WebSocketResult<()> {
        if let Some(url) = url.filter(|url| !url.is_empty()) {
            let mut current = self.inner.config.lock().await;
            let candidate = current.merged(&ConfigPatch::url(url));
            candidate.validate()?;
            self.inner
                .manager
                .ask(UpdateConfig(candidate.clone()))
                .await
                .map_err(flatten_send_error)?;
            *current = candidate;
        }
        self.inner
            .manager
            .ask(Connect)
            .await
            .map_err(flatten_send_error)
    }

    pub async fn disconnect(&self) -> Outcome {
        unit(
            self.inner
                .manager
                .ask(Disconnect)
                .await
                .map_err(flatten_send_error),
        )
    }

    pub async fn start_keep_alive(&self) -> Outcome {
        unit(
            self.inner
                .manager
                .ask(EnableKeepAlive)
                .await
                .map_err(flatten_send_error),
        )
    }

    pub async fn stop_keep_alive(&self) -> Outcome {
        unit(
            self.inner
                .manager
                .ask(DisableKeepAlive)
                .await
                .map_err(flatten_send_error),
        )
    }

    /// One keep-alive outside the schedule, in the configured mode.
    pub async fn send_once_keep_alive(&self) -> Outcome {
        let mode = self.inner.config.lock().await.keep_alive_mode;
        let manager = &self.inner.manager;
        let result = match mode {
            KeepAliveMode::Message => manager
                .ask(SendHeartbeatOnce::default())
                .await
                .map_err(flatten_send_error),
            KeepAliveMode::ProtocolPing => manager.ask(SendProbe).await.map_err(flatten_send_error),
        };
        unit(result)
    }

    pub async fn send_message(
        &self,
        value: impl Into<MessageValue>,
        format: MessageFormat,
        binary: bool,
    ) -> Outcome {
        let value = value.into();
        let encoded = self.encode(&value, format, binary);
        unit(match encoded {
            Ok(payload) => self.send_payload(payload).await,
            Err(err) => Err(err),
        })
    }

    /// Send a file wrapped in a structured message. `format` defaults to json.
    pub async fn send_file(
        &self,
        upload: FileUpload,
        format: Option<MessageFormat>,
    ) -> Outcome<FileInfo> {
        let result: WebSocketResult<FileInfo> = async {
            let max = self.inner.config.lock().await.max_payload_bytes;
            let (message, info) = build_file_message(&upload, max)?;
            let payload = self.encode(
                &MessageValue::Json(message),
                format.unwrap_or(MessageFormat::Json),
                false,
            )?;
            // The size limit applies to the raw file, not the base64 envelope.
            self.inner
                .manager
                .ask(SendEnvelope(payload))
                .await
                .map_err(flatten_send_error)?;
            info!(name = %info.name, size = info.size, mime = %info.mime_type, "file sent");
            Ok(info)
        }
        .await;
        result.into()
    }

    pub async fn get_messages(&self, query: JournalQuery) -> Outcome<Vec<JournalEntry>> {
        Outcome::ok(self.inner.journal.lock().await.query(&query))
    }

    pub async fn clear_messages(&self) -> Outcome {
        self.inner.journal.lock().await.clear();
        info!("message journal cleared");
        Outcome::done()
    }

    /// Register the transform used by [`MessageFormat::Custom`].
    pub fn set_custom_formatter<F>(&self, formatter: F)
    where
        F: Fn(&MessageValue, &EncodeOptions) -> Result<WirePayload, String> + Send + Sync + 'static,
    {
        self.inner
            .codec
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .set_custom_formatter(formatter);
    }

    pub fn clear_custom_formatter(&self) {
        self.inner
            .codec
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear_custom_formatter();
    }

    /// Disconnect and stop the manager actor.
    pub async fn shutdown(&self) {
        let _ = self.disconnect().await;
        let manager = &self.inner.manager;
        if manager.stop_gracefully().await.is_ok() {
            manager.wait_for_shutdown().await;
        }
        debug!("session stopped");
    }

    fn encode(
        &self,
        value: &MessageValue,
        format: MessageFormat,
        binary: bool,
    ) -> WebSocketResult<WirePayload> {
        let codec = self.inner.codec.read().unwrap_or_else(|e| e.into_inner());
        Ok(codec.encode(value, format, &EncodeOptions { binary })?)
    }

    async fn send_payload(&self, payload: WirePayload) -> WebSocketResult<()> {
        self.inner
            .manager
            .ask(SendPayload(payload))
            .await
            .map_err(flatten_send_error)
    }
}

/// Journal record for an event; `None` for events that only change status.
fn journal_record(event: &ConnectionEvent) -> Option<(EntryKind, String, bool)> {
    let record = match event {
        ConnectionEvent::Open => (EntryKind::Open, "connection established".to_string(), false),
        ConnectionEvent::Close { code, reason } if reason.is_empty() => (
            EntryKind::Close,
            format!("connection closed (code: {code})"),
            false,
        ),
        ConnectionEvent::Close { code, reason } => (
            EntryKind::Close,
            format!("connection closed (code: {code}, reason: {reason})"),
            false,
        ),
        ConnectionEvent::Message { payload, is_binary } => {
            (EntryKind::Received, payload.clone(), *is_binary)
        }
        ConnectionEvent::Sent { payload, is_binary } => (EntryKind::Sent, payload.clone(), *is_binary),
        ConnectionEvent::Ping { payload } => (EntryKind::Ping, payload.clone(), false),
        ConnectionEvent::Pong { payload } => (EntryKind::Pong, payload.clone(), false),
        ConnectionEvent::Heartbeat { payload } => (EntryKind::Heartbeat, payload.clone(), false),
        ConnectionEvent::Error { message } => (EntryKind::Error, message.clone(), false),
        ConnectionEvent::IdleTimeout => return None,
    };
    Some(record)
}

fn status_update(event: &ConnectionEvent, timestamp: u64) -> Option<StatusUpdate> {
    match event {
        ConnectionEvent::Open => Some(StatusUpdate::new(ConnectionState::Open, timestamp)),
        ConnectionEvent::Close { code, reason } => Some(StatusUpdate {
            code: Some(*code),
            reason: Some(reason.clone()),
            ..StatusUpdate::new(ConnectionState::Closed, timestamp)
        }),
        ConnectionEvent::IdleTimeout => Some(StatusUpdate {
            detail: Some(IDLE_TIMEOUT_DETAIL.to_string()),
            ..StatusUpdate::new(ConnectionState::Closing, timestamp)
        }),
        _ => None,
    }
}

async fn pump_events(
    mut events: EventReceiver,
    journal: Arc<Mutex<Journal>>,
    sink: Arc<dyn NotificationSink>,
) {
    while let Some(EventEnvelope { timestamp, event }) = events.recv().await {
        if let Some((kind, payload, is_binary)) = journal_record(&event) {
            let entry = journal
                .lock()
                .await
                .append(timestamp, kind, payload, is_binary);
            sink.broadcast(Notification::Message(entry));
        }
        if let ConnectionEvent::Error { message } = &event {
            sink.broadcast(Notification::Error(ErrorNotice {
                message: message.clone(),
                timestamp,
            }));
        }
        if let Some(status) = status_update(&event, timestamp) {
            sink.broadcast(Notification::Status(status));
        }
    }
    debug!("event stream closed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_entries_carry_code_and_reason() {
        let event = ConnectionEvent::Close {
            code: 1006,
            reason: "connection lost".into(),
        };
        let (kind, payload, _) = journal_record(&event).unwrap();
        assert_eq!(kind, EntryKind::Close);
        assert_eq!(payload, "connection closed (code: 1006, reason: connection lost)");

        let status = status_update(&event, 5).unwrap();
        assert_eq!(status.state, ConnectionState::Closed);
        assert_eq!(status.code, Some(1006));
    }

    #[test]
    fn idle_timeout_is_status_only() {
        assert!(journal_record(&ConnectionEvent::IdleTimeout).is_none());
        let status = status_update(&ConnectionEvent::IdleTimeout, 1).unwrap();
        assert_eq!(status.detail.as_deref(), Some(IDLE_TIMEOUT_DETAIL));
    }

    #[test]
    fn config_failures_list_every_error() {
        let err = WebSocketError::ConfigInvalid {
            errors: vec!["url is empty".into(), "bad interval".into()],
        };
        let outcome: Outcome = Outcome::failed(&err);
        let json = sonic_rs::to_string(&outcome).unwrap();
        assert!(json.contains(r#""errors":["url is empty","bad interval"]"#));
        assert!(json.starts_with(r#"{"success":false"#));

        let ok: Outcome = Outcome::done();
        assert_eq!(sonic_rs::to_string(&ok).unwrap(), r#"{"success":true}"#);
    }
}
