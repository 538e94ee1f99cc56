#![allow(dead_code)]

use std::time::Duration;

use debug_ws::core::{ConnectionConfig, ConnectionEvent, ConnectionState};
use debug_ws::testing::{MockServer, MockTransport};
use debug_ws::ws::{
    ConnectionManager, ConnectionManagerArgs, EventReceiver, GetStatus, flatten_send_error,
};
use kameo::Actor;
use kameo::prelude::ActorRef;
use tokio::sync::mpsc;

pub type MockManager = ActorRef<ConnectionManager<MockTransport>>;

pub fn mock_config() -> ConnectionConfig {
    ConnectionConfig {
        url: "ws://mock.test/socket".to_string(),
        inactivity_timeout: 0,
        ..ConnectionConfig::default()
    }
}

pub fn spawn_manager(config: ConnectionConfig) -> (MockManager, MockServer, EventReceiver) {
    let (transport, server) = MockTransport::channel_pair();
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let actor = ConnectionManager::spawn(ConnectionManagerArgs::new(config, transport, events_tx));
    (actor, server, events_rx)
}

pub async fn state_of(actor: &MockManager) -> ConnectionState {
    actor
        .ask(GetStatus)
        .await
        .map_err(flatten_send_error)
        .expect("status")
        .state
}

/// Let spawned tasks and the actor mailbox drain.
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

pub async fn next_event(events: &mut EventReceiver, timeout: Duration) -> ConnectionEvent {
    tokio::time::timeout(timeout, events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event stream closed")
        .event
}

/// Skip events until `pick` matches one.
pub async fn wait_for<F>(events: &mut EventReceiver, timeout: Duration, mut pick: F) -> ConnectionEvent
where
    F: FnMut(&ConnectionEvent) -> bool,
{
    tokio::time::timeout(timeout, async {
        loop {
            let envelope = events.recv().await.expect("event stream closed");
            if pick(&envelope.event) {
                return envelope.event;
            }
        }
    })
    .await
    .expect("timed out waiting for matching event")
}

pub fn drain_events(events: &mut EventReceiver) -> Vec<ConnectionEvent> {
    let mut out = Vec::new();
    while let Ok(envelope) = events.try_recv() {
        out.push(envelope.event);
    }
    out
}

pub async fn wait_until_state(actor: &MockManager, want: ConnectionState, timeout: Duration) {
    tokio::time::timeout(timeout, async {
        loop {
            if state_of(actor).await == want {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {want}"));
}
