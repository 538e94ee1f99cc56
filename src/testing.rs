//! In-memory transport for driving the connection manager without a socket.
//!
//! [`MockTransport::channel_pair`] returns the transport plus a [`MockServer`]
//! handle. Every accepted connection shows up on the server as a
//! [`MockPeer`], which tests use to push inbound frames, read what the client
//! wrote, or drop the socket.

use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures_util::{Sink, Stream};
use tokio::sync::mpsc;

use crate::core::{
    WebSocketBufferConfig, WebSocketError, WsCloseFrame, WsConnectRequest, WsFrame,
};
use crate::transport::{WsConnectFuture, WsTransport};

#[derive(Debug, Default)]
struct MockState {
    attempts: Vec<WsConnectRequest>,
    refuse_next: usize,
    refuse_all: bool,
}

#[derive(Clone)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
    peers_tx: mpsc::UnboundedSender<MockPeer>,
}

impl MockTransport {
    /// Build a transport + server control pair.
    pub fn channel_pair() -> (Self, MockServer) {
        let state = Arc::new(Mutex::new(MockState::default()));
        let (peers_tx, peers_rx) = mpsc::unbounded_channel();
        (
            Self {
                state: state.clone(),
                peers_tx,
            },
            MockServer { state, peers_rx },
        )
    }
}

impl WsTransport for MockTransport {
    type Reader = MockReader;
    type Writer = MockWriter;

    fn connect(
        &self,
        request: WsConnectRequest,
        _buffers: WebSocketBufferConfig,
    ) -> WsConnectFuture<Self::Reader, Self::Writer> {
        let refused = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.attempts.push(request);
            if state.refuse_all {
                true
            } else if state.refuse_next > 0 {
                state.refuse_next -= 1;
                true
            } else {
                false
            }
        };

        if refused {
            return Box::pin(async {
                Err(WebSocketError::TransportFailure {
                    context: "connect",
                    error: "connection refused".to_string(),
                })
            });
        }

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let _ = self.peers_tx.send(MockPeer {
            inbound_tx: Some(inbound_tx),
            outbound_rx,
        });
        Box::pin(async move {
            Ok((
                MockReader { rx: inbound_rx },
                MockWriter {
                    tx: Some(outbound_tx),
                },
            ))
        })
    }
}

/// Server-side test handle paired with [`MockTransport`].
pub struct MockServer {
    state: Arc<Mutex<MockState>>,
    peers_rx: mpsc::UnboundedReceiver<MockPeer>,
}

impl MockServer {
    fn with_state<R>(&self, f: impl FnOnce(&mut MockState) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut state)
    }

    /// Number of connect calls made so far, accepted or not.
    pub fn attempts(&self) -> usize {
        self.with_state(|s| s.attempts.len())
    }

    pub fn last_request(&self) -> Option<WsConnectRequest> {
        self.with_state(|s| s.attempts.last().cloned())
    }

    pub fn refuse_next(&self, count: usize) {
        self.with_state(|s| s.refuse_next = count);
    }

    pub fn refuse_all(&self, refuse: bool) {
        self.with_state(|s| s.refuse_all = refuse);
    }

    /// Wait for the next accepted connection.
    pub async fn accept(&mut self) -> Option<MockPeer> {
        self.peers_rx.recv().await
    }

    pub async fn accept_timeout(&mut self, timeout: Duration) -> Option<MockPeer> {
        tokio::time::timeout(timeout, self.peers_rx.recv())
            .await
            .unwrap_or_default()
    }
}

/// Error surface for operations on [`MockPeer`].
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum MockServerError {
    /// The inbound socket side was intentionally dropped.
    SocketDropped,
    /// The client side is no longer reading.
    ChannelClosed,
}

impl std::fmt::Display for MockServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MockServerError::SocketDropped => f.write_str("mock socket already dropped"),
            MockServerError::ChannelClosed => f.write_str("mock client channel is closed"),
        }
    }
}

impl std::error::Error for MockServerError {}

/// Server end of one accepted connection.
pub struct MockPeer {
    inbound_tx: Option<mpsc::UnboundedSender<Result<WsFrame, WebSocketError>>>,
    outbound_rx: mpsc::UnboundedReceiver<WsFrame>,
}

impl MockPeer {
    fn push(&self, item: Result<WsFrame, WebSocketError>) -> Result<(), MockServerError> {
        let Some(tx) = self.inbound_tx.as_ref() else {
            return Err(MockServerError::SocketDropped);
        };
        tx.send(item).map_err(|_| MockServerError::ChannelClosed)
    }

    pub fn send(&self, frame: WsFrame) -> Result<(), MockServerError> {
        self.push(Ok(frame))
    }

    pub fn send_text(&self, text: impl Into<String>) -> Result<(), MockServerError> {
        self.send(WsFrame::text(text))
    }

    pub fn send_binary(&self, bytes: impl Into<Bytes>) -> Result<(), MockServerError> {
        self.send(WsFrame::Binary(bytes.into()))
    }

    /// Send a close frame and stop delivering frames.
    pub fn close(&mut self, code: u16, reason: &str) -> Result<(), MockServerError> {
        let result = self.send(WsFrame::Close(Some(WsCloseFrame {
            code,
            reason: Bytes::copy_from_slice(reason.as_bytes()),
        })));
        self.inbound_tx = None;
        result
    }

    /// Deliver a read error to the client.
    pub fn fail(&self, error: impl Into<String>) -> Result<(), MockServerError> {
        self.push(Err(WebSocketError::TransportFailure {
            context: "read",
            error: error.into(),
        }))
    }

    /// Simulate a socket drop: the client's reader ends without a close frame.
    pub fn drop_socket(&mut self) {
        self.inbound_tx = None;
    }

    /// Next frame written by the client; `None` once the client writer is gone.
    pub async fn recv(&mut self) -> Option<WsFrame> {
        self.outbound_rx.recv().await
    }

    pub async fn recv_timeout(&mut self, timeout: Duration) -> Option<WsFrame> {
        tokio::time::timeout(timeout, self.outbound_rx.recv())
            .await
            .unwrap_or_default()
    }

    /// Frames already written, without waiting.
    pub fn drain(&mut self) -> Vec<WsFrame> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.outbound_rx.try_recv() {
            frames.push(frame);
        }
        frames
    }
}

/// Reader side for [`MockTransport`].
pub struct MockReader {
    rx: mpsc::UnboundedReceiver<Result<WsFrame, WebSocketError>>,
}

impl Stream for MockReader {
    type Item = Result<WsFrame, WebSocketError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Writer side for [`MockTransport`].
pub struct MockWriter {
    tx: Option<mpsc::UnboundedSender<WsFrame>>,
}

impl Sink<WsFrame> for MockWriter {
    type Error = WebSocketError;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn start_send(self: Pin<&mut Self>, item: WsFrame) -> Result<(), Self::Error> {
        let closed = || WebSocketError::TransportFailure {
            context: "write",
            error: "mock outbound channel closed".to_string(),
        };
        self.get_mut()
            .tx
            .as_ref()
            .ok_or_else(closed)?
            .send(item)
            .map_err(|_| closed())
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.get_mut().tx = None;
        Poll::Ready(Ok(()))
    }
}
