use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::{Sink, Stream, StreamExt};
use http::{HeaderName, HeaderValue};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    Connector, MaybeTlsStream, WebSocketStream, connect_async_tls_with_config,
    tungstenite::{
        Error as TungsteniteError, Message as TungsteniteMessage, Utf8Bytes,
        client::IntoClientRequest,
        protocol::{CloseFrame as TungCloseFrame, WebSocketConfig},
    },
};
use tracing::debug;

use super::tls::{insecure_client_config, install_rustls_crypto_provider};
use super::{WsConnectFuture, WsTransport};
use crate::core::{
    WebSocketBufferConfig, WebSocketError, WsCloseFrame, WsConnectRequest, WsFrame,
};

fn map_ws_error(context: &'static str, err: impl ToString) -> WebSocketError {
    WebSocketError::TransportFailure {
        context,
        error: err.to_string(),
    }
}

fn map_connect_error(err: TungsteniteError) -> WebSocketError {
    match err {
        TungsteniteError::Http(response) => {
            let status = response.status();
            let body = response
                .body()
                .as_ref()
                .filter(|b| !b.is_empty())
                .map(|b| String::from_utf8_lossy(b).into_owned());
            match body {
                Some(body) => WebSocketError::ConnectionFailed(format!(
                    "handshake rejected with HTTP {}: {body}",
                    status.as_u16()
                )),
                None => WebSocketError::ConnectionFailed(format!(
                    "handshake rejected with HTTP {}",
                    status.as_u16()
                )),
            }
        }
        other => map_ws_error("connect", other),
    }
}

fn close_to_core(frame: Option<TungCloseFrame>) -> Option<WsCloseFrame> {
    frame.map(|f| WsCloseFrame {
        code: u16::from(f.code),
        reason: AsRef::<Bytes>::as_ref(&f.reason).clone(),
    })
}

fn core_to_close(frame: WsCloseFrame) -> TungCloseFrame {
    let reason = Utf8Bytes::try_from(frame.reason).unwrap_or_else(|_| Utf8Bytes::from_static(""));
    TungCloseFrame {
        code: frame.code.into(),
        reason,
    }
}

fn msg_to_frame(msg: TungsteniteMessage) -> Option<WsFrame> {
    match msg {
        TungsteniteMessage::Text(text) => Some(WsFrame::Text(AsRef::<Bytes>::as_ref(&text).clone())),
        TungsteniteMessage::Binary(bytes) => Some(WsFrame::Binary(bytes)),
        TungsteniteMessage::Ping(bytes) => Some(WsFrame::Ping(bytes)),
        TungsteniteMessage::Pong(bytes) => Some(WsFrame::Pong(bytes)),
        TungsteniteMessage::Close(frame) => Some(WsFrame::Close(close_to_core(frame))),
        // Raw frames only surface when writing; never yielded by the reader.
        TungsteniteMessage::Frame(_) => None,
    }
}

fn frame_to_msg(frame: WsFrame) -> TungsteniteMessage {
    match frame {
        WsFrame::Text(bytes) => match Utf8Bytes::try_from(bytes.clone()) {
            Ok(text) => TungsteniteMessage::Text(text),
            Err(_) => TungsteniteMessage::Binary(bytes),
        },
        WsFrame::Binary(bytes) => TungsteniteMessage::Binary(bytes),
        WsFrame::Ping(bytes) => TungsteniteMessage::Ping(bytes),
        WsFrame::Pong(bytes) => TungsteniteMessage::Pong(bytes),
        WsFrame::Close(frame) => TungsteniteMessage::Close(frame.map(core_to_close)),
    }
}

/// `tokio-tungstenite` transport over rustls.
///
/// Without an explicit connector, `wss://` endpoints are verified against the
/// bundled webpki roots.
#[derive(Clone, Default)]
pub struct TungsteniteTransport {
    connector: Option<Connector>,
}

impl TungsteniteTransport {
    pub fn with_connector(connector: Connector) -> Self {
        Self {
            connector: Some(connector),
        }
    }

    pub fn rustls(config: Arc<rustls::ClientConfig>) -> Self {
        Self::with_connector(Connector::Rustls(config))
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TungsteniteReader {
    inner: futures_util::stream::SplitStream<WsStream>,
}

impl Stream for TungsteniteReader {
    type Item = Result<WsFrame, WebSocketError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            return match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(msg))) => match msg_to_frame(msg) {
                    Some(frame) => Poll::Ready(Some(Ok(frame))),
                    None => continue,
                },
                Poll::Ready(Some(Err(err))) => Poll::Ready(Some(Err(map_ws_error("read", err)))),
                Poll::Ready(None) => Poll::Ready(None),
                Poll::Pending => Poll::Pending,
            };
        }
    }
}

pub struct TungsteniteWriter {
    inner: futures_util::stream::SplitSink<WsStream, TungsteniteMessage>,
}

impl Sink<WsFrame> for TungsteniteWriter {
    type Error = WebSocketError;

    fn poll_ready(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.inner)
            .poll_ready(cx)
            .map_err(|e| map_ws_error("write", e))
    }

    fn start_send(mut self: Pin<&mut Self>, item: WsFrame) -> Result<(), Self::Error> {
        Pin::new(&mut self.inner)
            .start_send(frame_to_msg(item))
            .map_err(|e| map_ws_error("write", e))
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.inner)
            .poll_flush(cx)
            .map_err(|e| map_ws_error("write", e))
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.inner)
            .poll_close(cx)
            .map_err(|e| map_ws_error("write", e))
    }
}

fn build_request(
    request: &WsConnectRequest,
) -> Result<http::Request<()>, WebSocketError> {
    let mut http_request = request
        .url
        .as_str()
        .into_client_request()
        .map_err(|e| map_ws_error("request", e))?;

    let headers = http_request.headers_mut();
    for (name, value) in &request.headers {
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| map_ws_error("header", e))?;
        let value = HeaderValue::from_str(value).map_err(|e| map_ws_error("header", e))?;
        headers.append(name, value);
    }
    Ok(http_request)
}

impl WsTransport for TungsteniteTransport {
    type Reader = TungsteniteReader;
    type Writer = TungsteniteWriter;

    fn connect(
        &self,
        request: WsConnectRequest,
        buffers: WebSocketBufferConfig,
    ) -> WsConnectFuture<Self::Reader, Self::Writer> {
        let connector = if request.tls.validate_certs {
            self.connector.clone()
        } else {
            Some(Connector::Rustls(insecure_client_config()))
        };

        Box::pin(async move {
            install_rustls_crypto_provider();

            let mut config = WebSocketConfig::default();
            config.max_message_size = Some(buffers.max_message_bytes);
            config.max_frame_size = Some(buffers.max_frame_bytes);
            config.write_buffer_size = buffers.write_buffer_bytes;
            config.max_write_buffer_size = buffers.max_write_buffer_bytes;

            let http_request = build_request(&request)?;
            debug!(url = %request.url, headers = request.headers.len(), "opening websocket");

            let (stream, response) =
                connect_async_tls_with_config(http_request, Some(config), false, connector)
                    .await
                    .map_err(map_connect_error)?;
            debug!(status = %response.status(), "websocket handshake complete");

            let (write, read) = stream.split();
            Ok((
                TungsteniteReader { inner: read },
                TungsteniteWriter { inner: write },
            ))
        })
    }
}
