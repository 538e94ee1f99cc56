use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode, header};
use debug_ws::core::{ConnectionConfig, WsFrame};
use debug_ws::http::{AppState, router};
use debug_ws::session::{ConfigStore, Notification, SessionArgs, SessionCoordinator};
use debug_ws::testing::{MockServer, MockTransport};
use futures_util::{SinkExt, StreamExt};
use sonic_rs::{JsonContainerTrait, JsonValueTrait, Value};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as TungMessage;
use tower::ServiceExt;

const WAIT: Duration = Duration::from_secs(30);

async fn app() -> (Router, MockServer) {
    let (transport, server) = MockTransport::channel_pair();
    let (tx, _rx) = broadcast::channel::<Notification>(64);
    let session = SessionCoordinator::start(SessionArgs {
        defaults: ConnectionConfig {
            url: "ws://mock.test/socket".into(),
            inactivity_timeout: 0,
            ..ConnectionConfig::default()
        },
        store: ConfigStore::memory(),
        sink: Arc::new(tx.clone()),
        ..SessionArgs::new(transport)
    })
    .await;
    (router(AppState::new(session, tx)), server)
}

async fn call(app: &Router, method: Method, uri: &str, body: Option<&str>) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    if body.is_some() {
        request = request.header(header::CONTENT_TYPE, "application/json");
    }
    let request = request
        .body(body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty))
        .expect("request");
    let response = app.clone().oneshot(request).await.expect("response");
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
    let json = sonic_rs::from_slice(&bytes).expect("json body");
    (status, json)
}

/// Paused time advances only once the event pump has gone idle.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

#[tokio::test(start_paused = true)]
async fn status_reports_a_closed_connection() {
    let (app, _server) = app().await;
    let (status, body) = call(&app, Method::GET, "/api/status", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.get("state").and_then(|v| v.as_str()), Some("CLOSED"));
    assert_eq!(body.get("messageCount").and_then(|v| v.as_u64()), Some(0));
    assert_eq!(body.get("keepAliveRunning").and_then(|v| v.as_bool()), Some(false));
    let config = body.get("config").expect("config");
    assert_eq!(
        config.get("url").and_then(|v| v.as_str()),
        Some("ws://mock.test/socket")
    );
}

#[tokio::test(start_paused = true)]
async fn invalid_config_returns_every_error() {
    let (app, _server) = app().await;
    let (status, body) = call(
        &app,
        Method::POST,
        "/api/config",
        Some(r#"{"url":"http://x","reconnectDelay":5}"#),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body.get("success").and_then(|v| v.as_bool()), Some(false));
    let errors = body.get("errors").and_then(|v| v.as_array()).expect("errors");
    assert_eq!(errors.len(), 2);

    let (status, _) = call(&app, Method::POST, "/api/config", Some("{not json")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test(start_paused = true)]
async fn config_update_is_visible_in_status() {
    let (app, _server) = app().await;
    let (status, body) = call(
        &app,
        Method::POST,
        "/api/config",
        Some(r#"{"keepAliveMode":"ping","keepAliveInterval":2000}"#),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body:?}");

    let (_, body) = call(&app, Method::GET, "/api/status", None).await;
    let config = body.get("config").expect("config");
    assert_eq!(
        config.get("keepAliveMode").and_then(|v| v.as_str()),
        Some("protocol-ping")
    );
    assert_eq!(config.get("keepAliveInterval").and_then(|v| v.as_u64()), Some(2000));
}

#[tokio::test(start_paused = true)]
async fn send_requires_data_and_an_open_connection() {
    let (app, _server) = app().await;

    let (status, body) = call(&app, Method::POST, "/api/send", Some("{}")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body.get("error").and_then(|v| v.as_str()), Some("data is required"));

    let (status, body) = call(&app, Method::POST, "/api/send", Some(r#"{"data":"hi"}"#)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body.get("error").and_then(|v| v.as_str()), Some("not connected"));

    let (status, body) = call(&app, Method::POST, "/api/keepalive/start", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body.get("error").and_then(|v| v.as_str()), Some("not connected"));
}

#[tokio::test(start_paused = true)]
async fn connect_send_and_read_the_journal() {
    let (app, mut server) = app().await;

    let (status, body) = call(&app, Method::POST, "/api/connect", None).await;
    assert_eq!(status, StatusCode::OK, "{body:?}");
    let mut peer = server.accept_timeout(WAIT).await.expect("peer");
    settle().await;

    let (status, _) = call(
        &app,
        Method::POST,
        "/api/send",
        Some(r#"{"data":{"op":"sub"},"format":"json"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        peer.recv_timeout(WAIT).await,
        Some(WsFrame::text(r#"{"op":"sub"}"#))
    );

    peer.send_text("ack").expect("inbound");
    settle().await;

    let (status, body) = call(&app, Method::GET, "/api/messages?kind=received", None).await;
    assert_eq!(status, StatusCode::OK);
    let entries = body.get("data").and_then(|v| v.as_array()).expect("entries");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].get("payload").and_then(|v| v.as_str()), Some("ack"));
    assert_eq!(entries[0].get("kind").and_then(|v| v.as_str()), Some("received"));

    let (_, body) = call(&app, Method::GET, "/api/messages?limit=1", None).await;
    let entries = body.get("data").and_then(|v| v.as_array()).expect("entries");
    assert_eq!(entries.len(), 1);

    let (status, _) = call(&app, Method::DELETE, "/api/messages", None).await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = call(&app, Method::GET, "/api/messages", None).await;
    assert!(body.get("data").and_then(|v| v.as_array()).expect("entries").is_empty());

    let (status, _) = call(&app, Method::POST, "/api/disconnect", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        peer.recv_timeout(WAIT).await,
        Some(WsFrame::close(1000, "client disconnect"))
    );
}

#[tokio::test(start_paused = true)]
async fn multipart_upload_is_sent_as_a_file_message() {
    let (app, mut server) = app().await;
    call(&app, Method::POST, "/api/connect", None).await;
    let mut peer = server.accept_timeout(WAIT).await.expect("peer");
    settle().await;

    let boundary = "XBOUNDARYX";
    let body = format!(
        "--{boundary}\r\n\
         Content-Disposition: form-data; name=\"file\"; filename=\"data.json\"\r\n\
         Content-Type: application/json\r\n\r\n\
         {{\"a\":1}}\r\n\
         --{boundary}\r\n\
         Content-Disposition: form-data; name=\"metadata\"\r\n\r\n\
         {{\"room\":\"lobby\"}}\r\n\
         --{boundary}--\r\n"
    );
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/send-file")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(body))
        .expect("request");
    let response = app.clone().oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
    let reply: Value = sonic_rs::from_slice(&bytes).expect("json");
    let info = reply.get("fileInfo").expect("fileInfo");
    assert_eq!(info.get("mimeType").and_then(|v| v.as_str()), Some("application/json"));
    assert_eq!(info.get("size").and_then(|v| v.as_u64()), Some(7));

    let Some(WsFrame::Text(raw)) = peer.recv_timeout(WAIT).await else {
        panic!("expected a text frame");
    };
    let sent: Value = sonic_rs::from_slice(&raw).expect("json");
    assert_eq!(sent.get("type").and_then(|v| v.as_str()), Some("file"));
    assert_eq!(sent.get("room").and_then(|v| v.as_str()), Some("lobby"));
}

#[tokio::test(start_paused = true)]
async fn events_endpoint_streams_server_sent_events() {
    let (app, _server) = app().await;
    let request = Request::builder()
        .uri("/api/events")
        .body(Body::empty())
        .expect("request");
    let response = app.oneshot(request).await.expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    assert!(content_type.starts_with("text/event-stream"));
}

async fn next_reply<S>(socket: &mut S) -> Value
where
    S: futures_util::Stream<Item = Result<TungMessage, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let frame = tokio::time::timeout(WAIT, socket.next())
            .await
            .expect("timed out waiting for reply")
            .expect("channel open")
            .expect("frame");
        if let TungMessage::Text(text) = frame {
            return sonic_rs::from_str(text.as_str()).expect("json reply");
        }
    }
}

#[tokio::test]
async fn websocket_channel_answers_heartbeat_commands() {
    let (transport, mut server) = MockTransport::channel_pair();
    let (tx, _rx) = broadcast::channel::<Notification>(64);
    let session = SessionCoordinator::start(SessionArgs {
        defaults: ConnectionConfig {
            url: "ws://mock.test/socket".into(),
            inactivity_timeout: 0,
            ..ConnectionConfig::default()
        },
        store: ConfigStore::memory(),
        sink: Arc::new(tx.clone()),
        ..SessionArgs::new(transport)
    })
    .await;

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(debug_ws::http::serve(
        listener,
        AppState::new(session.clone(), tx),
        std::future::pending(),
    ));
    let (mut socket, _) = connect_async(format!("ws://{addr}/ws"))
        .await
        .expect("front-end channel");

    let heartbeat = r#"{"type":"heartbeat","action":"send"}"#;
    socket.send(TungMessage::text(heartbeat)).await.expect("send");
    let reply = next_reply(&mut socket).await;
    assert_eq!(reply.get("type").and_then(|v| v.as_str()), Some("heartbeat"));
    assert_eq!(reply.get("action").and_then(|v| v.as_str()), Some("result"));
    assert_eq!(reply.get("success").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(reply.get("error").and_then(|v| v.as_str()), Some("not connected"));

    socket.send(TungMessage::text("{oops")).await.expect("send");
    let reply = next_reply(&mut socket).await;
    assert_eq!(reply.get("type").and_then(|v| v.as_str()), Some("error"));
    assert!(reply.get("message").and_then(|v| v.as_str()).is_some());

    assert!(session.connect(None).await.success);
    let mut peer = server.accept_timeout(WAIT).await.expect("peer");
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Unknown commands get no reply, so the next reply belongs to the heartbeat.
    socket
        .send(TungMessage::text(r#"{"type":"status"}"#))
        .await
        .expect("send");
    socket.send(TungMessage::text(heartbeat)).await.expect("send");
    let reply = next_reply(&mut socket).await;
    assert_eq!(reply.get("type").and_then(|v| v.as_str()), Some("heartbeat"));
    assert_eq!(reply.get("success").and_then(|v| v.as_bool()), Some(true));
    assert!(reply.get("error").expect("error key").is_null());
    assert_eq!(peer.recv_timeout(WAIT).await, Some(WsFrame::text("ping")));
}
