//! JSON-over-HTTP control surface plus a server-sent event stream and a
//! websocket command channel for front-ends.
//!
//! Handlers are thin: each one parses its input, calls the session
//! coordinator and writes the [`Outcome`] back. Failed outcomes answer 400.

mod frontend;

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::future::Future;

use axum::Router;
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Multipart, Query, State};
use axum::http::{StatusCode, header};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sonic_rs::JsonValueTrait;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::{Stream, StreamExt};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::codec::{MessageFormat, MessageValue};
use crate::core::{ConfigPatch, DEFAULT_MAX_PAYLOAD_BYTES};
use crate::journal::JournalQuery;
use crate::session::{FileInfo, FileUpload, Notification, Outcome, SessionCoordinator};
use crate::transport::{TungsteniteTransport, WsTransport};

/// Request bodies may exceed the payload limit by this much (multipart framing).
const BODY_OVERHEAD_BYTES: usize = 64 * 1024;

pub struct AppState<T: WsTransport = TungsteniteTransport> {
    pub session: SessionCoordinator<T>,
    pub notifications: broadcast::Sender<Notification>,
    pub max_upload_bytes: usize,
}

impl<T: WsTransport> Clone for AppState<T> {
    fn clone(&self) -> Self {
        Self {
            session: self.session.clone(),
            notifications: self.notifications.clone(),
            max_upload_bytes: self.max_upload_bytes,
        }
    }
}

impl<T: WsTransport> AppState<T> {
    pub fn new(
        session: SessionCoordinator<T>,
        notifications: broadcast::Sender<Notification>,
    ) -> Self {
        Self {
            session,
            notifications,
            max_upload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
        }
    }
}

pub fn router<T: WsTransport>(state: AppState<T>) -> Router {
    let body_limit = state.max_upload_bytes.saturating_add(BODY_OVERHEAD_BYTES);
    let api = Router::new()
        .route("/status", get(status::<T>))
        .route("/config", post(update_config::<T>))
        .route("/connect", post(connect::<T>))
        .route("/disconnect", post(disconnect::<T>))
        .route("/keepalive/start", post(start_keep_alive::<T>))
        .route("/keepalive/stop", post(stop_keep_alive::<T>))
        .route("/keepalive/send", post(send_keep_alive::<T>))
        .route("/send", post(send::<T>))
        .route("/send-file", post(send_file::<T>))
        .route("/messages", get(messages::<T>).delete(clear_messages::<T>))
        .route("/events", get(events::<T>));

    Router::new()
        .nest("/api", api)
        .route("/ws", get(frontend::upgrade::<T>))
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Serve until `shutdown` resolves.
pub async fn serve<T, F>(listener: TcpListener, state: AppState<T>, shutdown: F) -> std::io::Result<()>
where
    T: WsTransport,
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    info!(%addr, "control surface listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

fn json_response<B: Serialize>(status: StatusCode, body: &B) -> Response {
    match sonic_rs::to_string(body) {
        Ok(json) => (status, [(header::CONTENT_TYPE, "application/json")], json).into_response(),
        Err(err) => {
            warn!(error = %err, "failed to serialize response");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
        }
    }
}

fn reply<D: Serialize>(outcome: Outcome<D>) -> Response {
    let status = if outcome.success {
        StatusCode::OK
    } else {
        StatusCode::BAD_REQUEST
    };
    json_response(status, &outcome)
}

fn bad_request(message: impl Into<String>) -> Response {
    let outcome = Outcome::<()> {
        success: false,
        data: None,
        error: Some(message.into()),
        errors: None,
    };
    json_response(StatusCode::BAD_REQUEST, &outcome)
}

/// An empty body reads as the default value.
fn parse_body<B: DeserializeOwned + Default>(body: &[u8]) -> Result<B, Response> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(B::default());
    }
    sonic_rs::from_slice(body).map_err(|err| bad_request(format!("invalid request body: {err}")))
}

async fn status<T: WsTransport>(State(state): State<AppState<T>>) -> Response {
    let outcome = state.session.get_status().await;
    match outcome.data {
        Some(report) => json_response(StatusCode::OK, &report),
        None => json_response(StatusCode::INTERNAL_SERVER_ERROR, &outcome),
    }
}

async fn update_config<T: WsTransport>(State(state): State<AppState<T>>, body: Bytes) -> Response {
    let patch: ConfigPatch = match parse_body(&body) {
        Ok(patch) => patch,
        Err(response) => return response,
    };
    reply(state.session.update_config(patch).await)
}

#[derive(Debug, Default, Deserialize)]
struct ConnectBody {
    url: Option<String>,
}

async fn connect<T: WsTransport>(State(state): State<AppState<T>>, body: Bytes) -> Response {
    let request: ConnectBody = match parse_body(&body) {
        Ok(request) => request,
        Err(response) => return response,
    };
    reply(state.session.connect(request.url).await)
}

async fn disconnect<T: WsTransport>(State(state): State<AppState<T>>) -> Response {
    reply(state.session.disconnect().await)
}

async fn start_keep_alive<T: WsTransport>(State(state): State<AppState<T>>) -> Response {
    reply(state.session.start_keep_alive().await)
}

async fn stop_keep_alive<T: WsTransport>(State(state): State<AppState<T>>) -> Response {
    reply(state.session.stop_keep_alive().await)
}

async fn send_keep_alive<T: WsTransport>(State(state): State<AppState<T>>) -> Response {
    reply(state.session.send_once_keep_alive().await)
}

#[derive(Debug, Default, Deserialize)]
struct SendBody {
    data: Option<sonic_rs::Value>,
    #[serde(default)]
    format: MessageFormat,
    #[serde(default)]
    binary: bool,
}

/// Strings are sent as given; any other JSON value is sent structured.
fn message_value(data: sonic_rs::Value) -> MessageValue {
    match data.as_str() {
        Some(text) => MessageValue::Text(text.to_string()),
        None => MessageValue::Json(data),
    }
}

async fn send<T: WsTransport>(State(state): State<AppState<T>>, body: Bytes) -> Response {
    let request: SendBody = match parse_body(&body) {
        Ok(request) => request,
        Err(response) => return response,
    };
    let Some(data) = request.data else {
        return bad_request("data is required");
    };
    reply(
        state
            .session
            .send_message(message_value(data), request.format, request.binary)
            .await,
    )
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SendFileReply {
    success: bool,
    file_info: FileInfo,
}

async fn send_file<T: WsTransport>(
    State(state): State<AppState<T>>,
    mut multipart: Multipart,
) -> Response {
    let mut upload: Option<FileUpload> = None;
    let mut format = None;
    let mut metadata = BTreeMap::new();

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(err) => return bad_request(format!("invalid upload: {err}")),
        };
        let field_name = field.name().unwrap_or_default().to_string();
        match field_name.as_str() {
            "file" => {
                let name = field.file_name().unwrap_or("upload").to_string();
                match field.bytes().await {
                    Ok(data) => {
                        upload = Some(FileUpload {
                            name,
                            data,
                            metadata: BTreeMap::new(),
                        })
                    }
                    Err(err) => return bad_request(format!("invalid upload: {err}")),
                }
            }
            "format" => match field.text().await.map(|text| text.parse::<MessageFormat>()) {
                Ok(Ok(parsed)) => format = Some(parsed),
                Ok(Err(err)) => return bad_request(err.to_string()),
                Err(err) => return bad_request(format!("invalid upload: {err}")),
            },
            "metadata" => {
                let text = match field.text().await {
                    Ok(text) => text,
                    Err(err) => return bad_request(format!("invalid upload: {err}")),
                };
                if text.trim().is_empty() {
                    continue;
                }
                match sonic_rs::from_str::<BTreeMap<String, sonic_rs::Value>>(&text) {
                    Ok(parsed) => metadata = parsed,
                    Err(err) => return bad_request(format!("invalid metadata: {err}")),
                }
            }
            other => debug!(field = other, "ignoring upload field"),
        }
    }

    let Some(mut upload) = upload else {
        return bad_request("no file uploaded");
    };
    upload.metadata = metadata;

    let outcome = state.session.send_file(upload, format).await;
    match outcome.data {
        Some(file_info) if outcome.success => json_response(
            StatusCode::OK,
            &SendFileReply {
                success: true,
                file_info,
            },
        ),
        _ => reply(Outcome::<()> {
            success: false,
            data: None,
            error: outcome.error,
            errors: outcome.errors,
        }),
    }
}

async fn messages<T: WsTransport>(
    State(state): State<AppState<T>>,
    Query(query): Query<JournalQuery>,
) -> Response {
    reply(state.session.get_messages(query).await)
}

async fn clear_messages<T: WsTransport>(State(state): State<AppState<T>>) -> Response {
    reply(state.session.clear_messages().await)
}

async fn events<T: WsTransport>(
    State(state): State<AppState<T>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = BroadcastStream::new(state.notifications.subscribe()).filter_map(|item| {
        let notification = match item {
            Ok(notification) => notification,
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                debug!(skipped, "event subscriber lagged");
                return None;
            }
        };
        match notification.payload_json() {
            Ok(data) => Some(Ok::<_, Infallible>(
                Event::default().event(notification.event_name()).data(data),
            )),
            Err(err) => {
                warn!(error = %err, "failed to encode notification");
                None
            }
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}
