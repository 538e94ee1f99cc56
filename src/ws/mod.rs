mod io;
pub mod manager;

use kameo::error::SendError;

use crate::core::WebSocketError;

pub use manager::*;

/// Collapse a failed `ask` into the crate error: handler errors pass through,
/// mailbox failures become [`WebSocketError::Actor`].
pub fn flatten_send_error<M>(err: SendError<M, WebSocketError>) -> WebSocketError {
    match err {
        SendError::HandlerError(err) => err,
        SendError::ActorNotRunning(_) | SendError::ActorStopped => {
            WebSocketError::Actor("connection manager is not running".to_string())
        }
        _ => WebSocketError::Actor("connection manager did not respond".to_string()),
    }
}
