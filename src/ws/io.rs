//! Reader and writer tasks for one established connection.
//!
//! Both run outside the actor and report back through `tell`; every report
//! carries the connection epoch so the manager can drop reports from a
//! connection it has already replaced.

use futures_util::{SinkExt, StreamExt};
use kameo::prelude::ActorRef;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use super::manager::{ConnectionManager, ManagerSignal};
use crate::core::WsFrame;
use crate::transport::WsTransport;

pub(crate) fn spawn_reader<T: WsTransport>(
    mut reader: T::Reader,
    actor_ref: ActorRef<ConnectionManager<T>>,
    epoch: u64,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match reader.next().await {
                Some(Ok(frame)) => {
                    let is_close = matches!(frame, WsFrame::Close(_));
                    if actor_ref
                        .tell(ManagerSignal::Inbound { epoch, frame })
                        .send()
                        .await
                        .is_err()
                        || is_close
                    {
                        break;
                    }
                }
                Some(Err(err)) => {
                    let _ = actor_ref
                        .tell(ManagerSignal::ReaderEnded {
                            epoch,
                            error: Some(err.to_string()),
                        })
                        .send()
                        .await;
                    break;
                }
                None => {
                    let _ = actor_ref
                        .tell(ManagerSignal::ReaderEnded { epoch, error: None })
                        .send()
                        .await;
                    break;
                }
            }
        }
        debug!(epoch, "reader task finished");
    })
}

/// Drains queued frames into the transport. A queued close frame is the last
/// thing written; the sink is then closed and `WriterClosed` reported.
pub(crate) fn spawn_writer<T: WsTransport>(
    mut writer: T::Writer,
    mut outbound: mpsc::UnboundedReceiver<WsFrame>,
    actor_ref: ActorRef<ConnectionManager<T>>,
    epoch: u64,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            let closing = matches!(frame, WsFrame::Close(_));
            if let Err(err) = writer.send(frame).await {
                let _ = actor_ref
                    .tell(ManagerSignal::WriterFailed {
                        epoch,
                        error: err.to_string(),
                    })
                    .send()
                    .await;
                return;
            }
            if closing {
                break;
            }
        }

        let _ = writer.close().await;
        let _ = actor_ref
            .tell(ManagerSignal::WriterClosed { epoch })
            .send()
            .await;
        debug!(epoch, "writer task finished");
    })
}
