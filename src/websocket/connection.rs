//! Per-connection pump between the WebSocket and the session core.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use webcli_core::{ClientFrame, ServerFrame, Session};

use crate::server::{AppState, SessionPermit};

/// Bridge one socket to a session task.
///
/// When this loop ends (client close, socket error, or idle timeout) the
/// inbound channel closes and we wait for the session to finish its
/// teardown, so no privileged subprocess outlives the connection. The
/// permit holds the connection's slot in the session budget until then.
pub async fn handle_socket(socket: WebSocket, state: Arc<AppState>, permit: SessionPermit) {
    let _permit = permit;
    let (mut sender, mut receiver) = socket.split();
    let (in_tx, in_rx) = mpsc::unbounded_channel::<ClientFrame>();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ServerFrame>();

    let session = Session::new(in_rx, out_tx);
    let session_id = session.id();
    info!(session = %session_id, "websocket connected");
    let session_task = tokio::spawn(session.run(state.services.clone()));

    let idle_secs = state.config.security.idle_timeout_secs;
    let idle_period = Duration::from_secs(idle_secs.max(1));
    let idle = tokio::time::sleep(idle_period);
    tokio::pin!(idle);

    loop {
        tokio::select! {
            msg = receiver.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if idle_secs > 0 {
                        idle.as_mut().reset(Instant::now() + idle_period);
                    }
                    match serde_json::from_str::<ClientFrame>(&text) {
                        Ok(frame) => {
                            if in_tx.send(frame).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            debug!(session = %session_id, error = %e, "ignoring malformed frame");
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    info!(session = %session_id, "client closed");
                    break;
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = sender.send(Message::Pong(data)).await;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(session = %session_id, error = %e, "websocket error");
                    break;
                }
            },
            frame = out_rx.recv() => match frame {
                Some(frame) => match serde_json::to_string(&frame) {
                    Ok(json) => {
                        if sender.send(Message::Text(json)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "could not encode frame"),
                },
                None => {
                    debug!(session = %session_id, "session ended");
                    break;
                }
            },
            _ = &mut idle, if idle_secs > 0 => {
                info!(session = %session_id, "idle timeout; closing");
                let _ = sender.send(Message::Close(None)).await;
                break;
            }
        }
    }

    // Close the inbound channel, then wait for the session's teardown.
    drop(in_tx);
    if let Err(e) = session_task.await {
        warn!(session = %session_id, error = %e, "session task failed");
    }
    info!(session = %session_id, "websocket closed");
}
