//! Per-client read and write pumps for a hub WebSocket connection.

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use chrono::Utc;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::hub::message::{ClientMessage, ServerMessage};
use crate::hub::{ClientHandle, Hub};

/// Time allowed to write a message to the peer.
pub(crate) const WRITE_WAIT: Duration = Duration::from_secs(10);
/// Time allowed between reads before the peer is considered dead. Client
/// pongs (and any other inbound frame) reset the deadline.
pub(crate) const PONG_WAIT: Duration = Duration::from_secs(60);
/// Ping interval; must be shorter than [`PONG_WAIT`].
pub(crate) const PING_PERIOD: Duration = Duration::from_secs(54);
/// Maximum inbound frame size in bytes.
pub(crate) const MAX_MESSAGE_SIZE: usize = 1024;

/// Drive one WebSocket connection: register with the hub, run both pumps,
/// and unregister when either pump observes an error or the hub evicts us.
pub(crate) async fn serve(hub: Hub, socket: WebSocket) {
    let id = Uuid::new_v4();
    let (ws_tx, ws_rx) = socket.split();
    let (out_tx, out_rx) = mpsc::channel::<String>(super::OUTBOUND_CAPACITY);
    let (kill_tx, kill_rx) = watch::channel(false);

    hub.register(ClientHandle {
        id,
        out: out_tx.clone(),
        kill: kill_tx,
    })
    .await;
    info!(client = %id, "websocket client connected");

    let writer = tokio::spawn(write_pump(ws_tx, out_rx));
    read_pump(&hub, id, &out_tx, ws_rx, kill_rx).await;

    hub.unregister(id).await;
    drop(out_tx);
    let _ = writer.await;
    info!(client = %id, "websocket client disconnected");
}

/// Reads client frames until the socket errors, the pong deadline expires,
/// or the hub signals teardown.
async fn read_pump(
    hub: &Hub,
    id: Uuid,
    out: &mpsc::Sender<String>,
    mut ws_rx: SplitStream<WebSocket>,
    mut kill_rx: watch::Receiver<bool>,
) {
    loop {
        let frame = tokio::select! {
            _ = kill_rx.changed() => {
                debug!(client = %id, "read pump stopped by hub");
                return;
            }
            read = tokio::time::timeout(PONG_WAIT, ws_rx.next()) => match read {
                Err(_) => {
                    debug!(client = %id, "liveness deadline expired");
                    return;
                }
                Ok(None) => return,
                Ok(Some(Err(e))) => {
                    debug!(client = %id, error = %e, "websocket read error");
                    return;
                }
                Ok(Some(Ok(frame))) => frame,
            },
        };

        match frame {
            Message::Text(text) => handle_client_message(hub, id, out, &text).await,
            Message::Close(_) => return,
            // Pongs (and pings, answered by the protocol layer) only serve
            // to reset the read deadline above.
            Message::Ping(_) | Message::Pong(_) | Message::Binary(_) => {}
        }
    }
}

async fn handle_client_message(hub: &Hub, id: Uuid, out: &mpsc::Sender<String>, text: &str) {
    let msg = match serde_json::from_str::<ClientMessage>(text) {
        Ok(msg) => msg,
        Err(e) => {
            warn!(client = %id, error = %e, "invalid client message");
            return;
        }
    };

    match msg {
        ClientMessage::Subscribe { payload } => hub.subscribe(id, out, payload.event_id).await,
        ClientMessage::Unsubscribe { payload } => hub.unsubscribe(id, payload.event_id).await,
        ClientMessage::Ping => {
            let pong = ServerMessage::pong(Utc::now().timestamp_millis());
            if let Some(frame) = pong.to_frame() {
                let _ = out.try_send(frame);
            }
        }
    }
}

/// Writes queued outbound frames and periodic pings. Exits with a close
/// frame once the hub has dropped the queue and the backlog is drained.
async fn write_pump(mut ws_tx: SplitSink<WebSocket, Message>, mut out_rx: mpsc::Receiver<String>) {
    let start = tokio::time::Instant::now() + PING_PERIOD;
    let mut ping = tokio::time::interval_at(start, PING_PERIOD);

    loop {
        tokio::select! {
            queued = out_rx.recv() => match queued {
                None => {
                    // Queue closed by the hub.
                    let _ = ws_tx.send(Message::Close(None)).await;
                    return;
                }
                Some(first) => {
                    // Coalesce the remaining backlog into the same frame.
                    let mut frame = first;
                    while let Ok(next) = out_rx.try_recv() {
                        frame.push('\n');
                        frame.push_str(&next);
                    }
                    match tokio::time::timeout(WRITE_WAIT, ws_tx.send(Message::Text(frame))).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            debug!(error = %e, "websocket write error");
                            return;
                        }
                        Err(_) => {
                            debug!("websocket write deadline expired");
                            return;
                        }
                    }
                }
            },
            _ = ping.tick() => {
                match tokio::time::timeout(WRITE_WAIT, ws_tx.send(Message::Ping(Vec::new()))).await {
                    Ok(Ok(())) => {}
                    _ => return,
                }
            }
        }
    }
}
