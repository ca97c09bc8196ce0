//! WebSocket session lifecycle: one connected participant from upgrade
//! through exactly one room disconnect.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, Instrument};

use super::connection::ClientConnection;
use super::heartbeat::{run_heartbeat, HeartbeatResult};
use crate::config::ServerConfig;
use crate::room::Room;

/// How long the writer gets to flush queued events and send Close.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// The client closed the socket or the read side failed.
    ClientClosed,
    /// No frames within the heartbeat timeout.
    HeartbeatTimeout,
    /// The server is shutting down.
    Shutdown,
    /// The socket write side failed.
    WriterClosed,
}

/// What an inbound frame means for the room.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Inbound<'a> {
    /// A payload to hand to the room.
    Payload(&'a str),
    /// A binary frame that is not UTF-8; dropped.
    Undecodable(usize),
    /// Ping or Pong.
    Control,
    /// The client asked to close.
    Close,
}

pub(crate) fn classify(message: &Message) -> Inbound<'_> {
    match message {
        Message::Text(text) => Inbound::Payload(text.as_str()),
        Message::Binary(data) => match std::str::from_utf8(data) {
            Ok(text) => Inbound::Payload(text),
            Err(_) => Inbound::Undecodable(data.len()),
        },
        Message::Ping(_) | Message::Pong(_) => Inbound::Control,
        Message::Close(_) => Inbound::Close,
    }
}

/// Drive one upgraded socket.
///
/// 1. Registers with the room (which queues `init` and announces `join`)
/// 2. Spawns a writer that drains the outbound queue and sends Ping frames
/// 3. Hands every inbound text payload to the room
/// 4. Ends on close, read error, heartbeat timeout, write failure, or shutdown
/// 5. Disconnects from the room exactly once, then lets the writer send Close
pub async fn run_ws_session(
    ws: WebSocket,
    room: Arc<Room>,
    config: Arc<ServerConfig>,
    shutdown: CancellationToken,
) {
    let (send_tx, send_rx) = mpsc::channel::<Arc<str>>(config.send_queue_capacity);
    let connection = room.connect(send_tx);
    let span = info_span!("ws_session", session_id = %connection.id);

    drive(ws, send_rx, connection, room, config, shutdown)
        .instrument(span)
        .await;
}

async fn drive(
    ws: WebSocket,
    mut send_rx: mpsc::Receiver<Arc<str>>,
    connection: Arc<ClientConnection>,
    room: Arc<Room>,
    config: Arc<ServerConfig>,
    shutdown: CancellationToken,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let session_id = connection.id.clone();

    let ping_every = config.heartbeat_interval();
    let mut outbound = tokio::spawn(
        async move {
            // First tick fires immediately: ping right after the upgrade.
            let mut ping = tokio::time::interval(ping_every);

            loop {
                tokio::select! {
                    msg = send_rx.recv() => match msg {
                        Some(text) => {
                            if ws_tx.send(Message::Text(text.to_string().into())).await.is_err() {
                                return;
                            }
                        }
                        None => break,
                    },
                    _ = ping.tick() => {
                        if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                            return;
                        }
                    }
                }
            }
            let _ = ws_tx.close().await;
        }
        .in_current_span(),
    );

    let cancel = shutdown.child_token();
    let reason = {
        let heartbeat = run_heartbeat(
            Arc::clone(&connection),
            config.heartbeat_interval(),
            config.heartbeat_timeout(),
            cancel.clone(),
        );
        let reader = async {
            while let Some(frame) = ws_rx.next().await {
                let message = match frame {
                    Ok(message) => message,
                    Err(error) => {
                        debug!(%error, "websocket read failed");
                        break;
                    }
                };
                connection.mark_alive();
                match classify(&message) {
                    Inbound::Payload(text) => {
                        let _ = room.handle_message(&session_id, text);
                    }
                    Inbound::Undecodable(len) => debug!(len, "dropping non-UTF8 binary frame"),
                    Inbound::Control => {}
                    Inbound::Close => {
                        debug!("client sent close frame");
                        break;
                    }
                }
            }
        };
        tokio::pin!(heartbeat, reader);

        tokio::select! {
            () = &mut reader => EndReason::ClientClosed,
            result = &mut heartbeat => match result {
                HeartbeatResult::TimedOut => EndReason::HeartbeatTimeout,
                HeartbeatResult::Cancelled => EndReason::Shutdown,
            },
            _ = &mut outbound => EndReason::WriterClosed,
        }
    };
    cancel.cancel();

    let _ = room.disconnect(&session_id);
    let dropped_messages = connection.drop_count();
    let connected_secs = connection.age().as_secs();
    // Last sender handle: the writer sees the queue close once this is gone.
    drop(connection);

    if reason != EndReason::WriterClosed
        && tokio::time::timeout(CLOSE_GRACE, &mut outbound).await.is_err()
    {
        outbound.abort();
    }

    info!(?reason, dropped_messages, connected_secs, "client disconnected");
}
