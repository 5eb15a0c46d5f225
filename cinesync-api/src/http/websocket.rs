//! Room WebSocket connections.
//!
//! Each connection runs a reader and a writer: the reader parses binary
//! envelopes and routes them into the room, the writer drains the client's
//! send queue to the socket under a write deadline. Either side failing
//! closes the other.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use tracing::{debug, info};

use cinesync_core::message::{Envelope, MessageType, Payload};
use cinesync_core::models::{Permission, User};
use cinesync_core::op::{Client, Room};
use cinesync_core::{Error, Result};

use super::auth::{auth_room, auth_user, extract_room_id, extract_token};
use super::error::ApiResult;
use super::room::RoomQuery;
use crate::AppState;

/// Socket write deadline; a writer stuck longer than this is a dead peer.
const WRITE_DEADLINE: Duration = Duration::from_secs(10);

const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// GET /api/room/ws
pub async fn ws_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<RoomQuery>,
    ws: WebSocketUpgrade,
) -> ApiResult<Response> {
    let user = auth_user(&state, &headers, query.token.as_deref()).await?;
    let room_id = extract_room_id(&headers, query.room_id.as_deref(), None)?;
    let room_entry = auth_room(&state, &room_id).await?;
    let room = room_entry.value().clone();
    room.has_permission(user.value(), Permission::GET_MOVIE_LIST)
        .await?;

    let user = user.value().clone();
    let mut ws = ws.max_message_size(MAX_MESSAGE_SIZE);
    // Echo the offered subprotocol (the token rides in it for browsers).
    if headers.contains_key("Sec-WebSocket-Protocol") {
        if let Some(token) = extract_token(&headers, None) {
            ws = ws.protocols([token]);
        }
    }
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, room, user)))
}

async fn handle_socket(socket: WebSocket, room: Arc<Room>, user: User) {
    let (client, mut queue) = match room.new_client(&user) {
        Ok(pair) => pair,
        Err(err) => {
            debug!(error = %err, "failed to register client");
            return;
        }
    };
    info!(
        room_id = %client.room_id(),
        user_id = %user.id,
        conn_id = %client.conn_id(),
        "websocket connected"
    );

    let (mut sink, mut stream) = socket.split();

    // Writer: drain the send queue under the write deadline.
    let writer_client = client.clone();
    let writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                maybe = queue.recv() => match maybe {
                    Some(envelope) => {
                        let frame = WsMessage::Binary(envelope.to_bytes());
                        match tokio::time::timeout(WRITE_DEADLINE, sink.send(frame)).await {
                            Ok(Ok(())) => {}
                            _ => {
                                let _ = writer_client.close();
                                break;
                            }
                        }
                    }
                    None => break,
                },
                _ = writer_client.wait_closed() => break,
            }
        }
        let _ = sink.close().await;
    });

    // Late joiners sync from the current state immediately.
    let _ = client.try_send(Envelope::current(&room.current()));

    while let Some(message) = stream.next().await {
        match message {
            Ok(WsMessage::Binary(bytes)) => {
                if let Err(err) = handle_message(&room, &client, &bytes).await {
                    // Per-message failures go back to the sender only.
                    let _ = client.try_send(Envelope::error(err.to_string()));
                }
            }
            Ok(WsMessage::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
        if client.is_closed() {
            break;
        }
    }

    room.drop_client(&client);
    let _ = writer.await;
    info!(
        room_id = %client.room_id(),
        user_id = %user.id,
        conn_id = %client.conn_id(),
        "websocket disconnected"
    );
}

/// Transit-delay compensation: the client stamps the envelope with its send
/// time; the difference to our clock approximates the one-way delay.
fn time_diff_seconds(sent_at_millis: i64) -> f64 {
    if sent_at_millis <= 0 {
        return 0.0;
    }
    let diff = (chrono::Utc::now().timestamp_millis() - sent_at_millis) as f64 / 1000.0;
    diff.clamp(-10.0, 10.0)
}

async fn handle_message(room: &Arc<Room>, client: &Arc<Client>, bytes: &[u8]) -> Result<()> {
    let envelope = Envelope::from_bytes(bytes)
        .map_err(|e| Error::InvalidInput(format!("bad message frame: {e}")))?;

    match envelope.message_type() {
        MessageType::Chat => {
            let Some(Payload::ChatContent(content)) = envelope.payload else {
                return Err(Error::InvalidInput("chat message without content".into()));
            };
            room.send_chat(client, content).await
        }
        MessageType::Status => {
            let Some(Payload::PlaybackStatus(status)) = envelope.payload else {
                return Err(Error::InvalidInput("status message without status".into()));
            };
            room.set_status(
                client,
                status.is_playing,
                status.current_time,
                status.playback_rate,
                time_diff_seconds(envelope.timestamp),
            )
            .await
            .map(|_| ())
        }
        MessageType::Ping => client.try_send(Envelope::ping()),
        other => Err(Error::InvalidInput(format!(
            "unexpected message type {other:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_diff_clamped() {
        assert!((time_diff_seconds(0) - 0.0).abs() < f64::EPSILON);
        assert!((time_diff_seconds(-5) - 0.0).abs() < f64::EPSILON);

        let now = chrono::Utc::now().timestamp_millis();
        let small = time_diff_seconds(now - 250);
        assert!(small > 0.2 && small < 0.35);

        // An hour of clock skew clamps instead of warping the seek.
        assert!((time_diff_seconds(now - 3_600_000) - 10.0).abs() < f64::EPSILON);
        assert!((time_diff_seconds(now + 3_600_000) + 10.0).abs() < f64::EPSILON);
    }
}
