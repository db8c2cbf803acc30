//! WebSocket endpoint — GET /ws/chat/{room_id}.
//!
//! The session cookie authenticates the upgrade; membership is checked
//! before the transport joins the hub. Unauthenticated sockets close with
//! 4001, non-members with 4003, message-rate abusers with 4008 only when
//! they also stall the room queue.

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    http::HeaderMap,
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

use mathia_core::config::{HEARTBEAT_INTERVAL_SECS, MAX_PAYLOAD_BYTES};
use mathia_core::types::{RoomId, UserId};
use mathia_protocol::{close, ClientCommand, ServerFrame};

use crate::app::AppState;
use crate::auth::session_user_from_headers;
use crate::pipeline;

/// Axum handler — upgrades HTTP to WebSocket.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(room_id): Path<String>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    // resolve the cookie before the upgrade; the close code is delivered
    // on the socket because the HTTP response is already 101 by then
    let auth = session_user_from_headers(&state, &headers);
    ws.on_upgrade(move |socket| handle_connection(socket, state, RoomId::from(room_id), auth))
}

async fn handle_connection(
    mut socket: WebSocket,
    state: Arc<AppState>,
    room: RoomId,
    auth: Option<UserId>,
) {
    let Some(user) = auth else {
        close_with(socket, close::UNAUTHENTICATED, "unauthenticated").await;
        return;
    };

    // admission: membership may have changed since the page loaded
    match state.store.is_member(&room, &user) {
        Ok(true) => {}
        Ok(false) => {
            warn!(room_id = %room, user_id = %user, "ws join forbidden");
            close_with(socket, close::FORBIDDEN, "not a room member").await;
            return;
        }
        Err(e) => {
            warn!(room_id = %room, err = %e, "membership check failed");
            close_with(socket, close::INTERNAL, "internal error").await;
            return;
        }
    }

    let session = uuid::Uuid::new_v4().to_string();
    info!(room_id = %room, user_id = %user, session = %session, "ws connected");

    let (outbound_tx, mut outbound_rx) = mpsc::channel::<String>(256);
    let snapshot = state.hub.join(&room, &user, &session, outbound_tx);

    let (mut sink, mut stream) = socket.split();
    if sink
        .send(Message::Text(snapshot.to_json().into()))
        .await
        .is_err()
    {
        state.hub.leave(&room, &user, &session);
        return;
    }

    let mut heartbeat =
        tokio::time::interval(std::time::Duration::from_secs(HEARTBEAT_INTERVAL_SECS));
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    heartbeat.tick().await; // consume the immediate first tick

    let mut close_code: Option<(u16, String)> = None;

    loop {
        tokio::select! {
            // client sent us something
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        let text_ref: &str = &text;
                        if text_ref.len() > MAX_PAYLOAD_BYTES {
                            warn!(session = %session, size = text_ref.len(), "payload too large, closing");
                            break;
                        }
                        // any inbound frame proves liveness
                        state.hub.touch(&room, &user);
                        match handle_frame(&state, &room, &user, text_ref).await {
                            Ok(()) => {}
                            Err(code_reason) => {
                                close_code = Some(code_reason);
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        state.hub.touch(&room, &user);
                        let _ = sink.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }

            // room fan-out and direct replies → forward to this client
            frame = outbound_rx.recv() => {
                match frame {
                    Some(json) => {
                        if sink.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    // hub dropped us as a slow consumer
                    None => break,
                }
            }

            // server-side heartbeat keeps intermediaries from idling out
            _ = heartbeat.tick() => {
                if sink.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
        }
    }

    state.hub.leave(&room, &user, &session);
    if let Some((code, reason)) = close_code {
        let _ = sink
            .send(Message::Close(Some(CloseFrame {
                code,
                reason: reason.into(),
            })))
            .await;
    }
    info!(room_id = %room, user_id = %user, session = %session, "ws closed");
}

/// Handle one inbound text frame. `Err` carries a close code that
/// terminates the connection; recoverable problems are answered in-band.
async fn handle_frame(
    state: &Arc<AppState>,
    room: &RoomId,
    user: &UserId,
    text: &str,
) -> Result<(), (u16, String)> {
    let command: ClientCommand = match serde_json::from_str(text) {
        Ok(c) => c,
        Err(e) => {
            warn!(user_id = %user, error = %e, "malformed frame, ignoring");
            state.hub.send_to(
                room,
                user,
                &ServerFrame::Error {
                    code: "VALIDATION".to_string(),
                    message: "malformed frame".to_string(),
                },
            );
            return Ok(());
        }
    };

    match command {
        ClientCommand::FetchMessages {
            chatid,
            before,
            limit,
        } => {
            enforce_same_room(room, &chatid)?;
            match pipeline::fetch_messages(state, &chatid, user, before.as_ref(), limit).await {
                Ok(frame) => state.hub.send_to(room, user, &frame),
                Err(e) => send_error(state, room, user, &e),
            }
            Ok(())
        }
        ClientCommand::NewMessage {
            chatid,
            message,
            idempotency_key,
            parent_id,
        } => {
            enforce_same_room(room, &chatid)?;
            match pipeline::handle_new_message(
                state,
                &chatid,
                user,
                &message,
                idempotency_key.as_deref(),
                parent_id.as_ref(),
                Default::default(),
            )
            .await
            {
                Ok(_) => Ok(()),
                Err(e) => match e.ws_close_code() {
                    // membership revoked mid-session or a stalled queue
                    Some(code) if code == close::FORBIDDEN || code == close::INTERNAL => {
                        Err((code, e.code().to_string()))
                    }
                    _ => {
                        send_error(state, room, user, &e);
                        Ok(())
                    }
                },
            }
        }
        ClientCommand::Typing { chatid, from } => {
            enforce_same_room(room, &chatid)?;
            // `from` is advisory; the session identity wins
            let _ = from;
            state.hub.typing(&chatid, user);
            Ok(())
        }
        ClientCommand::FileMessage {
            chatid,
            file_ref,
            kind,
        } => {
            enforce_same_room(room, &chatid)?;
            match pipeline::handle_file_message(state, &chatid, user, &file_ref, kind).await {
                Ok(_) => Ok(()),
                Err(e) => {
                    send_error(state, room, user, &e);
                    Ok(())
                }
            }
        }
        ClientCommand::Ping => {
            state.hub.touch(room, user);
            state.hub.send_to(room, user, &ServerFrame::Pong);
            Ok(())
        }
    }
}

fn enforce_same_room(bound: &RoomId, claimed: &RoomId) -> Result<(), (u16, String)> {
    if bound == claimed {
        Ok(())
    } else {
        Err((close::FORBIDDEN, "chatid does not match socket room".to_string()))
    }
}

fn send_error(
    state: &Arc<AppState>,
    room: &RoomId,
    user: &UserId,
    err: &mathia_core::MathiaError,
) {
    state.hub.send_to(
        room,
        user,
        &ServerFrame::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        },
    );
}

async fn close_with(mut socket: WebSocket, code: u16, reason: &str) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.to_string().into(),
        })))
        .await;
}
