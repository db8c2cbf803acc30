//! Thin room/message read APIs: room list, read markers, pins, replies.
//! All delegate to the store; decryption happens here at the egress
//! boundary, exactly as on the WS path.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};

use mathia_core::types::{MessageId, RoomId};

use crate::app::AppState;
use crate::auth::SessionUser;

type ApiError = (StatusCode, Json<Value>);

fn forbidden() -> ApiError {
    (
        StatusCode::FORBIDDEN,
        Json(json!({"error": "not a room member"})),
    )
}

fn internal(e: impl std::fmt::Display) -> ApiError {
    tracing::warn!(err = %e, "rooms api error");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": "internal error"})),
    )
}

pub async fn list_rooms(
    State(state): State<Arc<AppState>>,
    SessionUser(user): SessionUser,
) -> Result<Json<Value>, ApiError> {
    let rooms = state.store.rooms_of(&user).map_err(internal)?;
    Ok(Json(json!({ "rooms": rooms })))
}

pub async fn mark_read(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    SessionUser(user): SessionUser,
) -> Result<Json<Value>, ApiError> {
    let room = RoomId::from(id);
    if !state.store.is_member(&room, &user).map_err(internal)? {
        return Err(forbidden());
    }
    state.store.mark_read(&room, &user).map_err(internal)?;
    Ok(Json(json!({"ok": true})))
}

pub async fn list_pins(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    SessionUser(user): SessionUser,
) -> Result<Json<Value>, ApiError> {
    let room = RoomId::from(id);
    if !state.store.is_member(&room, &user).map_err(internal)? {
        return Err(forbidden());
    }
    let pinned = state.store.pinned_messages(&room).map_err(internal)?;
    let views: Vec<_> = pinned.iter().map(|rec| state.view_of(rec)).collect();
    Ok(Json(json!({ "pins": views })))
}

pub async fn pin_message(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    SessionUser(user): SessionUser,
) -> Result<Json<Value>, ApiError> {
    let message = MessageId::from(id);
    let rec = state
        .store
        .get_message(&message)
        .map_err(internal)?
        .ok_or((
            StatusCode::NOT_FOUND,
            Json(json!({"error": "unknown message"})),
        ))?;
    if !state
        .store
        .is_member(&rec.room_id, &user)
        .map_err(internal)?
    {
        return Err(forbidden());
    }
    state
        .store
        .pin_message(&rec.room_id, &message, &user)
        .map_err(internal)?;
    Ok(Json(json!({"ok": true})))
}

/// Admin action: write a new room key version. History stays decryptable
/// under the retained old versions.
pub async fn rotate_key(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    SessionUser(user): SessionUser,
) -> Result<Json<Value>, ApiError> {
    let room = RoomId::from(id);
    let record = state
        .store
        .get_room(&room)
        .map_err(internal)?
        .ok_or((StatusCode::NOT_FOUND, Json(json!({"error": "unknown room"}))))?;
    if record.owner_id != user {
        return Err(forbidden());
    }
    let version = state.rotate_room_key(&room).map_err(internal)?;
    Ok(Json(json!({"ok": true, "version": version})))
}

pub async fn list_replies(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    SessionUser(user): SessionUser,
) -> Result<Json<Value>, ApiError> {
    let parent = MessageId::from(id);
    let rec = state
        .store
        .get_message(&parent)
        .map_err(internal)?
        .ok_or((
            StatusCode::NOT_FOUND,
            Json(json!({"error": "unknown message"})),
        ))?;
    if !state
        .store
        .is_member(&rec.room_id, &user)
        .map_err(internal)?
    {
        return Err(forbidden());
    }
    let replies = state.store.replies_to(&parent, 100).map_err(internal)?;
    let views: Vec<_> = replies.iter().map(|r| state.view_of(r)).collect();
    Ok(Json(json!({ "replies": views })))
}
