//! Registration and login. Login answers with the session token both as a
//! Set-Cookie header (for browser clients) and in the JSON body (for
//! programmatic ones).

use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use mathia_core::types::RoomKind;

use crate::app::AppState;
use crate::auth::SESSION_COOKIE;

#[derive(Deserialize)]
pub struct RegisterBody {
    pub username: String,
    pub email: String,
    pub password: String,
}

pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RegisterBody>,
) -> impl IntoResponse {
    if body.username.trim().is_empty() || !body.email.contains('@') || body.password.len() < 8 {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "invalid username, email, or password (min 8 chars)"})),
        )
            .into_response();
    }

    match state
        .store
        .create_user(&body.username, &body.email, &body.password)
    {
        Ok(user) => {
            // every user gets their assistant room up front
            if let Err(e) = state.store.create_room(RoomKind::Ai, "Mathia", &user.id) {
                tracing::warn!(user_id = %user.id, err = %e, "assistant room creation failed");
            }
            info!(user_id = %user.id, "user registered");
            (
                StatusCode::CREATED,
                Json(json!({"id": user.id, "username": user.username})),
            )
                .into_response()
        }
        Err(e) => {
            let status = StatusCode::from_u16(mathia_core::MathiaError::from(e).http_status())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (status, Json(json!({"error": "registration failed"}))).into_response()
        }
    }
}

#[derive(Deserialize)]
pub struct LoginBody {
    pub username: String,
    pub password: String,
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(body): Json<LoginBody>,
) -> impl IntoResponse {
    match state.store.login(&body.username, &body.password) {
        Ok(Some(token)) => {
            let cookie =
                format!("{SESSION_COOKIE}={token}; HttpOnly; SameSite=Lax; Path=/");
            (
                StatusCode::OK,
                [(header::SET_COOKIE, cookie)],
                Json(json!({"token": token})),
            )
                .into_response()
        }
        Ok(None) => (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "bad credentials"})),
        )
            .into_response(),
        Err(e) => {
            tracing::warn!(err = %e, "login failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "internal error"})),
            )
                .into_response()
        }
    }
}
