//! Session-cookie authentication for the HTTP boundary and the WS upgrade.

use std::sync::Arc;

use axum::{
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap, StatusCode},
    Json,
};
use serde_json::json;

use mathia_core::types::UserId;

use crate::app::AppState;

pub const SESSION_COOKIE: &str = "mathia_session";

/// Extractor: the authenticated user, or 401.
pub struct SessionUser(pub UserId);

impl FromRequestParts<Arc<AppState>> for SessionUser {
    type Rejection = (StatusCode, Json<serde_json::Value>);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        session_user_from_headers(state, &parts.headers)
            .map(SessionUser)
            .ok_or((
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": "session missing or expired"})),
            ))
    }
}

/// Resolve the session cookie against the sessions table. `None` covers
/// missing cookie, unknown token, and expiry alike.
pub fn session_user_from_headers(state: &AppState, headers: &HeaderMap) -> Option<UserId> {
    let cookie_header = headers.get("cookie")?.to_str().ok()?;
    let token = cookie_header.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == SESSION_COOKIE).then(|| value.to_string())
    })?;
    state.store.session_user(&token).ok().flatten()
}
