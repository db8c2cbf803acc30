//! Quota inspection — how much of the per-connector window the caller has
//! used. Reads the in-memory limiter (authoritative) with the documented
//! limit from config.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::{json, Value};

use crate::app::AppState;
use crate::auth::SessionUser;

pub async fn quota_handler(
    State(state): State<Arc<AppState>>,
    Path(connector): Path<String>,
    SessionUser(user): SessionUser,
) -> Json<Value> {
    let window = Duration::from_secs(state.config.limits.connector_window_secs);
    let used = state
        .limiter
        .usage(&format!("{user}|{connector}"), window);
    let limit = state.config.limits.connector_ops_per_window;

    Json(json!({
        "connector": connector,
        "used": used,
        "limit": limit,
        "remaining": limit.saturating_sub(used),
        "window_secs": state.config.limits.connector_window_secs,
    }))
}
