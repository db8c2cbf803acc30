//! File upload — POST /uploads/. Files land in the object-store root under
//! a random name; the returned `fileUrl` is what `file_message` frames
//! reference.

use std::sync::Arc;

use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::app::AppState;
use crate::auth::SessionUser;

const MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

pub async fn upload_handler(
    State(state): State<Arc<AppState>>,
    SessionUser(user): SessionUser,
    mut multipart: Multipart,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let field = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("malformed multipart body: {e}")))?
        .ok_or_else(|| bad_request("no file field".to_string()))?;

    // keep the extension, discard the client-supplied name entirely
    let extension = field
        .file_name()
        .and_then(|name| name.rsplit_once('.').map(|(_, ext)| ext.to_string()))
        .filter(|ext| ext.len() <= 8 && ext.chars().all(|c| c.is_ascii_alphanumeric()));

    let data = field
        .bytes()
        .await
        .map_err(|e| bad_request(format!("failed to read upload: {e}")))?;
    if data.len() > MAX_UPLOAD_BYTES {
        return Err((
            StatusCode::PAYLOAD_TOO_LARGE,
            Json(json!({"error": "file too large"})),
        ));
    }

    let name = match extension {
        Some(ext) => format!("{}.{ext}", uuid::Uuid::new_v4()),
        None => uuid::Uuid::new_v4().to_string(),
    };
    let root = std::path::Path::new(&state.config.uploads.root);
    if let Err(e) = std::fs::create_dir_all(root) {
        warn!(err = %e, "upload root creation failed");
        return Err(internal());
    }
    if let Err(e) = std::fs::write(root.join(&name), &data) {
        warn!(err = %e, "upload write failed");
        return Err(internal());
    }

    info!(user_id = %user, file = %name, bytes = data.len(), "file uploaded");
    Ok(Json(json!({ "fileUrl": format!("/uploads/{name}") })))
}

fn bad_request(message: String) -> (StatusCode, Json<Value>) {
    (StatusCode::BAD_REQUEST, Json(json!({"error": message})))
}

fn internal() -> (StatusCode, Json<Value>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": "internal error"})),
    )
}
