//! Webhook ingress — POST /webhooks/{provider}/.
//!
//! Every provider must have a configured HMAC secret; signatures are
//! verified (constant-time) over the raw body before anything else runs.
//! Unverified requests get 401 and a log record.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde_json::{json, Value};
use tracing::{info, warn};

use mathia_crypto::verify_hmac_sha256;
use mathia_store::StoreError;

use crate::app::AppState;

const DEFAULT_SIGNATURE_HEADER: &str = "x-signature-256";

pub async fn webhook_handler(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let provider_cfg = state
        .config
        .webhooks
        .providers
        .iter()
        .find(|p| p.name == provider)
        .ok_or_else(|| {
            warn!(provider = %provider, "unknown webhook provider");
            (
                StatusCode::NOT_FOUND,
                Json(json!({"error": "unknown webhook provider"})),
            )
        })?;

    let header_name = provider_cfg
        .signature_header
        .as_deref()
        .unwrap_or(DEFAULT_SIGNATURE_HEADER);
    let claimed = headers
        .get(header_name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if !verify_hmac_sha256(&provider_cfg.secret, &body, claimed) {
        warn!(provider = %provider, "webhook signature verification failed");
        return Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "signature verification failed"})),
        ));
    }

    let payload: Value = serde_json::from_slice(&body).map_err(|e| {
        warn!(provider = %provider, error = %e, "invalid JSON in webhook body");
        (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "invalid JSON body"})),
        )
    })?;

    let receipt_id = uuid::Uuid::new_v4().to_string();
    info!(provider = %provider, receipt_id = %receipt_id, bytes = body.len(), "webhook accepted");

    // the payments provider credits wallets; external_ref makes replays
    // idempotent at the store layer
    if provider == "payments" {
        apply_payment(&state, &payload)?;
    }

    Ok(Json(json!({"ok": true, "receipt_id": receipt_id})))
}

fn apply_payment(
    state: &AppState,
    payload: &Value,
) -> Result<(), (StatusCode, Json<Value>)> {
    let user = payload
        .get("user")
        .and_then(|u| u.as_str())
        .ok_or_else(|| payment_error("missing user"))?;
    let currency = payload
        .get("currency")
        .and_then(|c| c.as_str())
        .ok_or_else(|| payment_error("missing currency"))?;
    let amount = payload
        .get("amount_minor")
        .and_then(|a| a.as_i64())
        .ok_or_else(|| payment_error("missing amount_minor"))?;
    let external_ref = payload
        .get("external_ref")
        .and_then(|r| r.as_str())
        .ok_or_else(|| payment_error("missing external_ref"))?;

    match state.store.apply_wallet_txn(
        &user.into(),
        currency,
        amount,
        "payment-webhook",
        Some(external_ref),
    ) {
        Ok(txn) => {
            info!(txn_id = %txn.id, user_id = %user, "payment credited");
            Ok(())
        }
        Err(StoreError::Conflict(_)) => Err((
            StatusCode::CONFLICT,
            Json(json!({"error": "duplicate external_ref"})),
        )),
        Err(e) => {
            warn!(err = %e, "payment apply failed");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "internal error"})),
            ))
        }
    }
}

fn payment_error(reason: &str) -> (StatusCode, Json<Value>) {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({"error": reason})),
    )
}
