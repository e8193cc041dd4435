//! WhatsApp webhook: GET handshake and POST event delivery on `/webhook`.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use relay_whatsapp::{extract_messages, signature::SIGNATURE_HEADER, verify_signature};

use super::detail;
use crate::app::AppState;

#[derive(Debug, Deserialize)]
pub struct VerifyQs {
    #[serde(rename = "hub.mode")]
    mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    token: Option<String>,
    #[serde(rename = "hub.challenge")]
    challenge: Option<String>,
}

/// GET /webhook
///
/// Echoes `hub.challenge` as plain text when the mode is `subscribe` and the
/// token matches the configured one; 403 otherwise. An unset verify token
/// never matches.
pub async fn verify_handler(
    State(state): State<Arc<AppState>>,
    Query(q): Query<VerifyQs>,
) -> Result<String, (StatusCode, Json<Value>)> {
    let expected = state.config.whatsapp.verify_token.as_str();
    let token_ok = !expected.is_empty() && q.token.as_deref() == Some(expected);

    if q.mode.as_deref() == Some("subscribe") && token_ok {
        info!("webhook verified");
        Ok(q.challenge.unwrap_or_default())
    } else {
        warn!(mode = ?q.mode, "webhook verification failed");
        Err(detail(StatusCode::FORBIDDEN, "Verification failed"))
    }
}

/// POST /webhook
///
/// 403 on a bad signature (when an app secret is configured), 400 on a body
/// that is not JSON. Everything else is acknowledged with 200 once the
/// extracted messages are scheduled; unrelated or non-text events are
/// acknowledged too so Meta does not redeliver them.
pub async fn receive_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    if !verify_signature(&body, signature, &state.config.whatsapp.app_secret) {
        warn!(bytes = body.len(), "invalid webhook signature");
        return Err(detail(StatusCode::FORBIDDEN, "Invalid signature"));
    }

    let payload: Value = serde_json::from_slice(&body).map_err(|e| {
        warn!(error = %e, "invalid JSON in webhook body");
        detail(StatusCode::BAD_REQUEST, "Invalid JSON body")
    })?;

    let mut scheduled = 0usize;
    for message in extract_messages(&payload) {
        if !state.dedup.check_and_insert(&message.message_id) {
            info!(message_id = %message.message_id, "duplicate webhook delivery dropped");
            continue;
        }
        info!(from = %message.sender_id, message_id = %message.message_id, "message received");
        state.schedule(message);
        scheduled += 1;
    }
    if scheduled == 0 {
        debug!("webhook carried no actionable messages");
    }

    Ok(Json(json!({"status": "received"})))
}
