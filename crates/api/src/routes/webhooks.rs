//! Lemon Squeezy webhook endpoint
//!
//! The body must reach the verifier exactly as sent, so the handler takes
//! raw bytes rather than a typed JSON extractor. The response body carries
//! nothing beyond the acknowledgment; internal identifiers stay internal.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde_json::json;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

const SIGNATURE_HEADER: &str = "x-signature";

pub async fn receive_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<serde_json::Value>> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::unauthorized("Missing X-Signature header"))?;

    state
        .billing
        .webhooks
        .receive(&body, signature)
        .await
        .map_err(|e| ApiError::from_billing(e, state.config.environment))?;

    Ok(Json(json!({ "received": true })))
}
