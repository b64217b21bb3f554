//! Billing endpoints

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// The caller's current subscription with its plan, or `data: null` when
/// nothing entitled exists. Pending webhook events for the user are
/// recovered before answering, so a subscription never looks missing just
/// because its event has not been reconciled yet.
///
/// Every failure here is internal, including validation failures raised by
/// the recovery pass (an unsynced plan is our catalog gap, not the
/// caller's mistake), so nothing maps to a 4xx and production responses
/// stay generic.
pub async fn get_subscription(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Json<serde_json::Value>> {
    let subscription = state
        .billing
        .current_subscription(user.user_id)
        .await
        .map_err(|e| {
            tracing::error!(user_id = %user.user_id, error = %e, "Subscription read failed");
            ApiError::internal(state.config.environment, e)
        })?;

    Ok(Json(json!({
        "success": true,
        "data": subscription,
    })))
}

#[derive(Debug, Deserialize)]
pub struct CreateCheckoutRequest {
    pub variant_id: String,
}

/// Create a hosted checkout for a plan variant. The user id is embedded in
/// the checkout's custom data so webhook deliveries can be attributed back.
pub async fn create_checkout(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<CreateCheckoutRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let environment = state.config.environment;

    let plan = state
        .billing
        .plans
        .get_by_variant_id(&request.variant_id)
        .await
        .map_err(|e| ApiError::from_billing(e, environment))?
        .ok_or_else(|| ApiError::bad_request("Unknown plan variant"))?;

    if !plan.is_active {
        return Err(ApiError::bad_request("Plan is no longer available"));
    }

    let email = user.email.as_deref().unwrap_or_default();
    let url = state
        .billing
        .client
        .create_checkout(&plan.variant_id, &user.user_id.to_string(), email)
        .await
        .map_err(|e| ApiError::from_billing(e, environment))?;

    Ok(Json(json!({
        "success": true,
        "data": { "checkout_url": url },
    })))
}

/// Public pricing catalog.
pub async fn list_plans(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let plans = state
        .billing
        .plans
        .list_active()
        .await
        .map_err(|e| ApiError::from_billing(e, state.config.environment))?;

    Ok(Json(json!({
        "success": true,
        "data": plans,
    })))
}
