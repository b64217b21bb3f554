//! API error handling
//!
//! Billing errors map onto HTTP statuses here. In production the 500-class
//! responses carry a generic message; the full error goes to the logs only.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use launchkit_billing::BillingError;
use serde_json::json;

use crate::config::Environment;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn internal(environment: Environment, detail: impl std::fmt::Display) -> Self {
        let message = if environment.is_production() {
            "Something went wrong. Please try again.".to_string()
        } else {
            detail.to_string()
        };
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    /// Map a billing error onto an HTTP response.
    pub fn from_billing(err: BillingError, environment: Environment) -> Self {
        match &err {
            BillingError::SignatureInvalid => {
                Self::new(StatusCode::UNAUTHORIZED, err.to_string())
            }
            BillingError::Validation { .. } => Self::new(StatusCode::BAD_REQUEST, err.to_string()),
            BillingError::EventNotFound(_) => Self::new(StatusCode::NOT_FOUND, err.to_string()),
            BillingError::ExternalApi(_)
            | BillingError::Database(_)
            | BillingError::Internal(_) => {
                tracing::error!(error = %err, "Billing operation failed");
                Self::internal(environment, err)
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "success": false,
            "error": self.message,
        }));
        (self.status, body).into_response()
    }
}
