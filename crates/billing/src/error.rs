//! Billing error types

use thiserror::Error;
use uuid::Uuid;

pub type BillingResult<T> = Result<T, BillingError>;

#[derive(Debug, Error)]
pub enum BillingError {
    /// A payload or request field failed validation.
    #[error("Validation failed for {field}: {message}")]
    Validation { field: String, message: String },

    /// Webhook signature did not match the shared secret.
    #[error("Webhook signature verification failed")]
    SignatureInvalid,

    /// The Lemon Squeezy API returned an error or was unreachable.
    #[error("Lemon Squeezy API error: {0}")]
    ExternalApi(String),

    /// Referenced webhook event does not exist.
    #[error("Webhook event not found: {0}")]
    EventNotFound(Uuid),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BillingError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl From<sqlx::Error> for BillingError {
    fn from(err: sqlx::Error) -> Self {
        BillingError::Database(err.to_string())
    }
}

impl From<reqwest::Error> for BillingError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            BillingError::ExternalApi(format!("request timed out: {}", err))
        } else {
            BillingError::ExternalApi(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_display() {
        let err = BillingError::validation("variant_id", "no matching plan");
        assert_eq!(
            err.to_string(),
            "Validation failed for variant_id: no matching plan"
        );
    }

    #[test]
    fn test_signature_display() {
        assert_eq!(
            BillingError::SignatureInvalid.to_string(),
            "Webhook signature verification failed"
        );
    }
}
