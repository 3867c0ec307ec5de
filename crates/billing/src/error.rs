//! Billing error types

use thiserror::Error;

pub type BillingResult<T> = Result<T, BillingError>;

#[derive(Debug, Error)]
pub enum BillingError {
    /// Signature header missing or malformed, digest mismatch, stale
    /// timestamp, or a verified body that is not a Stripe event
    #[error("Webhook signature invalid: {0}")]
    WebhookSignatureInvalid(String),

    /// Event payload does not carry what its type promises
    #[error("Webhook event not supported: {0}")]
    WebhookEventNotSupported(String),

    /// Event already recorded with a terminal result
    #[error("Duplicate webhook event: {0}")]
    DuplicateEvent(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Stripe API error: {0}")]
    StripeApi(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BillingError {
    /// Whether Stripe should redeliver after this error.
    ///
    /// Transient failures map to a 5xx so the provider retries; anything that
    /// would fail identically on redelivery is not retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            BillingError::Database(_) | BillingError::StripeApi(_) | BillingError::Internal(_) => {
                true
            }
            BillingError::WebhookSignatureInvalid(_)
            | BillingError::WebhookEventNotSupported(_)
            | BillingError::DuplicateEvent(_)
            | BillingError::NotFound(_)
            | BillingError::InvalidInput(_)
            | BillingError::Config(_) => false,
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
        BillingError::StripeApi(err.to_string())
    }
}

impl From<serde_json::Error> for BillingError {
    fn from(err: serde_json::Error) -> Self {
        BillingError::InvalidInput(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persistence_errors_are_retryable() {
        assert!(BillingError::Database("connection reset".into()).is_retryable());
        assert!(!BillingError::WebhookSignatureInvalid("bad".into()).is_retryable());
        assert!(!BillingError::DuplicateEvent("evt_1".into()).is_retryable());
    }

    #[test]
    fn sqlx_errors_become_database_errors() {
        let err: BillingError = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, BillingError::Database(_)));
    }
}
