//! API error type and HTTP mapping

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use blogstandard_billing::BillingError;
use serde_json::json;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Webhook verification failed")]
    WebhookVerification,

    #[error("{0}")]
    Validation(String),

    #[error("Not found")]
    NotFound,

    #[error("Method Not Allowed")]
    MethodNotAllowed,

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal server error")]
    Internal,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::WebhookVerification | ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::Database(_) | ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Internal details stay in the logs
        let message = match &self {
            ApiError::Database(detail) => {
                tracing::error!(error = %detail, "Request failed on database error");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::WebhookSignatureInvalid(_) => ApiError::WebhookVerification,
            BillingError::InvalidInput(msg) => ApiError::Validation(msg),
            BillingError::NotFound(_) => ApiError::NotFound,
            BillingError::Database(msg) => ApiError::Database(msg),
            other => {
                tracing::error!(error = %other, "Unexpected billing error");
                ApiError::Internal
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_billing_errors_map_to_status() {
        let cases = [
            (
                BillingError::WebhookSignatureInvalid("no v1".into()),
                StatusCode::BAD_REQUEST,
            ),
            (
                BillingError::InvalidInput("limit".into()),
                StatusCode::BAD_REQUEST,
            ),
            (BillingError::NotFound("evt_1".into()), StatusCode::NOT_FOUND),
            (
                BillingError::Database("pool timed out".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                BillingError::StripeApi("502".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).status(), expected);
        }
    }

    #[tokio::test]
    async fn test_verification_body_is_generic() {
        let response =
            ApiError::from(BillingError::WebhookSignatureInvalid("secret detail".into()))
                .into_response();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(response).await,
            json!({"error": "Webhook verification failed"})
        );
    }

    #[tokio::test]
    async fn test_database_detail_not_leaked() {
        let response = ApiError::Database("relation users does not exist".into()).into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body_json(response).await,
            json!({"error": "Internal server error"})
        );
    }
}
