//! Stripe webhook endpoint

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, Method},
    Json,
};
use blogstandard_billing::{WebhookOutcome, SIGNATURE_HEADER};
use serde::Serialize;

use crate::{
    error::{ApiError, ApiResult},
    state::AppState,
};

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: bool,
}

/// Receive a Stripe event.
///
/// The body is taken as raw bytes; the signature covers the exact bytes
/// Stripe sent, so nothing may parse or re-encode it first.
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<WebhookAck>> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            tracing::warn!("Stripe webhook missing Stripe-Signature header");
            ApiError::WebhookVerification
        })?;

    let event = state.webhooks.verify_event(&body, signature).map_err(|e| {
        tracing::warn!(error = %e, body_len = body.len(), "Stripe webhook verification failed");
        ApiError::from(e)
    })?;

    let event_id = event.id.clone();
    match state.webhooks.handle_event(event).await? {
        WebhookOutcome::Processed { new_balance, .. } => {
            tracing::debug!(event_id = %event_id, new_balance, "Webhook acknowledged");
        }
        WebhookOutcome::Ignored { reason } => {
            tracing::debug!(event_id = %event_id, reason = %reason, "Webhook acknowledged");
        }
        WebhookOutcome::Duplicate { .. } => {
            tracing::debug!(event_id = %event_id, "Duplicate webhook acknowledged");
        }
    }

    Ok(Json(WebhookAck { received: true }))
}

pub async fn method_not_allowed(method: Method) -> ApiError {
    tracing::debug!(method = %method, "Rejected non-POST request to Stripe webhook");
    ApiError::MethodNotAllowed
}
