//! Stripe webhook handling
//!
//! Verifies Stripe deliveries, credits tokens on successful payments, and
//! records every event id so redeliveries are acknowledged without being
//! applied twice. Also provides listing and replay of failed events.

use std::sync::Arc;

use serde::Serialize;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::client::StripeClient;
use crate::config::{BillingConfig, DEFAULT_TOKENS_PER_PAYMENT};
use crate::error::{BillingError, BillingResult};
use crate::events::{EventKind, InboundEvent};
use crate::idempotency::{ClaimOutcome, ProcessingStatus};
use crate::signature::verify_signature;
use crate::store::{CreditOutcome, PgWebhookStore, WebhookEventRecord, WebhookQuery, WebhookStore};

/// What happened to a verified event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// Tokens were credited
    Processed { auth0_id: String, new_balance: i64 },
    /// Recorded and intentionally not acted on
    Ignored { reason: String },
    /// Already recorded with a terminal result by an earlier delivery
    Duplicate { status: Option<ProcessingStatus> },
}

/// Webhook handler for Stripe events
pub struct WebhookHandler {
    stripe: StripeClient,
    store: Arc<dyn WebhookStore>,
    tokens_per_payment: i64,
}

impl WebhookHandler {
    pub fn new(stripe: StripeClient, store: Arc<dyn WebhookStore>) -> Self {
        Self {
            stripe,
            store,
            tokens_per_payment: DEFAULT_TOKENS_PER_PAYMENT,
        }
    }

    pub fn with_tokens_per_payment(mut self, tokens_per_payment: i64) -> Self {
        self.tokens_per_payment = tokens_per_payment;
        self
    }

    pub fn from_config(config: BillingConfig, pool: PgPool) -> Self {
        Self::new(
            StripeClient::new(config.stripe),
            Arc::new(PgWebhookStore::new(pool)),
        )
        .with_tokens_per_payment(config.tokens_per_payment)
    }

    /// Create a handler backed by Postgres from environment variables
    pub fn from_env(pool: PgPool) -> BillingResult<Self> {
        Ok(Self::from_config(BillingConfig::from_env()?, pool))
    }

    pub fn store(&self) -> &Arc<dyn WebhookStore> {
        &self.store
    }

    /// Verify and parse a Stripe webhook delivery.
    ///
    /// `payload` must be the raw request body. Nothing is read from or written
    /// to the store here.
    pub fn verify_event(&self, payload: &[u8], signature: &str) -> BillingResult<InboundEvent> {
        self.verify_event_at(payload, signature, OffsetDateTime::now_utc().unix_timestamp())
    }

    pub fn verify_event_at(
        &self,
        payload: &[u8],
        signature: &str,
        now: i64,
    ) -> BillingResult<InboundEvent> {
        let config = self.stripe.config();
        verify_signature(
            payload,
            signature,
            &config.webhook_secret,
            config.tolerance_secs,
            now,
        )?;

        let event = InboundEvent::from_slice(payload).map_err(|e| {
            tracing::error!(error = %e, "Signed webhook body is not a Stripe event");
            BillingError::WebhookSignatureInvalid(e.to_string())
        })?;

        tracing::debug!(
            event_id = %event.id,
            event_type = %event.type_,
            "Webhook signature verified"
        );

        Ok(event)
    }

    /// Handle a verified Stripe event
    ///
    /// The event id is claimed in the same atomic unit as the mutation it
    /// guards, so an id already recorded as `success` or `ignored` short
    /// circuits to [`WebhookOutcome::Duplicate`]. On a persistence failure no
    /// success is recorded; an `error` record is written best-effort and the
    /// error is returned so the caller can ask Stripe to redeliver.
    pub async fn handle_event(&self, event: InboundEvent) -> BillingResult<WebhookOutcome> {
        tracing::info!(
            event_id = %event.id,
            event_type = %event.type_,
            "Processing Stripe webhook event"
        );

        let result = self.process_event_internal(&event).await;

        match &result {
            Ok(WebhookOutcome::Duplicate { status }) => {
                tracing::info!(
                    event_id = %event.id,
                    event_type = %event.type_,
                    existing_status = ?status,
                    "Duplicate webhook event - atomic idempotency check"
                );
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(
                    event_id = %event.id,
                    event_type = %event.type_,
                    error = %e,
                    retryable = e.is_retryable(),
                    "Webhook processing failed"
                );
                self.record_failure(&event, e).await;
            }
        }

        result
    }

    async fn process_event_internal(&self, event: &InboundEvent) -> BillingResult<WebhookOutcome> {
        match event.kind() {
            EventKind::PaymentIntentSucceeded => {
                match self.handle_payment_intent_succeeded(event).await {
                    Err(BillingError::WebhookEventNotSupported(reason)) => {
                        self.ignore(event, reason).await
                    }
                    other => other,
                }
            }
            EventKind::Unhandled(event_type) => {
                // Info level so new event types show up in logs
                tracing::info!(
                    event_type = %event_type,
                    event_id = %event.id,
                    "Received unhandled Stripe event type - no handler configured"
                );
                self.ignore(event, format!("Unhandled event type: {}", event_type))
                    .await
            }
        }
    }

    async fn handle_payment_intent_succeeded(
        &self,
        event: &InboundEvent,
    ) -> BillingResult<WebhookOutcome> {
        let auth0_id = event.buyer_identity().ok_or_else(|| {
            tracing::warn!(
                event_id = %event.id,
                payment_intent_id = ?event.object_id(),
                "PaymentIntent succeeded without buyer identity in metadata"
            );
            BillingError::WebhookEventNotSupported(
                "payment_intent.succeeded without metadata.sub".to_string(),
            )
        })?;

        tracing::info!(
            event_id = %event.id,
            auth0_id = %auth0_id,
            "Received payment_intent.succeeded"
        );

        match self
            .store
            .credit_tokens(event, auth0_id, self.tokens_per_payment)
            .await?
        {
            CreditOutcome::Credited { new_balance } => {
                tracing::info!(
                    event_id = %event.id,
                    auth0_id = %auth0_id,
                    tokens_added = self.tokens_per_payment,
                    new_balance = new_balance,
                    "Tokens credited"
                );
                Ok(WebhookOutcome::Processed {
                    auth0_id: auth0_id.to_string(),
                    new_balance,
                })
            }
            CreditOutcome::Duplicate(status) => Ok(WebhookOutcome::Duplicate { status }),
        }
    }

    async fn ignore(&self, event: &InboundEvent, reason: String) -> BillingResult<WebhookOutcome> {
        match self.store.record_ignored(event, Some(&reason)).await? {
            ClaimOutcome::Claimed => Ok(WebhookOutcome::Ignored { reason }),
            ClaimOutcome::AlreadyProcessed(status) => Ok(WebhookOutcome::Duplicate { status }),
        }
    }

    /// Write an `error` record for a failed attempt, retrying once
    async fn record_failure(&self, event: &InboundEvent, error: &BillingError) {
        let message = error.to_string();

        if let Err(e) = self.store.record_failure(event, &message).await {
            tracing::warn!(
                event_id = %event.id,
                error = %e,
                "First attempt to record webhook failure failed, retrying..."
            );

            if let Err(retry_err) = self.store.record_failure(event, &message).await {
                tracing::error!(
                    event_id = %event.id,
                    event_type = %event.type_,
                    error_message = %message,
                    first_error = %e,
                    retry_error = %retry_err,
                    "Failed to record webhook failure after retry. \
                     Stripe will redeliver; no success was recorded."
                );
            }
        }
    }

    /// Current token balance for a user, `None` if they have never paid
    pub async fn balance(&self, auth0_id: &str) -> BillingResult<Option<i64>> {
        self.store.balance(auth0_id).await
    }

    // ============ WEBHOOK REPLAY FUNCTIONALITY ============

    /// List failed webhook events that can be replayed
    pub async fn list_failed_webhooks(
        &self,
        limit: i64,
        offset: i64,
    ) -> BillingResult<Vec<WebhookEventRecord>> {
        self.list_webhooks(Some(ProcessingStatus::Error), limit, offset)
            .await
    }

    /// List all webhook events with optional status filter, newest first
    pub async fn list_webhooks(
        &self,
        status_filter: Option<ProcessingStatus>,
        limit: i64,
        offset: i64,
    ) -> BillingResult<Vec<WebhookEventRecord>> {
        if limit <= 0 || offset < 0 {
            return Err(BillingError::InvalidInput(format!(
                "Invalid pagination: limit={} offset={}",
                limit, offset
            )));
        }

        self.store
            .list_events(WebhookQuery::newest(status_filter, limit, offset))
            .await
    }

    /// Replay a webhook event by fetching it from Stripe and re-processing
    ///
    /// Goes through the same idempotent path as a live delivery, so replaying
    /// an event that already succeeded is a no-op.
    pub async fn replay_webhook(
        &self,
        stripe_event_id: &str,
    ) -> BillingResult<WebhookReplayResult> {
        tracing::info!(
            stripe_event_id = %stripe_event_id,
            "Attempting to replay webhook event"
        );

        let existing = self
            .store
            .find_event(stripe_event_id)
            .await?
            .ok_or_else(|| {
                BillingError::NotFound(format!(
                    "Webhook event {} not found in database",
                    stripe_event_id
                ))
            })?;

        let event = self.stripe.retrieve_event(stripe_event_id).await?;
        if event.id != stripe_event_id {
            return Err(BillingError::StripeApi(format!(
                "Stripe returned event {} when asked for {}",
                event.id, stripe_event_id
            )));
        }
        let event_type = event.type_.clone();

        let process_result = self.handle_event(event).await;

        let updated = self.store.find_event(stripe_event_id).await?;
        let (new_status, new_error) = match (&process_result, updated) {
            (_, Some(record)) => (record.processing_result, record.error_message),
            (Err(e), None) => (ProcessingStatus::Error.to_string(), Some(e.to_string())),
            (Ok(_), None) => (existing.processing_result.clone(), None),
        };

        tracing::info!(
            stripe_event_id = %stripe_event_id,
            previous_status = %existing.processing_result,
            new_status = %new_status,
            success = process_result.is_ok(),
            "Webhook replay completed"
        );

        Ok(WebhookReplayResult {
            record_id: existing.id,
            stripe_event_id: stripe_event_id.to_string(),
            event_type,
            previous_status: existing.processing_result,
            previous_error: existing.error_message,
            new_status,
            new_error,
            success: process_result.is_ok(),
        })
    }

    /// Replay failed webhooks oldest first (default limit 100)
    pub async fn replay_all_failed(
        &self,
        max_events: Option<i64>,
    ) -> BillingResult<Vec<WebhookReplayResult>> {
        let limit = max_events.unwrap_or(100);

        let failed_events = self
            .store
            .list_events(WebhookQuery::oldest(Some(ProcessingStatus::Error), limit))
            .await?;

        let mut results = Vec::with_capacity(failed_events.len());

        for record in failed_events {
            match self.replay_webhook(&record.stripe_event_id).await {
                Ok(result) => results.push(result),
                Err(e) => {
                    tracing::error!(
                        stripe_event_id = %record.stripe_event_id,
                        error = %e,
                        "Failed to replay webhook"
                    );
                    results.push(WebhookReplayResult {
                        record_id: record.id,
                        stripe_event_id: record.stripe_event_id,
                        event_type: record.event_type,
                        previous_status: record.processing_result.clone(),
                        previous_error: record.error_message,
                        new_status: record.processing_result,
                        new_error: Some(e.to_string()),
                        success: false,
                    });
                }
            }
        }

        Ok(results)
    }
}

/// Result of a webhook replay operation
#[derive(Debug, Clone, Serialize)]
pub struct WebhookReplayResult {
    pub record_id: Uuid,
    pub stripe_event_id: String,
    pub event_type: String,
    pub previous_status: String,
    pub previous_error: Option<String>,
    pub new_status: String,
    pub new_error: Option<String>,
    pub success: bool,
}
