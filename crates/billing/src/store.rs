//! Persistence for token balances and processed webhook events

use async_trait::async_trait;
use serde::Serialize;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;
use crate::events::InboundEvent;
use crate::idempotency::{ClaimOutcome, IdempotencyGuard, ProcessingStatus};

/// Stored webhook event record
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct WebhookEventRecord {
    pub id: Uuid,
    pub stripe_event_id: String,
    pub event_type: String,
    pub event_timestamp: OffsetDateTime,
    pub processing_result: String,
    pub error_message: Option<String>,
    pub created_at: OffsetDateTime,
    pub processed_at: Option<OffsetDateTime>,
}

impl WebhookEventRecord {
    pub fn status(&self) -> Option<ProcessingStatus> {
        self.processing_result.parse().ok()
    }
}

/// Result of crediting tokens for a payment event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreditOutcome {
    Credited { new_balance: i64 },
    Duplicate(Option<ProcessingStatus>),
}

/// Listing filter for webhook records
#[derive(Debug, Clone, Copy)]
pub struct WebhookQuery {
    pub status: Option<ProcessingStatus>,
    pub limit: i64,
    pub offset: i64,
    pub oldest_first: bool,
}

impl WebhookQuery {
    pub fn newest(status: Option<ProcessingStatus>, limit: i64, offset: i64) -> Self {
        Self {
            status,
            limit,
            offset,
            oldest_first: false,
        }
    }

    pub fn oldest(status: Option<ProcessingStatus>, limit: i64) -> Self {
        Self {
            status,
            limit,
            offset: 0,
            oldest_first: true,
        }
    }
}

/// Storage seam for the webhook handler.
///
/// Every mutating method claims the event id and writes its effect in one
/// atomic unit; a failure leaves no trace of the claim.
#[async_trait]
pub trait WebhookStore: Send + Sync {
    /// Claim `event` as `success` and add `amount` to `auth0_id`'s balance,
    /// creating the account if needed.
    async fn credit_tokens(
        &self,
        event: &InboundEvent,
        auth0_id: &str,
        amount: i64,
    ) -> BillingResult<CreditOutcome>;

    /// Claim `event` as `ignored`
    async fn record_ignored(
        &self,
        event: &InboundEvent,
        reason: Option<&str>,
    ) -> BillingResult<ClaimOutcome>;

    /// Record a failed attempt; never overwrites a terminal result
    async fn record_failure(&self, event: &InboundEvent, error_message: &str)
        -> BillingResult<()>;

    async fn find_event(&self, stripe_event_id: &str) -> BillingResult<Option<WebhookEventRecord>>;

    async fn list_events(&self, query: WebhookQuery) -> BillingResult<Vec<WebhookEventRecord>>;

    async fn balance(&self, auth0_id: &str) -> BillingResult<Option<i64>>;
}

/// Postgres-backed store
#[derive(Clone)]
pub struct PgWebhookStore {
    pool: PgPool,
}

impl PgWebhookStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl WebhookStore for PgWebhookStore {
    async fn credit_tokens(
        &self,
        event: &InboundEvent,
        auth0_id: &str,
        amount: i64,
    ) -> BillingResult<CreditOutcome> {
        let mut tx = self.pool.begin().await?;

        if let ClaimOutcome::AlreadyProcessed(status) =
            IdempotencyGuard::claim(&mut tx, event, ProcessingStatus::Success, None).await?
        {
            tx.rollback().await?;
            return Ok(CreditOutcome::Duplicate(status));
        }

        let (new_balance,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO users (auth0_id, available_tokens)
            VALUES ($1, $2)
            ON CONFLICT (auth0_id) DO UPDATE SET
                available_tokens = users.available_tokens + EXCLUDED.available_tokens,
                updated_at = NOW()
            RETURNING available_tokens
            "#,
        )
        .bind(auth0_id)
        .bind(amount)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(CreditOutcome::Credited { new_balance })
    }

    async fn record_ignored(
        &self,
        event: &InboundEvent,
        reason: Option<&str>,
    ) -> BillingResult<ClaimOutcome> {
        let mut conn = self.pool.acquire().await?;
        IdempotencyGuard::claim(&mut conn, event, ProcessingStatus::Ignored, reason).await
    }

    async fn record_failure(
        &self,
        event: &InboundEvent,
        error_message: &str,
    ) -> BillingResult<()> {
        let mut conn = self.pool.acquire().await?;
        IdempotencyGuard::claim(&mut conn, event, ProcessingStatus::Error, Some(error_message))
            .await?;
        Ok(())
    }

    async fn find_event(&self, stripe_event_id: &str) -> BillingResult<Option<WebhookEventRecord>> {
        let record = sqlx::query_as(
            r#"
            SELECT id, stripe_event_id, event_type, event_timestamp,
                   processing_result, error_message, created_at, processed_at
            FROM stripe_webhook_events
            WHERE stripe_event_id = $1
            "#,
        )
        .bind(stripe_event_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn list_events(&self, query: WebhookQuery) -> BillingResult<Vec<WebhookEventRecord>> {
        let order = if query.oldest_first { "ASC" } else { "DESC" };
        let sql = format!(
            r#"
            SELECT id, stripe_event_id, event_type, event_timestamp,
                   processing_result, error_message, created_at, processed_at
            FROM stripe_webhook_events
            WHERE ($1::TEXT IS NULL OR processing_result = $1)
            ORDER BY created_at {}
            LIMIT $2 OFFSET $3
            "#,
            order
        );

        let records = sqlx::query_as(&sql)
            .bind(query.status.map(|s| s.as_str()))
            .bind(query.limit)
            .bind(query.offset)
            .fetch_all(&self.pool)
            .await?;

        Ok(records)
    }

    async fn balance(&self, auth0_id: &str) -> BillingResult<Option<i64>> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT available_tokens FROM users WHERE auth0_id = $1")
                .bind(auth0_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(balance,)| balance))
    }
}
