//! Webhook idempotency guard
//!
//! Each Stripe event id owns exactly one row in `stripe_webhook_events`.
//! Claiming an event is a single `INSERT ... ON CONFLICT ... DO UPDATE ...
//! WHERE ... RETURNING` so two concurrent deliveries cannot both pass a
//! "not yet processed" check: the second blocks on the row lock and then sees
//! the first one's committed result.
//!
//! `success` and `ignored` are terminal. `error` rows can be re-claimed by a
//! later redelivery or a replay.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::PgConnection;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::events::InboundEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    Success,
    Ignored,
    Error,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Success => "success",
            ProcessingStatus::Ignored => "ignored",
            ProcessingStatus::Error => "error",
        }
    }

    /// Terminal results are never overwritten
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessingStatus::Success | ProcessingStatus::Ignored)
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessingStatus {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(ProcessingStatus::Success),
            "ignored" => Ok(ProcessingStatus::Ignored),
            "error" => Ok(ProcessingStatus::Error),
            other => Err(BillingError::InvalidInput(format!(
                "Unknown processing status: {}",
                other
            ))),
        }
    }
}

/// Result of trying to claim an event id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// Caller now owns the record and wrote the requested status
    Claimed,
    /// A terminal record already exists
    AlreadyProcessed(Option<ProcessingStatus>),
}

impl ClaimOutcome {
    /// The claim rule shared by every store: absent or `error` may be claimed
    pub fn decide(existing: Option<ProcessingStatus>) -> Self {
        match existing {
            Some(status) if status.is_terminal() => ClaimOutcome::AlreadyProcessed(Some(status)),
            _ => ClaimOutcome::Claimed,
        }
    }
}

/// Postgres implementation of the claim, run on a caller-supplied connection
/// so it can share a transaction with the business mutation.
pub struct IdempotencyGuard;

impl IdempotencyGuard {
    /// Atomically record `status` for `event` unless a terminal record exists
    pub async fn claim(
        conn: &mut PgConnection,
        event: &InboundEvent,
        status: ProcessingStatus,
        error_message: Option<&str>,
    ) -> BillingResult<ClaimOutcome> {
        let claimed: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO stripe_webhook_events
                (stripe_event_id, event_type, event_timestamp, processing_result,
                 error_message, processed_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            ON CONFLICT (stripe_event_id) DO UPDATE SET
                processing_result = EXCLUDED.processing_result,
                error_message = EXCLUDED.error_message,
                processed_at = NOW()
            WHERE stripe_webhook_events.processing_result = 'error'
            RETURNING id
            "#,
        )
        .bind(&event.id)
        .bind(&event.type_)
        .bind(event.event_timestamp())
        .bind(status.as_str())
        .bind(error_message)
        .fetch_optional(&mut *conn)
        .await?;

        if claimed.is_some() {
            return Ok(ClaimOutcome::Claimed);
        }

        let existing = Self::existing_status(conn, &event.id).await?;
        Ok(ClaimOutcome::AlreadyProcessed(existing))
    }

    async fn existing_status(
        conn: &mut PgConnection,
        event_id: &str,
    ) -> BillingResult<Option<ProcessingStatus>> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT processing_result FROM stripe_webhook_events WHERE stripe_event_id = $1",
        )
        .bind(event_id)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(row.and_then(|(status,)| status.parse().ok()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_error_or_absent_records_can_be_claimed() {
        assert_eq!(ClaimOutcome::decide(None), ClaimOutcome::Claimed);
        assert_eq!(
            ClaimOutcome::decide(Some(ProcessingStatus::Error)),
            ClaimOutcome::Claimed
        );
        assert_eq!(
            ClaimOutcome::decide(Some(ProcessingStatus::Success)),
            ClaimOutcome::AlreadyProcessed(Some(ProcessingStatus::Success))
        );
        assert_eq!(
            ClaimOutcome::decide(Some(ProcessingStatus::Ignored)),
            ClaimOutcome::AlreadyProcessed(Some(ProcessingStatus::Ignored))
        );
    }

    #[test]
    fn status_round_trips_through_text_column() {
        for status in [
            ProcessingStatus::Success,
            ProcessingStatus::Ignored,
            ProcessingStatus::Error,
        ] {
            assert_eq!(status.as_str().parse::<ProcessingStatus>().unwrap(), status);
        }
        assert!("processing".parse::<ProcessingStatus>().is_err());
    }
}
