//! In-memory webhook store
//!
//! Same claim semantics as [`PgWebhookStore`](crate::store::PgWebhookStore),
//! with a single mutex standing in for the database transaction. Used for
//! local development and tests; supports injecting write failures.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::events::InboundEvent;
use crate::idempotency::{ClaimOutcome, ProcessingStatus};
use crate::store::{CreditOutcome, WebhookEventRecord, WebhookQuery, WebhookStore};

/// Which writes should fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailureMode {
    #[default]
    None,
    /// Every write fails, as if the database were unreachable
    AllWrites,
    /// Only the balance upsert fails; failure records still land
    BalanceUpdate,
}

#[derive(Default)]
struct MemoryState {
    events: HashMap<String, WebhookEventRecord>,
    balances: HashMap<String, i64>,
    failure_mode: FailureMode,
}

impl MemoryState {
    fn claim(
        &mut self,
        event: &InboundEvent,
        status: ProcessingStatus,
        error_message: Option<&str>,
    ) -> ClaimOutcome {
        let existing = self.events.get(&event.id).and_then(|r| r.status());
        let outcome = ClaimOutcome::decide(existing);

        if outcome == ClaimOutcome::Claimed {
            let now = OffsetDateTime::now_utc();
            let record = self
                .events
                .entry(event.id.clone())
                .or_insert_with(|| WebhookEventRecord {
                    id: Uuid::new_v4(),
                    stripe_event_id: event.id.clone(),
                    event_type: event.type_.clone(),
                    event_timestamp: event.event_timestamp(),
                    processing_result: status.as_str().to_string(),
                    error_message: None,
                    created_at: now,
                    processed_at: None,
                });
            record.processing_result = status.as_str().to_string();
            record.error_message = error_message.map(str::to_string);
            record.processed_at = Some(now);
        }

        outcome
    }

    fn check_writable(&self) -> BillingResult<()> {
        if self.failure_mode == FailureMode::AllWrites {
            return Err(BillingError::Database(
                "simulated database outage".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryWebhookStore {
    state: Mutex<MemoryState>,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl InMemoryWebhookStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_failure_mode(&self, mode: FailureMode) {
        self.state.lock().await.failure_mode = mode;
    }

    /// Number of read calls made against the store
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of write calls attempted against the store, successful or not
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub async fn event_count(&self) -> usize {
        self.state.lock().await.events.len()
    }
}

#[async_trait]
impl WebhookStore for InMemoryWebhookStore {
    async fn credit_tokens(
        &self,
        event: &InboundEvent,
        auth0_id: &str,
        amount: i64,
    ) -> BillingResult<CreditOutcome> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().await;
        state.check_writable()?;

        let existing = state.events.get(&event.id).and_then(|r| r.status());
        if let ClaimOutcome::AlreadyProcessed(status) = ClaimOutcome::decide(existing) {
            return Ok(CreditOutcome::Duplicate(status));
        }

        // Nothing is written unless the whole unit succeeds
        if state.failure_mode == FailureMode::BalanceUpdate {
            return Err(BillingError::Database(
                "simulated failure updating users".to_string(),
            ));
        }

        let balance = state.balances.entry(auth0_id.to_string()).or_insert(0);
        *balance += amount;
        let new_balance = *balance;
        state.claim(event, ProcessingStatus::Success, None);

        Ok(CreditOutcome::Credited { new_balance })
    }

    async fn record_ignored(
        &self,
        event: &InboundEvent,
        reason: Option<&str>,
    ) -> BillingResult<ClaimOutcome> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().await;
        state.check_writable()?;
        Ok(state.claim(event, ProcessingStatus::Ignored, reason))
    }

    async fn record_failure(
        &self,
        event: &InboundEvent,
        error_message: &str,
    ) -> BillingResult<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().await;
        state.check_writable()?;
        state.claim(event, ProcessingStatus::Error, Some(error_message));
        Ok(())
    }

    async fn find_event(&self, stripe_event_id: &str) -> BillingResult<Option<WebhookEventRecord>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.state.lock().await.events.get(stripe_event_id).cloned())
    }

    async fn list_events(&self, query: WebhookQuery) -> BillingResult<Vec<WebhookEventRecord>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().await;

        let mut records: Vec<WebhookEventRecord> = state
            .events
            .values()
            .filter(|r| query.status.map_or(true, |s| r.processing_result == s.as_str()))
            .cloned()
            .collect();

        records.sort_by_key(|r| r.created_at);
        if !query.oldest_first {
            records.reverse();
        }

        Ok(records
            .into_iter()
            .skip(query.offset.max(0) as usize)
            .take(query.limit.max(0) as usize)
            .collect())
    }

    async fn balance(&self, auth0_id: &str) -> BillingResult<Option<i64>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.state.lock().await.balances.get(auth0_id).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(id: &str, event_type: &str) -> InboundEvent {
        let body = serde_json::json!({
            "id": id,
            "type": event_type,
            "data": {"object": {}}
        });
        InboundEvent::from_slice(body.to_string().as_bytes()).unwrap()
    }

    #[tokio::test]
    async fn ignored_events_are_terminal() {
        let store = InMemoryWebhookStore::new();
        let evt = event("evt_1", "customer.created");

        assert_eq!(
            store.record_ignored(&evt, None).await.unwrap(),
            ClaimOutcome::Claimed
        );
        assert_eq!(
            store.record_ignored(&evt, None).await.unwrap(),
            ClaimOutcome::AlreadyProcessed(Some(ProcessingStatus::Ignored))
        );

        store.record_failure(&evt, "late").await.unwrap();
        let record = store.find_event("evt_1").await.unwrap().unwrap();
        assert_eq!(record.status(), Some(ProcessingStatus::Ignored));
    }

    #[tokio::test]
    async fn balance_failure_leaves_no_record() {
        let store = InMemoryWebhookStore::new();
        store.set_failure_mode(FailureMode::BalanceUpdate).await;
        let evt = event("evt_2", "payment_intent.succeeded");

        let result = store.credit_tokens(&evt, "auth0|x", 10).await;
        assert!(matches!(result, Err(BillingError::Database(_))));
        assert!(store.find_event("evt_2").await.unwrap().is_none());
        assert_eq!(store.balance("auth0|x").await.unwrap(), None);
    }

    #[tokio::test]
    async fn listing_filters_and_orders() {
        let store = InMemoryWebhookStore::new();
        for id in ["evt_a", "evt_b", "evt_c"] {
            store.record_failure(&event(id, "x"), "boom").await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
        store
            .record_ignored(&event("evt_d", "x"), None)
            .await
            .unwrap();

        let failed = store
            .list_events(WebhookQuery::oldest(Some(ProcessingStatus::Error), 10))
            .await
            .unwrap();
        let ids: Vec<&str> = failed.iter().map(|r| r.stripe_event_id.as_str()).collect();
        assert_eq!(ids, vec!["evt_a", "evt_b", "evt_c"]);

        let newest = store
            .list_events(WebhookQuery::newest(None, 2, 0))
            .await
            .unwrap();
        assert_eq!(newest.len(), 2);
        assert_eq!(newest[0].stripe_event_id, "evt_d");
    }
}
