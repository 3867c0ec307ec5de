//! Application state

use std::sync::Arc;

use blogstandard_billing::{PgWebhookStore, StripeClient, WebhookHandler, WebhookStore};
use sqlx::PgPool;

use crate::config::Config;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub webhooks: Arc<WebhookHandler>,
}

impl AppState {
    /// Build state backed by the process-wide pool
    pub fn new(pool: PgPool, config: Config) -> Self {
        let store: Arc<dyn WebhookStore> = Arc::new(PgWebhookStore::new(pool));
        let state = Self::with_store(config, store);
        tracing::info!(
            tokens_per_payment = state.config.billing.tokens_per_payment,
            tolerance_secs = state.config.billing.stripe.tolerance_secs,
            "Stripe webhook handler initialized"
        );
        state
    }

    /// Build state over an arbitrary store
    pub fn with_store(config: Config, store: Arc<dyn WebhookStore>) -> Self {
        let stripe = StripeClient::new(config.billing.stripe.clone());
        let webhooks = WebhookHandler::new(stripe, store)
            .with_tokens_per_payment(config.billing.tokens_per_payment);

        Self {
            config,
            webhooks: Arc::new(webhooks),
        }
    }
}
