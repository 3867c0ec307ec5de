//! Stripe API client and credentials

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;

use crate::error::{BillingError, BillingResult};
use crate::events::InboundEvent;
use crate::signature::DEFAULT_TOLERANCE_SECS;

pub const DEFAULT_API_BASE: &str = "https://api.stripe.com";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Stripe credentials and webhook verification settings
#[derive(Clone)]
pub struct StripeConfig {
    /// Secret API key (`sk_...`), used to fetch events for replay
    pub secret_key: String,
    /// Endpoint signing secret (`whsec_...`)
    pub webhook_secret: String,
    /// Maximum allowed distance between the signed timestamp and now
    pub tolerance_secs: i64,
    pub api_base: String,
}

impl StripeConfig {
    pub fn new(secret_key: impl Into<String>, webhook_secret: impl Into<String>) -> Self {
        Self {
            secret_key: secret_key.into(),
            webhook_secret: webhook_secret.into(),
            tolerance_secs: DEFAULT_TOLERANCE_SECS,
            api_base: DEFAULT_API_BASE.to_string(),
        }
    }

    pub fn with_tolerance_secs(mut self, tolerance_secs: i64) -> Self {
        self.tolerance_secs = tolerance_secs;
        self
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    /// Load from `STRIPE_SECRET_KEY`, `STRIPE_WEBHOOK_SECRET`,
    /// `STRIPE_WEBHOOK_TOLERANCE_SECS` and `STRIPE_API_BASE`
    pub fn from_env() -> BillingResult<Self> {
        let secret_key = crate::config::required_env("STRIPE_SECRET_KEY")?;
        let webhook_secret = crate::config::required_env("STRIPE_WEBHOOK_SECRET")?;
        let tolerance_secs =
            crate::config::optional_env("STRIPE_WEBHOOK_TOLERANCE_SECS", DEFAULT_TOLERANCE_SECS)?;
        if tolerance_secs <= 0 {
            return Err(BillingError::Config(
                "STRIPE_WEBHOOK_TOLERANCE_SECS must be positive".to_string(),
            ));
        }
        let api_base = std::env::var("STRIPE_API_BASE")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());

        Ok(Self {
            secret_key,
            webhook_secret,
            tolerance_secs,
            api_base,
        })
    }
}

impl fmt::Debug for StripeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StripeConfig")
            .field("secret_key", &"[REDACTED]")
            .field("webhook_secret", &"[REDACTED]")
            .field("tolerance_secs", &self.tolerance_secs)
            .field("api_base", &self.api_base)
            .finish()
    }
}

/// Thin Stripe REST client
#[derive(Clone)]
pub struct StripeClient {
    http: reqwest::Client,
    config: Arc<StripeConfig>,
}

impl StripeClient {
    pub fn new(config: StripeConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Falling back to default HTTP client for Stripe");
                reqwest::Client::new()
            });

        Self {
            http,
            config: Arc::new(config),
        }
    }

    pub fn from_env() -> BillingResult<Self> {
        Ok(Self::new(StripeConfig::from_env()?))
    }

    pub fn config(&self) -> &StripeConfig {
        &self.config
    }

    /// Fetch the authoritative copy of an event (`GET /v1/events/{id}`)
    pub async fn retrieve_event(&self, event_id: &str) -> BillingResult<InboundEvent> {
        validate_event_id(event_id)?;

        let url = format!(
            "{}/v1/events/{}",
            self.config.api_base.trim_end_matches('/'),
            event_id
        );

        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.config.secret_key)
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => {
                let bytes = response.bytes().await?;
                InboundEvent::from_slice(&bytes)
            }
            StatusCode::NOT_FOUND => Err(BillingError::NotFound(format!(
                "Stripe has no event {}",
                event_id
            ))),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(BillingError::StripeApi(format!(
                    "Failed to fetch event {} ({}): {}",
                    event_id, status, body
                )))
            }
        }
    }
}

/// Stripe event ids look like `evt_1NG8Du2eZvKYlo2CUI79vXWy`
fn validate_event_id(event_id: &str) -> BillingResult<()> {
    let valid = event_id
        .strip_prefix("evt_")
        .is_some_and(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_alphanumeric()));

    if valid {
        Ok(())
    } else {
        Err(BillingError::InvalidInput(format!(
            "Invalid event ID: {}",
            event_id
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_redacts_secrets() {
        let config = StripeConfig::new("sk_test_secret", "whsec_secret");
        let debug = format!("{:?}", config);
        assert!(!debug.contains("sk_test_secret"));
        assert!(!debug.contains("whsec_secret"));
        assert!(debug.contains("REDACTED"));
    }

    #[test]
    fn event_id_validation() {
        assert!(validate_event_id("evt_1").is_ok());
        assert!(validate_event_id("evt_1NG8Du2eZvKYlo2C").is_ok());
        assert!(validate_event_id("evt_").is_err());
        assert!(validate_event_id("pi_123").is_err());
        assert!(validate_event_id("evt_../admin").is_err());
    }

    #[tokio::test]
    async fn retrieve_event_sends_api_key() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/v1/events/evt_42")
            .match_header("authorization", "Bearer sk_test_123")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"id":"evt_42","type":"payment_intent.succeeded","created":1700000000,
                    "data":{"object":{"metadata":{"sub":"auth0|abc123"}}}}"#,
            )
            .create_async()
            .await;

        let client = StripeClient::new(
            StripeConfig::new("sk_test_123", "whsec_test").with_api_base(server.url()),
        );
        let event = client.retrieve_event("evt_42").await.unwrap();

        mock.assert_async().await;
        assert_eq!(event.id, "evt_42");
        assert_eq!(event.buyer_identity(), Some("auth0|abc123"));
    }

    #[tokio::test]
    async fn retrieve_event_maps_404_to_not_found() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/v1/events/evt_missing")
            .with_status(404)
            .with_body(r#"{"error":{"message":"No such event"}}"#)
            .create_async()
            .await;

        let client = StripeClient::new(
            StripeConfig::new("sk_test_123", "whsec_test").with_api_base(server.url()),
        );
        let result = client.retrieve_event("evt_missing").await;
        assert!(matches!(result, Err(BillingError::NotFound(_))));
    }
}
