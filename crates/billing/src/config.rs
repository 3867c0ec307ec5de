//! Billing configuration loaded from the environment

use std::str::FromStr;

use crate::client::StripeConfig;
use crate::error::{BillingError, BillingResult};

/// Tokens granted for each successful payment
pub const DEFAULT_TOKENS_PER_PAYMENT: i64 = 10;

#[derive(Debug, Clone)]
pub struct BillingConfig {
    pub stripe: StripeConfig,
    pub tokens_per_payment: i64,
}

impl BillingConfig {
    pub fn new(stripe: StripeConfig) -> Self {
        Self {
            stripe,
            tokens_per_payment: DEFAULT_TOKENS_PER_PAYMENT,
        }
    }

    /// Read Stripe credentials and `TOKENS_PER_PAYMENT`.
    ///
    /// Missing secrets are an error here so the process refuses to start
    /// instead of rejecting every webhook later.
    pub fn from_env() -> BillingResult<Self> {
        let stripe = StripeConfig::from_env()?;
        let tokens_per_payment = optional_env("TOKENS_PER_PAYMENT", DEFAULT_TOKENS_PER_PAYMENT)?;
        if tokens_per_payment <= 0 {
            return Err(BillingError::Config(
                "TOKENS_PER_PAYMENT must be positive".to_string(),
            ));
        }

        Ok(Self {
            stripe,
            tokens_per_payment,
        })
    }
}

pub(crate) fn required_env(name: &str) -> BillingResult<String> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(BillingError::Config(format!("{} must be set", name))),
    }
}

pub(crate) fn optional_env<T>(name: &str, default: T) -> BillingResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| BillingError::Config(format!("{} is invalid: {}", name, e))),
        _ => Ok(default),
    }
}
