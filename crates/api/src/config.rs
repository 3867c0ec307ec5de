//! Server configuration

use std::fmt;

use anyhow::Context;
use blogstandard_billing::BillingConfig;

const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";
const DEFAULT_ALLOWED_ORIGINS: &str = "http://localhost:3000,http://127.0.0.1:3000";

#[derive(Clone)]
pub struct Config {
    pub bind_address: String,
    pub database_url: String,
    /// CORS allowlist
    pub allowed_origins: Vec<String>,
    /// Apply pending migrations before serving
    pub run_migrations: bool,
    pub billing: BillingConfig,
}

impl Config {
    /// Load configuration from the environment.
    ///
    /// `DATABASE_URL`, `STRIPE_SECRET_KEY` and `STRIPE_WEBHOOK_SECRET` are
    /// required; the server refuses to start without them.
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .context("DATABASE_URL must be set")?;

        let billing = BillingConfig::from_env().context("Invalid Stripe configuration")?;

        let bind_address = std::env::var("BIND_ADDRESS")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let allowed_origins = parse_origins(
            &std::env::var("ALLOWED_ORIGINS").unwrap_or_else(|_| DEFAULT_ALLOWED_ORIGINS.into()),
        );

        let run_migrations = match std::env::var("RUN_MIGRATIONS") {
            Ok(raw) => parse_flag(&raw)
                .with_context(|| format!("RUN_MIGRATIONS has invalid value {:?}", raw))?,
            Err(_) => false,
        };

        Ok(Self {
            bind_address,
            database_url,
            allowed_origins,
            run_migrations,
            billing,
        })
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("bind_address", &self.bind_address)
            .field("database_url", &"[REDACTED]")
            .field("allowed_origins", &self.allowed_origins)
            .field("run_migrations", &self.run_migrations)
            .field("billing", &self.billing)
            .finish()
    }
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "" | "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;

    const VARS: &[&str] = &[
        "DATABASE_URL",
        "STRIPE_SECRET_KEY",
        "STRIPE_WEBHOOK_SECRET",
        "STRIPE_WEBHOOK_TOLERANCE_SECS",
        "STRIPE_API_BASE",
        "TOKENS_PER_PAYMENT",
        "BIND_ADDRESS",
        "ALLOWED_ORIGINS",
        "RUN_MIGRATIONS",
    ];

    fn clear_env() {
        for var in VARS {
            std::env::remove_var(var);
        }
    }

    fn set_required() {
        std::env::set_var("DATABASE_URL", "postgres://localhost/blogstandard");
        std::env::set_var("STRIPE_SECRET_KEY", "sk_test_123");
        std::env::set_var("STRIPE_WEBHOOK_SECRET", "whsec_test");
    }

    #[test]
    #[serial]
    fn test_defaults_applied() {
        clear_env();
        set_required();

        let config = Config::from_env().unwrap();

        assert_eq!(config.bind_address, "0.0.0.0:8080");
        assert_eq!(config.allowed_origins.len(), 2);
        assert!(!config.run_migrations);
        assert_eq!(config.billing.tokens_per_payment, 10);
        assert_eq!(config.billing.stripe.tolerance_secs, 300);
        clear_env();
    }

    #[test]
    #[serial]
    fn test_missing_webhook_secret_fails_fast() {
        clear_env();
        set_required();
        std::env::remove_var("STRIPE_WEBHOOK_SECRET");

        let err = Config::from_env().unwrap_err();
        assert!(format!("{:#}", err).contains("STRIPE_WEBHOOK_SECRET"));
        clear_env();
    }

    #[test]
    #[serial]
    fn test_missing_database_url_fails_fast() {
        clear_env();
        set_required();
        std::env::remove_var("DATABASE_URL");

        assert!(Config::from_env().is_err());
        clear_env();
    }

    #[test]
    #[serial]
    fn test_overrides() {
        clear_env();
        set_required();
        std::env::set_var("BIND_ADDRESS", "127.0.0.1:9000");
        std::env::set_var("ALLOWED_ORIGINS", "https://blogstandard.app, ,https://www.blogstandard.app");
        std::env::set_var("RUN_MIGRATIONS", "true");
        std::env::set_var("TOKENS_PER_PAYMENT", "25");

        let config = Config::from_env().unwrap();

        assert_eq!(config.bind_address, "127.0.0.1:9000");
        assert_eq!(
            config.allowed_origins,
            vec!["https://blogstandard.app", "https://www.blogstandard.app"]
        );
        assert!(config.run_migrations);
        assert_eq!(config.billing.tokens_per_payment, 25);
        clear_env();
    }

    #[test]
    #[serial]
    fn test_bad_numbers_rejected() {
        clear_env();
        set_required();
        std::env::set_var("TOKENS_PER_PAYMENT", "0");
        assert!(Config::from_env().is_err());

        std::env::set_var("TOKENS_PER_PAYMENT", "ten");
        assert!(Config::from_env().is_err());

        std::env::remove_var("TOKENS_PER_PAYMENT");
        std::env::set_var("RUN_MIGRATIONS", "maybe");
        assert!(Config::from_env().is_err());
        clear_env();
    }

    #[test]
    #[serial]
    fn test_debug_redacts_secrets() {
        clear_env();
        set_required();

        let rendered = format!("{:?}", Config::from_env().unwrap());
        assert!(!rendered.contains("sk_test_123"));
        assert!(!rendered.contains("whsec_test"));
        assert!(!rendered.contains("postgres://"));
        clear_env();
    }
}
