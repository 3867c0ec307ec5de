// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! BlogStandard Billing Module
//!
//! Turns Stripe payment webhooks into token credits.
//!
//! ## Features
//!
//! - **Signature Verification**: HMAC-SHA256 over the raw body with a replay window
//! - **Idempotency**: One atomic claim per Stripe event id; redeliveries are no-ops
//! - **Token Credits**: `payment_intent.succeeded` upserts the buyer's balance
//! - **Replay**: List failed events and re-run them from Stripe's copy

pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod idempotency;
pub mod memory_store;
pub mod signature;
pub mod store;
pub mod webhooks;


// Client
pub use client::{StripeClient, StripeConfig};

// Config
pub use config::{BillingConfig, DEFAULT_TOKENS_PER_PAYMENT};

// Error
pub use error::{BillingError, BillingResult};

// Events
pub use events::{EventKind, InboundEvent, PAYMENT_INTENT_SUCCEEDED};

// Idempotency
pub use idempotency::{ClaimOutcome, IdempotencyGuard, ProcessingStatus};

// Storage
pub use memory_store::{FailureMode, InMemoryWebhookStore};
pub use store::{CreditOutcome, PgWebhookStore, WebhookEventRecord, WebhookQuery, WebhookStore};

// Signature
pub use signature::{sign_payload, verify_signature, SIGNATURE_HEADER};

// Webhooks
pub use webhooks::{WebhookHandler, WebhookOutcome, WebhookReplayResult};
