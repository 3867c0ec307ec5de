//! Inbound Stripe event model
//!
//! Only the envelope fields the ingestor needs are typed; `data.object` stays
//! opaque JSON so new Stripe API versions never break parsing.

use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::{BillingError, BillingResult};

pub const PAYMENT_INTENT_SUCCEEDED: &str = "payment_intent.succeeded";

/// Metadata key set at checkout with the buyer's Auth0 subject
pub const BUYER_IDENTITY_METADATA_KEY: &str = "sub";

/// Event types this service acts on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    PaymentIntentSucceeded,
    /// Anything else; acknowledged and recorded, never acted on
    Unhandled(String),
}

impl EventKind {
    pub fn from_type(event_type: &str) -> Self {
        match event_type {
            PAYMENT_INTENT_SUCCEEDED => EventKind::PaymentIntentSucceeded,
            other => EventKind::Unhandled(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            EventKind::PaymentIntentSucceeded => PAYMENT_INTENT_SUCCEEDED,
            EventKind::Unhandled(other) => other,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventData {
    #[serde(default)]
    pub object: serde_json::Value,
}

/// A verified Stripe event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub type_: String,
    /// Provider creation time (unix seconds)
    #[serde(default)]
    pub created: i64,
    pub data: EventData,
    #[serde(skip, default = "time::OffsetDateTime::now_utc")]
    pub received_at: OffsetDateTime,
}

impl InboundEvent {
    /// Parse an event body. Call only after the signature has been checked.
    pub fn from_slice(bytes: &[u8]) -> BillingResult<Self> {
        let event: InboundEvent = serde_json::from_slice(bytes)
            .map_err(|e| BillingError::InvalidInput(format!("Invalid event payload: {}", e)))?;

        if event.id.trim().is_empty() {
            return Err(BillingError::InvalidInput("Event has no id".to_string()));
        }
        if event.type_.trim().is_empty() {
            return Err(BillingError::InvalidInput("Event has no type".to_string()));
        }

        Ok(event)
    }

    pub fn kind(&self) -> EventKind {
        EventKind::from_type(&self.type_)
    }

    /// Provider timestamp, falling back to local receipt time
    pub fn event_timestamp(&self) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(self.created).unwrap_or(self.received_at)
    }

    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.data
            .object
            .get("metadata")
            .and_then(|metadata| metadata.get(key))
            .and_then(|value| value.as_str())
    }

    /// Buyer identity from `data.object.metadata.sub`, if present and non-blank
    pub fn buyer_identity(&self) -> Option<&str> {
        self.metadata_value(BUYER_IDENTITY_METADATA_KEY)
            .map(str::trim)
            .filter(|sub| !sub.is_empty())
    }

    /// `data.object.id` (e.g. the PaymentIntent id), for log correlation
    pub fn object_id(&self) -> Option<&str> {
        self.data.object.get("id").and_then(|id| id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> BillingResult<InboundEvent> {
        InboundEvent::from_slice(json.as_bytes())
    }

    #[test]
    fn parses_payment_intent_succeeded() {
        let event = parse(
            r#"{
                "id": "evt_1",
                "object": "event",
                "api_version": "2024-06-20",
                "type": "payment_intent.succeeded",
                "created": 1700000000,
                "data": {"object": {"id": "pi_1", "amount": 500, "metadata": {"sub": "auth0|abc123"}}}
            }"#,
        )
        .unwrap();

        assert_eq!(event.kind(), EventKind::PaymentIntentSucceeded);
        assert_eq!(event.buyer_identity(), Some("auth0|abc123"));
        assert_eq!(event.object_id(), Some("pi_1"));
        assert_eq!(event.event_timestamp().unix_timestamp(), 1_700_000_000);
    }

    #[test]
    fn unknown_types_are_unhandled() {
        let event =
            parse(r#"{"id":"evt_2","type":"customer.created","data":{"object":{}}}"#).unwrap();
        assert_eq!(
            event.kind(),
            EventKind::Unhandled("customer.created".to_string())
        );
        assert_eq!(event.kind().to_string(), "customer.created");
    }

    #[test]
    fn blank_or_missing_identity_is_none() {
        let missing =
            parse(r#"{"id":"evt_3","type":"payment_intent.succeeded","data":{"object":{}}}"#)
                .unwrap();
        assert_eq!(missing.buyer_identity(), None);

        let blank = parse(
            r#"{"id":"evt_4","type":"payment_intent.succeeded",
                "data":{"object":{"metadata":{"sub":"  "}}}}"#,
        )
        .unwrap();
        assert_eq!(blank.buyer_identity(), None);
    }

    #[test]
    fn rejects_envelopes_without_id_or_type() {
        assert!(parse(r#"{"id":"","type":"x","data":{"object":{}}}"#).is_err());
        assert!(parse(r#"{"id":"evt_5","type":"","data":{"object":{}}}"#).is_err());
        assert!(parse(r#"{"type":"x","data":{"object":{}}}"#).is_err());
        assert!(parse("not json").is_err());
    }
}
