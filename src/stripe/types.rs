// Minimal Stripe DTOs for the hosted-checkout flow
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Checkout session shape as returned by POST/GET /v1/checkout/sessions.
/// Only the fields the reconciliation workflow reads are modeled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// "paid" | "unpaid" | "no_payment_required"
    #[serde(default)]
    pub payment_status: String,
    /// "open" | "complete" | "expired"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Total in minor units (pence/cents).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount_total: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_intent: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<i64>,
}

impl CheckoutSession {
    pub fn is_paid(&self) -> bool {
        self.payment_status == "paid"
    }

    /// Payment-intent id when present, session id otherwise. The dedup key
    /// for persistence must be stable across poll and webhook delivery.
    pub fn dedup_key(&self) -> &str {
        self.payment_intent.as_deref().unwrap_or(&self.id)
    }
}

// Stripe REST error envelope: { error: { type, code, decline_code, message, param } }
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StripeErrorEnvelope {
    pub error: StripeErrorDetails,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StripeErrorDetails {
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decline_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub param: Option<String>,
}

/// Stripe webhook event envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StripeEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: StripeEventData,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub livemode: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StripeEventData {
    pub object: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_attributes: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_deserializes_with_metadata() {
        let json = r#"{
            "id": "cs_test_1",
            "payment_status": "paid",
            "amount_total": 4999,
            "currency": "usd",
            "payment_intent": "pi_1",
            "metadata": {"paymentType": "package", "userId": "u1"}
        }"#;
        let session: CheckoutSession = serde_json::from_str(json).unwrap();
        assert!(session.is_paid());
        assert_eq!(session.dedup_key(), "pi_1");
        assert_eq!(session.metadata.get("userId").map(String::as_str), Some("u1"));
    }

    #[test]
    fn dedup_key_falls_back_to_session_id() {
        let session: CheckoutSession =
            serde_json::from_str(r#"{"id": "cs_test_2", "payment_status": "unpaid"}"#).unwrap();
        assert!(!session.is_paid());
        assert_eq!(session.dedup_key(), "cs_test_2");
    }
}
