// Stripe webhook handling with signature verification and event processing.
// Verification runs against the exact delivered bytes, before the payload is
// parsed as trusted input.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, instrument};

use crate::checkout::intent::CheckoutKind;
use crate::checkout::reconcile::{extract_outcome, settle_paid_tip};
use crate::notify::Mailer;
use crate::pay_counter_inc;
use crate::store::Store;
use crate::stripe::errors::WebhookError;
use crate::stripe::types::{CheckoutSession, StripeEvent};

type HmacSha256 = Hmac<Sha256>;

/// Collaborators the event processor needs for tip settlement.
#[derive(Clone)]
pub struct WebhookContext {
    pub store: Store,
    pub mailer: Mailer,
    pub admin_recipients: Vec<String>,
}

/// Main webhook entry point: verify the signature, then process the event.
#[instrument(skip(payload, headers, ctx))]
pub async fn handle_webhook(
    payload: &[u8],
    headers: &http::HeaderMap,
    webhook_secret: &str,
    tolerance_seconds: i64,
    ctx: &WebhookContext,
) -> Result<(), WebhookError> {
    verify_signature(payload, headers, webhook_secret, tolerance_seconds)?;

    let evt: StripeEvent = serde_json::from_slice(payload)
        .map_err(|e| WebhookError::MalformedPayload(format!("JSON parse error: {e}")))?;

    pay_counter_inc!("pay.webhook.received", "event_type" => &evt.event_type);

    process_event(&evt, ctx).await
}

/// Parsed `Stripe-Signature` header: `t=<unix seconds>,v1=<hex>[,v1=...]`.
struct SignatureHeader<'a> {
    timestamp: i64,
    signatures: Vec<&'a str>,
}

impl<'a> SignatureHeader<'a> {
    fn parse(header: &'a str) -> Result<Self, WebhookError> {
        let mut timestamp: Option<i64> = None;
        let mut signatures = Vec::new();
        for part in header.split(',') {
            match part.split_once('=') {
                Some(("t", value)) => timestamp = value.parse().ok(),
                Some(("v1", value)) => signatures.push(value),
                _ => {} // Ignore unknown scheme fields
            }
        }
        let timestamp = timestamp.ok_or_else(|| {
            WebhookError::InvalidSignature("missing timestamp in signature header".to_string())
        })?;
        if signatures.is_empty() {
            return Err(WebhookError::InvalidSignature(
                "no v1 signature found".to_string(),
            ));
        }
        Ok(Self {
            timestamp,
            signatures,
        })
    }
}

/// Verify the HMAC-SHA256 webhook signature over `timestamp.payload`.
pub fn verify_signature(
    payload: &[u8],
    headers: &http::HeaderMap,
    webhook_secret: &str,
    tolerance_seconds: i64,
) -> Result<(), WebhookError> {
    if webhook_secret.is_empty() {
        return Err(WebhookError::MissingSecret);
    }

    let header = headers
        .get("stripe-signature")
        .ok_or(WebhookError::MissingSignature)?
        .to_str()
        .map_err(|e| WebhookError::InvalidSignature(format!("invalid header encoding: {e}")))?;
    let parsed = SignatureHeader::parse(header)?;

    let current_time = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| WebhookError::InvalidSignature(format!("system time error: {e}")))?
        .as_secs() as i64;
    let time_diff = (current_time - parsed.timestamp).abs();
    if time_diff > tolerance_seconds {
        return Err(WebhookError::TimestampTolerance(format!(
            "timestamp {} differs from current time {} by {} seconds (tolerance: {})",
            parsed.timestamp, current_time, time_diff, tolerance_seconds
        )));
    }

    let signed_payload = format!("{}.{}", parsed.timestamp, String::from_utf8_lossy(payload));
    let mut mac = HmacSha256::new_from_slice(webhook_secret.as_bytes())
        .map_err(|e| WebhookError::InvalidSignature(format!("HMAC init error: {e}")))?;
    mac.update(signed_payload.as_bytes());
    let expected = hex::encode(mac.finalize().into_bytes());

    // Constant-time comparison against every provided v1 signature
    let valid = parsed
        .signatures
        .iter()
        .any(|sig| constant_time_eq(expected.as_bytes(), sig.as_bytes()));
    if !valid {
        return Err(WebhookError::InvalidSignature(
            "signature mismatch".to_string(),
        ));
    }

    debug!(
        timestamp = parsed.timestamp,
        time_diff = time_diff,
        "webhook signature verified"
    );

    Ok(())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len()
        && a.iter()
            .zip(b)
            .fold(0u8, |acc, (x, y)| acc | (x ^ y))
            == 0
}

/// Dispatch a verified event. Only session completion carries settlement
/// weight; everything else is acknowledged and counted.
#[instrument(skip(evt, ctx), fields(event_id = %evt.id, event_type = %evt.event_type))]
pub async fn process_event(evt: &StripeEvent, ctx: &WebhookContext) -> Result<(), WebhookError> {
    match evt.event_type.as_str() {
        "checkout.session.completed" => {
            let session: CheckoutSession = serde_json::from_value(evt.data.object.clone())
                .map_err(|e| {
                    WebhookError::ProcessingFailed(format!("failed to parse CheckoutSession: {e}"))
                })?;
            handle_session_completed(&session, ctx).await?;
            pay_counter_inc!("pay.webhook.processed", "event_type" => "checkout.session.completed");
        }
        other => {
            info!(event_type = %other, "ignoring unsupported event type");
            pay_counter_inc!("pay.webhook.ignored", "event_type" => other);
        }
    }
    Ok(())
}

async fn handle_session_completed(
    session: &CheckoutSession,
    ctx: &WebhookContext,
) -> Result<(), WebhookError> {
    if !session.is_paid() {
        info!(
            session_id = %session.id,
            payment_status = %session.payment_status,
            "completed session not yet paid, nothing to settle"
        );
        return Ok(());
    }

    let outcome = extract_outcome(session);
    match outcome.kind {
        CheckoutKind::Tip => {
            settle_paid_tip(session, &ctx.store, &ctx.mailer, &ctx.admin_recipients)
                .await
                .map_err(|e| WebhookError::ProcessingFailed(e.to_string()))?;
        }
        CheckoutKind::Package => {
            // Bookings have no local persistence; the session itself is the
            // durable record and the client confirms via /verify-payment.
            info!(
                session_id = %session.id,
                amount = outcome.amount,
                "package checkout completed"
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(payload: &[u8], secret: &str, timestamp: i64) -> String {
        let signed_payload = format!("{}.{}", timestamp, String::from_utf8_lossy(payload));
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(signed_payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn now() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64
    }

    #[test]
    fn valid_signature_accepted() {
        let payload = br#"{"id":"evt_1","type":"checkout.session.completed","data":{"object":{}}}"#;
        let secret = "whsec_test_secret";
        let timestamp = now();
        let sig_header = format!("t={},v1={}", timestamp, sign(payload, secret, timestamp));

        let mut headers = http::HeaderMap::new();
        headers.insert("stripe-signature", sig_header.parse().unwrap());

        assert!(verify_signature(payload, &headers, secret, 300).is_ok());
    }

    #[test]
    fn wrong_signature_rejected() {
        let payload = br#"{"id":"evt_1","type":"checkout.session.completed"}"#;
        let timestamp = now();
        let sig_header = format!(
            "t={},v1={}",
            timestamp,
            "0".repeat(64) // wrong digest, right length
        );

        let mut headers = http::HeaderMap::new();
        headers.insert("stripe-signature", sig_header.parse().unwrap());

        let result = verify_signature(payload, &headers, "whsec_test_secret", 300);
        assert!(matches!(result, Err(WebhookError::InvalidSignature(_))));
    }

    #[test]
    fn missing_header_rejected() {
        let headers = http::HeaderMap::new();
        let result = verify_signature(b"x", &headers, "secret", 300);
        assert!(matches!(result, Err(WebhookError::MissingSignature)));
    }

    #[test]
    fn stale_timestamp_rejected() {
        let payload = b"payload";
        let secret = "whsec_test_secret";
        let old = now() - 6000;
        let sig_header = format!("t={},v1={}", old, sign(payload, secret, old));

        let mut headers = http::HeaderMap::new();
        headers.insert("stripe-signature", sig_header.parse().unwrap());

        let result = verify_signature(payload, &headers, secret, 300);
        assert!(matches!(result, Err(WebhookError::TimestampTolerance(_))));
    }

    #[test]
    fn empty_secret_rejected() {
        let headers = http::HeaderMap::new();
        let result = verify_signature(b"x", &headers, "", 300);
        assert!(matches!(result, Err(WebhookError::MissingSecret)));
    }

    #[tokio::test]
    async fn invalid_signature_never_reaches_event_branching() {
        // The payload is valid JSON for a paid tip session; with a bad
        // signature nothing must be persisted.
        let dir = tempfile::tempdir().unwrap();
        let ctx = WebhookContext {
            store: Store::open(dir.path().join("wh.redb")).unwrap(),
            mailer: Mailer::new(reqwest::Client::new(), String::new(), String::new()),
            admin_recipients: vec![],
        };
        let payload = br#"{
            "id": "evt_1",
            "type": "checkout.session.completed",
            "data": {"object": {
                "id": "cs_1",
                "payment_status": "paid",
                "amount_total": 1000,
                "payment_intent": "pi_1",
                "metadata": {"paymentType": "tip", "recipientType": "company"}
            }}
        }"#;
        let mut headers = http::HeaderMap::new();
        headers.insert("stripe-signature", "t=1,v1=deadbeef".parse().unwrap());

        let result = handle_webhook(payload, &headers, "whsec_test", 300, &ctx).await;
        assert!(result.is_err());
        assert!(ctx.store.get_tip("pi_1").unwrap().is_none());
    }

    #[tokio::test]
    async fn unpaid_session_event_has_no_side_effects() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = WebhookContext {
            store: Store::open(dir.path().join("wh.redb")).unwrap(),
            mailer: Mailer::new(reqwest::Client::new(), String::new(), String::new()),
            admin_recipients: vec![],
        };
        let evt: StripeEvent = serde_json::from_str(
            r#"{
                "id": "evt_3",
                "type": "checkout.session.completed",
                "data": {"object": {
                    "id": "cs_3",
                    "payment_status": "unpaid",
                    "payment_intent": "pi_3",
                    "metadata": {"paymentType": "tip", "recipientType": "company"}
                }}
            }"#,
        )
        .unwrap();

        process_event(&evt, &ctx).await.unwrap();
        assert!(ctx.store.get_tip("pi_3").unwrap().is_none());
    }

    #[tokio::test]
    async fn completed_tip_event_settles_once() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = WebhookContext {
            store: Store::open(dir.path().join("wh.redb")).unwrap(),
            mailer: Mailer::new(reqwest::Client::new(), String::new(), String::new()),
            admin_recipients: vec![],
        };
        let evt: StripeEvent = serde_json::from_str(
            r#"{
                "id": "evt_2",
                "type": "checkout.session.completed",
                "data": {"object": {
                    "id": "cs_2",
                    "payment_status": "paid",
                    "amount_total": 1500,
                    "currency": "gbp",
                    "payment_intent": "pi_2",
                    "metadata": {"paymentType": "tip", "recipientType": "company", "currency": "gbp"}
                }}
            }"#,
        )
        .unwrap();

        process_event(&evt, &ctx).await.unwrap();
        process_event(&evt, &ctx).await.unwrap();

        let record = ctx.store.get_tip("pi_2").unwrap().unwrap();
        assert_eq!(record.amount, 15.0);
        assert_eq!(record.recipient_type, "company");
    }
}
