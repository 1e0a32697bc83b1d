// Verification Reconciler
// Re-derives the authoritative amount/discount/recipient from stored session
// metadata once the processor reports a session, and runs the side effects
// for paid tips exactly once per logical payment.

use serde::Serialize;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{info, warn};

use crate::checkout::intent::CheckoutKind;
use crate::checkout::{keys, COUPON_NONE};
use crate::guides::resolve_guide;
use crate::notify::{dispatch_tip_notifications, Mailer};
use crate::pay_counter_inc;
use crate::store::{Store, TipClaim, TipRecord};
use crate::stripe::errors::StripeApiError;
use crate::stripe::rest::StripeRestClient;
use crate::stripe::types::CheckoutSession;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("checkout session not found")]
    SessionNotFound,
    #[error("payment processor unavailable: {0}")]
    Upstream(StripeApiError),
    #[error("persistence failed: {0}")]
    Persistence(anyhow::Error),
}

impl From<StripeApiError> for ReconcileError {
    fn from(e: StripeApiError) -> Self {
        if e.is_missing_resource() {
            ReconcileError::SessionNotFound
        } else {
            ReconcileError::Upstream(e)
        }
    }
}

/// Canonical view of a paid session, derived on every verification rather
/// than stored anywhere.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentOutcome {
    pub paid: bool,
    /// Major units, converted back from the processor-reported total.
    pub amount: f64,
    pub original_amount: f64,
    pub discount_amount: f64,
    pub coupon_code: Option<String>,
    pub customer_id: Option<String>,
    #[serde(skip)]
    pub kind: CheckoutKind,
    pub metadata: HashMap<String, String>,
}

/// Result of reconciling a session reference.
#[derive(Debug)]
pub enum Reconciliation {
    /// Not an error: a pending or failed state the caller may re-poll.
    Pending { status: String },
    Paid(PaymentOutcome),
}

/// Fetch the session and derive its outcome. No side effects; tip
/// settlement is a separate, explicitly idempotent step.
pub async fn reconcile(
    rest: &StripeRestClient,
    session_id: &str,
) -> Result<Reconciliation, ReconcileError> {
    let session = rest.retrieve_checkout_session(session_id).await?;
    if !session.is_paid() {
        return Ok(Reconciliation::Pending {
            status: session.payment_status.clone(),
        });
    }
    Ok(Reconciliation::Paid(extract_outcome(&session)))
}

/// Read the reconciliation fields back out of session metadata. A session
/// created by an older/alternate path may lack `originalAmount`; the
/// processor-reported total is the fallback so extraction never fails on
/// missing optional metadata.
pub fn extract_outcome(session: &CheckoutSession) -> PaymentOutcome {
    let amount = session.amount_total.unwrap_or(0) as f64 / 100.0;
    let original_amount = metadata_f64(&session.metadata, keys::ORIGINAL_AMOUNT).unwrap_or(amount);
    let discount_amount = metadata_f64(&session.metadata, keys::DISCOUNT_AMOUNT).unwrap_or(0.0);
    let coupon_code = session
        .metadata
        .get(keys::COUPON_CODE)
        .map(String::as_str)
        .filter(|c| !c.is_empty() && *c != COUPON_NONE)
        .map(str::to_string);
    let kind = match session.metadata.get(keys::PAYMENT_TYPE).map(String::as_str) {
        Some("tip") => CheckoutKind::Tip,
        _ => CheckoutKind::Package,
    };

    PaymentOutcome {
        paid: true,
        amount,
        original_amount,
        discount_amount,
        coupon_code,
        customer_id: session.customer.clone(),
        kind,
        metadata: session.metadata.clone(),
    }
}

fn metadata_f64(metadata: &HashMap<String, String>, key: &str) -> Option<f64> {
    metadata.get(key).and_then(|v| v.trim().parse::<f64>().ok())
}

/// Summary returned to the tip payer.
#[derive(Debug)]
pub struct TipVerification {
    pub record: TipRecord,
    /// True when this call performed the persistence and owns notification.
    pub newly_recorded: bool,
}

/// Persist-and-notify for a paid tip session, deduplicated by payment-intent
/// id: the synchronous verify endpoint and the webhook can both observe the
/// same paid session, and exactly one of them gets `newly_recorded`.
pub async fn settle_paid_tip(
    session: &CheckoutSession,
    store: &Store,
    mailer: &Mailer,
    admin_recipients: &[String],
) -> Result<TipVerification, ReconcileError> {
    let outcome = extract_outcome(session);
    let meta = |key: &str| {
        session
            .metadata
            .get(key)
            .map(String::as_str)
            .unwrap_or_default()
            .to_string()
    };

    let recipient_type = {
        let raw = meta(keys::RECIPIENT_TYPE);
        if raw == "guide" {
            "guide".to_string()
        } else {
            "company".to_string()
        }
    };
    let supplied_id = meta(keys::RECIPIENT_ID);
    let supplied_name = meta(keys::RECIPIENT_NAME);

    // Resolution failure must not abort the paid confirmation: the payer
    // already completed payment and must see success.
    let mut recipient_id = supplied_id.clone();
    let mut recipient_name = supplied_name.clone();
    let mut guide_address: Option<String> = None;
    if recipient_type == "guide" {
        let resolved = resolve_guide(
            store,
            Some(supplied_id.as_str()).filter(|s| !s.is_empty()),
            Some(supplied_name.as_str()).filter(|s| !s.is_empty()),
        );
        if resolved.exists {
            if let Some(id) = &resolved.id {
                recipient_id = id.clone();
            }
            recipient_name = resolved.name.clone();
            guide_address = resolved.email.clone();
        } else {
            warn!(
                session_id = %session.id,
                recipient_id = %supplied_id,
                recipient_name = %supplied_name,
                "guide resolution failed, using supplied identity"
            );
            recipient_name = resolved.name.clone();
        }
    }

    let record = TipRecord {
        payment_intent_id: session.dedup_key().to_string(),
        session_id: session.id.clone(),
        amount: outcome.amount,
        currency: outcome
            .metadata
            .get(keys::CURRENCY)
            .cloned()
            .or_else(|| session.currency.clone())
            .unwrap_or_default(),
        recipient_type,
        recipient_id,
        recipient_name,
        sender_id: meta(keys::SENDER_ID),
        sender_name: meta(keys::SENDER_NAME),
        message: meta(keys::MESSAGE),
        status: "completed".to_string(),
        created_at: chrono::Utc::now(),
    };

    match store.claim_tip(&record).map_err(ReconcileError::Persistence)? {
        TipClaim::Recorded => {
            pay_counter_inc!("pay.tip.recorded", "recipient_type" => &record.recipient_type);
            info!(
                payment_intent_id = %record.payment_intent_id,
                amount = record.amount,
                recipient_type = %record.recipient_type,
                "tip payment recorded"
            );
            // Fire-and-forget: a notification failure is logged inside and
            // never changes the outcome already computed for the payer.
            let mailer = mailer.clone();
            let store = store.clone();
            let admins = admin_recipients.to_vec();
            let spawned_record = record.clone();
            tokio::spawn(async move {
                dispatch_tip_notifications(
                    &mailer,
                    &store,
                    &admins,
                    &spawned_record,
                    guide_address.as_deref(),
                )
                .await;
            });
            Ok(TipVerification {
                record,
                newly_recorded: true,
            })
        }
        TipClaim::Duplicate(prior) => {
            pay_counter_inc!("pay.tip.duplicate");
            info!(
                payment_intent_id = %prior.payment_intent_id,
                "tip already recorded, returning cached outcome"
            );
            Ok(TipVerification {
                record: prior,
                newly_recorded: false,
            })
        }
    }
}
