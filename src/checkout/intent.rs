// Checkout Intent Builder
// Validates a raw booking or tip request, normalizes currency and amount,
// and produces the parameters for a hosted-checkout session request.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::checkout::{keys, COUPON_NONE};

/// Currencies accepted as-is; anything else resolves to the configured
/// fallback.
const RECOGNIZED_CURRENCIES: &[&str] = &["gbp", "usd"];

/// A monetary amount as received on the wire: clients send either a JSON
/// number or a numeric string.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawAmount {
    Number(f64),
    Text(String),
}

impl RawAmount {
    pub fn parse(&self) -> Option<f64> {
        match self {
            RawAmount::Number(n) if n.is_finite() => Some(*n),
            RawAmount::Number(_) => None,
            RawAmount::Text(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.parse() == Some(0.0)
    }
}

/// Convert a major-unit amount to the processor's minor units.
/// Rounding is round-half-away-from-zero (f64::round); this value is what
/// the processor actually charges.
pub fn to_minor_units(major: f64) -> i64 {
    (major * 100.0).round() as i64
}

/// Lower-case the supplied code; unrecognized or absent values resolve to
/// the fallback. Idempotent: normalizing an already-normalized value
/// returns it unchanged.
pub fn normalize_currency(input: Option<&str>, fallback: &str) -> String {
    match input {
        Some(code) => {
            let lower = code.trim().to_ascii_lowercase();
            if RECOGNIZED_CURRENCIES.contains(&lower.as_str()) {
                lower
            } else {
                fallback.to_string()
            }
        }
        None => fallback.to_string(),
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IntentError {
    #[error("userId is required")]
    MissingUserId,
    #[error("amount is required")]
    MissingAmount,
    #[error("fully discounted bookings are settled without a checkout session")]
    FreeBooking,
    #[error("amount must be a positive number")]
    InvalidAmount,
}

impl IntentError {
    pub fn code(&self) -> &'static str {
        match self {
            IntentError::MissingUserId => "MISSING_USER_ID",
            IntentError::MissingAmount => "MISSING_AMOUNT",
            IntentError::FreeBooking => "FREE_BOOKING",
            IntentError::InvalidAmount => "INVALID_AMOUNT",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingCheckoutRequest {
    #[serde(default)]
    pub package_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub package_name: Option<String>,
    #[serde(default)]
    pub original_amount: Option<RawAmount>,
    #[serde(default)]
    pub amount: Option<RawAmount>,
    #[serde(default)]
    pub coupon_code: Option<String>,
    #[serde(default)]
    pub discount_amount: Option<RawAmount>,
    #[serde(default)]
    pub currency: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecipientType {
    Guide,
    Company,
}

impl RecipientType {
    /// Unrecognized values resolve to the company pool rather than failing
    /// the request.
    pub fn from_str(s: &str) -> Self {
        if s.eq_ignore_ascii_case("guide") {
            RecipientType::Guide
        } else {
            RecipientType::Company
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RecipientType::Guide => "guide",
            RecipientType::Company => "company",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TipCheckoutRequest {
    #[serde(default)]
    pub amount: Option<RawAmount>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub recipient_type: Option<String>,
    #[serde(default)]
    pub recipient_id: Option<String>,
    #[serde(default)]
    pub recipient_name: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub success_url: Option<String>,
    #[serde(default)]
    pub cancel_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckoutKind {
    Package,
    Tip,
}

impl CheckoutKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckoutKind::Package => "package",
            CheckoutKind::Tip => "tip",
        }
    }
}

/// Redirect targets and currency fallback supplied by configuration;
/// tip requests may override the redirect targets per request.
#[derive(Debug, Clone)]
pub struct IntentDefaults {
    pub success_url: String,
    pub cancel_url: String,
    pub currency_fallback: String,
}

/// The validated parameters for one hosted-checkout session request.
#[derive(Debug, Clone)]
pub struct CheckoutIntent {
    pub kind: CheckoutKind,
    pub amount_minor: i64,
    /// Normalized, lower-cased. Sent to the processor, echoed to the caller,
    /// and stored in metadata; never re-derived downstream.
    pub currency: String,
    pub product_name: String,
    pub description: String,
    pub metadata: HashMap<String, String>,
    pub success_url: String,
    pub cancel_url: String,
    /// Unix seconds at build time; correlates redirect URLs, carries no
    /// timeout semantics.
    pub created_at: i64,
}

impl CheckoutIntent {
    pub fn for_booking(
        req: &BookingCheckoutRequest,
        defaults: &IntentDefaults,
    ) -> Result<Self, IntentError> {
        let user_id = match req.user_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => return Err(IntentError::MissingUserId),
        };
        let raw_amount = req.amount.as_ref().ok_or(IntentError::MissingAmount)?;
        if raw_amount.is_zero() {
            // Zero-amount sessions are outside the processor's accepted unit
            // range; fully discounted bookings settle client-side.
            return Err(IntentError::FreeBooking);
        }
        let amount = raw_amount.parse().ok_or(IntentError::InvalidAmount)?;
        if amount < 0.0 {
            return Err(IntentError::InvalidAmount);
        }

        let currency = normalize_currency(req.currency.as_deref(), &defaults.currency_fallback);
        let original = req
            .original_amount
            .as_ref()
            .and_then(RawAmount::parse)
            .unwrap_or(amount);
        let discount = req
            .discount_amount
            .as_ref()
            .and_then(RawAmount::parse)
            .unwrap_or(0.0);
        let coupon = req
            .coupon_code
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty());

        let base_name = req
            .package_name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or("Travel Package");
        let (product_name, description) = match coupon {
            Some(code) => (
                format!("{base_name} (Coupon: {code})"),
                format!(
                    "Original price: {original:.2} {upper}, discount applied: {discount:.2} {upper}",
                    upper = currency.to_ascii_uppercase()
                ),
            ),
            None => (base_name.to_string(), "Package booking payment".to_string()),
        };

        let mut metadata = HashMap::new();
        metadata.insert(keys::PAYMENT_TYPE.into(), CheckoutKind::Package.as_str().into());
        metadata.insert(
            keys::PACKAGE_ID.into(),
            req.package_id.clone().unwrap_or_default(),
        );
        metadata.insert(keys::USER_ID.into(), user_id);
        metadata.insert(keys::PACKAGE_NAME.into(), base_name.to_string());
        metadata.insert(keys::ORIGINAL_AMOUNT.into(), format!("{original}"));
        metadata.insert(keys::DISCOUNT_AMOUNT.into(), format!("{discount}"));
        metadata.insert(
            keys::COUPON_CODE.into(),
            coupon.map(str::to_string).unwrap_or_else(|| COUPON_NONE.into()),
        );
        metadata.insert(keys::CURRENCY.into(), currency.clone());

        Ok(Self {
            kind: CheckoutKind::Package,
            amount_minor: to_minor_units(amount),
            currency,
            product_name,
            description,
            metadata,
            success_url: defaults.success_url.clone(),
            cancel_url: defaults.cancel_url.clone(),
            created_at: chrono::Utc::now().timestamp(),
        })
    }

    pub fn for_tip(
        req: &TipCheckoutRequest,
        defaults: &IntentDefaults,
    ) -> Result<Self, IntentError> {
        let raw_amount = req.amount.as_ref().ok_or(IntentError::MissingAmount)?;
        let amount = raw_amount.parse().ok_or(IntentError::InvalidAmount)?;
        if amount <= 0.0 {
            return Err(IntentError::InvalidAmount);
        }

        let currency = normalize_currency(req.currency.as_deref(), &defaults.currency_fallback);
        let recipient_type = RecipientType::from_str(req.recipient_type.as_deref().unwrap_or(""));
        let recipient_name = req
            .recipient_name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty());
        let product_name = match recipient_type {
            RecipientType::Guide => {
                format!("Tip for {}", recipient_name.unwrap_or("your guide"))
            }
            RecipientType::Company => "Tip for the whole team".to_string(),
        };
        let description = req
            .message
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or("Thank you for a great trip")
            .to_string();

        let mut metadata = HashMap::new();
        metadata.insert(keys::PAYMENT_TYPE.into(), CheckoutKind::Tip.as_str().into());
        metadata.insert(keys::RECIPIENT_TYPE.into(), recipient_type.as_str().into());
        metadata.insert(
            keys::RECIPIENT_ID.into(),
            req.recipient_id.clone().unwrap_or_default(),
        );
        metadata.insert(
            keys::RECIPIENT_NAME.into(),
            recipient_name.map(str::to_string).unwrap_or_default(),
        );
        metadata.insert(keys::SENDER_ID.into(), req.user_id.clone().unwrap_or_default());
        metadata.insert(
            keys::SENDER_NAME.into(),
            req.user_name.clone().unwrap_or_default(),
        );
        metadata.insert(keys::MESSAGE.into(), req.message.clone().unwrap_or_default());
        metadata.insert(keys::ORIGINAL_AMOUNT.into(), format!("{amount}"));
        metadata.insert(keys::DISCOUNT_AMOUNT.into(), "0".into());
        metadata.insert(keys::COUPON_CODE.into(), COUPON_NONE.into());
        metadata.insert(keys::CURRENCY.into(), currency.clone());

        Ok(Self {
            kind: CheckoutKind::Tip,
            amount_minor: to_minor_units(amount),
            currency,
            product_name,
            description,
            metadata,
            success_url: req
                .success_url
                .clone()
                .unwrap_or_else(|| defaults.success_url.clone()),
            cancel_url: req
                .cancel_url
                .clone()
                .unwrap_or_else(|| defaults.cancel_url.clone()),
            created_at: chrono::Utc::now().timestamp(),
        })
    }

    /// Flatten into the form fields Stripe expects for
    /// POST /v1/checkout/sessions.
    pub fn to_session_form(&self) -> Vec<(String, String)> {
        let mut form: Vec<(String, String)> = Vec::new();
        form.push(("mode".into(), "payment".into()));
        form.push(("success_url".into(), with_session_placeholder(&self.success_url)));
        form.push(("cancel_url".into(), self.cancel_url.clone()));
        form.push(("line_items[0][quantity]".into(), "1".into()));
        form.push((
            "line_items[0][price_data][currency]".into(),
            self.currency.clone(),
        ));
        form.push((
            "line_items[0][price_data][unit_amount]".into(),
            self.amount_minor.to_string(),
        ));
        form.push((
            "line_items[0][price_data][product_data][name]".into(),
            self.product_name.clone(),
        ));
        form.push((
            "line_items[0][price_data][product_data][description]".into(),
            self.description.clone(),
        ));
        for (k, v) in &self.metadata {
            form.push((format!("metadata[{k}]"), v.clone()));
        }
        form
    }
}

// The success redirect must carry the session reference back to the client.
fn with_session_placeholder(url: &str) -> String {
    if url.contains("session_id=") {
        url.to_string()
    } else if url.contains('?') {
        format!("{url}&session_id={{CHECKOUT_SESSION_ID}}")
    } else {
        format!("{url}?session_id={{CHECKOUT_SESSION_ID}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> IntentDefaults {
        IntentDefaults {
            success_url: "https://example.com/success".to_string(),
            cancel_url: "https://example.com/cancel".to_string(),
            currency_fallback: "gbp".to_string(),
        }
    }

    fn booking(amount: Option<RawAmount>) -> BookingCheckoutRequest {
        BookingCheckoutRequest {
            package_id: Some("pkg_1".to_string()),
            user_id: Some("u1".to_string()),
            package_name: Some("Highland Trek".to_string()),
            original_amount: None,
            amount,
            coupon_code: None,
            discount_amount: None,
            currency: None,
        }
    }

    #[test]
    fn minor_units_round_half_away_from_zero() {
        assert_eq!(to_minor_units(49.99), 4999);
        assert_eq!(to_minor_units(12.0), 1200);
        assert_eq!(to_minor_units(0.1 + 0.2), 30);
        // Round-trip within floating tolerance
        let minor = to_minor_units(49.99);
        assert!((minor as f64 / 100.0 - 49.99).abs() < 1e-9);
    }

    #[test]
    fn currency_normalization_is_idempotent() {
        assert_eq!(normalize_currency(Some("USD"), "gbp"), "usd");
        assert_eq!(normalize_currency(Some("usd"), "gbp"), "usd");
        assert_eq!(normalize_currency(Some("EUR"), "gbp"), "gbp");
        assert_eq!(normalize_currency(None, "gbp"), "gbp");
        let once = normalize_currency(Some("GBP"), "gbp");
        assert_eq!(normalize_currency(Some(&once), "gbp"), once);
    }

    #[test]
    fn missing_user_id_rejected_first() {
        let mut req = booking(None);
        req.user_id = None;
        let err = CheckoutIntent::for_booking(&req, &defaults()).unwrap_err();
        assert_eq!(err.code(), "MISSING_USER_ID");

        req.user_id = Some("  ".to_string());
        let err = CheckoutIntent::for_booking(&req, &defaults()).unwrap_err();
        assert_eq!(err.code(), "MISSING_USER_ID");
    }

    #[test]
    fn missing_amount_rejected() {
        let req = booking(None);
        let err = CheckoutIntent::for_booking(&req, &defaults()).unwrap_err();
        assert_eq!(err.code(), "MISSING_AMOUNT");
    }

    #[test]
    fn zero_amount_is_free_booking_numeric_and_string() {
        for raw in [RawAmount::Number(0.0), RawAmount::Text("0".to_string())] {
            let req = booking(Some(raw));
            let err = CheckoutIntent::for_booking(&req, &defaults()).unwrap_err();
            assert_eq!(err, IntentError::FreeBooking);
        }
    }

    #[test]
    fn unparseable_amount_is_invalid() {
        let req = booking(Some(RawAmount::Text("lots".to_string())));
        let err = CheckoutIntent::for_booking(&req, &defaults()).unwrap_err();
        assert_eq!(err.code(), "INVALID_AMOUNT");
    }

    #[test]
    fn booking_intent_carries_normalized_currency_and_minor_units() {
        let mut req = booking(Some(RawAmount::Number(49.99)));
        req.currency = Some("USD".to_string());
        let intent = CheckoutIntent::for_booking(&req, &defaults()).unwrap();
        assert_eq!(intent.amount_minor, 4999);
        assert_eq!(intent.currency, "usd");
        assert_eq!(intent.metadata.get(keys::CURRENCY).unwrap(), "usd");
        assert_eq!(intent.metadata.get(keys::COUPON_CODE).unwrap(), COUPON_NONE);
        assert_eq!(intent.metadata.get(keys::DISCOUNT_AMOUNT).unwrap(), "0");
    }

    #[test]
    fn coupon_embeds_in_name_and_survives_missing_original_amount() {
        let mut req = booking(Some(RawAmount::Number(40.0)));
        req.coupon_code = Some("SPRING10".to_string());
        req.discount_amount = Some(RawAmount::Number(10.0));
        // original_amount deliberately absent
        let intent = CheckoutIntent::for_booking(&req, &defaults()).unwrap();
        assert!(intent.product_name.contains("SPRING10"));
        assert!(intent.description.contains("40.00"));
        assert_eq!(intent.metadata.get(keys::ORIGINAL_AMOUNT).unwrap(), "40");
        assert_eq!(intent.metadata.get(keys::COUPON_CODE).unwrap(), "SPRING10");
    }

    #[test]
    fn tip_requires_positive_amount() {
        let req = TipCheckoutRequest {
            amount: Some(RawAmount::Number(0.0)),
            currency: None,
            recipient_type: Some("guide".to_string()),
            recipient_id: Some("g1".to_string()),
            recipient_name: None,
            user_id: None,
            user_name: None,
            message: None,
            success_url: None,
            cancel_url: None,
        };
        let err = CheckoutIntent::for_tip(&req, &defaults()).unwrap_err();
        assert_eq!(err.code(), "INVALID_AMOUNT");
    }

    #[test]
    fn tip_metadata_uses_placeholders_for_absent_fields() {
        let req = TipCheckoutRequest {
            amount: Some(RawAmount::Number(10.0)),
            currency: None,
            recipient_type: None,
            recipient_id: None,
            recipient_name: None,
            user_id: None,
            user_name: None,
            message: None,
            success_url: Some("https://site.test/thanks".to_string()),
            cancel_url: None,
        };
        let intent = CheckoutIntent::for_tip(&req, &defaults()).unwrap();
        assert_eq!(intent.metadata.get(keys::RECIPIENT_ID).unwrap(), "");
        assert_eq!(intent.metadata.get(keys::COUPON_CODE).unwrap(), COUPON_NONE);
        assert_eq!(intent.metadata.get(keys::DISCOUNT_AMOUNT).unwrap(), "0");
        assert_eq!(intent.currency, "gbp");
        assert_eq!(intent.success_url, "https://site.test/thanks");
        assert_eq!(intent.cancel_url, "https://example.com/cancel");
    }

    #[test]
    fn session_form_carries_redirects_and_metadata() {
        let req = booking(Some(RawAmount::Number(25.0)));
        let intent = CheckoutIntent::for_booking(&req, &defaults()).unwrap();
        let form = intent.to_session_form();
        let get = |k: &str| {
            form.iter()
                .find(|(key, _)| key == k)
                .map(|(_, v)| v.as_str())
                .unwrap()
        };
        assert_eq!(get("mode"), "payment");
        assert_eq!(get("line_items[0][price_data][unit_amount]"), "2500");
        assert!(get("success_url").contains("session_id={CHECKOUT_SESSION_ID}"));
        assert_eq!(get("metadata[paymentType]"), "package");
    }
}
