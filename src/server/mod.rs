// HTTP surface: axum router, shared state, and the JSON handlers fronting
// the checkout core. The webhook route is the only one that receives the
// raw, unparsed request body.

pub mod error;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, warn};

use crate::checkout::intent::{
    BookingCheckoutRequest, CheckoutIntent, IntentDefaults, TipCheckoutRequest,
};
use crate::checkout::reconcile::{reconcile, settle_paid_tip, PaymentOutcome, Reconciliation};
use crate::notify::Mailer;
use crate::server::error::ApiError;
use crate::settings::Config;
use crate::store::{Store, TipRecord};
use crate::stripe::errors::WebhookError;
use crate::stripe::webhook::{handle_webhook, WebhookContext};
use crate::stripe::StripeProvider;

#[derive(Clone)]
pub struct AppState {
    pub stripe: StripeProvider,
    pub store: Store,
    pub mailer: Mailer,
    pub http: Client,
    pub cfg: Arc<Config>,
}

impl AppState {
    fn intent_defaults(&self) -> IntentDefaults {
        IntentDefaults {
            success_url: self.cfg.success_url.clone(),
            cancel_url: self.cfg.cancel_url.clone(),
            currency_fallback: self.cfg.stripe.currency_fallback.clone(),
        }
    }

    fn webhook_context(&self) -> WebhookContext {
        WebhookContext {
            store: self.store.clone(),
            mailer: self.mailer.clone(),
            admin_recipients: self.cfg.email.admin_recipient_list(),
        }
    }

    fn production(&self) -> bool {
        self.cfg.is_production()
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let parsed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(parsed))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
}

pub fn router(state: AppState) -> Router {
    let cors = cors_layer(&state.cfg.allowed_origin_list());
    Router::new()
        .route("/health", get(health))
        .route("/create-checkout-session", post(create_checkout_session))
        .route("/verify-payment", post(verify_payment))
        .route("/api/tip/create-checkout-session", post(create_tip_checkout))
        .route("/api/tip/verify-checkout-session", get(verify_tip_checkout))
        .route("/api/tip/webhook", post(tip_webhook))
        .route("/ping-activity", get(ping_activity))
        .route("/ping-companion", get(ping_companion))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Response types

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    message: &'static str,
}

#[derive(Debug, Serialize)]
struct CreateBookingResponse {
    id: String,
    timestamp: i64,
    currency: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifyPaymentRequest {
    #[serde(default)]
    session_id: Option<String>,
}

#[derive(Serialize)]
struct PendingPaymentResponse {
    paid: bool,
    status: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PaidPaymentResponse {
    #[serde(flatten)]
    outcome: PaymentOutcome,
    /// The amount actually charged, echoed separately for display code.
    final_amount: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TipCreateResponse {
    session_id: String,
}

#[derive(Deserialize)]
struct TipVerifyQuery {
    #[serde(default)]
    session_id: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TipPaymentSummary {
    amount: f64,
    recipient_type: String,
    recipient_id: String,
    recipient_name: String,
    status: String,
}

impl From<&TipRecord> for TipPaymentSummary {
    fn from(record: &TipRecord) -> Self {
        Self {
            amount: record.amount,
            recipient_type: record.recipient_type.clone(),
            recipient_id: record.recipient_id.clone(),
            recipient_name: record.recipient_name.clone(),
            status: record.status.clone(),
        }
    }
}

#[derive(Serialize)]
struct TipVerifyResponse {
    success: bool,
    payment: TipPaymentSummary,
}

#[derive(Serialize)]
struct TipVerifyFailure {
    success: bool,
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<String>,
}

impl TipVerifyFailure {
    fn new(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
            status: None,
        }
    }
}

#[derive(Serialize)]
struct WebhookAck {
    received: bool,
}

// ---------------------------------------------------------------------------
// Handlers

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        message: "guidepay api is running",
    })
}

/// Booking checkout. Validation failures return before any processor call.
async fn create_checkout_session(
    State(state): State<AppState>,
    Json(payload): Json<BookingCheckoutRequest>,
) -> Result<Json<CreateBookingResponse>, ApiError> {
    let intent = CheckoutIntent::for_booking(&payload, &state.intent_defaults())
        .map_err(ApiError::from_intent)?;
    let session = state
        .stripe
        .rest()
        .create_checkout_session(&intent, None)
        .await
        .map_err(|e| {
            error!(error = %e, "booking checkout session creation failed");
            ApiError::upstream(e, state.production())
        })?;

    Ok(Json(CreateBookingResponse {
        id: session.id,
        timestamp: intent.created_at,
        currency: intent.currency,
    }))
}

/// Synchronous verification for bookings: read-only reconciliation of the
/// session reference the client got back from the redirect.
async fn verify_payment(
    State(state): State<AppState>,
    Json(payload): Json<VerifyPaymentRequest>,
) -> Result<Response, ApiError> {
    let session_id = payload
        .session_id
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::input("MISSING_SESSION_ID", "sessionId is required"))?
        .to_string();

    match reconcile(state.stripe.rest(), &session_id)
        .await
        .map_err(|e| ApiError::from_reconcile(e, state.production()))?
    {
        Reconciliation::Pending { status } => {
            Ok(Json(PendingPaymentResponse { paid: false, status }).into_response())
        }
        Reconciliation::Paid(outcome) => {
            let final_amount = outcome.amount;
            Ok(Json(PaidPaymentResponse {
                outcome,
                final_amount,
            })
            .into_response())
        }
    }
}

async fn create_tip_checkout(
    State(state): State<AppState>,
    Json(payload): Json<TipCheckoutRequest>,
) -> Result<Json<TipCreateResponse>, ApiError> {
    let intent = CheckoutIntent::for_tip(&payload, &state.intent_defaults())
        .map_err(ApiError::from_intent)?;
    let session = state
        .stripe
        .rest()
        .create_checkout_session(&intent, None)
        .await
        .map_err(|e| {
            error!(error = %e, "tip checkout session creation failed");
            ApiError::upstream(e, state.production())
        })?;

    Ok(Json(TipCreateResponse {
        session_id: session.id,
    }))
}

/// Tip verification: reconcile, then persist-and-notify exactly once per
/// payment intent. A race with the webhook resolves to the cached record.
async fn verify_tip_checkout(
    State(state): State<AppState>,
    Query(query): Query<TipVerifyQuery>,
) -> Response {
    let session_id = match query
        .session_id
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        Some(id) => id.to_string(),
        None => {
            return (
                StatusCode::BAD_REQUEST,
                Json(TipVerifyFailure::new("session_id is required")),
            )
                .into_response();
        }
    };

    let session = match state
        .stripe
        .rest()
        .retrieve_checkout_session(&session_id)
        .await
    {
        Ok(session) => session,
        Err(e) if e.is_missing_resource() => {
            return (
                StatusCode::NOT_FOUND,
                Json(TipVerifyFailure::new("checkout session not found or expired")),
            )
                .into_response();
        }
        Err(e) => {
            error!(session_id = %session_id, error = %e, "tip session lookup failed");
            let failure = ApiError::upstream(e, state.production());
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(TipVerifyFailure::new(failure.to_string())),
            )
                .into_response();
        }
    };

    if !session.is_paid() {
        let mut failure = TipVerifyFailure::new("payment not completed");
        failure.status = Some(session.payment_status.clone());
        return Json(failure).into_response();
    }

    match settle_paid_tip(
        &session,
        &state.store,
        &state.mailer,
        &state.cfg.email.admin_recipient_list(),
    )
    .await
    {
        Ok(verification) => {
            if !verification.newly_recorded {
                debug!(session_id = %session_id, "tip already recorded, returning cached outcome");
            }
            Json(TipVerifyResponse {
                success: true,
                payment: TipPaymentSummary::from(&verification.record),
            })
            .into_response()
        }
        Err(e) => {
            error!(session_id = %session_id, error = %e, "tip settlement failed");
            let failure = ApiError::upstream(e, state.production());
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(TipVerifyFailure::new(failure.to_string())),
            )
                .into_response()
        }
    }
}

/// Webhook receiver. Once the signature checks out the delivery is always
/// acknowledged, so the processor does not retry a permanently failing side
/// effect forever.
async fn tip_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let ctx = state.webhook_context();
    match handle_webhook(
        &body,
        &headers,
        state.stripe.webhook_secret(),
        state.stripe.webhook_tolerance_seconds(),
        &ctx,
    )
    .await
    {
        Ok(()) => Json(WebhookAck { received: true }).into_response(),
        Err(e) if e.rejects_delivery() => {
            warn!(error = %e, "webhook delivery rejected");
            let api_err = match &e {
                WebhookError::MissingSecret => ApiError::upstream(&e, state.production()),
                WebhookError::MalformedPayload(_) => {
                    ApiError::input("MALFORMED_PAYLOAD", e.to_string())
                }
                _ => ApiError::Signature(e.to_string()),
            };
            api_err.into_response()
        }
        Err(e) => {
            error!(error = %e, "webhook event processing failed after valid signature");
            Json(WebhookAck { received: true }).into_response()
        }
    }
}

async fn ping_activity(State(state): State<AppState>) -> Response {
    ping_target(&state, state.cfg.self_url.clone(), "self").await
}

async fn ping_companion(State(state): State<AppState>) -> Response {
    ping_target(&state, state.cfg.companion_url.clone(), "companion").await
}

/// Keep-alive probe against a configured URL; decorative relative to the
/// payment flows and sharing no state with them.
async fn ping_target(state: &AppState, url: String, label: &str) -> Response {
    if url.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "success": false,
                "error": format!("{label} URL not configured"),
            })),
        )
            .into_response();
    }

    match state.http.get(&url).send().await {
        Ok(resp) if resp.status().is_success() => {
            let upstream = resp
                .json::<serde_json::Value>()
                .await
                .unwrap_or(serde_json::Value::Null);
            Json(serde_json::json!({"success": true, "upstream": upstream})).into_response()
        }
        Ok(resp) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({
                "success": false,
                "error": format!("{label} responded with status {}", resp.status()),
            })),
        )
            .into_response(),
        Err(e) => {
            warn!(target_url = %url, error = %e, "keep-alive ping failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({
                    "success": false,
                    "error": format!("{label} unreachable"),
                })),
            )
                .into_response()
        }
    }
}
