// Stripe REST client
// Implements the two checkout-session endpoints the reconciliation workflow
// needs. Session creation is never retried without an idempotency key;
// session retrieval gets a single retry.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use reqwest::{Client, StatusCode};
use std::future::Future;
use tracing::{info, instrument, warn};

use crate::checkout::intent::CheckoutIntent;
use crate::stripe::errors::{is_transient, StripeApiError};
use crate::stripe::types::{CheckoutSession, StripeErrorEnvelope};

const STRIPE_API_BASE: &str = "https://api.stripe.com";

#[derive(Clone)]
pub struct StripeRestClient {
    pub(crate) http: Client,
    pub(crate) api_key: String,
    pub(crate) base_url: String,
    pub(crate) max_retries: u32,
    pub(crate) base_delay_ms: u64,
    pub(crate) max_delay_ms: u64,
}

impl StripeRestClient {
    pub fn new(http: Client, api_key: String) -> Self {
        Self {
            http,
            api_key,
            base_url: STRIPE_API_BASE.to_string(),
            max_retries: 3,
            base_delay_ms: 100,
            max_delay_ms: 2_000,
        }
    }

    /// Point the client at a different API host. Test hook.
    #[allow(dead_code)]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn apply_common_headers(
        &self,
        req: reqwest::RequestBuilder,
        idempotency_key: Option<&str>,
    ) -> reqwest::RequestBuilder {
        let mut req = req.bearer_auth(&self.api_key);
        if let Some(k) = idempotency_key {
            req = req.header("Idempotency-Key", k);
        }
        req
    }

    fn map_error(status: StatusCode, body: &str) -> StripeApiError {
        if let Ok(env) = serde_json::from_str::<StripeErrorEnvelope>(body) {
            env.to_api_error_with_status(Some(status.as_u16()))
        } else {
            StripeApiError::Http(format!("status={} body={}", status.as_u16(), body))
        }
    }

    async fn with_retries<F, Fut, T>(
        &self,
        desc: &str,
        max_retries: u32,
        mut op: F,
    ) -> Result<T, StripeApiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StripeApiError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) => {
                    let (http_status, err_type) = match &e {
                        StripeApiError::Stripe { status, type_, .. } => (*status, Some(type_)),
                        StripeApiError::Http(_) => (Some(503), None),
                        _ => (None, None),
                    };
                    let retryable = is_transient(http_status, err_type);
                    if !retryable || attempt >= max_retries {
                        return Err(e);
                    }

                    // Exponential backoff with full jitter
                    let exp = self
                        .base_delay_ms
                        .saturating_mul(1u64 << attempt.min(20));
                    let cap = exp.min(self.max_delay_ms.max(self.base_delay_ms));
                    let mut rng = SmallRng::from_entropy();
                    let delay_ms = if cap > self.base_delay_ms {
                        rng.gen_range(self.base_delay_ms..=cap)
                    } else {
                        self.base_delay_ms
                    };

                    warn!(
                        target: "stripe",
                        desc = %desc,
                        attempt = attempt + 1,
                        max_retries = max_retries,
                        http_status = ?http_status,
                        next_delay_ms = delay_ms,
                        "retrying transient Stripe error"
                    );

                    tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
                    attempt += 1;
                }
            }
        }
    }

    // POST /v1/checkout/sessions
    // application/x-www-form-urlencoded
    #[instrument(skip(self, intent), fields(method = "POST", path = "/v1/checkout/sessions"))]
    pub async fn create_checkout_session(
        &self,
        intent: &CheckoutIntent,
        idempotency_key: Option<&str>,
    ) -> Result<CheckoutSession, StripeApiError> {
        let form = intent.to_session_form();

        info!(
            target: "stripe",
            method = "POST",
            path = "/v1/checkout/sessions",
            amount_minor = intent.amount_minor,
            currency = %intent.currency,
            payment_type = %intent.kind.as_str(),
            "stripe request"
        );

        let req_builder = || {
            let url = format!("{}/v1/checkout/sessions", self.base_url);
            let req = self.http.post(url).form(&form);
            let req = self.apply_common_headers(req, idempotency_key);
            async move {
                let resp = req
                    .send()
                    .await
                    .map_err(|e| StripeApiError::Http(e.to_string()))?;
                let status = resp.status();
                let text = resp
                    .text()
                    .await
                    .map_err(|e| StripeApiError::Decode(e.to_string()))?;
                if status.is_success() {
                    serde_json::from_str::<CheckoutSession>(&text)
                        .map_err(|e| StripeApiError::Decode(e.to_string()))
                } else {
                    Err(Self::map_error(status, &text))
                }
            }
        };
        // A create without an idempotency key must not be replayed.
        let retries = if idempotency_key.is_some() {
            self.max_retries
        } else {
            0
        };
        self.with_retries("create_checkout_session", retries, req_builder)
            .await
    }

    // GET /v1/checkout/sessions/{id}
    #[instrument(skip(self), fields(method = "GET", path = "/v1/checkout/sessions/{id}", session_id = %session_id))]
    pub async fn retrieve_checkout_session(
        &self,
        session_id: &str,
    ) -> Result<CheckoutSession, StripeApiError> {
        info!(
            target: "stripe",
            method = "GET",
            path = "/v1/checkout/sessions/{id}",
            session_id = %session_id,
            "stripe request"
        );
        // Idempotent read: single retry only
        let req_builder = || {
            let url = format!("{}/v1/checkout/sessions/{}", self.base_url, session_id);
            let req = self.http.get(url);
            let req = self.apply_common_headers(req, None);
            async move {
                let resp = req
                    .send()
                    .await
                    .map_err(|e| StripeApiError::Http(e.to_string()))?;
                let status = resp.status();
                let text = resp
                    .text()
                    .await
                    .map_err(|e| StripeApiError::Decode(e.to_string()))?;
                if status.is_success() {
                    serde_json::from_str::<CheckoutSession>(&text)
                        .map_err(|e| StripeApiError::Decode(e.to_string()))
                } else {
                    Err(Self::map_error(status, &text))
                }
            }
        };
        self.with_retries("retrieve_checkout_session", 1, req_builder)
            .await
    }
}
