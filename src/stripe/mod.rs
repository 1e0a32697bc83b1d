// Stripe provider module

pub mod errors;
pub mod metrics;
pub mod rest;
pub mod types;
pub mod webhook;

use reqwest::Client;

use crate::settings::StripeSettings;

#[derive(Clone)]
pub struct StripeProvider {
    pub(crate) cfg: StripeSettings,
    pub(crate) rest: self::rest::StripeRestClient,
}

impl StripeProvider {
    // Build reqwest client with rustls and timeout from cfg, store cfg clone.
    pub fn new(cfg: StripeSettings) -> Result<Self, self::errors::StripeApiError> {
        let timeout = std::time::Duration::from_millis(if cfg.timeout_ms > 0 {
            cfg.timeout_ms
        } else {
            15_000
        });
        let http = Client::builder()
            .use_rustls_tls()
            .timeout(timeout)
            .build()
            .map_err(|e| self::errors::StripeApiError::Http(e.to_string()))?;

        let rest = self::rest::StripeRestClient::new(http, cfg.secret_key.clone());

        Ok(Self { cfg, rest })
    }

    pub fn rest(&self) -> &self::rest::StripeRestClient {
        &self.rest
    }

    pub fn webhook_secret(&self) -> &str {
        &self.cfg.webhook_secret
    }

    pub fn webhook_tolerance_seconds(&self) -> i64 {
        self.cfg.webhook_tolerance_seconds
    }
}
