// Stripe-specific error types and mappings

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::stripe::types::StripeErrorEnvelope;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StripeErrorType {
    ApiConnectionError,
    ApiError,
    AuthenticationError,
    CardError,
    IdempotencyError,
    InvalidRequestError,
    RateLimitError,
    ValidationError,
    Unknown,
}

impl From<&str> for StripeErrorType {
    fn from(s: &str) -> Self {
        match s {
            "api_connection_error" => StripeErrorType::ApiConnectionError,
            "api_error" => StripeErrorType::ApiError,
            "authentication_error" => StripeErrorType::AuthenticationError,
            "card_error" => StripeErrorType::CardError,
            "idempotency_error" => StripeErrorType::IdempotencyError,
            "invalid_request_error" => StripeErrorType::InvalidRequestError,
            "rate_limit_error" => StripeErrorType::RateLimitError,
            "validation_error" => StripeErrorType::ValidationError,
            _ => StripeErrorType::Unknown,
        }
    }
}

impl StripeErrorEnvelope {
    pub fn to_api_error_with_status(self, status: Option<u16>) -> StripeApiError {
        StripeApiError::Stripe {
            type_: StripeErrorType::from(self.error.type_.as_str()),
            message: self.error.message,
            code: self.error.code,
            param: self.error.param,
            status,
        }
    }
}

#[derive(Debug, Error)]
pub enum StripeApiError {
    #[error("http error: {0}")]
    Http(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("stripe error: {type_:?} message={message:?} code={code:?} param={param:?}")]
    Stripe {
        type_: StripeErrorType,
        message: Option<String>,
        code: Option<String>,
        param: Option<String>,
        status: Option<u16>,
    },
}

impl StripeApiError {
    /// An invalid or expired session reference surfaces as a 404-class
    /// lookup failure rather than an upstream outage. Stripe reports these
    /// as invalid_request_error with a resource_missing code.
    pub fn is_missing_resource(&self) -> bool {
        match self {
            StripeApiError::Stripe { type_, code, status, .. } => {
                matches!(type_, StripeErrorType::InvalidRequestError)
                    && (code.as_deref() == Some("resource_missing") || *status == Some(404))
            }
            _ => false,
        }
    }
}

// Helper indicating whether an error is likely transient (api_error or 5xx)
pub fn is_transient(http_status: Option<u16>, type_: Option<&StripeErrorType>) -> bool {
    if let Some(s) = http_status {
        if (500..600).contains(&s) {
            return true;
        }
    }
    if let Some(t) = type_ {
        matches!(
            t,
            StripeErrorType::ApiConnectionError
                | StripeErrorType::ApiError
                | StripeErrorType::RateLimitError
        )
    } else {
        false
    }
}

// Webhook-specific errors
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("invalid signature: {0}")]
    InvalidSignature(String),
    #[error("timestamp tolerance exceeded: {0}")]
    TimestampTolerance(String),
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
    #[error("missing webhook secret")]
    MissingSecret,
    #[error("missing signature header")]
    MissingSignature,
    #[error("event processing failed: {0}")]
    ProcessingFailed(String),
}

impl WebhookError {
    /// Rejections that happen before the payload is trusted. Anything past
    /// a valid signature is acknowledged to the sender regardless.
    pub fn rejects_delivery(&self) -> bool {
        !matches!(self, WebhookError::ProcessingFailed(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_missing_is_not_transient() {
        let err = StripeApiError::Stripe {
            type_: StripeErrorType::InvalidRequestError,
            message: Some("No such checkout.session".to_string()),
            code: Some("resource_missing".to_string()),
            param: None,
            status: Some(404),
        };
        assert!(err.is_missing_resource());
        assert!(!is_transient(Some(404), Some(&StripeErrorType::InvalidRequestError)));
    }

    #[test]
    fn five_hundreds_are_transient() {
        assert!(is_transient(Some(503), None));
        assert!(is_transient(None, Some(&StripeErrorType::RateLimitError)));
        assert!(!is_transient(Some(400), Some(&StripeErrorType::CardError)));
    }
}
