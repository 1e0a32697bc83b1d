// HTTP error taxonomy with machine-readable codes.
// Validation and business-rule rejections are 400s with a distinguishing
// code; upstream failures are 500s with the raw message only outside
// production mode.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::checkout::intent::IntentError;
use crate::checkout::reconcile::ReconcileError;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: String,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{message}")]
    Input {
        code: &'static str,
        message: String,
    },
    #[error("{message}")]
    Rule {
        code: &'static str,
        message: String,
    },
    #[error("{message}")]
    NotFound {
        code: &'static str,
        message: String,
    },
    #[error("invalid webhook signature: {0}")]
    Signature(String),
    #[error("{message}")]
    Upstream { message: String },
}

impl ApiError {
    pub fn input(code: &'static str, message: impl Into<String>) -> Self {
        ApiError::Input {
            code,
            message: message.into(),
        }
    }

    /// Upstream failure with the raw cause visible only outside production.
    pub fn upstream(cause: impl std::fmt::Display, production: bool) -> Self {
        let message = if production {
            "payment processing failed, please try again".to_string()
        } else {
            cause.to_string()
        };
        ApiError::Upstream { message }
    }

    pub fn from_intent(err: IntentError) -> Self {
        match err {
            IntentError::FreeBooking => ApiError::Rule {
                code: err.code(),
                message: err.to_string(),
            },
            _ => ApiError::Input {
                code: err.code(),
                message: err.to_string(),
            },
        }
    }

    pub fn from_reconcile(err: ReconcileError, production: bool) -> Self {
        match err {
            ReconcileError::SessionNotFound => ApiError::NotFound {
                code: "SESSION_NOT_FOUND",
                message: "checkout session not found or expired".to_string(),
            },
            ReconcileError::Upstream(e) => ApiError::upstream(e, production),
            ReconcileError::Persistence(e) => ApiError::upstream(e, production),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Input { .. } | ApiError::Rule { .. } | ApiError::Signature(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::NotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::Upstream { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Input { code, .. }
            | ApiError::Rule { code, .. }
            | ApiError::NotFound { code, .. } => code,
            ApiError::Signature(_) => "INVALID_SIGNATURE",
            ApiError::Upstream { .. } => "UPSTREAM_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.to_string(),
            code: self.code().to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_booking_is_a_rule_rejection() {
        let err = ApiError::from_intent(IntentError::FreeBooking);
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.code(), "FREE_BOOKING");
    }

    #[test]
    fn production_sanitizes_upstream_message() {
        let err = ApiError::upstream("socket reset by sk_live key holder", true);
        assert!(!err.to_string().contains("sk_live"));
        let err = ApiError::upstream("connect timeout", false);
        assert!(err.to_string().contains("connect timeout"));
    }

    #[test]
    fn session_not_found_maps_to_404() {
        let err = ApiError::from_reconcile(ReconcileError::SessionNotFound, true);
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert_eq!(err.code(), "SESSION_NOT_FOUND");
    }
}
