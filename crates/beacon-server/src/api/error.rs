//! API error type and response formatting.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use beacon_core::Violations;
use beacon_ledger::{LedgerError, StoreError};
use serde::Serialize;

/// Error returned by HTTP handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The identity header is missing or malformed.
    #[error("missing or invalid x-account-id header")]
    Unauthenticated,

    /// The client used up its request window.
    #[error("rate limit exceeded, try again later")]
    RateLimited,

    /// A ledger operation failed.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl From<Violations> for ApiError {
    fn from(v: Violations) -> Self {
        Self::Ledger(LedgerError::Validation(v))
    }
}

/// JSON error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Violations>,
}

impl ApiError {
    /// HTTP status for this error.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        let e = match self {
            Self::Unauthenticated => return StatusCode::UNAUTHORIZED,
            Self::RateLimited => return StatusCode::TOO_MANY_REQUESTS,
            Self::Ledger(e) => e,
        };
        match e {
            LedgerError::Validation(_) => StatusCode::BAD_REQUEST,
            LedgerError::NotFound { .. } => StatusCode::NOT_FOUND,
            LedgerError::Forbidden { .. } | LedgerError::PlanNotAllowed { .. } => {
                StatusCode::FORBIDDEN
            }
            LedgerError::InsufficientFunds { .. } => StatusCode::PAYMENT_REQUIRED,
            LedgerError::CampaignClosed { .. }
            | LedgerError::InvalidTransition { .. }
            | LedgerError::Conflict { .. } => StatusCode::CONFLICT,
            LedgerError::DependencyTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            LedgerError::Store(StoreError::Unavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            LedgerError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short machine-readable error kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::RateLimited => "rate_limited",
            Self::Ledger(e) => e.kind(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        crate::metrics::record_error(self.kind());

        let body = match self {
            Self::Ledger(LedgerError::Validation(violations)) => ErrorResponse {
                error: "validation",
                message: violations.to_string(),
                details: Some(violations),
            },
            Self::Ledger(e @ LedgerError::Store(_)) if status.is_server_error() => {
                tracing::error!(error = %e, "store error");
                ErrorResponse {
                    error: e.kind(),
                    message: "A storage error occurred".to_string(),
                    details: None,
                }
            }
            other => ErrorResponse {
                error: other.kind(),
                message: other.to_string(),
                details: None,
            },
        };

        (status, Json(body)).into_response()
    }
}
