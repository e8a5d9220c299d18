//! Unified error handling with Sentry integration.
//!
//! Every route handler returns `Result<T, AppError>`. Domain errors collapse
//! into the small taxonomy clients see; server-side failures are captured to
//! Sentry before responding and their details never reach the response body.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::config::ConfigError;
use crate::gateway::GatewayError;
use crate::ledger::LedgerError;
use crate::orders::OrderError;
use crate::payments::PaymentError;
use crate::store::StoreError;

/// Application-level error type for the API.
#[derive(Debug, Error)]
pub enum AppError {
    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input or a ledger refusal.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// The resource already exists.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The payment gateway did not answer in time.
    #[error("Gateway timeout: {0}")]
    GatewayTimeout(String),

    /// The payment gateway could not be reached.
    #[error("Gateway network error: {0}")]
    GatewayNetwork(String),

    /// The payment gateway rejected the call or is unavailable.
    #[error("Gateway system error: {0}")]
    GatewaySystem(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    code: &'static str,
}

impl AppError {
    /// HTTP status for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::GatewayTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::GatewayNetwork(_) | Self::GatewaySystem(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::Conflict(_) => "CONFLICT",
            Self::GatewayTimeout(_) => "GATEWAY_TIMEOUT",
            Self::GatewayNetwork(_) => "GATEWAY_NETWORK_ERROR",
            Self::GatewaySystem(_) => "GATEWAY_SYSTEM_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        if status.is_server_error() {
            let event_id = sentry::capture_error(&self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Request error"
            );
        }

        // Don't expose internal error details to clients
        let message = match &self {
            Self::Internal(_) => "Internal server error".to_string(),
            Self::GatewayTimeout(_) | Self::GatewayNetwork(_) | Self::GatewaySystem(_) => {
                "Payment gateway unavailable".to_string()
            }
            Self::NotFound(msg) | Self::BadRequest(msg) | Self::Conflict(msg) => msg.clone(),
        };

        let body = ErrorBody {
            error: message,
            code: self.code(),
        };
        (status, Json(body)).into_response()
    }
}

/// Result type alias for `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;

// =============================================================================
// Conversions
// =============================================================================

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => Self::NotFound(err.to_string()),
            StoreError::Conflict(msg) => Self::Conflict(msg),
            StoreError::Database(_) | StoreError::DataCorruption(_) => {
                Self::Internal(err.to_string())
            }
        }
    }
}

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Timeout(_) => Self::GatewayTimeout(err.to_string()),
            GatewayError::Network(_) => Self::GatewayNetwork(err.to_string()),
            GatewayError::System(_) | GatewayError::CircuitOpen(_) => {
                Self::GatewaySystem(err.to_string())
            }
        }
    }
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::NotFound { .. } => Self::NotFound(err.to_string()),
            LedgerError::InsufficientStock { .. }
            | LedgerError::InsufficientFunds { .. }
            | LedgerError::CouponNotUsable { .. }
            | LedgerError::InvalidAmount(_)
            | LedgerError::Money(_) => Self::BadRequest(err.to_string()),
            LedgerError::Store(e) => e.into(),
        }
    }
}

impl From<OrderError> for AppError {
    fn from(err: OrderError) -> Self {
        match err {
            OrderError::UserNotFound(_)
            | OrderError::ProductNotFound(_)
            | OrderError::CouponNotFound(_)
            | OrderError::OrderNotFound(_) => Self::NotFound(err.to_string()),
            OrderError::Validation(_) | OrderError::Money(_) => Self::BadRequest(err.to_string()),
            OrderError::Ledger(e) => e.into(),
            OrderError::Store(e) => e.into(),
        }
    }
}

impl From<PaymentError> for AppError {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::OrderNotFound(_) | PaymentError::PaymentNotFound(_) => {
                Self::NotFound(err.to_string())
            }
            PaymentError::Validation(_)
            | PaymentError::KeyMismatch { .. }
            | PaymentError::State(_) => Self::BadRequest(err.to_string()),
            PaymentError::Duplicate(_) => Self::Conflict(err.to_string()),
            PaymentError::Gateway(e) => e.into(),
            PaymentError::Store(e) => e.into(),
        }
    }
}

impl From<ConfigError> for AppError {
    fn from(err: ConfigError) -> Self {
        Self::Internal(err.to_string())
    }
}
