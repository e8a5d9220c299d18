//! Health check handlers.

use axum::extract::State;
use axum::http::StatusCode;

use crate::gateway::PaymentGateway;
use crate::state::AppState;
use crate::store::Backend;

/// Liveness check.
pub async fn health() -> &'static str {
    "ok"
}

/// Readiness check.
///
/// Returns 503 Service Unavailable if the store is not reachable.
pub async fn readiness<S: Backend, G: PaymentGateway>(
    State(state): State<AppState<S, G>>,
) -> StatusCode {
    match state.store().ping().await {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}
