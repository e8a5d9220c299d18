//! Payment requests, lookups, and gateway callbacks.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use mercato_core::OrderId;

use crate::error::Result;
use crate::gateway::PaymentGateway;
use crate::payments::{Payment, PaymentCallback, RequestPayment};
use crate::state::AppState;
use crate::store::Backend;

/// Request a payment for an order.
///
/// Responds 202: the payment is either already resolved by the gateway or
/// still `PENDING`, to be settled by a callback or the recovery sweep.
pub async fn request_payment<S: Backend, G: PaymentGateway>(
    State(state): State<AppState<S, G>>,
    Json(request): Json<RequestPayment>,
) -> Result<(StatusCode, Json<Payment>)> {
    let payment = state.payments().request_payment(request).await?;
    Ok((StatusCode::ACCEPTED, Json(payment)))
}

pub async fn get_payment<S: Backend, G: PaymentGateway>(
    State(state): State<AppState<S, G>>,
    Path(order_id): Path<OrderId>,
) -> Result<Json<Payment>> {
    let payment = state.payments().find_by_order(order_id).await?;
    Ok(Json(payment))
}

/// Apply a result pushed by the gateway.
pub async fn callback<S: Backend, G: PaymentGateway>(
    State(state): State<AppState<S, G>>,
    Json(callback): Json<PaymentCallback>,
) -> Result<Json<Payment>> {
    let payment = state.payments().handle_callback(callback).await?;
    Ok(Json(payment))
}
