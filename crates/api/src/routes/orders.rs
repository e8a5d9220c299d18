//! Order placement and lookup.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use mercato_core::OrderId;

use crate::error::Result;
use crate::gateway::PaymentGateway;
use crate::orders::{Order, PlaceOrder};
use crate::state::AppState;
use crate::store::Backend;

/// Place an order.
///
/// Responds 201 with the placed order. Nothing is applied if any line,
/// the coupon, or the points deduction is refused.
pub async fn place_order<S: Backend, G: PaymentGateway>(
    State(state): State<AppState<S, G>>,
    Json(command): Json<PlaceOrder>,
) -> Result<(StatusCode, Json<Order>)> {
    let order = state.orders().place_order(command).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

pub async fn get_order<S: Backend, G: PaymentGateway>(
    State(state): State<AppState<S, G>>,
    Path(order_id): Path<OrderId>,
) -> Result<Json<Order>> {
    let order = state.orders().find_order(order_id).await?;
    Ok(Json(order))
}
