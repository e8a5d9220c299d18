//! Coupon discount preview.

use axum::{
    Json,
    extract::{Path, Query, State},
};
use mercato_core::{CouponId, Money, UserId};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::gateway::PaymentGateway;
use crate::state::AppState;
use crate::store::Backend;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscountQuery {
    pub user_id: UserId,
    pub order_amount: Money,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscountPreview {
    pub coupon_id: CouponId,
    pub order_amount: Money,
    pub discount_amount: Money,
}

/// Discount the coupon would give, without redeeming it.
pub async fn preview_discount<S: Backend, G: PaymentGateway>(
    State(state): State<AppState<S, G>>,
    Path(coupon_id): Path<CouponId>,
    Query(query): Query<DiscountQuery>,
) -> Result<Json<DiscountPreview>> {
    let discount_amount = state
        .orders()
        .preview_discount(coupon_id, query.user_id, query.order_amount)
        .await?;

    Ok(Json(DiscountPreview {
        coupon_id,
        order_amount: query.order_amount,
        discount_amount,
    }))
}
