//! Points charging and balances.

use axum::{
    Json,
    extract::{Path, State},
};
use mercato_core::{AccountId, Money, UserId};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::gateway::PaymentGateway;
use crate::state::AppState;
use crate::store::Backend;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargeRequest {
    pub user_id: UserId,
    pub amount: Money,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargeResponse {
    pub user_id: UserId,
    pub balance: Money,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceResponse {
    pub user_id: UserId,
    pub account_id: AccountId,
    pub balance: Money,
    pub version: i64,
}

/// Add points to a user's balance.
pub async fn charge<S: Backend, G: PaymentGateway>(
    State(state): State<AppState<S, G>>,
    Json(request): Json<ChargeRequest>,
) -> Result<Json<ChargeResponse>> {
    let balance = state.points().charge(request.user_id, request.amount).await?;

    Ok(Json(ChargeResponse {
        user_id: request.user_id,
        balance,
    }))
}

pub async fn balance<S: Backend, G: PaymentGateway>(
    State(state): State<AppState<S, G>>,
    Path(user_id): Path<UserId>,
) -> Result<Json<BalanceResponse>> {
    let account = state.points().balance(user_id).await?;

    Ok(Json(BalanceResponse {
        user_id,
        account_id: account.account_id,
        balance: account.balance,
        version: account.version,
    }))
}
