//! Operator-triggered reconciliation.

use axum::{
    Json,
    extract::{Path, State},
};
use mercato_core::OrderId;
use serde::Serialize;
use tracing::info;

use crate::error::Result;
use crate::gateway::PaymentGateway;
use crate::payments::{ArchiveSummary, RecoveryOutcome, RecoverySummary};
use crate::state::AppState;
use crate::store::Backend;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryResponse {
    pub order_id: OrderId,
    pub outcome: RecoveryOutcome,
}

/// Reconcile one payment now, whatever its age.
pub async fn recover_payment<S: Backend, G: PaymentGateway>(
    State(state): State<AppState<S, G>>,
    Path(order_id): Path<OrderId>,
) -> Result<Json<RecoveryResponse>> {
    info!(order_id = %order_id, "Manual payment recovery requested");
    let outcome = state.recovery().manual_recovery(order_id).await?;
    Ok(Json(RecoveryResponse { order_id, outcome }))
}

pub async fn run_recovery<S: Backend, G: PaymentGateway>(
    State(state): State<AppState<S, G>>,
) -> Result<Json<RecoverySummary>> {
    info!("On-demand recovery sweep requested");
    let summary = state.recovery().recover_pending_payments().await?;
    Ok(Json(summary))
}

pub async fn run_archival<S: Backend, G: PaymentGateway>(
    State(state): State<AppState<S, G>>,
) -> Result<Json<ArchiveSummary>> {
    info!("On-demand archival sweep requested");
    let summary = state.recovery().archive_terminal_payments().await?;
    Ok(Json(summary))
}
