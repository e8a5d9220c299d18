//! HTTP route handlers.
//!
//! # Route Structure
//!
//! ```text
//! GET  /health                                   - Liveness
//! GET  /health/ready                             - Readiness (store ping)
//!
//! # Orders
//! POST /api/v1/orders                            - Place an order
//! GET  /api/v1/orders/{order_id}                 - Order detail
//! GET  /api/v1/coupons/{coupon_id}/discount      - Discount preview
//!
//! # Points
//! POST /api/v1/points/charge                     - Add points
//! GET  /api/v1/points/{user_id}                  - Balance
//!
//! # Payments
//! POST /api/v1/payments                          - Request a payment
//! GET  /api/v1/payments/{order_id}               - Payment for an order
//! POST /api/v1/payments/callback                 - Gateway result callback
//!
//! # Admin
//! POST /api/admin/payments/{order_id}/recovery   - Reconcile one payment
//! POST /api/admin/payments/batch/execute         - Run the recovery sweep
//! POST /api/admin/payments/batch/cleanup         - Run the archival sweep
//! ```

pub mod admin;
pub mod coupons;
pub mod health;
pub mod orders;
pub mod payments;
pub mod points;

use axum::{
    Router,
    routing::{get, post},
};

use crate::gateway::PaymentGateway;
use crate::state::AppState;
use crate::store::Backend;

/// Create the public API router.
pub fn api_routes<S: Backend, G: PaymentGateway>() -> Router<AppState<S, G>> {
    Router::new()
        .route("/orders", post(orders::place_order::<S, G>))
        .route("/orders/{order_id}", get(orders::get_order::<S, G>))
        .route(
            "/coupons/{coupon_id}/discount",
            get(coupons::preview_discount::<S, G>),
        )
        .route("/points/charge", post(points::charge::<S, G>))
        .route("/points/{user_id}", get(points::balance::<S, G>))
        .route("/payments", post(payments::request_payment::<S, G>))
        .route("/payments/callback", post(payments::callback::<S, G>))
        .route("/payments/{order_id}", get(payments::get_payment::<S, G>))
}

/// Create the operator router.
pub fn admin_routes<S: Backend, G: PaymentGateway>() -> Router<AppState<S, G>> {
    Router::new()
        .route(
            "/payments/{order_id}/recovery",
            post(admin::recover_payment::<S, G>),
        )
        .route("/payments/batch/execute", post(admin::run_recovery::<S, G>))
        .route("/payments/batch/cleanup", post(admin::run_archival::<S, G>))
}
