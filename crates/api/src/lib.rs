//! Mercato API library.
//!
//! Order placement across the inventory, coupon, and points ledgers, a
//! resilient client for the external payment gateway, the payment state
//! machine, and the reconciliation sweeps that settle payments the gateway
//! never reported back on.
//!
//! The binary in `main.rs` wires these over `PostgreSQL`; tests wire them
//! over [`store::MemoryStore`] and a scripted gateway.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod config;
pub mod error;
pub mod gateway;
pub mod ledger;
pub mod orders;
pub mod payments;
pub mod routes;
pub mod state;
pub mod store;

use axum::{Router, routing::get};
use tower_http::trace::{DefaultOnResponse, OnResponse, TraceLayer};
use tracing::Span;

use crate::gateway::PaymentGateway;
use crate::state::AppState;
use crate::store::Backend;

/// Build the full HTTP router over `state`.
pub fn router<S: Backend, G: PaymentGateway>(state: AppState<S, G>) -> Router {
    Router::new()
        .route("/health", get(routes::health::health))
        .route("/health/ready", get(routes::health::readiness::<S, G>))
        .nest("/api/v1", routes::api_routes())
        .nest("/api/admin", routes::admin_routes())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &axum::http::Request<_>| {
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        uri = %request.uri(),
                        status = tracing::field::Empty,
                        latency_ms = tracing::field::Empty,
                    )
                })
                .on_response(
                    |response: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &Span| {
                        span.record("status", response.status().as_u16());
                        span.record(
                            "latency_ms",
                            u64::try_from(latency.as_millis()).unwrap_or(u64::MAX),
                        );
                        DefaultOnResponse::default().on_response(response, latency, span);
                    },
                ),
        )
        .with_state(state)
}
