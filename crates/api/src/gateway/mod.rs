//! External payment gateway client.
//!
//! # Architecture
//!
//! - [`PaymentGateway`] is the transport seam: submit a payment, query one
//!   transaction, or list the transactions for an order
//! - [`HttpGateway`] speaks the gateway's JSON API over `reqwest`
//! - [`ResilientGateway`] decorates any transport with a retry policy, a
//!   circuit breaker, and a per-attempt timeout, configured separately for
//!   submission and queries
//!
//! The client reports gateway statuses verbatim. Mapping them onto payment
//! states is the payment state machine's job.

pub mod http;
pub mod resilience;

use std::fmt;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use http::HttpGateway;
pub use resilience::{CircuitBreaker, CircuitState, ResiliencePolicy, ResilientGateway};

/// Errors surfaced by gateway calls.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    /// An attempt exceeded its time budget.
    #[error("payment gateway timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// The gateway could not be reached.
    #[error("payment gateway unreachable: {0}")]
    Network(String),

    /// The gateway answered with a non-success response.
    #[error("payment gateway error: {0}")]
    System(String),

    /// The circuit breaker rejected the call without reaching the network.
    #[error("payment gateway circuit '{0}' is open")]
    CircuitOpen(&'static str),
}

/// Payment submission payload.
#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    pub order_id: String,
    pub card_type: String,
    pub card_no: String,
    pub amount: String,
    pub callback_url: String,
}

impl fmt::Debug for SubmitRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubmitRequest")
            .field("order_id", &self.order_id)
            .field("card_type", &self.card_type)
            .field("card_no", &"[REDACTED]")
            .field("amount", &self.amount)
            .field("callback_url", &self.callback_url)
            .finish()
    }
}

/// Transaction key and status as reported by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayResult {
    pub transaction_key: String,
    /// Raw gateway status (`PENDING`, `SUCCESS`, `FAILED`, `approved`, ...).
    pub status: String,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Full transaction record returned by a status query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionDetail {
    pub transaction_key: String,
    pub order_id: String,
    pub card_type: String,
    pub card_no: String,
    pub amount: i64,
    pub status: String,
    #[serde(default)]
    pub reason: Option<String>,
}

impl TransactionDetail {
    /// The key, status, and reason of this transaction.
    #[must_use]
    pub fn result(&self) -> GatewayResult {
        GatewayResult {
            transaction_key: self.transaction_key.clone(),
            status: self.status.clone(),
            reason: self.reason.clone(),
        }
    }
}

/// Transactions recorded by the gateway for one order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderTransactions {
    pub order_id: String,
    #[serde(default)]
    pub transactions: Vec<GatewayResult>,
}

/// Outbound payment gateway operations.
pub trait PaymentGateway: Clone + Send + Sync + 'static {
    /// Submit a payment for processing.
    fn submit(
        &self,
        request: &SubmitRequest,
    ) -> impl Future<Output = Result<GatewayResult, GatewayError>> + Send;

    /// Fetch one transaction by its key.
    fn query_status(
        &self,
        transaction_key: &str,
    ) -> impl Future<Output = Result<TransactionDetail, GatewayError>> + Send;

    /// List the transactions recorded for an order.
    fn query_by_order(
        &self,
        order_id: &str,
    ) -> impl Future<Output = Result<OrderTransactions, GatewayError>> + Send;
}
