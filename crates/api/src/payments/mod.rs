//! Payments: state machine, request and callback handling, reconciliation.

pub mod model;
pub mod recovery;
pub mod service;

use mercato_core::OrderId;
use thiserror::Error;

use crate::gateway::GatewayError;
use crate::store::StoreError;

pub use model::{GatewayStatus, NewPayment, Payment, PaymentStateError, Resolution};
pub use recovery::{
    ArchiveSummary, PaymentRecoveryScheduler, RecoveryOutcome, RecoverySummary, SchedulerHandles,
};
pub use service::{PaymentCallback, PaymentService, RequestPayment};

/// Errors from payment operations.
#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("invalid payment request: {0}")]
    Validation(String),

    #[error("order {0} not found")]
    OrderNotFound(OrderId),

    #[error("no payment for order {0}")]
    PaymentNotFound(OrderId),

    /// The order already has a payment.
    #[error("order {0} already has a payment")]
    Duplicate(OrderId),

    /// A callback carried a transaction key other than the recorded one.
    #[error("transaction key mismatch: expected {expected}, received {received}")]
    KeyMismatch { expected: String, received: String },

    #[error(transparent)]
    State(#[from] PaymentStateError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
