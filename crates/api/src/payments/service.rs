//! Payment requests and gateway callbacks.

use chrono::Utc;
use mercato_core::{CardNumber, Money, OrderId, PaymentStatus, UserId};
use serde::Deserialize;
use tracing::{info, instrument, warn};

use super::PaymentError;
use super::model::{GatewayStatus, NewPayment, Payment};
use crate::gateway::{GatewayResult, PaymentGateway, SubmitRequest};
use crate::store::{Backend, StoreError, UnitOfWork};

/// A client request to pay for an order.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestPayment {
    pub user_id: UserId,
    pub order_id: OrderId,
    pub card_type: String,
    pub card_no: String,
    pub amount: i64,
    /// Overrides the configured callback target.
    #[serde(default)]
    pub callback_url: Option<String>,
}

/// A result pushed by the gateway.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentCallback {
    pub transaction_key: String,
    pub order_id: OrderId,
    pub status: String,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Creates payments, submits them, and applies gateway answers.
#[derive(Clone)]
pub struct PaymentService<S, G> {
    store: S,
    gateway: G,
    default_callback_url: String,
}

impl<S: Backend, G: PaymentGateway> PaymentService<S, G> {
    pub fn new(store: S, gateway: G, default_callback_url: impl Into<String>) -> Self {
        Self {
            store,
            gateway,
            default_callback_url: default_callback_url.into(),
        }
    }

    /// Create a `PENDING` payment for an order and submit it.
    ///
    /// When the gateway answers, its transaction key and status are applied
    /// before returning. When the gateway stays unavailable after retries the
    /// payment is returned `PENDING` and left to the recovery sweep.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for malformed input, `OrderNotFound` if the order
    /// does not exist or belongs to another user, and `Duplicate` if the
    /// order already has a payment.
    #[instrument(skip(self, request), fields(order_id = %request.order_id, user_id = %request.user_id))]
    pub async fn request_payment(&self, request: RequestPayment) -> Result<Payment, PaymentError> {
        let new_payment = self.validate(request)?;
        let order_id = new_payment.order_id;

        let order = self
            .store
            .find_order(order_id)
            .await?
            .ok_or(PaymentError::OrderNotFound(order_id))?;
        if order.user_id != new_payment.user_id {
            return Err(PaymentError::OrderNotFound(order_id));
        }

        let submit = SubmitRequest {
            order_id: order_id.to_string(),
            card_type: new_payment.card_type.clone(),
            card_no: new_payment.card_no.expose().to_string(),
            amount: new_payment.amount.to_string(),
            callback_url: new_payment.callback_url.clone(),
        };

        let payment = match self.store.insert_payment(new_payment).await {
            Ok(payment) => payment,
            Err(StoreError::Conflict(_)) => return Err(PaymentError::Duplicate(order_id)),
            Err(e) => return Err(e.into()),
        };
        info!(payment_id = %payment.id(), "Payment created");

        match self.gateway.submit(&submit).await {
            Ok(result) => self.apply_submission(order_id, &result).await,
            Err(error) => {
                warn!(error = %error, "Payment submission failed; left pending for recovery");
                Ok(payment)
            }
        }
    }

    /// Apply a result pushed by the gateway.
    ///
    /// A repeated callback for an already settled payment with the same
    /// outcome is accepted without change.
    ///
    /// # Errors
    ///
    /// Returns `PaymentNotFound` for an unknown order, `KeyMismatch` if the
    /// payment already carries a different transaction key, and `State` if
    /// the result contradicts a settled payment.
    #[instrument(skip(self, callback), fields(order_id = %callback.order_id, status = %callback.status))]
    pub async fn handle_callback(&self, callback: PaymentCallback) -> Result<Payment, PaymentError> {
        if callback.transaction_key.trim().is_empty() {
            return Err(PaymentError::Validation("transactionKey must not be blank".to_string()));
        }

        let mut uow = self.store.begin().await?;
        let mut payment = uow
            .lock_payment(callback.order_id)
            .await?
            .ok_or(PaymentError::PaymentNotFound(callback.order_id))?;

        if let Some(existing) = payment.payment_key()
            && existing != callback.transaction_key
        {
            return Err(PaymentError::KeyMismatch {
                expected: existing.to_string(),
                received: callback.transaction_key,
            });
        }

        if is_repeat(&payment, &callback.status) {
            info!("Duplicate callback ignored");
            return Ok(payment);
        }

        let now = Utc::now();
        if payment.payment_key().is_none() {
            payment.assign_payment_key(&callback.transaction_key, now)?;
        }
        let resolution = payment.apply_gateway_result(
            &GatewayResult {
                transaction_key: callback.transaction_key,
                status: callback.status,
                reason: callback.reason,
            },
            now,
        )?;

        uow.save_payment(&payment).await?;
        uow.commit().await?;

        info!(?resolution, status = %payment.status(), "Payment callback applied");
        Ok(payment)
    }

    /// The payment for an order.
    ///
    /// # Errors
    ///
    /// Returns `PaymentNotFound` if the order has no payment.
    pub async fn find_by_order(&self, order_id: OrderId) -> Result<Payment, PaymentError> {
        self.store
            .find_payment_by_order(order_id)
            .await?
            .ok_or(PaymentError::PaymentNotFound(order_id))
    }

    fn validate(&self, request: RequestPayment) -> Result<NewPayment, PaymentError> {
        let card_type = request.card_type.trim();
        if card_type.is_empty() {
            return Err(PaymentError::Validation("cardType must not be blank".to_string()));
        }
        let card_no = CardNumber::parse(&request.card_no)
            .map_err(|e| PaymentError::Validation(format!("cardNo: {e}")))?;
        if request.amount <= 0 {
            return Err(PaymentError::Validation("amount must be positive".to_string()));
        }
        let amount = Money::new(request.amount)
            .map_err(|e| PaymentError::Validation(format!("amount: {e}")))?;

        let callback_url = match request.callback_url {
            Some(url) if !url.trim().is_empty() => url,
            _ => self.default_callback_url.clone(),
        };

        Ok(NewPayment {
            user_id: request.user_id,
            order_id: request.order_id,
            card_type: card_type.to_string(),
            card_no,
            amount,
            callback_url,
        })
    }

    async fn apply_submission(
        &self,
        order_id: OrderId,
        result: &GatewayResult,
    ) -> Result<Payment, PaymentError> {
        let mut uow = self.store.begin().await?;
        let mut payment = uow
            .lock_payment(order_id)
            .await?
            .ok_or(PaymentError::PaymentNotFound(order_id))?;

        let now = Utc::now();
        if payment.payment_key().is_none() {
            payment.assign_payment_key(&result.transaction_key, now)?;
        }
        // a callback may already have settled the payment
        if payment.status().is_in_progress() {
            payment.apply_gateway_result(result, now)?;
        }

        uow.save_payment(&payment).await?;
        uow.commit().await?;

        info!(
            transaction_key = %result.transaction_key,
            gateway_status = %result.status,
            status = %payment.status(),
            "Payment submitted"
        );
        Ok(payment)
    }
}

fn is_repeat(payment: &Payment, raw_status: &str) -> bool {
    matches!(
        (payment.status(), GatewayStatus::parse(raw_status)),
        (PaymentStatus::Completed, GatewayStatus::Success)
            | (PaymentStatus::Failed, GatewayStatus::Failed)
    )
}
