//! Payment entity and its guarded state machine.
//!
//! ```text
//! PENDING -> PROCESSING -> COMPLETED | FAILED | CANCELLED -> ARCHIVED
//! ```
//!
//! Status only changes through the methods on [`Payment`]. Terminal states
//! accept no further transition except a repeat of the same state (a no-op)
//! and archival, which only the retention sweep performs.

use chrono::{DateTime, Utc};
use mercato_core::{CardNumber, Money, OrderId, PaymentId, PaymentStatus, UserId};
use serde::Serialize;
use thiserror::Error;

use crate::gateway::GatewayResult;

/// Reason recorded when the gateway gives none for a declined payment.
const DEFAULT_DECLINE_REASON: &str = "declined by payment gateway";

/// Rejected payment transitions.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PaymentStateError {
    /// The payment is terminal and the target differs.
    #[error("payment is already {current} and cannot become {target}")]
    TerminalState {
        current: PaymentStatus,
        target: PaymentStatus,
    },

    /// The transition is not part of the lifecycle.
    #[error("payment cannot move from {current} to {target}")]
    InvalidTransition {
        current: PaymentStatus,
        target: PaymentStatus,
    },

    /// `ARCHIVED` was requested through a status update.
    #[error("payments are archived only by the retention sweep")]
    ArchiveNotAllowed,

    /// The gateway transaction key was already recorded.
    #[error("payment key is already assigned")]
    KeyAlreadyAssigned,

    /// A required value was empty.
    #[error("{0} must not be blank")]
    Blank(&'static str),
}

/// Status strings received from the gateway, case-sensitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayStatus {
    Pending,
    Success,
    Failed,
    /// Reported by the gateway before settlement; still in flight.
    Approved,
    Unknown(String),
}

impl GatewayStatus {
    /// Parse a status exactly as received.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw {
            "PENDING" => Self::Pending,
            "SUCCESS" => Self::Success,
            "FAILED" => Self::Failed,
            "approved" => Self::Approved,
            other => Self::Unknown(other.to_string()),
        }
    }
}

/// What applying a gateway result did to a payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Resolution {
    Completed,
    Failed,
    StillPending,
}

/// Data needed to create a payment.
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub user_id: UserId,
    pub order_id: OrderId,
    pub card_type: String,
    pub card_no: CardNumber,
    pub amount: Money,
    pub callback_url: String,
}

impl NewPayment {
    /// Build the stored `PENDING` payment. The card number is masked here.
    #[must_use]
    pub fn into_payment(self, id: PaymentId, now: DateTime<Utc>) -> Payment {
        Payment {
            id,
            user_id: self.user_id,
            order_id: self.order_id,
            payment_key: None,
            card_type: self.card_type,
            card_no: self.card_no.masked(),
            amount: self.amount,
            callback_url: self.callback_url,
            status: PaymentStatus::Pending,
            transaction_id: None,
            processed_at: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A payment for one order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub(crate) id: PaymentId,
    pub(crate) user_id: UserId,
    pub(crate) order_id: OrderId,
    /// Gateway transaction key, assigned once.
    pub(crate) payment_key: Option<String>,
    pub(crate) card_type: String,
    /// Masked card number.
    pub(crate) card_no: String,
    pub(crate) amount: Money,
    pub(crate) callback_url: String,
    pub(crate) status: PaymentStatus,
    pub(crate) transaction_id: Option<String>,
    pub(crate) processed_at: Option<DateTime<Utc>>,
    pub(crate) failure_reason: Option<String>,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
}

impl Payment {
    #[must_use]
    pub const fn id(&self) -> PaymentId {
        self.id
    }

    #[must_use]
    pub const fn user_id(&self) -> UserId {
        self.user_id
    }

    #[must_use]
    pub const fn order_id(&self) -> OrderId {
        self.order_id
    }

    #[must_use]
    pub fn payment_key(&self) -> Option<&str> {
        self.payment_key.as_deref()
    }

    #[must_use]
    pub fn card_type(&self) -> &str {
        &self.card_type
    }

    #[must_use]
    pub fn masked_card_no(&self) -> &str {
        &self.card_no
    }

    #[must_use]
    pub const fn amount(&self) -> Money {
        self.amount
    }

    #[must_use]
    pub fn callback_url(&self) -> &str {
        &self.callback_url
    }

    #[must_use]
    pub const fn status(&self) -> PaymentStatus {
        self.status
    }

    #[must_use]
    pub fn transaction_id(&self) -> Option<&str> {
        self.transaction_id.as_deref()
    }

    #[must_use]
    pub const fn processed_at(&self) -> Option<DateTime<Utc>> {
        self.processed_at
    }

    #[must_use]
    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    #[must_use]
    pub const fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Record the gateway transaction key. Only the first call succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentStateError::KeyAlreadyAssigned`] on a second call and
    /// [`PaymentStateError::Blank`] for an empty key.
    pub fn assign_payment_key(
        &mut self,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<(), PaymentStateError> {
        if key.trim().is_empty() {
            return Err(PaymentStateError::Blank("payment key"));
        }
        if self.payment_key.is_some() {
            return Err(PaymentStateError::KeyAlreadyAssigned);
        }
        self.payment_key = Some(key.to_string());
        self.updated_at = now;
        Ok(())
    }

    /// Move to `target`.
    ///
    /// Repeating the current status is a no-op. Terminal payments reject any
    /// other target, and `ARCHIVED` is never accepted here.
    ///
    /// # Errors
    ///
    /// Returns a [`PaymentStateError`] describing the rejected transition.
    pub fn update_status(
        &mut self,
        target: PaymentStatus,
        now: DateTime<Utc>,
    ) -> Result<(), PaymentStateError> {
        if target == self.status {
            return Ok(());
        }
        if target == PaymentStatus::Archived {
            return Err(PaymentStateError::ArchiveNotAllowed);
        }
        if self.status.is_final() {
            return Err(PaymentStateError::TerminalState {
                current: self.status,
                target,
            });
        }
        if self.status == PaymentStatus::Processing && target == PaymentStatus::Pending {
            return Err(PaymentStateError::InvalidTransition {
                current: self.status,
                target,
            });
        }

        self.status = target;
        if target.is_final() && self.processed_at.is_none() {
            self.processed_at = Some(now);
        }
        self.updated_at = now;
        Ok(())
    }

    /// Mark the payment approved.
    ///
    /// Completing an already completed payment with the same transaction id
    /// is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentStateError::Blank`] for an empty transaction id, or
    /// the transition error if the payment is already terminal.
    pub fn complete(
        &mut self,
        transaction_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), PaymentStateError> {
        if transaction_id.trim().is_empty() {
            return Err(PaymentStateError::Blank("transaction id"));
        }
        if self.status == PaymentStatus::Completed
            && self.transaction_id.as_deref() == Some(transaction_id)
        {
            return Ok(());
        }
        self.finish(PaymentStatus::Completed, now)?;
        self.transaction_id = Some(transaction_id.to_string());
        Ok(())
    }

    /// Mark the payment declined.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentStateError::Blank`] for an empty reason, or the
    /// transition error if the payment is already terminal.
    pub fn fail(&mut self, reason: &str, now: DateTime<Utc>) -> Result<(), PaymentStateError> {
        if reason.trim().is_empty() {
            return Err(PaymentStateError::Blank("failure reason"));
        }
        self.finish(PaymentStatus::Failed, now)?;
        self.failure_reason = Some(reason.to_string());
        Ok(())
    }

    /// Cancel the payment.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentStateError::Blank`] for an empty reason, or the
    /// transition error if the payment is already terminal.
    pub fn cancel(&mut self, reason: &str, now: DateTime<Utc>) -> Result<(), PaymentStateError> {
        if reason.trim().is_empty() {
            return Err(PaymentStateError::Blank("cancel reason"));
        }
        self.finish(PaymentStatus::Cancelled, now)?;
        self.failure_reason = Some(reason.to_string());
        Ok(())
    }

    /// Apply an authoritative gateway result.
    ///
    /// `SUCCESS` completes the payment with the transaction key, `FAILED`
    /// fails it with the gateway's reason, and anything else leaves it as is.
    ///
    /// # Errors
    ///
    /// Returns the transition error if the payment is already terminal with
    /// a different outcome.
    pub fn apply_gateway_result(
        &mut self,
        result: &GatewayResult,
        now: DateTime<Utc>,
    ) -> Result<Resolution, PaymentStateError> {
        match GatewayStatus::parse(&result.status) {
            GatewayStatus::Success => {
                self.complete(&result.transaction_key, now)?;
                Ok(Resolution::Completed)
            }
            GatewayStatus::Failed => {
                let reason = result
                    .reason
                    .as_deref()
                    .filter(|r| !r.trim().is_empty())
                    .unwrap_or(DEFAULT_DECLINE_REASON);
                self.fail(reason, now)?;
                Ok(Resolution::Failed)
            }
            GatewayStatus::Pending | GatewayStatus::Approved | GatewayStatus::Unknown(_) => {
                Ok(Resolution::StillPending)
            }
        }
    }

    /// Move a terminal payment to `ARCHIVED`. Only the retention sweep calls this.
    pub(crate) fn archive(&mut self, now: DateTime<Utc>) -> Result<(), PaymentStateError> {
        if !self.status.is_archivable() {
            return Err(PaymentStateError::InvalidTransition {
                current: self.status,
                target: PaymentStatus::Archived,
            });
        }
        self.status = PaymentStatus::Archived;
        self.updated_at = now;
        Ok(())
    }

    fn finish(&mut self, target: PaymentStatus, now: DateTime<Utc>) -> Result<(), PaymentStateError> {
        if self.status.is_final() {
            return Err(PaymentStateError::TerminalState {
                current: self.status,
                target,
            });
        }
        self.update_status(target, now)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn pending() -> Payment {
        NewPayment {
            user_id: UserId::new(1),
            order_id: OrderId::new(100),
            card_type: "SAMSUNG".to_string(),
            card_no: CardNumber::parse("1234-5678-9814-1451").unwrap(),
            amount: Money::new(5000).unwrap(),
            callback_url: "http://localhost:3000/api/v1/payments/callback".to_string(),
        }
        .into_payment(PaymentId::new(1), Utc::now())
    }

    fn result(status: &str, reason: Option<&str>) -> GatewayResult {
        GatewayResult {
            transaction_key: "20250101:TR:abc123".to_string(),
            status: status.to_string(),
            reason: reason.map(str::to_string),
        }
    }

    #[test]
    fn test_new_payment_is_pending_and_masked() {
        let payment = pending();
        assert_eq!(payment.status(), PaymentStatus::Pending);
        assert_eq!(payment.masked_card_no(), "1234-****-****-1451");
        assert!(payment.processed_at().is_none());
    }

    #[test]
    fn test_success_round_trip_sets_processed_once() {
        let mut payment = pending();
        let first = Utc::now();

        let resolution = payment
            .apply_gateway_result(&result("SUCCESS", None), first)
            .unwrap();
        assert_eq!(resolution, Resolution::Completed);
        assert_eq!(payment.status(), PaymentStatus::Completed);
        assert_eq!(payment.transaction_id(), Some("20250101:TR:abc123"));
        assert_eq!(payment.processed_at(), Some(first));

        // the same result delivered again (callback after sync response)
        payment
            .apply_gateway_result(&result("SUCCESS", None), first + Duration::seconds(5))
            .unwrap();
        assert_eq!(payment.processed_at(), Some(first));
    }

    #[test]
    fn test_failed_records_reason() {
        let mut payment = pending();
        payment
            .apply_gateway_result(&result("FAILED", Some("limit exceeded")), Utc::now())
            .unwrap();
        assert_eq!(payment.status(), PaymentStatus::Failed);
        assert_eq!(payment.failure_reason(), Some("limit exceeded"));
    }

    #[test]
    fn test_failed_without_reason_uses_default() {
        let mut payment = pending();
        payment
            .apply_gateway_result(&result("FAILED", None), Utc::now())
            .unwrap();
        assert_eq!(payment.failure_reason(), Some(DEFAULT_DECLINE_REASON));
    }

    #[test]
    fn test_in_flight_statuses_leave_payment_pending() {
        for status in ["PENDING", "approved", "success", "SOMETHING_NEW"] {
            let mut payment = pending();
            let resolution = payment
                .apply_gateway_result(&result(status, None), Utc::now())
                .unwrap();
            assert_eq!(resolution, Resolution::StillPending, "status {status}");
            assert_eq!(payment.status(), PaymentStatus::Pending);
        }
    }

    #[test]
    fn test_terminal_rejects_other_targets() {
        let mut payment = pending();
        payment.complete("tx-1", Utc::now()).unwrap();

        assert!(payment.update_status(PaymentStatus::Completed, Utc::now()).is_ok());
        assert_eq!(
            payment.update_status(PaymentStatus::Failed, Utc::now()),
            Err(PaymentStateError::TerminalState {
                current: PaymentStatus::Completed,
                target: PaymentStatus::Failed,
            })
        );
        assert!(payment.fail("late decline", Utc::now()).is_err());
        assert!(payment.complete("tx-2", Utc::now()).is_err());
        assert_eq!(payment.transaction_id(), Some("tx-1"));
    }

    #[test]
    fn test_archive_only_from_terminal() {
        let mut payment = pending();
        assert_eq!(
            payment.update_status(PaymentStatus::Archived, Utc::now()),
            Err(PaymentStateError::ArchiveNotAllowed)
        );
        assert!(payment.archive(Utc::now()).is_err());

        payment.cancel("customer request", Utc::now()).unwrap();
        payment.archive(Utc::now()).unwrap();
        assert_eq!(payment.status(), PaymentStatus::Archived);
        assert!(payment.update_status(PaymentStatus::Pending, Utc::now()).is_err());
    }

    #[test]
    fn test_processing_then_complete() {
        let mut payment = pending();
        payment
            .update_status(PaymentStatus::Processing, Utc::now())
            .unwrap();
        assert!(payment.update_status(PaymentStatus::Pending, Utc::now()).is_err());
        payment.complete("tx-9", Utc::now()).unwrap();
        assert_eq!(payment.status(), PaymentStatus::Completed);
    }

    #[test]
    fn test_payment_key_assigned_once() {
        let mut payment = pending();
        assert_eq!(
            payment.assign_payment_key(" ", Utc::now()),
            Err(PaymentStateError::Blank("payment key"))
        );
        payment.assign_payment_key("key-1", Utc::now()).unwrap();
        assert_eq!(
            payment.assign_payment_key("key-2", Utc::now()),
            Err(PaymentStateError::KeyAlreadyAssigned)
        );
        assert_eq!(payment.payment_key(), Some("key-1"));
    }

    #[test]
    fn test_blank_arguments_rejected() {
        let mut payment = pending();
        assert!(payment.complete("", Utc::now()).is_err());
        assert!(payment.fail("  ", Utc::now()).is_err());
        assert!(payment.cancel("", Utc::now()).is_err());
        assert_eq!(payment.status(), PaymentStatus::Pending);
    }
}
