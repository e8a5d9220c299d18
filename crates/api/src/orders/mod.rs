//! Orders and the order placement coordinator.

pub mod coordinator;

use chrono::{DateTime, Utc};
use mercato_core::{CouponId, Money, MoneyError, OrderId, ProductId, UserId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ledger::LedgerError;
use crate::store::StoreError;

pub use coordinator::OrderCoordinator;

/// Errors from order placement and lookup.
#[derive(Debug, Error)]
pub enum OrderError {
    /// The request itself is malformed.
    #[error("invalid order: {0}")]
    Validation(String),

    #[error("user {0} not found")]
    UserNotFound(UserId),

    #[error("product {0} not found")]
    ProductNotFound(ProductId),

    #[error("coupon {0} not found")]
    CouponNotFound(CouponId),

    #[error("order {0} not found")]
    OrderNotFound(OrderId),

    /// A ledger refused the change (stock, points, or coupon).
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("amount error: {0}")]
    Money(#[from] MoneyError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// One requested line of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineRequest {
    pub product_id: ProductId,
    pub quantity: i64,
}

/// A request to place an order.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceOrder {
    pub user_id: UserId,
    pub items: Vec<LineRequest>,
    #[serde(default)]
    pub coupon_id: Option<CouponId>,
}

/// An order line with the unit price captured at placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLine {
    pub product_id: ProductId,
    pub quantity: i64,
    pub unit_price: Money,
}

impl OrderLine {
    /// `quantity * unit_price`.
    ///
    /// # Errors
    ///
    /// Returns [`MoneyError`] on overflow.
    pub const fn subtotal(&self) -> Result<Money, MoneyError> {
        self.unit_price.checked_mul(self.quantity)
    }
}

/// An order about to be persisted.
///
/// The total is derived from the lines and recomputed whenever they change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrder {
    user_id: UserId,
    lines: Vec<OrderLine>,
    total_amount: Money,
    coupon_id: Option<CouponId>,
    discount_amount: Money,
}

impl NewOrder {
    /// Create an order with no lines.
    #[must_use]
    pub const fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            lines: Vec::new(),
            total_amount: Money::ZERO,
            coupon_id: None,
            discount_amount: Money::ZERO,
        }
    }

    /// Append a line and recompute the total.
    ///
    /// # Errors
    ///
    /// Returns [`MoneyError`] if the total overflows.
    pub fn add_line(&mut self, line: OrderLine) -> Result<(), MoneyError> {
        self.total_amount = self.total_amount.checked_add(line.subtotal()?)?;
        self.lines.push(line);
        Ok(())
    }

    /// Record a redeemed coupon and its discount.
    ///
    /// # Errors
    ///
    /// Returns [`MoneyError::Negative`] if the discount exceeds the total.
    pub fn apply_discount(&mut self, coupon_id: CouponId, discount: Money) -> Result<(), MoneyError> {
        self.total_amount.checked_sub(discount)?;
        self.coupon_id = Some(coupon_id);
        self.discount_amount = discount;
        Ok(())
    }

    #[must_use]
    pub const fn user_id(&self) -> UserId {
        self.user_id
    }

    #[must_use]
    pub fn lines(&self) -> &[OrderLine] {
        &self.lines
    }

    #[must_use]
    pub const fn total_amount(&self) -> Money {
        self.total_amount
    }

    #[must_use]
    pub const fn coupon_id(&self) -> Option<CouponId> {
        self.coupon_id
    }

    #[must_use]
    pub const fn discount_amount(&self) -> Money {
        self.discount_amount
    }

    /// Amount charged to points: total minus discount.
    #[must_use]
    pub fn charged_amount(&self) -> Money {
        self.total_amount
            .checked_sub(self.discount_amount)
            .unwrap_or(Money::ZERO)
    }

    /// Attach the id and timestamp assigned by the store.
    #[must_use]
    pub fn into_order(self, id: OrderId, created_at: DateTime<Utc>) -> Order {
        let charged_amount = self.charged_amount();
        Order {
            id,
            user_id: self.user_id,
            lines: self.lines,
            coupon_id: self.coupon_id,
            total_amount: self.total_amount,
            discount_amount: self.discount_amount,
            charged_amount,
            created_at,
        }
    }
}

/// A placed order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    pub lines: Vec<OrderLine>,
    pub coupon_id: Option<CouponId>,
    pub total_amount: Money,
    pub discount_amount: Money,
    pub charged_amount: Money,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn line(product: i64, quantity: i64, price: i64) -> OrderLine {
        OrderLine {
            product_id: ProductId::new(product),
            quantity,
            unit_price: Money::new(price).unwrap(),
        }
    }

    #[test]
    fn test_total_recomputed_per_line() {
        let mut order = NewOrder::new(UserId::new(1));
        order.add_line(line(1, 2, 1500)).unwrap();
        assert_eq!(order.total_amount().as_i64(), 3000);
        order.add_line(line(2, 1, 700)).unwrap();
        assert_eq!(order.total_amount().as_i64(), 3700);
    }

    #[test]
    fn test_discount_reduces_charged_amount() {
        let mut order = NewOrder::new(UserId::new(1));
        order.add_line(line(1, 4, 2500)).unwrap();
        order
            .apply_discount(CouponId::new(3), Money::new(1000).unwrap())
            .unwrap();
        assert_eq!(order.charged_amount().as_i64(), 9000);

        let placed = order.into_order(OrderId::new(10), Utc::now());
        assert_eq!(placed.total_amount.as_i64(), 10_000);
        assert_eq!(placed.discount_amount.as_i64(), 1000);
        assert_eq!(placed.charged_amount.as_i64(), 9000);
        assert_eq!(placed.coupon_id, Some(CouponId::new(3)));
    }

    #[test]
    fn test_discount_larger_than_total_rejected() {
        let mut order = NewOrder::new(UserId::new(1));
        order.add_line(line(1, 1, 500)).unwrap();
        assert!(
            order
                .apply_discount(CouponId::new(3), Money::new(501).unwrap())
                .is_err()
        );
        assert_eq!(order.coupon_id(), None);
    }

    #[test]
    fn test_place_order_deserializes_camel_case() {
        let json = r#"{"userId": 1, "items": [{"productId": 5, "quantity": 2}]}"#;
        let command: PlaceOrder = serde_json::from_str(json).unwrap();
        assert_eq!(command.items[0].product_id, ProductId::new(5));
        assert_eq!(command.coupon_id, None);
    }
}
