//! Order placement across the inventory, coupon, and points ledgers.
//!
//! An order is one unit of work. Locks are taken in a fixed global order,
//! inventory rows by ascending product id, then the coupon, then the points
//! account, so two orders that touch overlapping rows serialize instead of
//! deadlocking. Any failure drops the unit of work, which discards every
//! staged change.

use std::collections::BTreeMap;

use chrono::Utc;
use mercato_core::{AccountId, CouponId, Money, OrderId, ProductId, UserId};
use tracing::{info, instrument};

use super::{NewOrder, Order, OrderError, OrderLine, PlaceOrder};
use crate::ledger::points::deduct_points;
use crate::ledger::{Coupon, CouponRejection, InventoryItem, LedgerError, with_exclusive_access};
use crate::store::{Backend, Store, UnitOfWork};

/// Places orders and reads them back.
#[derive(Clone)]
pub struct OrderCoordinator<S> {
    store: S,
}

impl<S: Backend> OrderCoordinator<S> {
    /// Create a coordinator over `store`.
    pub const fn new(store: S) -> Self {
        Self { store }
    }

    /// Place an order.
    ///
    /// Prices come from the catalog, never from the request. Stock is
    /// decremented per distinct product, the coupon (if any) is redeemed
    /// against the order total, and the remainder is deducted from the
    /// user's points, all in one unit of work together with the order insert.
    ///
    /// # Errors
    ///
    /// - [`OrderError::Validation`] for an empty order or a quantity below 1
    /// - [`OrderError::UserNotFound`] / [`OrderError::ProductNotFound`] before any lock is taken
    /// - [`OrderError::Ledger`] for insufficient stock or points, or an unusable coupon
    #[instrument(skip(self, command), fields(user_id = %command.user_id, lines = command.items.len()))]
    pub async fn place_order(&self, command: PlaceOrder) -> Result<Order, OrderError> {
        let demand = validate(&command)?;
        let account_id = self.resolve_account(command.user_id).await?;
        let order = self.price_order(&command).await?;

        let mut uow = self.store.begin().await?;
        let order = reserve(&mut uow, order, &demand, command.coupon_id, &account_id).await?;
        let order = uow.insert_order(order).await?;
        uow.commit().await?;

        info!(
            order_id = %order.id,
            total = %order.total_amount,
            discount = %order.discount_amount,
            charged = %order.charged_amount,
            "Order placed"
        );
        Ok(order)
    }

    /// Discount a coupon would give an order of `order_amount`, without redeeming it.
    ///
    /// # Errors
    ///
    /// Returns [`OrderError::CouponNotFound`], or [`OrderError::Ledger`] if the
    /// coupon belongs to someone else or is not usable.
    #[instrument(skip(self))]
    pub async fn preview_discount(
        &self,
        coupon_id: CouponId,
        user_id: UserId,
        order_amount: Money,
    ) -> Result<Money, OrderError> {
        let coupon = self
            .store
            .find_coupon(coupon_id)
            .await?
            .ok_or(OrderError::CouponNotFound(coupon_id))?;

        let reject = |reason| LedgerError::CouponNotUsable { coupon_id, reason };
        if coupon.owner != user_id {
            return Err(reject(CouponRejection::NotOwner).into());
        }
        coupon
            .check_usable(order_amount, Utc::now())
            .map_err(reject)?;

        Ok(coupon.calculate_discount(order_amount))
    }

    /// Look up a placed order.
    ///
    /// # Errors
    ///
    /// Returns [`OrderError::OrderNotFound`] or a storage error.
    pub async fn find_order(&self, order_id: OrderId) -> Result<Order, OrderError> {
        self.store
            .find_order(order_id)
            .await?
            .ok_or(OrderError::OrderNotFound(order_id))
    }

    async fn resolve_account(&self, user_id: UserId) -> Result<AccountId, OrderError> {
        if !self.store.user_exists(user_id).await? {
            return Err(OrderError::UserNotFound(user_id));
        }
        self.store
            .account_id_for(user_id)
            .await?
            .ok_or(OrderError::UserNotFound(user_id))
    }

    async fn price_order(&self, command: &PlaceOrder) -> Result<NewOrder, OrderError> {
        let mut order = NewOrder::new(command.user_id);
        for item in &command.items {
            let unit_price = self
                .store
                .current_price(item.product_id)
                .await?
                .ok_or(OrderError::ProductNotFound(item.product_id))?;
            order.add_line(OrderLine {
                product_id: item.product_id,
                quantity: item.quantity,
                unit_price,
            })?;
        }
        Ok(order)
    }
}

/// Check the request shape and sum quantities per product, sorted by id.
fn validate(command: &PlaceOrder) -> Result<BTreeMap<ProductId, i64>, OrderError> {
    if command.items.is_empty() {
        return Err(OrderError::Validation(
            "an order needs at least one item".to_string(),
        ));
    }

    let mut demand = BTreeMap::new();
    for item in &command.items {
        if item.quantity < 1 {
            return Err(OrderError::Validation(format!(
                "quantity for product {} must be at least 1",
                item.product_id
            )));
        }
        let total: &mut i64 = demand.entry(item.product_id).or_default();
        *total = total.checked_add(item.quantity).ok_or_else(|| {
            OrderError::Validation(format!("quantity for product {} too large", item.product_id))
        })?;
    }
    Ok(demand)
}

/// Take every ledger lock in global order and stage the mutations.
async fn reserve<U: UnitOfWork>(
    uow: &mut U,
    mut order: NewOrder,
    demand: &BTreeMap<ProductId, i64>,
    coupon_id: Option<CouponId>,
    account_id: &AccountId,
) -> Result<NewOrder, OrderError> {
    for (product_id, &quantity) in demand {
        with_exclusive_access::<InventoryItem, _, _, _>(uow, product_id, |item| {
            item.decrement(quantity)
        })
        .await
        .map_err(|e| match e {
            LedgerError::NotFound { .. } => OrderError::ProductNotFound(*product_id),
            other => other.into(),
        })?;
    }

    if let Some(coupon_id) = coupon_id {
        let user_id = order.user_id();
        let total = order.total_amount();
        let now = Utc::now();
        let discount = with_exclusive_access::<Coupon, _, _, _>(uow, &coupon_id, |coupon| {
            coupon.redeem(user_id, total, now)
        })
        .await
        .map_err(|e| match e {
            LedgerError::NotFound { .. } => OrderError::CouponNotFound(coupon_id),
            other => other.into(),
        })?;
        order.apply_discount(coupon_id, discount)?;
    }

    deduct_points(uow, account_id, order.charged_amount()).await?;
    Ok(order)
}
