//! Storage contracts and backends.
//!
//! Every mutation of inventory, coupons, points, and payments happens inside
//! a [`UnitOfWork`]. `lock_*` reads a row and holds an exclusive lock on it
//! until the unit of work ends; `save_*` stages the new row state. Staged
//! writes become visible to other callers only on [`UnitOfWork::commit`].
//! Dropping a unit of work without committing discards everything it staged
//! and releases its locks.
//!
//! Two backends implement the contracts:
//!
//! - [`PgStore`] - `PostgreSQL` rows locked with `SELECT ... FOR UPDATE`
//! - [`MemoryStore`] - embedded maps guarded by a per-resource lock table

pub mod memory;
pub mod postgres;

use std::future::Future;

use chrono::{DateTime, Utc};
use mercato_core::{AccountId, CouponId, Money, OrderId, ProductId, UserId};
use thiserror::Error;

use crate::ledger::coupon::Coupon;
use crate::ledger::inventory::InventoryItem;
use crate::ledger::points::PointsAccount;
use crate::orders::{NewOrder, Order};
use crate::payments::model::{NewPayment, Payment};

pub use memory::MemoryStore;
pub use postgres::{PgStore, create_pool};

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Data in the store is corrupted or invalid.
    #[error("data corruption: {0}")]
    DataCorruption(String),

    /// Requested entity was not found.
    #[error("not found")]
    NotFound,

    /// Constraint violation (e.g., a second payment for one order).
    #[error("constraint violation: {0}")]
    Conflict(String),
}

/// A transaction-scoped set of row locks and staged writes.
///
/// `lock_*` is the only way ledgers read rows they intend to mutate.
pub trait UnitOfWork: Send {
    /// Lock a product's inventory row.
    fn lock_inventory(
        &mut self,
        product_id: ProductId,
    ) -> impl Future<Output = Result<Option<InventoryItem>, StoreError>> + Send;

    /// Stage a new inventory level.
    fn save_inventory(
        &mut self,
        item: &InventoryItem,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Lock a coupon row.
    fn lock_coupon(
        &mut self,
        coupon_id: CouponId,
    ) -> impl Future<Output = Result<Option<Coupon>, StoreError>> + Send;

    /// Stage a coupon's use transition.
    fn save_coupon(&mut self, coupon: &Coupon)
    -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Lock a points account, creating an empty one if it does not exist yet.
    fn lock_points(
        &mut self,
        account_id: &AccountId,
    ) -> impl Future<Output = Result<PointsAccount, StoreError>> + Send;

    /// Stage a new points balance.
    fn save_points(
        &mut self,
        account: &PointsAccount,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Lock the payment for an order.
    fn lock_payment(
        &mut self,
        order_id: OrderId,
    ) -> impl Future<Output = Result<Option<Payment>, StoreError>> + Send;

    /// Stage a payment transition.
    fn save_payment(
        &mut self,
        payment: &Payment,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Stage an order with its lines, assigning its id.
    fn insert_order(
        &mut self,
        order: NewOrder,
    ) -> impl Future<Output = Result<Order, StoreError>> + Send;

    /// Apply every staged write atomically and release all locks.
    fn commit(self) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// Entry point to a storage backend.
pub trait Store: Clone + Send + Sync + 'static {
    /// The unit of work type handed out by [`Store::begin`].
    type Tx: UnitOfWork + 'static;

    /// Start a unit of work.
    fn begin(&self) -> impl Future<Output = Result<Self::Tx, StoreError>> + Send;

    /// Check that the backend is reachable.
    fn ping(&self) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Read an order without locking.
    fn find_order(
        &self,
        order_id: OrderId,
    ) -> impl Future<Output = Result<Option<Order>, StoreError>> + Send;

    /// Read a coupon without locking.
    fn find_coupon(
        &self,
        coupon_id: CouponId,
    ) -> impl Future<Output = Result<Option<Coupon>, StoreError>> + Send;

    /// Read a points account without locking or creating it.
    fn find_points(
        &self,
        account_id: &AccountId,
    ) -> impl Future<Output = Result<Option<PointsAccount>, StoreError>> + Send;

    /// Insert a new `PENDING` payment.
    ///
    /// Returns [`StoreError::Conflict`] if the order already has a payment.
    fn insert_payment(
        &self,
        payment: NewPayment,
    ) -> impl Future<Output = Result<Payment, StoreError>> + Send;

    /// Read the payment for an order without locking.
    fn find_payment_by_order(
        &self,
        order_id: OrderId,
    ) -> impl Future<Output = Result<Option<Payment>, StoreError>> + Send;

    /// `PENDING` payments created before `created_before`, oldest first.
    fn find_stale_pending_payments(
        &self,
        created_before: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<Payment>, StoreError>> + Send;

    /// Terminal payments last updated before `updated_before`, oldest first.
    fn find_archivable_payments(
        &self,
        updated_before: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<Payment>, StoreError>> + Send;
}

/// Authoritative product prices.
pub trait CatalogLookup: Send + Sync {
    /// Current unit price, or `None` if the product does not exist.
    fn current_price(
        &self,
        product_id: ProductId,
    ) -> impl Future<Output = Result<Option<Money>, StoreError>> + Send;
}

/// User directory.
pub trait UserLookup: Send + Sync {
    /// Whether the user exists.
    fn user_exists(&self, user_id: UserId) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// The points account key for a user, or `None` if the user does not exist.
    fn account_id_for(
        &self,
        user_id: UserId,
    ) -> impl Future<Output = Result<Option<AccountId>, StoreError>> + Send;
}

/// Everything the order, payment, and points services need from a backend.
pub trait Backend: Store + CatalogLookup + UserLookup {}

impl<T> Backend for T where T: Store + CatalogLookup + UserLookup {}
