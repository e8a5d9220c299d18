//! Exclusive-access ledgers over shared mutable rows.
//!
//! Inventory levels, points balances, and coupon redemption state are the
//! only rows shared across concurrent orders. They are mutated exclusively
//! through [`with_exclusive_access`], which locks the row inside the caller's
//! unit of work, hands the current state to a closure, and stages whatever
//! the closure leaves behind. The lock is held until the unit of work commits
//! or is dropped.

pub mod coupon;
pub mod inventory;
pub mod points;

use std::fmt;
use std::future::Future;

use mercato_core::{AccountId, CouponId, MoneyError, ProductId};
use thiserror::Error;
use tracing::debug;

use crate::store::{StoreError, UnitOfWork};

pub use coupon::{Coupon, CouponRejection, Discount};
pub use inventory::InventoryItem;
pub use points::{PointsAccount, PointsLedger};

/// Errors raised by ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The locked row does not exist.
    #[error("{kind} {id} not found")]
    NotFound {
        /// Row kind (`inventory`, `coupon`, `points`).
        kind: &'static str,
        /// Row key.
        id: String,
    },

    /// Not enough stock to cover the requested quantity.
    #[error("insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: ProductId,
        requested: i64,
        available: i64,
    },

    /// Not enough points to cover the deduction.
    #[error("insufficient points for account {account_id}: requested {requested}, available {available}")]
    InsufficientFunds {
        account_id: AccountId,
        requested: i64,
        available: i64,
    },

    /// The coupon cannot be redeemed.
    #[error("coupon {coupon_id} not usable: {reason}")]
    CouponNotUsable {
        coupon_id: CouponId,
        reason: CouponRejection,
    },

    /// A quantity or amount was not positive.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// Arithmetic on balances overflowed.
    #[error("amount error: {0}")]
    Money(#[from] MoneyError),

    /// Storage failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A row that can be locked and saved through a [`UnitOfWork`].
pub trait LedgerRow: Sized + Send {
    /// Row key type.
    type Key: fmt::Display + Send + Sync;

    /// Row kind, used in errors and logs.
    const KIND: &'static str;

    /// Lock the row inside `uow`.
    fn lock<U: UnitOfWork>(
        uow: &mut U,
        key: &Self::Key,
    ) -> impl Future<Output = Result<Option<Self>, StoreError>> + Send;

    /// Stage the row inside `uow`.
    fn save<U: UnitOfWork>(
        uow: &mut U,
        row: &Self,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// Lock `key`, run `apply` on the current state, and stage the result.
///
/// Blocks until the row lock is available. If `apply` fails nothing is
/// staged; the lock stays held until the unit of work ends either way.
///
/// # Errors
///
/// Returns [`LedgerError::NotFound`] if the row does not exist, the error
/// from `apply`, or a storage error.
pub async fn with_exclusive_access<R, U, T, F>(
    uow: &mut U,
    key: &R::Key,
    apply: F,
) -> Result<T, LedgerError>
where
    R: LedgerRow,
    U: UnitOfWork,
    T: Send,
    F: FnOnce(&mut R) -> Result<T, LedgerError> + Send,
{
    let mut row = R::lock(uow, key)
        .await?
        .ok_or_else(|| LedgerError::NotFound {
            kind: R::KIND,
            id: key.to_string(),
        })?;

    let outcome = apply(&mut row)?;
    R::save(uow, &row).await?;
    debug!(kind = R::KIND, key = %key, "ledger row updated");

    Ok(outcome)
}
