//! Product inventory ledger.

use std::future::Future;

use mercato_core::ProductId;

use super::{LedgerError, LedgerRow};
use crate::store::{StoreError, UnitOfWork};

/// Available stock for one product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryItem {
    pub product_id: ProductId,
    /// Units available for sale; never negative.
    pub available: i64,
}

impl InventoryItem {
    /// Remove `quantity` units, failing rather than going below zero.
    ///
    /// Returns the remaining stock.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InvalidAmount`] for a non-positive quantity and
    /// [`LedgerError::InsufficientStock`] if fewer units are available.
    pub fn decrement(&mut self, quantity: i64) -> Result<i64, LedgerError> {
        if quantity < 1 {
            return Err(LedgerError::InvalidAmount(format!(
                "quantity must be at least 1, got {quantity}"
            )));
        }
        if self.available < quantity {
            return Err(LedgerError::InsufficientStock {
                product_id: self.product_id,
                requested: quantity,
                available: self.available,
            });
        }
        self.available -= quantity;
        Ok(self.available)
    }
}

impl LedgerRow for InventoryItem {
    type Key = ProductId;

    const KIND: &'static str = "inventory";

    fn lock<U: UnitOfWork>(
        uow: &mut U,
        key: &ProductId,
    ) -> impl Future<Output = Result<Option<Self>, StoreError>> + Send {
        uow.lock_inventory(*key)
    }

    fn save<U: UnitOfWork>(
        uow: &mut U,
        row: &Self,
    ) -> impl Future<Output = Result<(), StoreError>> + Send {
        uow.save_inventory(row)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn item(available: i64) -> InventoryItem {
        InventoryItem {
            product_id: ProductId::new(1),
            available,
        }
    }

    #[test]
    fn test_decrement_returns_remaining() {
        let mut stock = item(10);
        assert_eq!(stock.decrement(3).unwrap(), 7);
        assert_eq!(stock.available, 7);
    }

    #[test]
    fn test_decrement_to_zero() {
        let mut stock = item(3);
        assert_eq!(stock.decrement(3).unwrap(), 0);
    }

    #[test]
    fn test_decrement_fails_instead_of_clamping() {
        let mut stock = item(2);
        let err = stock.decrement(3).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InsufficientStock {
                requested: 3,
                available: 2,
                ..
            }
        ));
        assert_eq!(stock.available, 2);
    }

    #[test]
    fn test_decrement_rejects_non_positive_quantity() {
        let mut stock = item(5);
        assert!(matches!(
            stock.decrement(0),
            Err(LedgerError::InvalidAmount(_))
        ));
    }
}
