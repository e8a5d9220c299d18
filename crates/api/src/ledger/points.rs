//! Points balance ledger.

use std::future::Future;

use mercato_core::{AccountId, Money, UserId};
use tracing::{info, instrument};

use super::{LedgerError, LedgerRow, with_exclusive_access};
use crate::store::{Backend, Store, StoreError, UnitOfWork, UserLookup};

/// A user's points balance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointsAccount {
    pub account_id: AccountId,
    /// Spendable balance; never negative.
    pub balance: Money,
    /// Incremented on every balance change.
    pub version: i64,
}

impl PointsAccount {
    /// An empty account, as created on first access.
    #[must_use]
    pub const fn empty(account_id: AccountId) -> Self {
        Self {
            account_id,
            balance: Money::ZERO,
            version: 0,
        }
    }

    /// Add points. Returns the new balance.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InvalidAmount`] for a zero amount and
    /// [`LedgerError::Money`] on overflow.
    pub fn charge(&mut self, amount: Money) -> Result<Money, LedgerError> {
        if amount.is_zero() {
            return Err(LedgerError::InvalidAmount(
                "charge amount must be positive".to_string(),
            ));
        }
        self.balance = self.balance.checked_add(amount)?;
        self.version += 1;
        Ok(self.balance)
    }

    /// Remove points, failing rather than going below zero.
    /// Returns the new balance. Deducting zero is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InsufficientFunds`] if the balance is too low.
    pub fn deduct(&mut self, amount: Money) -> Result<Money, LedgerError> {
        if amount.is_zero() {
            return Ok(self.balance);
        }
        self.balance =
            self.balance
                .checked_sub(amount)
                .map_err(|_| LedgerError::InsufficientFunds {
                    account_id: self.account_id.clone(),
                    requested: amount.as_i64(),
                    available: self.balance.as_i64(),
                })?;
        self.version += 1;
        Ok(self.balance)
    }
}

impl LedgerRow for PointsAccount {
    type Key = AccountId;

    const KIND: &'static str = "points";

    fn lock<U: UnitOfWork>(
        uow: &mut U,
        key: &AccountId,
    ) -> impl Future<Output = Result<Option<Self>, StoreError>> + Send {
        async move { uow.lock_points(key).await.map(Some) }
    }

    fn save<U: UnitOfWork>(
        uow: &mut U,
        row: &Self,
    ) -> impl Future<Output = Result<(), StoreError>> + Send {
        uow.save_points(row)
    }
}

/// Deduct points inside an existing unit of work.
///
/// # Errors
///
/// Returns [`LedgerError::InsufficientFunds`] or a storage error.
pub async fn deduct_points<U: UnitOfWork>(
    uow: &mut U,
    account_id: &AccountId,
    amount: Money,
) -> Result<Money, LedgerError> {
    with_exclusive_access::<PointsAccount, _, _, _>(uow, account_id, |account| {
        account.deduct(amount)
    })
    .await
}

/// Points charging and balance lookups.
#[derive(Clone)]
pub struct PointsLedger<S> {
    store: S,
}

impl<S: Backend> PointsLedger<S> {
    /// Create a points ledger over `store`.
    pub const fn new(store: S) -> Self {
        Self { store }
    }

    /// Add `amount` points to the user's account, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::NotFound`] for an unknown user,
    /// [`LedgerError::InvalidAmount`] for a zero amount, or a storage error.
    #[instrument(skip(self), fields(user_id = %user_id, amount = %amount))]
    pub async fn charge(&self, user_id: UserId, amount: Money) -> Result<Money, LedgerError> {
        let account_id = self.resolve_account(user_id).await?;

        let mut uow = self.store.begin().await?;
        let balance = with_exclusive_access::<PointsAccount, _, _, _>(
            &mut uow,
            &account_id,
            |account| account.charge(amount),
        )
        .await?;
        uow.commit().await?;

        info!(account_id = %account_id, balance = %balance, "Points charged");
        Ok(balance)
    }

    /// The user's current balance; zero if the account was never touched.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::NotFound`] for an unknown user or a storage error.
    pub async fn balance(&self, user_id: UserId) -> Result<PointsAccount, LedgerError> {
        let account_id = self.resolve_account(user_id).await?;
        let account = self
            .store
            .find_points(&account_id)
            .await?
            .unwrap_or_else(|| PointsAccount::empty(account_id));
        Ok(account)
    }

    async fn resolve_account(&self, user_id: UserId) -> Result<AccountId, LedgerError> {
        self.store
            .account_id_for(user_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound {
                kind: "user",
                id: user_id.to_string(),
            })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn money(amount: i64) -> Money {
        Money::new(amount).unwrap()
    }

    fn account(balance: i64) -> PointsAccount {
        PointsAccount {
            account_id: AccountId::parse("buyer01").unwrap(),
            balance: money(balance),
            version: 0,
        }
    }

    #[test]
    fn test_deduct_bumps_version() {
        let mut points = account(1000);
        assert_eq!(points.deduct(money(400)).unwrap(), money(600));
        assert_eq!(points.version, 1);
    }

    #[test]
    fn test_deduct_insufficient_leaves_balance() {
        let mut points = account(100);
        let err = points.deduct(money(101)).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InsufficientFunds {
                requested: 101,
                available: 100,
                ..
            }
        ));
        assert_eq!(points.balance, money(100));
        assert_eq!(points.version, 0);
    }

    #[test]
    fn test_deduct_zero_is_noop() {
        let mut points = account(0);
        assert_eq!(points.deduct(Money::ZERO).unwrap(), Money::ZERO);
        assert_eq!(points.version, 0);
    }

    #[test]
    fn test_charge_rejects_zero() {
        let mut points = account(0);
        assert!(matches!(
            points.charge(Money::ZERO),
            Err(LedgerError::InvalidAmount(_))
        ));
    }

    #[tokio::test]
    async fn test_charge_creates_account_lazily() {
        let store = MemoryStore::new();
        let user = store.insert_user("buyer01").unwrap();
        let ledger = PointsLedger::new(store.clone());

        assert_eq!(ledger.balance(user).await.unwrap().balance, Money::ZERO);
        assert_eq!(ledger.charge(user, money(5000)).await.unwrap(), money(5000));
        assert_eq!(ledger.charge(user, money(250)).await.unwrap(), money(5250));

        let stored = ledger.balance(user).await.unwrap();
        assert_eq!(stored.balance, money(5250));
        assert_eq!(stored.version, 2);
    }

    #[tokio::test]
    async fn test_charge_unknown_user() {
        let ledger = PointsLedger::new(MemoryStore::new());
        let err = ledger.charge(UserId::new(404), money(10)).await.unwrap_err();
        assert!(matches!(err, LedgerError::NotFound { kind: "user", .. }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_deductions_never_overspend() {
        let store = MemoryStore::new();
        let user = store.insert_user("buyer01").unwrap();
        let account_id = store.account_id_for(user).await.unwrap().unwrap();
        PointsLedger::new(store.clone())
            .charge(user, money(1000))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..10 {
            let store = store.clone();
            let account_id = account_id.clone();
            handles.push(tokio::spawn(async move {
                let mut uow = store.begin().await.unwrap();
                let result = deduct_points(&mut uow, &account_id, money(300)).await;
                if result.is_ok() {
                    uow.commit().await.unwrap();
                }
                result.is_ok()
            }));
        }

        let mut successes = 0;
        for handle in handles {
            if handle.await.unwrap() {
                successes += 1;
            }
        }

        assert_eq!(successes, 3);
        let remaining = store.find_points(&account_id).await.unwrap().unwrap();
        assert_eq!(remaining.balance, money(100));
    }
}
