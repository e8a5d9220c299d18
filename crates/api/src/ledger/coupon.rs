//! Coupon redemption ledger.

use std::fmt;
use std::future::Future;

use chrono::{DateTime, Utc};
use mercato_core::{CouponId, CouponKind, Money, UserId};
use serde::Serialize;

use super::{LedgerError, LedgerRow};
use crate::store::{StoreError, UnitOfWork};

/// How much a coupon takes off an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Discount {
    /// A fixed amount off.
    FixedAmount { amount: Money },
    /// A percentage of the order, optionally capped.
    Percentage {
        percent: i64,
        max_amount: Option<Money>,
    },
}

impl Discount {
    /// Build a discount from its stored columns.
    ///
    /// # Errors
    ///
    /// Returns a description of the problem if a percentage is outside 1-100.
    pub fn from_parts(
        kind: CouponKind,
        value: Money,
        max_amount: Option<Money>,
    ) -> Result<Self, String> {
        match kind {
            CouponKind::FixedAmount => Ok(Self::FixedAmount { amount: value }),
            CouponKind::Percentage => {
                let percent = value.as_i64();
                if !(1..=100).contains(&percent) {
                    return Err(format!("percentage must be between 1 and 100, got {percent}"));
                }
                Ok(Self::Percentage {
                    percent,
                    max_amount,
                })
            }
        }
    }

    /// The discount kind.
    #[must_use]
    pub const fn kind(&self) -> CouponKind {
        match self {
            Self::FixedAmount { .. } => CouponKind::FixedAmount,
            Self::Percentage { .. } => CouponKind::Percentage,
        }
    }

    /// Stored `(value, max_amount)` columns.
    #[must_use]
    pub fn value_parts(&self) -> (i64, Option<Money>) {
        match *self {
            Self::FixedAmount { amount } => (amount.as_i64(), None),
            Self::Percentage {
                percent,
                max_amount,
            } => (percent, max_amount),
        }
    }

    /// Discount for an order of `order_amount`; never more than the order.
    #[must_use]
    pub fn amount_for(&self, order_amount: Money) -> Money {
        let raw = match *self {
            Self::FixedAmount { amount } => amount,
            Self::Percentage {
                percent,
                max_amount,
            } => {
                let computed = order_amount.percentage(percent);
                max_amount.map_or(computed, |cap| computed.min(cap))
            }
        };
        raw.min(order_amount)
    }
}

/// Why a coupon cannot be redeemed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CouponRejection {
    /// The coupon was already redeemed.
    AlreadyUsed,
    /// The coupon is past its expiry.
    Expired,
    /// The order does not reach the coupon's minimum.
    MinimumNotMet { minimum: Money, order_amount: Money },
    /// The coupon belongs to another user.
    NotOwner,
}

impl fmt::Display for CouponRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyUsed => f.write_str("already used"),
            Self::Expired => f.write_str("expired"),
            Self::MinimumNotMet {
                minimum,
                order_amount,
            } => write!(
                f,
                "order amount {order_amount} is below the minimum of {minimum}"
            ),
            Self::NotOwner => f.write_str("not owned by this user"),
        }
    }
}

/// A single-use coupon issued to one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Coupon {
    pub id: CouponId,
    pub owner: UserId,
    pub name: String,
    pub discount: Discount,
    pub min_order_amount: Option<Money>,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
    pub used_at: Option<DateTime<Utc>>,
}

impl Coupon {
    /// Discount this coupon would give an order of `order_amount`.
    ///
    /// Pure; does not check usability or change state.
    #[must_use]
    pub fn calculate_discount(&self, order_amount: Money) -> Money {
        self.discount.amount_for(order_amount)
    }

    /// Check whether the coupon can be applied at `now`.
    ///
    /// # Errors
    ///
    /// Returns the first failing [`CouponRejection`].
    pub fn check_usable(&self, order_amount: Money, now: DateTime<Utc>) -> Result<(), CouponRejection> {
        if self.used {
            return Err(CouponRejection::AlreadyUsed);
        }
        if now > self.expires_at {
            return Err(CouponRejection::Expired);
        }
        if let Some(minimum) = self.min_order_amount
            && order_amount < minimum
        {
            return Err(CouponRejection::MinimumNotMet {
                minimum,
                order_amount,
            });
        }
        Ok(())
    }

    /// Redeem the coupon for `user_id` against `order_amount`.
    ///
    /// Marks it used and returns the discount.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::CouponNotUsable`] when the user does not own
    /// the coupon or it is used, expired, or below its minimum.
    pub fn redeem(
        &mut self,
        user_id: UserId,
        order_amount: Money,
        now: DateTime<Utc>,
    ) -> Result<Money, LedgerError> {
        let coupon_id = self.id;
        let reject = |reason| LedgerError::CouponNotUsable { coupon_id, reason };

        if self.owner != user_id {
            return Err(reject(CouponRejection::NotOwner));
        }
        self.check_usable(order_amount, now).map_err(reject)?;

        self.used = true;
        self.used_at = Some(now);
        Ok(self.calculate_discount(order_amount))
    }
}

impl LedgerRow for Coupon {
    type Key = CouponId;

    const KIND: &'static str = "coupon";

    fn lock<U: UnitOfWork>(
        uow: &mut U,
        key: &CouponId,
    ) -> impl Future<Output = Result<Option<Self>, StoreError>> + Send {
        uow.lock_coupon(*key)
    }

    fn save<U: UnitOfWork>(
        uow: &mut U,
        row: &Self,
    ) -> impl Future<Output = Result<(), StoreError>> + Send {
        uow.save_coupon(row)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn money(amount: i64) -> Money {
        Money::new(amount).unwrap()
    }

    fn coupon(discount: Discount, min_order_amount: Option<i64>) -> Coupon {
        Coupon {
            id: CouponId::new(1),
            owner: UserId::new(7),
            name: "welcome".to_string(),
            discount,
            min_order_amount: min_order_amount.map(money),
            expires_at: Utc::now() + Duration::days(30),
            used: false,
            used_at: None,
        }
    }

    #[test]
    fn test_fixed_amount_discount() {
        let c = coupon(Discount::FixedAmount { amount: money(1000) }, Some(5000));
        assert_eq!(c.calculate_discount(money(10_000)), money(1000));
    }

    #[test]
    fn test_percentage_discount_uncapped() {
        let c = coupon(
            Discount::Percentage {
                percent: 15,
                max_amount: None,
            },
            None,
        );
        assert_eq!(c.calculate_discount(money(10_000)), money(1500));
    }

    #[test]
    fn test_percentage_discount_capped() {
        let c = coupon(
            Discount::Percentage {
                percent: 20,
                max_amount: Some(money(1500)),
            },
            None,
        );
        assert_eq!(c.calculate_discount(money(10_000)), money(1500));
    }

    #[test]
    fn test_discount_never_exceeds_order() {
        let c = coupon(Discount::FixedAmount { amount: money(5000) }, None);
        assert_eq!(c.calculate_discount(money(3000)), money(3000));
    }

    #[test]
    fn test_calculate_discount_is_repeatable() {
        let c = coupon(
            Discount::Percentage {
                percent: 10,
                max_amount: None,
            },
            None,
        );
        let first = c.calculate_discount(money(12_345));
        let second = c.calculate_discount(money(12_345));
        assert_eq!(first, second);
        assert!(!c.used);
    }

    #[test]
    fn test_redeem_marks_used_once() {
        let now = Utc::now();
        let mut c = coupon(Discount::FixedAmount { amount: money(1000) }, None);

        assert_eq!(c.redeem(UserId::new(7), money(8000), now).unwrap(), money(1000));
        assert!(c.used);
        assert_eq!(c.used_at, Some(now));

        let err = c.redeem(UserId::new(7), money(8000), now).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::CouponNotUsable {
                reason: CouponRejection::AlreadyUsed,
                ..
            }
        ));
        assert_eq!(c.used_at, Some(now));
    }

    #[test]
    fn test_redeem_rejects_other_user() {
        let mut c = coupon(Discount::FixedAmount { amount: money(1000) }, None);
        let err = c.redeem(UserId::new(8), money(8000), Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::CouponNotUsable {
                reason: CouponRejection::NotOwner,
                ..
            }
        ));
        assert!(!c.used);
    }

    #[test]
    fn test_redeem_rejects_expired() {
        let mut c = coupon(Discount::FixedAmount { amount: money(1000) }, None);
        c.expires_at = Utc::now() - Duration::minutes(1);
        assert_eq!(
            c.check_usable(money(8000), Utc::now()),
            Err(CouponRejection::Expired)
        );
    }

    #[test]
    fn test_redeem_rejects_below_minimum() {
        let mut c = coupon(Discount::FixedAmount { amount: money(1000) }, Some(5000));
        let err = c.redeem(UserId::new(7), money(4999), Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::CouponNotUsable {
                reason: CouponRejection::MinimumNotMet { .. },
                ..
            }
        ));
    }

    #[test]
    fn test_from_parts_validates_percentage() {
        assert!(Discount::from_parts(CouponKind::Percentage, money(0), None).is_err());
        assert!(Discount::from_parts(CouponKind::Percentage, money(101), None).is_err());
        let discount = Discount::from_parts(CouponKind::Percentage, money(20), Some(money(1500)))
            .unwrap();
        assert_eq!(discount.kind(), CouponKind::Percentage);
        assert_eq!(discount.value_parts(), (20, Some(money(1500))));
    }
}
