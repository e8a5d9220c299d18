//! Monetary amounts in integer minor units.
//!
//! Prices, discounts, point balances, and payment amounts all share one
//! currency and are whole numbers, so amounts are stored as `i64` and every
//! arithmetic operation is checked.

use core::fmt;
use core::ops::Add;

use serde::{Deserialize, Serialize};

/// Errors from monetary arithmetic.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoneyError {
    /// The result does not fit in an `i64`.
    #[error("amount overflow")]
    Overflow,
    /// The result would be negative.
    #[error("amount cannot be negative")]
    Negative,
}

/// A non-negative amount of money in minor units.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(try_from = "i64", into = "i64")]
pub struct Money(i64);

impl Money {
    /// Zero.
    pub const ZERO: Self = Self(0);

    /// Create an amount, rejecting negative values.
    ///
    /// # Errors
    ///
    /// Returns [`MoneyError::Negative`] if `amount < 0`.
    pub const fn new(amount: i64) -> Result<Self, MoneyError> {
        if amount < 0 {
            return Err(MoneyError::Negative);
        }
        Ok(Self(amount))
    }

    /// Get the underlying amount.
    #[must_use]
    pub const fn as_i64(&self) -> i64 {
        self.0
    }

    /// Whether the amount is zero.
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Add two amounts.
    ///
    /// # Errors
    ///
    /// Returns [`MoneyError::Overflow`] if the sum does not fit.
    pub const fn checked_add(self, other: Self) -> Result<Self, MoneyError> {
        match self.0.checked_add(other.0) {
            Some(sum) => Ok(Self(sum)),
            None => Err(MoneyError::Overflow),
        }
    }

    /// Subtract `other`, failing instead of going below zero.
    ///
    /// # Errors
    ///
    /// Returns [`MoneyError::Negative`] if `other > self`.
    pub const fn checked_sub(self, other: Self) -> Result<Self, MoneyError> {
        if other.0 > self.0 {
            return Err(MoneyError::Negative);
        }
        Ok(Self(self.0 - other.0))
    }

    /// Multiply by a quantity.
    ///
    /// # Errors
    ///
    /// Returns [`MoneyError::Negative`] for a negative quantity and
    /// [`MoneyError::Overflow`] if the product does not fit.
    pub const fn checked_mul(self, quantity: i64) -> Result<Self, MoneyError> {
        if quantity < 0 {
            return Err(MoneyError::Negative);
        }
        match self.0.checked_mul(quantity) {
            Some(product) => Ok(Self(product)),
            None => Err(MoneyError::Overflow),
        }
    }

    /// `percent` percent of this amount, rounded down.
    #[must_use]
    pub fn percentage(self, percent: i64) -> Self {
        let scaled = i128::from(self.0) * i128::from(percent.max(0)) / 100;
        Self(i64::try_from(scaled).unwrap_or(i64::MAX))
    }
}

impl Add for Money {
    type Output = Result<Self, MoneyError>;

    fn add(self, rhs: Self) -> Self::Output {
        self.checked_add(rhs)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<i64> for Money {
    type Error = MoneyError;

    fn try_from(amount: i64) -> Result<Self, Self::Error> {
        Self::new(amount)
    }
}

impl From<Money> for i64 {
    fn from(money: Money) -> Self {
        money.0
    }
}

#[cfg(feature = "postgres")]
impl sqlx::Type<sqlx::Postgres> for Money {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <i64 as sqlx::Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &sqlx::postgres::PgTypeInfo) -> bool {
        <i64 as sqlx::Type<sqlx::Postgres>>::compatible(ty)
    }
}

#[cfg(feature = "postgres")]
impl<'r> sqlx::Decode<'r, sqlx::Postgres> for Money {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let amount = <i64 as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        Ok(Self::new(amount)?)
    }
}

#[cfg(feature = "postgres")]
impl sqlx::Encode<'_, sqlx::Postgres> for Money {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
        <i64 as sqlx::Encode<sqlx::Postgres>>::encode_by_ref(&self.0, buf)
    }
}
