//! Points account identifier.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Errors that can occur when parsing an [`AccountId`].
#[derive(thiserror::Error, Debug, Clone)]
pub enum AccountIdError {
    /// The input string is empty or whitespace.
    #[error("account id cannot be blank")]
    Blank,
    /// The input string is too long.
    #[error("account id must be at most {max} characters")]
    TooLong {
        /// Maximum allowed length.
        max: usize,
    },
    /// The input contains characters other than ASCII letters and digits.
    #[error("account id may only contain ASCII letters and digits")]
    InvalidCharacter,
}

/// The key of a user's points account (the user's login id).
///
/// Users are resolved to an account id through the user directory; the
/// points ledger is keyed by this value, not by the numeric user id.
///
/// ## Constraints
///
/// - Length: 1-10 characters
/// - ASCII letters and digits only
///
/// ## Examples
///
/// ```
/// use mercato_core::AccountId;
///
/// assert!(AccountId::parse("buyer01").is_ok());
/// assert!(AccountId::parse("").is_err());
/// assert!(AccountId::parse("not valid").is_err());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    /// Maximum length of an account id.
    pub const MAX_LENGTH: usize = 10;

    /// Parse an `AccountId` from a string.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is blank, longer than
    /// [`Self::MAX_LENGTH`], or contains non-alphanumeric characters.
    pub fn parse(s: &str) -> Result<Self, AccountIdError> {
        if s.trim().is_empty() {
            return Err(AccountIdError::Blank);
        }

        if s.len() > Self::MAX_LENGTH {
            return Err(AccountIdError::TooLong {
                max: Self::MAX_LENGTH,
            });
        }

        if !s.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(AccountIdError::InvalidCharacter);
        }

        Ok(Self(s.to_owned()))
    }

    /// Returns the account id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for AccountId {
    type Err = AccountIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for AccountId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(feature = "postgres")]
impl sqlx::Type<sqlx::Postgres> for AccountId {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <String as sqlx::Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &sqlx::postgres::PgTypeInfo) -> bool {
        <String as sqlx::Type<sqlx::Postgres>>::compatible(ty)
    }
}

#[cfg(feature = "postgres")]
impl<'r> sqlx::Decode<'r, sqlx::Postgres> for AccountId {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <String as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        // Database values are assumed valid
        Ok(Self(s))
    }
}

#[cfg(feature = "postgres")]
impl sqlx::Encode<'_, sqlx::Postgres> for AccountId {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
        <String as sqlx::Encode<sqlx::Postgres>>::encode_by_ref(&self.0, buf)
    }
}
