//! Card number handling.
//!
//! Full card numbers are only held long enough to forward them to the
//! gateway. Anything persisted or logged uses [`CardNumber::masked`].

use core::fmt;

/// Errors that can occur when parsing a [`CardNumber`].
#[derive(thiserror::Error, Debug, Clone)]
pub enum CardNumberError {
    /// The input string is empty or whitespace.
    #[error("card number cannot be blank")]
    Blank,
    /// The input contains characters other than digits and dashes.
    #[error("card number may only contain digits and dashes")]
    InvalidCharacter,
}

/// A card number as entered by the customer, e.g. `1234-5678-9814-1451`.
///
/// `Debug` and `Display` print the masked form.
#[derive(Clone, PartialEq, Eq)]
pub struct CardNumber(String);

impl CardNumber {
    /// Minimum digit count for a partially revealed mask.
    const MIN_REVEAL_DIGITS: usize = 8;

    /// Parse a card number.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is blank or contains anything other
    /// than ASCII digits and dashes.
    pub fn parse(s: &str) -> Result<Self, CardNumberError> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(CardNumberError::Blank);
        }
        if !trimmed.chars().all(|c| c.is_ascii_digit() || c == '-') {
            return Err(CardNumberError::InvalidCharacter);
        }
        Ok(Self(trimmed.to_owned()))
    }

    /// The number exactly as entered, for forwarding to the gateway.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Masked form keeping the first and last four digits:
    /// `1234-****-****-1451`. Numbers with fewer than eight digits are
    /// masked entirely.
    #[must_use]
    pub fn masked(&self) -> String {
        let digits: String = self.0.chars().filter(char::is_ascii_digit).collect();
        if digits.len() < Self::MIN_REVEAL_DIGITS {
            return "*".repeat(digits.len().max(4));
        }
        let first = digits.get(..4).unwrap_or_default();
        let last = digits.get(digits.len() - 4..).unwrap_or_default();
        format!("{first}-****-****-{last}")
    }
}

impl fmt::Debug for CardNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CardNumber").field(&self.masked()).finish()
    }
}

impl fmt::Display for CardNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.masked())
    }
}

impl std::str::FromStr for CardNumber {
    type Err = CardNumberError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
