//! Core types for Mercato.
//!
//! This module provides type-safe wrappers for common domain concepts.

pub mod account;
pub mod card;
pub mod id;
pub mod money;
pub mod status;

pub use account::{AccountId, AccountIdError};
pub use card::{CardNumber, CardNumberError};
pub use id::*;
pub use money::{Money, MoneyError};
pub use status::*;
