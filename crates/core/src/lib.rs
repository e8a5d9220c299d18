//! Mercato Core - Shared domain types.
//!
//! This crate provides the types shared by every Mercato component:
//! - `api` - Order placement, payments, and reconciliation service
//! - `cli` - Command-line tools for migrations and operator sweeps
//!
//! # Architecture
//!
//! The core crate contains only types - no I/O, no database access,
//! no HTTP clients. Database encoding is opt-in through the `postgres` feature.
//!
//! # Modules
//!
//! - [`types`] - Newtype ids, money, account ids, card numbers, and statuses

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
