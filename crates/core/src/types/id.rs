//! Typed row identifiers.
//!
//! Every table keys its rows with a `BIGSERIAL`. Wrapping each key in its
//! own type keeps an `OrderId` from being passed where a `ProductId` is
//! expected.

/// Declare an `i64`-backed identifier.
///
/// The generated type serializes as a bare number, parses from and displays
/// as its decimal form, and (with the `postgres` feature) binds as `BIGINT`.
///
/// Identifiers are totally ordered: ledgers lock rows in ascending key order
/// so that concurrent orders touching the same products cannot deadlock.
///
/// ```rust
/// # use mercato_core::define_id;
/// define_id!(WarehouseId);
///
/// let id: WarehouseId = "12".parse().unwrap();
/// assert_eq!(id, WarehouseId::new(12));
/// assert!(WarehouseId::new(3) < id);
/// ```
#[macro_export]
macro_rules! define_id {
    ($name:ident) => {
        #[derive(
            Debug,
            Clone,
            Copy,
            PartialEq,
            Eq,
            Hash,
            PartialOrd,
            Ord,
            ::serde::Serialize,
            ::serde::Deserialize
        )]
        #[cfg_attr(feature = "postgres", derive(::sqlx::Type))]
        #[cfg_attr(feature = "postgres", sqlx(transparent))]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            #[must_use]
            pub const fn new(id: i64) -> Self {
                Self(id)
            }

            #[must_use]
            pub const fn as_i64(&self) -> i64 {
                self.0
            }
        }

        impl ::core::fmt::Display for $name {
            fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
                ::core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl ::core::str::FromStr for $name {
            type Err = ::core::num::ParseIntError;

            fn from_str(s: &str) -> ::core::result::Result<Self, Self::Err> {
                s.trim().parse().map(Self)
            }
        }
    };
}

define_id!(UserId);
define_id!(ProductId);
define_id!(OrderId);
define_id!(CouponId);
define_id!(PaymentId);
