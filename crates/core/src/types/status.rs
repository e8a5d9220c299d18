//! Status enums for payments and coupons.

use serde::{Deserialize, Serialize};

/// Payment lifecycle status.
///
/// ```text
/// PENDING -> PROCESSING -> COMPLETED | FAILED | CANCELLED -> ARCHIVED
/// ```
///
/// `PENDING` may also move straight to a terminal state. `ARCHIVED` is only
/// reached from a terminal state through the retention sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "payment_status", rename_all = "SCREAMING_SNAKE_CASE")
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    /// Accepted locally, waiting for the gateway.
    #[default]
    Pending,
    /// Picked up by the gateway.
    Processing,
    /// Approved by the gateway.
    Completed,
    /// Declined, or the gateway never answered.
    Failed,
    /// Cancelled before completion.
    Cancelled,
    /// Terminal payment moved out of the active set after retention.
    Archived,
}

impl PaymentStatus {
    /// Whether the payment is still waiting on the gateway.
    #[must_use]
    pub const fn is_in_progress(self) -> bool {
        matches!(self, Self::Pending | Self::Processing)
    }

    /// Whether no further status change is accepted, other than archival.
    #[must_use]
    pub const fn is_final(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::Archived
        )
    }

    /// Whether the retention sweep may archive the payment.
    #[must_use]
    pub const fn is_archivable(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Wire and database name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
            Self::Archived => "ARCHIVED",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "PROCESSING" => Ok(Self::Processing),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            "CANCELLED" => Ok(Self::Cancelled),
            "ARCHIVED" => Ok(Self::Archived),
            _ => Err(format!("invalid payment status: {s}")),
        }
    }
}

/// How a coupon's discount is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "coupon_kind", rename_all = "SCREAMING_SNAKE_CASE")
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CouponKind {
    /// A fixed amount off the order.
    FixedAmount,
    /// A percentage of the order amount.
    Percentage,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_status_groups() {
        assert!(PaymentStatus::Pending.is_in_progress());
        assert!(PaymentStatus::Processing.is_in_progress());
        assert!(!PaymentStatus::Completed.is_in_progress());

        for status in [
            PaymentStatus::Completed,
            PaymentStatus::Failed,
            PaymentStatus::Cancelled,
        ] {
            assert!(status.is_final());
            assert!(status.is_archivable());
        }

        assert!(PaymentStatus::Archived.is_final());
        assert!(!PaymentStatus::Archived.is_archivable());
        assert!(!PaymentStatus::Pending.is_final());
    }

    #[test]
    fn test_status_from_str_round_trips_display() {
        for status in [
            PaymentStatus::Pending,
            PaymentStatus::Processing,
            PaymentStatus::Completed,
            PaymentStatus::Failed,
            PaymentStatus::Cancelled,
            PaymentStatus::Archived,
        ] {
            assert_eq!(status.to_string().parse::<PaymentStatus>().unwrap(), status);
        }
        assert!("pending".parse::<PaymentStatus>().is_err());
    }

    #[test]
    fn test_coupon_kind_serde() {
        let json = serde_json::to_string(&CouponKind::FixedAmount).unwrap();
        assert_eq!(json, "\"FIXED_AMOUNT\"");
    }
}
