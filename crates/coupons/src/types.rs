//! Coupon records.

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type CouponId = i64;
pub type UserId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscountType {
    Percentage,
    Fixed,
}

/// A discount rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coupon {
    pub id: CouponId,
    /// Unique, matched case-insensitively.
    pub code: String,
    pub discount_type: DiscountType,
    /// Percent (0-100) or a flat amount, depending on `discount_type`.
    pub discount_amount: Decimal,
    /// `None` means unlimited.
    pub max_uses: Option<u32>,
    #[serde(default = "default_max_uses_per_user")]
    pub max_uses_per_user: u32,
    #[serde(default)]
    pub times_used: u32,
    pub valid_from: DateTime<Utc>,
    /// `None` means open-ended.
    pub valid_until: Option<DateTime<Utc>>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_max_uses_per_user() -> u32 {
    1
}

fn default_active() -> bool {
    true
}

impl Coupon {
    /// Discount this coupon gives on `base_price`, capped at the price.
    pub fn discount_for(&self, base_price: Decimal) -> Decimal {
        if base_price <= Decimal::ZERO {
            return Decimal::ZERO;
        }

        let raw = match self.discount_type {
            DiscountType::Percentage => base_price * self.discount_amount / Decimal::ONE_HUNDRED,
            DiscountType::Fixed => self.discount_amount,
        };

        raw.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
            .max(Decimal::ZERO)
            .min(base_price)
    }

    /// Whether the total-use cap has been reached.
    pub fn is_exhausted(&self) -> bool {
        self.max_uses.is_some_and(|max| self.times_used >= max)
    }
}

/// Outcome of a successful validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CouponQuote {
    pub coupon_id: CouponId,
    pub code: String,
    pub base_price: Decimal,
    pub discount: Decimal,
    pub final_amount: Decimal,
}

/// One counted use of a coupon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CouponRedemption {
    pub coupon_id: CouponId,
    pub user_id: UserId,
    pub payment_id: Option<Uuid>,
    pub redeemed_at: DateTime<Utc>,
}
