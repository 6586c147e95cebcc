//! Coupon validation and usage accounting.

use crate::error::CouponError;
use crate::types::{Coupon, CouponId, CouponQuote, CouponRedemption, UserId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};
use uuid::Uuid;

/// Coupon definitions and their redemption history.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CouponBook {
    /// Coupons indexed by normalized code.
    coupons: HashMap<String, Coupon>,
    redemptions: Vec<CouponRedemption>,
}

impl CouponBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a coupon.
    pub fn insert(&mut self, coupon: Coupon) {
        self.coupons.insert(normalize_code(&coupon.code), coupon);
    }

    pub fn get(&self, code: &str) -> Option<&Coupon> {
        self.coupons.get(&normalize_code(code))
    }

    pub fn get_by_id(&self, coupon_id: CouponId) -> Option<&Coupon> {
        self.coupons.values().find(|c| c.id == coupon_id)
    }

    /// Number of uses of a coupon by one user.
    pub fn uses_by(&self, coupon_id: CouponId, user_id: UserId) -> u32 {
        self.redemptions
            .iter()
            .filter(|r| r.coupon_id == coupon_id && r.user_id == user_id)
            .count() as u32
    }

    pub fn redemptions(&self) -> &[CouponRedemption] {
        &self.redemptions
    }

    /// Validate a code against a price for a user.
    pub fn validate(
        &self,
        code: &str,
        base_price: Decimal,
        user_id: UserId,
    ) -> Result<CouponQuote, CouponError> {
        self.validate_at(code, base_price, user_id, Utc::now())
    }

    /// Validate as of a specific instant.
    pub fn validate_at(
        &self,
        code: &str,
        base_price: Decimal,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<CouponQuote, CouponError> {
        let coupon = self
            .get(code)
            .ok_or_else(|| CouponError::NotFound(code.trim().to_string()))?;

        self.check(coupon, user_id, now)?;

        let discount = coupon.discount_for(base_price);
        let final_amount = (base_price - discount).max(Decimal::ZERO);
        debug!(code = %coupon.code, %base_price, %discount, "Coupon validated");

        Ok(CouponQuote {
            coupon_id: coupon.id,
            code: coupon.code.clone(),
            base_price,
            discount,
            final_amount,
        })
    }

    /// Count one use of a coupon.
    ///
    /// All checks run again here; a coupon that validated earlier may have
    /// been exhausted by a concurrent checkout since.
    pub fn apply_usage(
        &mut self,
        coupon_id: CouponId,
        user_id: UserId,
        payment_id: Option<Uuid>,
    ) -> Result<(), CouponError> {
        let now = Utc::now();
        let key = self
            .coupons
            .iter()
            .find(|(_, c)| c.id == coupon_id)
            .map(|(key, _)| key.clone())
            .ok_or_else(|| CouponError::NotFound(coupon_id.to_string()))?;

        if let Some(coupon) = self.coupons.get(&key) {
            self.check(coupon, user_id, now)?;
        }

        if let Some(coupon) = self.coupons.get_mut(&key) {
            coupon.times_used += 1;
            info!(code = %coupon.code, times_used = coupon.times_used, user_id, "Coupon usage applied");
        }

        self.redemptions.push(CouponRedemption {
            coupon_id,
            user_id,
            payment_id,
            redeemed_at: now,
        });

        Ok(())
    }

    fn check(&self, coupon: &Coupon, user_id: UserId, now: DateTime<Utc>) -> Result<(), CouponError> {
        if !coupon.is_active || now < coupon.valid_from {
            return Err(CouponError::Inactive(coupon.code.clone()));
        }
        if coupon.valid_until.is_some_and(|until| now > until) {
            return Err(CouponError::Expired(coupon.code.clone()));
        }
        if coupon.is_exhausted() {
            return Err(CouponError::MaxUsesExceeded(coupon.code.clone()));
        }
        if self.uses_by(coupon.id, user_id) >= coupon.max_uses_per_user {
            return Err(CouponError::MaxUsesPerUserExceeded(coupon.code.clone()));
        }
        Ok(())
    }
}

fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}
