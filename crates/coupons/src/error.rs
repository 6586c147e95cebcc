//! Coupon validation errors.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CouponError {
    #[error("Coupon not found: {0}")]
    NotFound(String),

    #[error("Coupon is not active: {0}")]
    Inactive(String),

    #[error("Coupon has expired: {0}")]
    Expired(String),

    #[error("Coupon has reached its maximum number of uses: {0}")]
    MaxUsesExceeded(String),

    #[error("Coupon already used the maximum number of times by this user: {0}")]
    MaxUsesPerUserExceeded(String),
}
