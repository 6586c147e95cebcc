//! Discount coupons.
//!
//! [`CouponBook`] holds coupon definitions together with the redemptions
//! made against them. Validation is a pure price calculation; a use is only
//! counted when [`CouponBook::apply_usage`] records a redemption, and that
//! call re-runs every check so concurrent checkouts cannot overshoot a cap.

mod error;
mod types;
mod validator;

pub use error::CouponError;
pub use types::{Coupon, CouponId, CouponQuote, CouponRedemption, DiscountType, UserId};
pub use validator::CouponBook;
