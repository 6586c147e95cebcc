//! Cashback calculation.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// How much cashback a course pays out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CashbackPolicy {
    /// Percentage of the externally charged amount.
    Percentage(Decimal),
    /// Flat amount per completed purchase.
    Fixed(Decimal),
}

/// Cashback owed for a completed purchase.
///
/// `gateway_amount` is what the payment gateway actually charged, excluding
/// any wallet-covered portion. The result is rounded to cents and never
/// negative; purchases settled entirely from the wallet earn nothing.
pub fn calculate_cashback(policy: Option<&CashbackPolicy>, gateway_amount: Decimal) -> Decimal {
    let Some(policy) = policy else {
        return Decimal::ZERO;
    };
    if gateway_amount <= Decimal::ZERO {
        return Decimal::ZERO;
    }

    let raw = match policy {
        CashbackPolicy::Percentage(pct) => gateway_amount * *pct / Decimal::ONE_HUNDRED,
        CashbackPolicy::Fixed(value) => *value,
    };

    raw.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
        .max(Decimal::ZERO)
}
