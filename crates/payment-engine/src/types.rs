//! Payment records and purchase requests.

use crate::error::PaymentError;
use chrono::{DateTime, Utc};
use coupons::CouponId;
use rand::distributions::Alphanumeric;
use rand::Rng;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;
use wallet_ledger::CashbackPolicy;

pub use wallet_ledger::UserId;

pub type PaymentId = Uuid;

/// Schema version of [`GatewayMetadata`].
pub const GATEWAY_METADATA_VERSION: u32 = 1;

/// What a payment buys: a course or a service tier price, never both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PurchaseTarget {
    #[serde(rename = "course_id")]
    Course(i64),
    #[serde(rename = "service_price_id")]
    ServicePrice(i64),
}

impl PurchaseTarget {
    /// Short kind label used in merchant order ids.
    pub fn kind(&self) -> &'static str {
        match self {
            PurchaseTarget::Course(_) => "course",
            PurchaseTarget::ServicePrice(_) => "service",
        }
    }

    pub fn id(&self) -> i64 {
        match self {
            PurchaseTarget::Course(id) | PurchaseTarget::ServicePrice(id) => *id,
        }
    }
}

impl fmt::Display for PurchaseTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind(), self.id())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Completed => "COMPLETED",
            PaymentStatus::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// How the gateway leg is paid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    #[serde(alias = "card")]
    Card,
    #[serde(alias = "wallet")]
    WalletRedirect,
}

/// Where the customer goes to finish paying.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CheckoutRedirect {
    /// Hosted card iframe
    Iframe { url: String },
    /// Mobile-wallet provider page
    External { url: String },
}

impl CheckoutRedirect {
    pub fn url(&self) -> &str {
        match self {
            CheckoutRedirect::Iframe { url } | CheckoutRedirect::External { url } => url,
        }
    }
}

/// Gateway response details kept for support and auditing.
///
/// Never read by business logic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayMetadata {
    pub version: u32,
    pub integration_id: i64,
    pub checkout: CheckoutRedirect,
    /// Last transaction id reported by a callback.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<i64>,
}

/// One purchase attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub user_id: UserId,
    pub target: PurchaseTarget,
    /// Price after discount; the wallet and the gateway split this.
    pub amount: Decimal,
    pub status: PaymentStatus,
    pub method: PaymentMethod,
    pub wallet_amount_used: Decimal,
    pub gateway_order_id: Option<i64>,
    pub merchant_order_id: Option<String>,
    pub coupon_id: Option<CouponId>,
    #[serde(default)]
    pub discount: Decimal,
    #[serde(default)]
    pub cashback_earned: Decimal,
    /// Cashback rule of the target at purchase time.
    #[serde(default)]
    pub cashback_policy: Option<CashbackPolicy>,
    #[serde(default)]
    pub gateway: Option<GatewayMetadata>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub failed_at: Option<DateTime<Utc>>,
}

impl Payment {
    /// Portion charged through the gateway.
    pub fn gateway_amount(&self) -> Decimal {
        (self.amount - self.wallet_amount_used).max(Decimal::ZERO)
    }

    pub fn is_pending(&self) -> bool {
        self.status == PaymentStatus::Pending
    }

    pub(crate) fn mark_completed(&mut self) {
        self.status = PaymentStatus::Completed;
        self.completed_at = Some(Utc::now());
    }

    pub(crate) fn mark_failed(&mut self) {
        self.status = PaymentStatus::Failed;
        self.failed_at = Some(Utc::now());
    }
}

/// Access to a course or service tier obtained through a payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessGrant {
    pub user_id: UserId,
    pub target: PurchaseTarget,
    pub payment_id: PaymentId,
    pub granted_at: DateTime<Utc>,
}

/// A purchase intent.
#[derive(Debug, Clone, Deserialize)]
pub struct PurchaseRequest {
    pub user_id: UserId,
    pub target: PurchaseTarget,
    #[serde(default)]
    pub coupon_code: Option<String>,
    #[serde(default)]
    pub wallet_amount: Option<Decimal>,
    pub method: PaymentMethod,
    /// Required for wallet payments with a gateway leg.
    #[serde(default)]
    pub wallet_number: Option<String>,
}

/// Result of a successful purchase request.
#[derive(Debug, Clone)]
pub enum PurchaseOutcome {
    /// Wallet and coupon covered the price; access is granted.
    Completed { payment: Payment },
    /// The customer must finish paying at the gateway.
    GatewayInitiated {
        payment: Payment,
        redirect: CheckoutRedirect,
    },
}

impl PurchaseOutcome {
    pub fn payment(&self) -> &Payment {
        match self {
            PurchaseOutcome::Completed { payment }
            | PurchaseOutcome::GatewayInitiated { payment, .. } => payment,
        }
    }
}

/// Convert an amount to integer cents, rounding half to even.
pub fn to_minor_units(amount: Decimal) -> Result<i64, PaymentError> {
    (amount * Decimal::ONE_HUNDRED)
        .round()
        .to_i64()
        .ok_or_else(|| PaymentError::Validation(format!("amount out of range: {}", amount)))
}

/// Merchant reference sent with a gateway order:
/// `<kind>_<id>_<user>_<unix millis>_<6 random chars>`.
pub fn merchant_order_id(target: PurchaseTarget, user_id: UserId, now: DateTime<Utc>) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(char::from)
        .collect();

    format!(
        "{}_{}_{}_{}_{}",
        target.kind(),
        target.id(),
        user_id,
        now.timestamp_millis(),
        suffix.to_lowercase()
    )
}
