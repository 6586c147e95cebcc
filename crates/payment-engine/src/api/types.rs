//! API request and response types.

use crate::types::{CheckoutRedirect, PaymentId, PaymentStatus, PurchaseOutcome, UserId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use wallet_ledger::WalletTransaction;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub payments: usize,
    pub pending: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeKind {
    Completed,
    Iframe,
    Redirect,
}

/// Response after starting a purchase.
#[derive(Debug, Serialize)]
pub struct PurchaseResponse {
    pub payment_id: PaymentId,
    pub status: PaymentStatus,
    pub outcome: OutcomeKind,
    /// Where to send the customer, absent when already completed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub amount: Decimal,
    pub wallet_amount_used: Decimal,
    pub discount: Decimal,
}

impl From<PurchaseOutcome> for PurchaseResponse {
    fn from(outcome: PurchaseOutcome) -> Self {
        let (payment, outcome, url) = match outcome {
            PurchaseOutcome::Completed { payment } => (payment, OutcomeKind::Completed, None),
            PurchaseOutcome::GatewayInitiated { payment, redirect } => {
                let kind = match redirect {
                    CheckoutRedirect::Iframe { .. } => OutcomeKind::Iframe,
                    CheckoutRedirect::External { .. } => OutcomeKind::Redirect,
                };
                (payment, kind, Some(redirect.url().to_string()))
            }
        };

        Self {
            payment_id: payment.id,
            status: payment.status,
            outcome,
            url,
            amount: payment.amount,
            wallet_amount_used: payment.wallet_amount_used,
            discount: payment.discount,
        }
    }
}

/// Request to check a coupon against a price.
#[derive(Debug, Deserialize)]
pub struct ValidateCouponRequest {
    pub code: String,
    pub user_id: UserId,
    pub base_price: Decimal,
}

/// Coupon check result. Invalid coupons are reported in the body.
#[derive(Debug, Serialize)]
pub struct ValidateCouponResponse {
    pub is_valid: bool,
    pub final_amount: Decimal,
    pub discount: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// Wallet balance and history.
#[derive(Debug, Serialize)]
pub struct WalletResponse {
    pub user_id: UserId,
    pub balance: Decimal,
    pub transactions: Vec<WalletTransaction>,
}

/// Webhook signature, sent as a query parameter.
#[derive(Debug, Deserialize)]
pub struct WebhookQuery {
    #[serde(default)]
    pub hmac: String,
}

/// Acknowledgement returned to the gateway.
#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: bool,
}

/// Result shown after the customer returns from checkout.
#[derive(Debug, Serialize)]
pub struct ReturnResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_id: Option<PaymentId>,
    pub status: Option<PaymentStatus>,
    pub success: bool,
}
