//! Ledger entry types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a wallet owner.
pub type UserId = i64;

/// Identifier of the payment an entry relates to.
pub type PaymentRef = Uuid;

/// Current schema version of [`TransactionMetadata`].
pub const METADATA_VERSION: u32 = 1;

/// Kind of ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    /// Wallet funds spent on a purchase (negative amount).
    PurchaseDebit,
    /// Cashback earned on a completed purchase (positive amount).
    CashbackCredit,
    /// Compensating entry for a cashback credit whose payment was overturned.
    CashbackReversal,
    /// Wallet funds returned after the gateway leg of a purchase failed.
    RefundCredit,
    /// Administrative correction or opening balance.
    Adjustment,
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionType::PurchaseDebit => write!(f, "PURCHASE_DEBIT"),
            TransactionType::CashbackCredit => write!(f, "CASHBACK_CREDIT"),
            TransactionType::CashbackReversal => write!(f, "CASHBACK_REVERSAL"),
            TransactionType::RefundCredit => write!(f, "REFUND_CREDIT"),
            TransactionType::Adjustment => write!(f, "ADJUSTMENT"),
        }
    }
}

/// Audit side-channel stored with each entry. Never read by business logic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionMetadata {
    pub version: u32,
    /// Where the entry came from (e.g. the course a cashback was earned on).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Entry this one compensates, for reversals.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reverses: Option<Uuid>,
}

impl Default for TransactionMetadata {
    fn default() -> Self {
        Self {
            version: METADATA_VERSION,
            source: None,
            reverses: None,
        }
    }
}

impl TransactionMetadata {
    pub fn with_source(source: impl Into<String>) -> Self {
        Self {
            source: Some(source.into()),
            ..Self::default()
        }
    }

    pub fn reversing(entry: Uuid) -> Self {
        Self {
            reverses: Some(entry),
            ..Self::default()
        }
    }
}

/// One immutable ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletTransaction {
    pub id: Uuid,
    pub user_id: UserId,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    /// Signed amount: positive credits, negative debits.
    pub amount: Decimal,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    pub payment: Option<PaymentRef>,
    pub description: String,
    pub metadata: TransactionMetadata,
    pub created_at: DateTime<Utc>,
}
