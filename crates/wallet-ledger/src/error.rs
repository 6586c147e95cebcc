//! Wallet ledger errors.

use crate::types::{PaymentRef, TransactionType};
use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: Decimal, available: Decimal },

    #[error("Invalid amount: {0}")]
    InvalidAmount(Decimal),

    #[error("{kind} already recorded for payment {payment}")]
    DuplicateEntry {
        kind: TransactionType,
        payment: PaymentRef,
    },
}
