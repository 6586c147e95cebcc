//! Per-user append-only transaction chains.

use crate::error::LedgerError;
use crate::types::{PaymentRef, TransactionMetadata, TransactionType, UserId, WalletTransaction};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};
use uuid::Uuid;

/// All wallet chains, keyed by owner.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WalletLedger {
    chains: HashMap<UserId, Vec<WalletTransaction>>,
}

impl WalletLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current balance: the latest entry's `balance_after`, or zero.
    pub fn balance(&self, user_id: UserId) -> Decimal {
        self.chains
            .get(&user_id)
            .and_then(|chain| chain.last())
            .map(|entry| entry.balance_after)
            .unwrap_or(Decimal::ZERO)
    }

    /// Entries for a user, oldest first.
    pub fn transactions(&self, user_id: UserId) -> &[WalletTransaction] {
        self.chains
            .get(&user_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Find the entry of a given kind recorded against a payment.
    pub fn find(
        &self,
        user_id: UserId,
        payment: PaymentRef,
        kind: TransactionType,
    ) -> Option<&WalletTransaction> {
        self.transactions(user_id)
            .iter()
            .find(|entry| entry.kind == kind && entry.payment == Some(payment))
    }

    /// Whether a cashback credit already exists for the payment.
    pub fn has_cashback_credit(&self, user_id: UserId, payment: PaymentRef) -> bool {
        self.find(user_id, payment, TransactionType::CashbackCredit)
            .is_some()
    }

    /// Spend wallet funds on a purchase.
    pub fn debit_for_purchase(
        &mut self,
        user_id: UserId,
        amount: Decimal,
        payment: PaymentRef,
        description: impl Into<String>,
    ) -> Result<WalletTransaction, LedgerError> {
        ensure_positive(amount)?;

        let available = self.balance(user_id);
        if amount > available {
            return Err(LedgerError::InsufficientBalance {
                required: amount,
                available,
            });
        }

        let entry = self.append(
            user_id,
            TransactionType::PurchaseDebit,
            -amount,
            Some(payment),
            description.into(),
            TransactionMetadata::default(),
        );
        info!(user_id, %payment, %amount, "Wallet debited for purchase");
        Ok(entry)
    }

    /// Credit cashback earned on a completed payment.
    ///
    /// Refuses a second credit for the same payment.
    pub fn credit_cashback(
        &mut self,
        user_id: UserId,
        amount: Decimal,
        payment: PaymentRef,
        source_label: impl Into<String>,
    ) -> Result<WalletTransaction, LedgerError> {
        ensure_positive(amount)?;

        if self.has_cashback_credit(user_id, payment) {
            return Err(LedgerError::DuplicateEntry {
                kind: TransactionType::CashbackCredit,
                payment,
            });
        }

        let source_label = source_label.into();
        let entry = self.append(
            user_id,
            TransactionType::CashbackCredit,
            amount,
            Some(payment),
            format!("Cashback from {}", source_label),
            TransactionMetadata::with_source(source_label),
        );
        info!(user_id, %payment, %amount, "Cashback credited");
        Ok(entry)
    }

    /// Reverse the cashback credited for a payment.
    ///
    /// Returns `None` without touching the ledger when there is no credit to
    /// reverse or it has already been reversed. The reversal may take the
    /// balance below zero if the cashback was already spent.
    pub fn reverse_cashback(
        &mut self,
        user_id: UserId,
        payment: PaymentRef,
    ) -> Option<WalletTransaction> {
        let credit = self
            .find(user_id, payment, TransactionType::CashbackCredit)?
            .clone();

        if self
            .find(user_id, payment, TransactionType::CashbackReversal)
            .is_some()
        {
            debug!(user_id, %payment, "Cashback already reversed");
            return None;
        }

        let entry = self.append(
            user_id,
            TransactionType::CashbackReversal,
            -credit.amount,
            Some(payment),
            format!("Cashback reversed for payment {}", payment),
            TransactionMetadata::reversing(credit.id),
        );
        info!(user_id, %payment, amount = %credit.amount, "Cashback reversed");
        Some(entry)
    }

    /// Return wallet funds whose purchase did not go through.
    pub fn refund_failed_payment(
        &mut self,
        user_id: UserId,
        amount: Decimal,
        payment: PaymentRef,
        description: impl Into<String>,
    ) -> Result<WalletTransaction, LedgerError> {
        ensure_positive(amount)?;

        if self
            .find(user_id, payment, TransactionType::RefundCredit)
            .is_some()
        {
            return Err(LedgerError::DuplicateEntry {
                kind: TransactionType::RefundCredit,
                payment,
            });
        }

        let entry = self.append(
            user_id,
            TransactionType::RefundCredit,
            amount,
            Some(payment),
            description.into(),
            TransactionMetadata::default(),
        );
        info!(user_id, %payment, %amount, "Wallet refunded for failed payment");
        Ok(entry)
    }

    /// Administrative balance correction (opening balances, support credits).
    ///
    /// Negative adjustments may not overdraw the wallet.
    pub fn adjust(
        &mut self,
        user_id: UserId,
        amount: Decimal,
        description: impl Into<String>,
    ) -> Result<WalletTransaction, LedgerError> {
        if amount.is_zero() {
            return Err(LedgerError::InvalidAmount(amount));
        }

        let available = self.balance(user_id);
        if available + amount < Decimal::ZERO {
            return Err(LedgerError::InsufficientBalance {
                required: -amount,
                available,
            });
        }

        let entry = self.append(
            user_id,
            TransactionType::Adjustment,
            amount,
            None,
            description.into(),
            TransactionMetadata::default(),
        );
        info!(user_id, %amount, "Wallet adjusted");
        Ok(entry)
    }

    /// Check that each entry's `balance_before` matches its predecessor's
    /// `balance_after` and that the amounts add up.
    pub fn is_consistent(&self, user_id: UserId) -> bool {
        let mut expected_before = Decimal::ZERO;
        for entry in self.transactions(user_id) {
            if entry.balance_before != expected_before
                || entry.balance_before + entry.amount != entry.balance_after
            {
                return false;
            }
            expected_before = entry.balance_after;
        }
        true
    }

    fn append(
        &mut self,
        user_id: UserId,
        kind: TransactionType,
        amount: Decimal,
        payment: Option<PaymentRef>,
        description: String,
        metadata: TransactionMetadata,
    ) -> WalletTransaction {
        let balance_before = self.balance(user_id);
        let entry = WalletTransaction {
            id: Uuid::new_v4(),
            user_id,
            kind,
            amount,
            balance_before,
            balance_after: balance_before + amount,
            payment,
            description,
            metadata,
            created_at: Utc::now(),
        };

        self.chains.entry(user_id).or_default().push(entry.clone());
        entry
    }
}

fn ensure_positive(amount: Decimal) -> Result<(), LedgerError> {
    if amount <= Decimal::ZERO {
        return Err(LedgerError::InvalidAmount(amount));
    }
    Ok(())
}
