//! Persistent engine state with all-or-nothing transactions.

use crate::catalog::SeedData;
use crate::error::PaymentError;
use crate::types::{AccessGrant, Payment, PaymentId, PaymentStatus, PurchaseTarget, UserId};
use chrono::Utc;
use coupons::CouponBook;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info};
use wallet_ledger::{calculate_cashback, TransactionType, WalletLedger};

/// Data version for schema migrations.
const DATA_VERSION: u32 = 1;

/// Everything the engine persists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreData {
    /// Schema version for migrations.
    pub version: u32,
    payments: HashMap<PaymentId, Payment>,
    pub ledger: WalletLedger,
    pub coupons: CouponBook,
    pub grants: AccessGrants,
    /// Gateway order id to payment, rebuilt after loading.
    #[serde(skip)]
    orders: HashMap<i64, PaymentId>,
}

impl Default for StoreData {
    fn default() -> Self {
        Self {
            version: DATA_VERSION,
            payments: HashMap::new(),
            ledger: WalletLedger::new(),
            coupons: CouponBook::new(),
            grants: AccessGrants::default(),
            orders: HashMap::new(),
        }
    }
}

impl StoreData {
    pub fn payment(&self, id: PaymentId) -> Option<&Payment> {
        self.payments.get(&id)
    }

    pub fn payment_mut(&mut self, id: PaymentId) -> Result<&mut Payment, PaymentError> {
        self.payments
            .get_mut(&id)
            .ok_or_else(|| PaymentError::NotFound(format!("Payment {}", id)))
    }

    pub fn payment_count(&self) -> usize {
        self.payments.len()
    }

    pub fn insert_payment(&mut self, payment: Payment) {
        if let Some(order) = payment.gateway_order_id {
            self.orders.insert(order, payment.id);
        }
        self.payments.insert(payment.id, payment);
    }

    /// Attach the gateway order to a payment so callbacks can find it.
    pub fn assign_gateway_order(
        &mut self,
        id: PaymentId,
        gateway_order_id: i64,
        merchant_order_id: String,
    ) -> Result<&mut Payment, PaymentError> {
        let payment = self
            .payments
            .get_mut(&id)
            .ok_or_else(|| PaymentError::NotFound(format!("Payment {}", id)))?;
        payment.gateway_order_id = Some(gateway_order_id);
        payment.merchant_order_id = Some(merchant_order_id);
        self.orders.insert(gateway_order_id, id);
        Ok(payment)
    }

    pub fn payment_by_gateway_order(&self, gateway_order_id: i64) -> Option<&Payment> {
        self.orders
            .get(&gateway_order_id)
            .and_then(|id| self.payments.get(id))
    }

    fn rebuild_order_index(&mut self) {
        self.orders = self
            .payments
            .values()
            .filter_map(|p| p.gateway_order_id.map(|order| (order, p.id)))
            .collect();
    }

    /// The open attempt for a user and target, if any.
    pub fn pending_payment_for(&self, user_id: UserId, target: PurchaseTarget) -> Option<&Payment> {
        self.payments
            .values()
            .find(|p| p.user_id == user_id && p.target == target && p.is_pending())
    }

    pub fn pending_count(&self) -> usize {
        self.payments.values().filter(|p| p.is_pending()).count()
    }

    /// Move a payment to COMPLETED and apply its side effects: the access
    /// grant and, for the gateway-charged portion, cashback. Both are
    /// skipped when already present.
    pub fn complete_payment(&mut self, id: PaymentId) -> Result<Completion, PaymentError> {
        let StoreData {
            payments,
            ledger,
            grants,
            ..
        } = self;
        let payment = payments
            .get_mut(&id)
            .ok_or_else(|| PaymentError::NotFound(format!("Payment {}", id)))?;

        payment.mark_completed();
        let access_granted = grants.grant(payment.user_id, payment.target, id);

        let mut cashback = Decimal::ZERO;
        let owed = calculate_cashback(payment.cashback_policy.as_ref(), payment.gateway_amount());
        if owed > Decimal::ZERO && !ledger.has_cashback_credit(payment.user_id, id) {
            ledger.credit_cashback(payment.user_id, owed, id, payment.target.to_string())?;
            payment.cashback_earned = owed;
            cashback = owed;
        }

        Ok(Completion {
            access_granted,
            cashback,
        })
    }

    /// Move a payment to FAILED and undo its money movements.
    ///
    /// Cashback credited by an earlier completion is reversed. The wallet leg
    /// is refunded only when the payment never completed; an overturned
    /// completion keeps its access grant and so keeps the purchase debit.
    /// Each ledger entry is written at most once.
    pub fn fail_payment(&mut self, id: PaymentId) -> Result<Failure, PaymentError> {
        let StoreData {
            payments, ledger, ..
        } = self;
        let payment = payments
            .get_mut(&id)
            .ok_or_else(|| PaymentError::NotFound(format!("Payment {}", id)))?;

        let was_completed = payment.status == PaymentStatus::Completed;
        payment.mark_failed();

        let mut cashback_reversed = Decimal::ZERO;
        if let Some(reversal) = ledger.reverse_cashback(payment.user_id, id) {
            cashback_reversed = -reversal.amount;
            payment.cashback_earned = Decimal::ZERO;
        }

        let mut wallet_refunded = Decimal::ZERO;
        let wallet = payment.wallet_amount_used;
        if !was_completed
            && wallet > Decimal::ZERO
            && ledger
                .find(payment.user_id, id, TransactionType::RefundCredit)
                .is_none()
        {
            ledger.refund_failed_payment(
                payment.user_id,
                wallet,
                id,
                format!("Refund for failed payment of {}", payment.target),
            )?;
            wallet_refunded = wallet;
        }

        Ok(Failure {
            cashback_reversed,
            wallet_refunded,
        })
    }
}

impl StoreData {
    /// Load seed coupons and opening balances that are not in the state yet.
    ///
    /// Coupons are matched by code. An opening balance is only applied to a
    /// wallet with no history, so restarting with the same seed is a no-op.
    pub fn apply_seed(&mut self, seed: &SeedData) -> Result<usize, PaymentError> {
        let mut applied = 0;

        for coupon in &seed.coupons {
            if self.coupons.get(&coupon.code).is_none() {
                self.coupons.insert(coupon.clone());
                applied += 1;
            }
        }

        for opening in &seed.wallets {
            if self.ledger.transactions(opening.user_id).is_empty() {
                self.ledger
                    .adjust(opening.user_id, opening.amount, "Opening balance")?;
                applied += 1;
            }
        }

        Ok(applied)
    }
}

/// Side effects of [`StoreData::complete_payment`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    pub access_granted: bool,
    pub cashback: Decimal,
}

/// Side effects of [`StoreData::fail_payment`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Failure {
    pub cashback_reversed: Decimal,
    pub wallet_refunded: Decimal,
}

/// Access grants, at most one per user and target.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessGrants(Vec<AccessGrant>);

impl AccessGrants {
    pub fn has_access(&self, user_id: UserId, target: PurchaseTarget) -> bool {
        self.0
            .iter()
            .any(|g| g.user_id == user_id && g.target == target)
    }

    /// Grant access unless it already exists. Returns whether a grant was created.
    pub fn grant(&mut self, user_id: UserId, target: PurchaseTarget, payment_id: PaymentId) -> bool {
        if self.has_access(user_id, target) {
            debug!(user_id, %target, "Access already granted");
            return false;
        }

        self.0.push(AccessGrant {
            user_id,
            target,
            payment_id,
            granted_at: Utc::now(),
        });
        info!(user_id, %target, %payment_id, "Access granted");
        true
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Engine state behind a single lock.
///
/// [`PaymentStore::transaction`] is the only way to change state. The closure
/// works on a copy; the copy replaces the live state (and is written to disk)
/// only when the closure succeeds, so a failed step leaves nothing behind.
/// Transactions are serialized by the lock.
pub struct PaymentStore {
    data: Mutex<StoreData>,
    storage_path: Option<PathBuf>,
}

impl PaymentStore {
    /// Open a file-backed store, loading existing state if present.
    pub async fn open(storage_path: PathBuf) -> Result<Self, PaymentError> {
        let data = load(&storage_path).await?;
        Ok(Self {
            data: Mutex::new(data),
            storage_path: Some(storage_path),
        })
    }

    /// In-memory store (no persistence).
    pub fn memory() -> Self {
        Self {
            data: Mutex::new(StoreData::default()),
            storage_path: None,
        }
    }

    /// Run `f` atomically against the state.
    pub async fn transaction<T, F>(&self, f: F) -> Result<T, PaymentError>
    where
        F: FnOnce(&mut StoreData) -> Result<T, PaymentError>,
    {
        let mut live = self.data.lock().await;
        let mut scratch = live.clone();

        let value = f(&mut scratch)?;

        self.persist(&scratch).await?;
        *live = scratch;
        Ok(value)
    }

    /// Read a consistent view of the state.
    pub async fn read<T, F>(&self, f: F) -> T
    where
        F: FnOnce(&StoreData) -> T,
    {
        let data = self.data.lock().await;
        f(&data)
    }

    async fn persist(&self, data: &StoreData) -> Result<(), PaymentError> {
        let Some(path) = &self.storage_path else {
            return Ok(());
        };

        let bytes = serde_json::to_vec(data)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Atomic write
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, &bytes).await?;
        fs::rename(&temp_path, path).await?;

        debug!("Saved payment store ({} bytes) to {:?}", bytes.len(), path);
        Ok(())
    }
}

async fn load(path: &PathBuf) -> Result<StoreData, PaymentError> {
    if !path.exists() {
        info!("Payment store not found at {:?}, starting fresh", path);
        return Ok(StoreData::default());
    }

    let bytes = fs::read(path).await?;
    let mut data: StoreData = serde_json::from_slice(&bytes)?;
    data.rebuild_order_index();

    info!(
        "Loaded payment store: {} payments, {} grants",
        data.payment_count(),
        data.grants.len()
    );

    Ok(data)
}
