//! Applying gateway confirmations to payments.

use crate::error::PaymentError;
use crate::store::PaymentStore;
use crate::types::{Payment, PaymentId, PaymentStatus};
use gateway_client::{PaymentGateway, TransactionResult, WebhookEvent};
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Query parameter carrying the return-redirect signature.
pub const SIGNATURE_PARAM: &str = "hmac";

/// What a confirmation did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// No payment carries this gateway order id.
    UnknownOrder { gateway_order_id: i64 },
    /// The gateway has not settled the transaction yet.
    StillPending { gateway_order_id: i64 },
    /// Callback type other than a transaction.
    Unsupported { kind: String },
    /// Repeat delivery, or a success arriving after a failure.
    Unchanged {
        payment_id: PaymentId,
        status: PaymentStatus,
    },
    Completed {
        payment_id: PaymentId,
        access_granted: bool,
        cashback: Decimal,
    },
    Failed {
        payment_id: PaymentId,
        /// The payment had been COMPLETED before this confirmation.
        overturned: bool,
        cashback_reversed: Decimal,
        wallet_refunded: Decimal,
    },
}

impl ReconcileOutcome {
    pub fn payment_id(&self) -> Option<PaymentId> {
        match self {
            ReconcileOutcome::Unchanged { payment_id, .. }
            | ReconcileOutcome::Completed { payment_id, .. }
            | ReconcileOutcome::Failed { payment_id, .. } => Some(*payment_id),
            _ => None,
        }
    }
}

/// Finalizes payments from webhooks and browser return redirects.
///
/// Both entry points verify the signature and then share
/// [`Reconciler::finalize`], which runs as one store transaction so that
/// duplicate or concurrent deliveries of the same confirmation apply at most
/// once.
pub struct Reconciler {
    store: Arc<PaymentStore>,
    gateway: Arc<dyn PaymentGateway>,
}

impl Reconciler {
    pub fn new(store: Arc<PaymentStore>, gateway: Arc<dyn PaymentGateway>) -> Self {
        Self { store, gateway }
    }

    /// Handle a server-to-server callback.
    #[instrument(skip_all, fields(kind = %event.kind))]
    pub async fn handle_webhook(
        &self,
        signature: &str,
        event: &WebhookEvent,
    ) -> Result<ReconcileOutcome, PaymentError> {
        if !event.is_transaction() {
            debug!("Ignoring non-transaction callback");
            return Ok(ReconcileOutcome::Unsupported {
                kind: event.kind.clone(),
            });
        }

        self.verified(signature, &event.obj, "webhook")?;
        let result = parse_result(&event.obj)?;
        self.finalize(&result).await
    }

    /// Handle the customer's browser returning from checkout.
    ///
    /// The redirect carries the transaction as flat query parameters plus
    /// the signature in `hmac`.
    #[instrument(skip_all)]
    pub async fn handle_return(
        &self,
        params: &HashMap<String, String>,
    ) -> Result<ReconcileOutcome, PaymentError> {
        let signature = params
            .get(SIGNATURE_PARAM)
            .ok_or(PaymentError::SignatureInvalid)?;

        let transaction: Map<String, Value> = params
            .iter()
            .filter(|(key, _)| key.as_str() != SIGNATURE_PARAM)
            .map(|(key, value)| (key.clone(), Value::String(value.clone())))
            .collect();
        let transaction = Value::Object(transaction);

        self.verified(signature, &transaction, "return redirect")?;
        let result = parse_result(&transaction)?;
        self.finalize(&result).await
    }

    /// Apply a verified transaction result.
    #[instrument(skip(self), fields(gateway_order_id = result.gateway_order_id, success = result.success))]
    pub async fn finalize(&self, result: &TransactionResult) -> Result<ReconcileOutcome, PaymentError> {
        let gateway_order_id = result.gateway_order_id;
        if result.pending {
            debug!("Transaction still pending at gateway");
            return Ok(ReconcileOutcome::StillPending { gateway_order_id });
        }

        let outcome = self
            .store
            .transaction(|data| {
                let Some(payment) = data.payment_by_gateway_order(gateway_order_id) else {
                    return Ok(ReconcileOutcome::UnknownOrder { gateway_order_id });
                };
                let (payment_id, status) = (payment.id, payment.status);

                match (status, result.success) {
                    (PaymentStatus::Completed, true) | (PaymentStatus::Failed, false) => {
                        debug!(%payment_id, %status, "Duplicate confirmation");
                        Ok(ReconcileOutcome::Unchanged { payment_id, status })
                    }
                    (PaymentStatus::Failed, true) => {
                        warn!(%payment_id, "Success reported for a failed payment, leaving it FAILED");
                        Ok(ReconcileOutcome::Unchanged { payment_id, status })
                    }
                    (PaymentStatus::Pending, true) => {
                        let completion = data.complete_payment(payment_id)?;
                        record_transaction(data.payment_mut(payment_id)?, result.transaction_id);
                        Ok(ReconcileOutcome::Completed {
                            payment_id,
                            access_granted: completion.access_granted,
                            cashback: completion.cashback,
                        })
                    }
                    (PaymentStatus::Pending, false) | (PaymentStatus::Completed, false) => {
                        let overturned = status == PaymentStatus::Completed;
                        if overturned {
                            warn!(%payment_id, "Failure reported for a completed payment, reversing cashback");
                        }
                        let failure = data.fail_payment(payment_id)?;
                        record_transaction(data.payment_mut(payment_id)?, result.transaction_id);
                        Ok(ReconcileOutcome::Failed {
                            payment_id,
                            overturned,
                            cashback_reversed: failure.cashback_reversed,
                            wallet_refunded: failure.wallet_refunded,
                        })
                    }
                }
            })
            .await?;

        match &outcome {
            ReconcileOutcome::UnknownOrder { .. } => {
                info!("Confirmation for unknown gateway order ignored")
            }
            ReconcileOutcome::Completed {
                payment_id,
                cashback,
                ..
            } => info!(%payment_id, %cashback, "Payment completed"),
            ReconcileOutcome::Failed {
                payment_id,
                cashback_reversed,
                wallet_refunded,
                ..
            } => info!(%payment_id, %cashback_reversed, %wallet_refunded, "Payment failed"),
            _ => {}
        }

        Ok(outcome)
    }

    fn verified(&self, signature: &str, transaction: &Value, source: &str) -> Result<(), PaymentError> {
        if self.gateway.verify_signature(signature, transaction) {
            Ok(())
        } else {
            warn!(source, "Rejected callback with invalid signature");
            Err(PaymentError::SignatureInvalid)
        }
    }
}

fn parse_result(transaction: &Value) -> Result<TransactionResult, PaymentError> {
    TransactionResult::from_transaction(transaction)
        .ok_or_else(|| PaymentError::Validation("callback is missing the order id".into()))
}

fn record_transaction(payment: &mut Payment, transaction_id: Option<i64>) {
    if let (Some(metadata), Some(id)) = (payment.gateway.as_mut(), transaction_id) {
        metadata.transaction_id = Some(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PaymentMethod, PurchaseTarget};
    use chrono::Utc;
    use gateway_client::MockPaymentGateway;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use uuid::Uuid;
    use wallet_ledger::{CashbackPolicy, TransactionType};

    const BUYER: i64 = 10;
    const ORDER: i64 = 5512;

    fn accepting_gateway() -> MockPaymentGateway {
        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_verify_signature()
            .returning(|signature, _| signature == "good");
        gateway
    }

    async fn reconciler_with_payment(wallet_used: Decimal) -> (Reconciler, PaymentId) {
        let store = Arc::new(PaymentStore::memory());
        let id = Uuid::new_v4();

        store
            .transaction(|data| {
                data.ledger.adjust(BUYER, dec!(100), "Opening balance")?;
                if wallet_used > Decimal::ZERO {
                    data.ledger.debit_for_purchase(BUYER, wallet_used, id, "Purchase")?;
                }
                data.insert_payment(Payment {
                    id,
                    user_id: BUYER,
                    target: PurchaseTarget::Course(1),
                    amount: dec!(150),
                    status: PaymentStatus::Pending,
                    method: PaymentMethod::Card,
                    wallet_amount_used: wallet_used,
                    gateway_order_id: Some(ORDER),
                    merchant_order_id: None,
                    coupon_id: None,
                    discount: Decimal::ZERO,
                    cashback_earned: Decimal::ZERO,
                    cashback_policy: Some(CashbackPolicy::Percentage(dec!(10))),
                    gateway: None,
                    created_at: Utc::now(),
                    completed_at: None,
                    failed_at: None,
                });
                Ok(())
            })
            .await
            .unwrap();

        (Reconciler::new(store, Arc::new(accepting_gateway())), id)
    }

    fn result(success: bool) -> TransactionResult {
        TransactionResult {
            gateway_order_id: ORDER,
            transaction_id: Some(1),
            success,
            pending: false,
        }
    }

    fn event(success: bool) -> WebhookEvent {
        WebhookEvent {
            kind: "TRANSACTION".into(),
            obj: json!({"id": 1, "success": success, "pending": false, "order": {"id": ORDER}}),
        }
    }

    #[tokio::test]
    async fn test_success_grants_access_and_cashback_on_gateway_portion() {
        let (reconciler, id) = reconciler_with_payment(dec!(50)).await;

        let outcome = reconciler.finalize(&result(true)).await.unwrap();

        // 10% of the 100 charged through the gateway
        assert_eq!(
            outcome,
            ReconcileOutcome::Completed {
                payment_id: id,
                access_granted: true,
                cashback: dec!(10),
            }
        );
        reconciler
            .store
            .read(|data| {
                let payment = data.payment(id).unwrap();
                assert_eq!(payment.status, PaymentStatus::Completed);
                assert_eq!(payment.cashback_earned, dec!(10));
                assert!(data.grants.has_access(BUYER, PurchaseTarget::Course(1)));
                assert_eq!(data.ledger.balance(BUYER), dec!(60));
            })
            .await;
    }

    #[tokio::test]
    async fn test_duplicate_success_is_noop() {
        let (reconciler, id) = reconciler_with_payment(Decimal::ZERO).await;

        reconciler.finalize(&result(true)).await.unwrap();
        let second = reconciler.finalize(&result(true)).await.unwrap();

        assert_eq!(
            second,
            ReconcileOutcome::Unchanged {
                payment_id: id,
                status: PaymentStatus::Completed
            }
        );
        reconciler
            .store
            .read(|data| {
                assert_eq!(data.grants.len(), 1);
                let credits = data
                    .ledger
                    .transactions(BUYER)
                    .iter()
                    .filter(|t| t.kind == TransactionType::CashbackCredit)
                    .count();
                assert_eq!(credits, 1);
            })
            .await;
    }

    #[tokio::test]
    async fn test_overturned_completion_reverses_cashback() {
        let (reconciler, id) = reconciler_with_payment(Decimal::ZERO).await;

        reconciler.finalize(&result(true)).await.unwrap();
        let outcome = reconciler.finalize(&result(false)).await.unwrap();

        assert_eq!(
            outcome,
            ReconcileOutcome::Failed {
                payment_id: id,
                overturned: true,
                cashback_reversed: dec!(15),
                wallet_refunded: Decimal::ZERO,
            }
        );
        reconciler
            .store
            .read(|data| {
                let payment = data.payment(id).unwrap();
                assert_eq!(payment.status, PaymentStatus::Failed);
                assert_eq!(payment.cashback_earned, Decimal::ZERO);
                assert_eq!(data.ledger.balance(BUYER), dec!(100));
                assert!(data.ledger.is_consistent(BUYER));
                assert!(data.grants.has_access(BUYER, PurchaseTarget::Course(1)));
            })
            .await;
    }

    #[tokio::test]
    async fn test_overturned_split_payment_keeps_wallet_debit() {
        let (reconciler, id) = reconciler_with_payment(dec!(40)).await;

        reconciler.finalize(&result(true)).await.unwrap();
        let outcome = reconciler.finalize(&result(false)).await.unwrap();

        assert_eq!(
            outcome,
            ReconcileOutcome::Failed {
                payment_id: id,
                overturned: true,
                cashback_reversed: dec!(11),
                wallet_refunded: Decimal::ZERO,
            }
        );
        reconciler
            .store
            .read(|data| {
                assert_eq!(data.ledger.balance(BUYER), dec!(60));
                assert!(data
                    .ledger
                    .find(BUYER, id, TransactionType::PurchaseDebit)
                    .is_some());
                assert!(data
                    .ledger
                    .find(BUYER, id, TransactionType::RefundCredit)
                    .is_none());
                assert!(data.grants.has_access(BUYER, PurchaseTarget::Course(1)));
            })
            .await;
    }

    #[tokio::test]
    async fn test_failure_refunds_wallet_leg() {
        let (reconciler, id) = reconciler_with_payment(dec!(40)).await;

        let outcome = reconciler.finalize(&result(false)).await.unwrap();

        assert_eq!(
            outcome,
            ReconcileOutcome::Failed {
                payment_id: id,
                overturned: false,
                cashback_reversed: Decimal::ZERO,
                wallet_refunded: dec!(40),
            }
        );
        let balance = reconciler
            .store
            .read(|data| data.ledger.balance(BUYER))
            .await;
        assert_eq!(balance, dec!(100));
    }

    #[tokio::test]
    async fn test_success_after_failure_stays_failed() {
        let (reconciler, id) = reconciler_with_payment(Decimal::ZERO).await;

        reconciler.finalize(&result(false)).await.unwrap();
        let outcome = reconciler.finalize(&result(true)).await.unwrap();

        assert_eq!(
            outcome,
            ReconcileOutcome::Unchanged {
                payment_id: id,
                status: PaymentStatus::Failed
            }
        );
        let granted = reconciler
            .store
            .read(|data| data.grants.has_access(BUYER, PurchaseTarget::Course(1)))
            .await;
        assert!(!granted);
    }

    #[tokio::test]
    async fn test_unknown_and_pending_orders() {
        let (reconciler, _) = reconciler_with_payment(Decimal::ZERO).await;

        let unknown = TransactionResult {
            gateway_order_id: 1,
            ..result(true)
        };
        assert_eq!(
            reconciler.finalize(&unknown).await.unwrap(),
            ReconcileOutcome::UnknownOrder {
                gateway_order_id: 1
            }
        );

        let pending = TransactionResult {
            pending: true,
            ..result(false)
        };
        assert_eq!(
            reconciler.finalize(&pending).await.unwrap(),
            ReconcileOutcome::StillPending {
                gateway_order_id: ORDER
            }
        );
    }

    #[tokio::test]
    async fn test_webhook_signature_checked() {
        let (reconciler, id) = reconciler_with_payment(Decimal::ZERO).await;

        let rejected = reconciler.handle_webhook("bad", &event(true)).await;
        assert!(matches!(rejected, Err(PaymentError::SignatureInvalid)));
        let status = reconciler
            .store
            .read(|data| data.payment(id).unwrap().status)
            .await;
        assert_eq!(status, PaymentStatus::Pending);

        let accepted = reconciler.handle_webhook("good", &event(true)).await.unwrap();
        assert_eq!(accepted.payment_id(), Some(id));
    }

    #[tokio::test]
    async fn test_non_transaction_webhook_ignored() {
        let (reconciler, _) = reconciler_with_payment(Decimal::ZERO).await;
        let token_event = WebhookEvent {
            kind: "TOKEN".into(),
            obj: json!({}),
        };

        assert_eq!(
            reconciler.handle_webhook("bad", &token_event).await.unwrap(),
            ReconcileOutcome::Unsupported {
                kind: "TOKEN".into()
            }
        );
    }

    #[tokio::test]
    async fn test_return_redirect() {
        let (reconciler, id) = reconciler_with_payment(Decimal::ZERO).await;
        let mut params: HashMap<String, String> = [
            ("id", "1"),
            ("success", "true"),
            ("pending", "false"),
            ("order", "5512"),
            ("hmac", "good"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let outcome = reconciler.handle_return(&params).await.unwrap();
        assert!(matches!(outcome, ReconcileOutcome::Completed { payment_id, .. } if payment_id == id));

        params.remove("hmac");
        assert!(matches!(
            reconciler.handle_return(&params).await,
            Err(PaymentError::SignatureInvalid)
        ));
    }
}
