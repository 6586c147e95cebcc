//! Purchase initiation.

use crate::catalog::{Catalog, PricedTarget, UserDirectory};
use crate::config::GatewayConfig;
use crate::error::PaymentError;
use crate::store::PaymentStore;
use crate::types::*;
use chrono::Utc;
use gateway_client::{iframe_url, BillingData, PaymentGateway};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Gateway integration settings used when starting a checkout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSettings {
    pub card_integration_id: i64,
    pub wallet_integration_id: i64,
    pub iframe_base_url: String,
    pub iframe_id: i64,
}

impl From<&GatewayConfig> for CheckoutSettings {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            card_integration_id: config.card_integration_id,
            wallet_integration_id: config.wallet_integration_id,
            iframe_base_url: config.iframe_base_url.clone(),
            iframe_id: config.iframe_id,
        }
    }
}

/// A purchase request with its optional parts resolved.
struct Intent {
    user_id: UserId,
    priced: PricedTarget,
    coupon_code: Option<String>,
    wallet_amount: Decimal,
    method: PaymentMethod,
    wallet_number: Option<String>,
}

/// Turns purchase requests into payments.
///
/// The wallet debit and the PENDING payment are created together in one
/// store transaction before the gateway is contacted. Any later failure
/// marks the payment FAILED and refunds the wallet leg, so money never
/// leaves the wallet without a payment or a refund to show for it.
pub struct PaymentOrchestrator {
    store: Arc<PaymentStore>,
    gateway: Arc<dyn PaymentGateway>,
    catalog: Arc<dyn Catalog>,
    users: Arc<dyn UserDirectory>,
    settings: CheckoutSettings,
}

impl PaymentOrchestrator {
    pub fn new(
        store: Arc<PaymentStore>,
        gateway: Arc<dyn PaymentGateway>,
        catalog: Arc<dyn Catalog>,
        users: Arc<dyn UserDirectory>,
        settings: CheckoutSettings,
    ) -> Self {
        Self {
            store,
            gateway,
            catalog,
            users,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<PaymentStore> {
        &self.store
    }

    pub fn catalog(&self) -> &Arc<dyn Catalog> {
        &self.catalog
    }

    /// Start a purchase.
    #[instrument(skip(self, request), fields(user_id = request.user_id, target = %request.target))]
    pub async fn purchase(&self, request: PurchaseRequest) -> Result<PurchaseOutcome, PaymentError> {
        let intent = self.resolve(request).await?;
        let billing = self.billing_for(intent.user_id).await?;

        let payment = self.create_payment(&intent).await?;
        info!(
            payment_id = %payment.id,
            amount = %payment.amount,
            wallet_amount_used = %payment.wallet_amount_used,
            "Payment created"
        );

        if let Some(coupon_id) = payment.coupon_id {
            self.apply_coupon(&payment, coupon_id).await?;
        }

        // Anything under half a cent cannot be charged at the gateway.
        let remainder = payment.gateway_amount();
        if remainder.round_dp(2) <= Decimal::ZERO {
            let payment = self
                .store
                .transaction(|data| {
                    data.complete_payment(payment.id)?;
                    data.payment_mut(payment.id).map(|p| p.clone())
                })
                .await?;
            info!(payment_id = %payment.id, "Payment covered without gateway, completed");
            return Ok(PurchaseOutcome::Completed { payment });
        }

        match self
            .start_checkout(&payment, remainder, &billing, intent.wallet_number.as_deref())
            .await
        {
            Ok((payment, redirect)) => {
                info!(
                    payment_id = %payment.id,
                    gateway_order_id = ?payment.gateway_order_id,
                    "Gateway checkout started"
                );
                Ok(PurchaseOutcome::GatewayInitiated { payment, redirect })
            }
            Err(err) => {
                let failure = self
                    .store
                    .transaction(|data| {
                        if data.payment_mut(payment.id)?.is_pending() {
                            data.fail_payment(payment.id).map(Some)
                        } else {
                            Ok(None)
                        }
                    })
                    .await?;
                let wallet_refunded = failure.is_some_and(|f| f.wallet_refunded > Decimal::ZERO);
                error!(payment_id = %payment.id, wallet_refunded, "Gateway checkout failed: {}", err);

                match err {
                    PaymentError::Gateway(source) => Err(PaymentError::InitiationFailed {
                        payment_id: payment.id,
                        wallet_refunded,
                        source,
                    }),
                    other => Err(other),
                }
            }
        }
    }

    /// Resolve defaults and apply the catalog guardrails.
    async fn resolve(&self, request: PurchaseRequest) -> Result<Intent, PaymentError> {
        let wallet_amount = request.wallet_amount.unwrap_or(Decimal::ZERO);
        if wallet_amount < Decimal::ZERO {
            return Err(PaymentError::Validation(
                "wallet_amount must not be negative".into(),
            ));
        }
        if wallet_amount != wallet_amount.round_dp(2) {
            return Err(PaymentError::Validation(
                "wallet_amount must not have more than 2 decimal places".into(),
            ));
        }

        let priced = self
            .catalog
            .price_of(request.target)
            .await?
            .ok_or_else(|| PaymentError::NotFound(request.target.to_string()))?;

        if priced.seller_id == Some(request.user_id) {
            return Err(PaymentError::OwnCourse);
        }
        if priced.price <= Decimal::ZERO {
            return Err(PaymentError::NoPaymentRequired);
        }

        Ok(Intent {
            user_id: request.user_id,
            priced,
            coupon_code: non_blank(request.coupon_code),
            wallet_amount,
            method: request.method,
            wallet_number: non_blank(request.wallet_number),
        })
    }

    async fn billing_for(&self, user_id: UserId) -> Result<BillingData, PaymentError> {
        let billing = match self.users.profile(user_id).await? {
            Some(profile) => BillingData::from_contact(
                profile.first_name.as_deref(),
                profile.last_name.as_deref(),
                profile.email.as_deref(),
                profile.phone_number.as_deref(),
            ),
            None => BillingData::default(),
        };
        Ok(billing)
    }

    /// Conflict checks, coupon pricing, wallet debit and the PENDING payment,
    /// all in one transaction.
    async fn create_payment(&self, intent: &Intent) -> Result<Payment, PaymentError> {
        let user_id = intent.user_id;
        let target = intent.priced.target;

        self.store
            .transaction(|data| {
                if data.grants.has_access(user_id, target) {
                    return Err(PaymentError::AlreadyPurchased);
                }
                if data.pending_payment_for(user_id, target).is_some() {
                    return Err(PaymentError::PaymentAlreadyPending);
                }

                let (amount, discount, coupon_id) = match &intent.coupon_code {
                    Some(code) => {
                        let quote = data.coupons.validate(code, intent.priced.price, user_id)?;
                        (quote.final_amount, quote.discount, Some(quote.coupon_id))
                    }
                    None => (intent.priced.price, Decimal::ZERO, None),
                };

                let wallet_amount = intent.wallet_amount;
                if wallet_amount > amount {
                    return Err(PaymentError::ExceedsPrice {
                        requested: wallet_amount,
                        price: amount,
                    });
                }
                let available = data.ledger.balance(user_id);
                if wallet_amount > available {
                    return Err(PaymentError::InsufficientBalance {
                        required: wallet_amount,
                        available,
                    });
                }
                if amount > wallet_amount
                    && intent.method == PaymentMethod::WalletRedirect
                    && intent.wallet_number.is_none()
                {
                    return Err(PaymentError::Validation(
                        "wallet_number is required for wallet payments".into(),
                    ));
                }

                let payment = Payment {
                    id: Uuid::new_v4(),
                    user_id,
                    target,
                    amount,
                    status: PaymentStatus::Pending,
                    method: intent.method,
                    wallet_amount_used: wallet_amount,
                    gateway_order_id: None,
                    merchant_order_id: None,
                    coupon_id,
                    discount,
                    cashback_earned: Decimal::ZERO,
                    cashback_policy: intent.priced.cashback,
                    gateway: None,
                    created_at: Utc::now(),
                    completed_at: None,
                    failed_at: None,
                };

                if wallet_amount > Decimal::ZERO {
                    data.ledger.debit_for_purchase(
                        user_id,
                        wallet_amount,
                        payment.id,
                        format!("Purchase of {}", target),
                    )?;
                }
                data.insert_payment(payment.clone());
                Ok(payment)
            })
            .await
    }

    /// Count the coupon use now that the payment exists. A failed re-check
    /// fails the payment and refunds the wallet leg.
    async fn apply_coupon(&self, payment: &Payment, coupon_id: i64) -> Result<(), PaymentError> {
        let rejected = self
            .store
            .transaction(|data| {
                match data
                    .coupons
                    .apply_usage(coupon_id, payment.user_id, Some(payment.id))
                {
                    Ok(()) => Ok(None),
                    Err(e) => {
                        data.fail_payment(payment.id)?;
                        Ok(Some(e))
                    }
                }
            })
            .await?;

        match rejected {
            None => Ok(()),
            Some(e) => {
                warn!(payment_id = %payment.id, "Coupon no longer applicable, payment failed: {}", e);
                Err(e.into())
            }
        }
    }

    /// Register the gateway order and obtain the checkout redirect.
    async fn start_checkout(
        &self,
        payment: &Payment,
        remainder: Decimal,
        billing: &BillingData,
        wallet_number: Option<&str>,
    ) -> Result<(Payment, CheckoutRedirect), PaymentError> {
        let amount_cents = to_minor_units(remainder)?;
        let merchant_order_id = merchant_order_id(payment.target, payment.user_id, Utc::now());

        let auth_token = self.gateway.authenticate().await?;
        let gateway_order_id = self
            .gateway
            .register_order(&auth_token, amount_cents, &merchant_order_id)
            .await?;

        // Recorded right away so callbacks can find the payment.
        self.store
            .transaction(|data| {
                data.assign_gateway_order(payment.id, gateway_order_id, merchant_order_id.clone())?;
                Ok(())
            })
            .await?;

        let (integration_id, redirect) = match payment.method {
            PaymentMethod::Card => {
                let integration_id = self.settings.card_integration_id;
                let token = self
                    .gateway
                    .payment_key(&auth_token, amount_cents, gateway_order_id, billing, integration_id)
                    .await?;
                let url = iframe_url(&self.settings.iframe_base_url, self.settings.iframe_id, &token);
                (integration_id, CheckoutRedirect::Iframe { url })
            }
            PaymentMethod::WalletRedirect => {
                let number = wallet_number.ok_or_else(|| {
                    PaymentError::Validation("wallet_number is required for wallet payments".into())
                })?;
                let integration_id = self.settings.wallet_integration_id;
                let token = self
                    .gateway
                    .payment_key(&auth_token, amount_cents, gateway_order_id, billing, integration_id)
                    .await?;
                let url = self.gateway.wallet_redirect_url(&token, number).await?;
                (integration_id, CheckoutRedirect::External { url })
            }
        };

        let payment = self
            .store
            .transaction(|data| {
                let p = data.payment_mut(payment.id)?;
                p.gateway = Some(GatewayMetadata {
                    version: GATEWAY_METADATA_VERSION,
                    integration_id,
                    checkout: redirect.clone(),
                    transaction_id: None,
                });
                Ok(p.clone())
            })
            .await?;

        Ok((payment, redirect))
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CourseListing, InMemoryCatalog, InMemoryUserDirectory, UserProfile};
    use chrono::Duration;
    use coupons::{Coupon, DiscountType};
    use gateway_client::{GatewayError, MockPaymentGateway};
    use mockall::predicate::eq;
    use rust_decimal_macros::dec;
    use wallet_ledger::{CashbackPolicy, TransactionType};

    const BUYER: UserId = 10;
    const SELLER: UserId = 20;
    const COURSE: i64 = 1;

    fn settings() -> CheckoutSettings {
        CheckoutSettings {
            card_integration_id: 111,
            wallet_integration_id: 222,
            iframe_base_url: "https://gw.test/api/acceptance/iframes".into(),
            iframe_id: 9,
        }
    }

    fn catalog(price: Decimal) -> InMemoryCatalog {
        InMemoryCatalog::new().with_course(CourseListing {
            id: COURSE,
            title: "Async Rust".into(),
            price,
            seller_id: SELLER,
            cashback: Some(CashbackPolicy::Percentage(dec!(10))),
        })
    }

    async fn build_orchestrator(gateway: MockPaymentGateway, price: Decimal) -> PaymentOrchestrator {
        let store = Arc::new(PaymentStore::memory());
        store
            .transaction(|data| {
                data.ledger.adjust(BUYER, dec!(200), "Opening balance")?;
                data.coupons.insert(Coupon {
                    id: 1,
                    code: "TWENTY".into(),
                    discount_type: DiscountType::Fixed,
                    discount_amount: dec!(20),
                    max_uses: None,
                    max_uses_per_user: 1,
                    times_used: 0,
                    valid_from: Utc::now() - Duration::days(1),
                    valid_until: None,
                    is_active: true,
                });
                Ok(())
            })
            .await
            .unwrap();

        let users = InMemoryUserDirectory::new().with_user(UserProfile {
            id: BUYER,
            first_name: Some("Mona".into()),
            ..Default::default()
        });

        PaymentOrchestrator::new(
            store,
            Arc::new(gateway),
            Arc::new(catalog(price)),
            Arc::new(users),
            settings(),
        )
    }

    fn request(wallet_amount: Option<Decimal>, coupon: Option<&str>) -> PurchaseRequest {
        PurchaseRequest {
            user_id: BUYER,
            target: PurchaseTarget::Course(COURSE),
            coupon_code: coupon.map(String::from),
            wallet_amount,
            method: PaymentMethod::Card,
            wallet_number: None,
        }
    }

    fn card_gateway() -> MockPaymentGateway {
        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_authenticate()
            .times(1)
            .returning(|| Ok("auth-tok".into()));
        gateway
            .expect_register_order()
            .times(1)
            .returning(|_, _, _| Ok(5512));
        gateway
            .expect_payment_key()
            .times(1)
            .returning(|_, _, _, _, _| Ok("pay-key".into()));
        gateway
    }

    async fn balance(orchestrator: &PaymentOrchestrator) -> Decimal {
        orchestrator
            .store()
            .read(|data| data.ledger.balance(BUYER))
            .await
    }

    #[tokio::test]
    async fn test_full_wallet_coverage_skips_gateway() {
        // No expectations: any gateway call fails the test
        let orchestrator = build_orchestrator(MockPaymentGateway::new(), dec!(100)).await;

        let outcome = orchestrator
            .purchase(request(Some(dec!(80)), Some("TWENTY")))
            .await
            .unwrap();

        let PurchaseOutcome::Completed { payment } = outcome else {
            panic!("expected immediate completion");
        };
        assert_eq!(payment.status, PaymentStatus::Completed);
        assert_eq!(payment.amount, dec!(80));
        assert_eq!(payment.discount, dec!(20));
        assert_eq!(payment.cashback_earned, Decimal::ZERO);
        assert!(payment.completed_at.is_some());

        orchestrator
            .store()
            .read(|data| {
                assert!(data.grants.has_access(BUYER, PurchaseTarget::Course(COURSE)));
                assert_eq!(data.ledger.balance(BUYER), dec!(120));
                assert_eq!(data.coupons.get("TWENTY").unwrap().times_used, 1);
            })
            .await;
    }

    #[tokio::test]
    async fn test_card_checkout() {
        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_authenticate()
            .returning(|| Ok("auth-tok".into()));
        gateway
            .expect_register_order()
            .with(eq("auth-tok"), eq(7000), mockall::predicate::always())
            .returning(|_, _, _| Ok(5512));
        gateway
            .expect_payment_key()
            .withf(|_, cents, order, billing, integration| {
                *cents == 7000
                    && *order == 5512
                    && billing.first_name == "Mona"
                    && billing.phone_number == gateway_client::DEFAULT_BILLING_PHONE
                    && *integration == 111
            })
            .returning(|_, _, _, _, _| Ok("pay-key".into()));

        let orchestrator = build_orchestrator(gateway, dec!(100)).await;
        let outcome = orchestrator
            .purchase(request(Some(dec!(30)), None))
            .await
            .unwrap();

        let PurchaseOutcome::GatewayInitiated { payment, redirect } = outcome else {
            panic!("expected gateway checkout");
        };
        assert_eq!(
            redirect,
            CheckoutRedirect::Iframe {
                url: "https://gw.test/api/acceptance/iframes/9?payment_token=pay-key".into()
            }
        );
        assert_eq!(payment.status, PaymentStatus::Pending);
        assert_eq!(payment.gateway_order_id, Some(5512));
        assert!(payment
            .merchant_order_id
            .as_deref()
            .unwrap()
            .starts_with("course_1_10_"));
        assert_eq!(payment.gateway.as_ref().unwrap().integration_id, 111);
        assert_eq!(balance(&orchestrator).await, dec!(170));
    }

    #[tokio::test]
    async fn test_wallet_checkout() {
        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_authenticate()
            .returning(|| Ok("auth-tok".into()));
        gateway
            .expect_register_order()
            .returning(|_, _, _| Ok(6001));
        gateway
            .expect_payment_key()
            .withf(|_, _, _, _, integration| *integration == 222)
            .returning(|_, _, _, _, _| Ok("pay-key".into()));
        gateway
            .expect_wallet_redirect_url()
            .with(eq("pay-key"), eq("01010101010"))
            .returning(|_, _| Ok("https://wallet.test/confirm".into()));

        let orchestrator = build_orchestrator(gateway, dec!(100)).await;
        let mut req = request(None, None);
        req.method = PaymentMethod::WalletRedirect;
        req.wallet_number = Some(" 01010101010 ".into());

        let outcome = orchestrator.purchase(req).await.unwrap();

        let PurchaseOutcome::GatewayInitiated { payment, redirect } = outcome else {
            panic!("expected gateway checkout");
        };
        assert_eq!(redirect.url(), "https://wallet.test/confirm");
        assert_eq!(payment.method, PaymentMethod::WalletRedirect);
    }

    #[tokio::test]
    async fn test_wallet_method_requires_number() {
        let orchestrator = build_orchestrator(MockPaymentGateway::new(), dec!(100)).await;
        let mut req = request(None, None);
        req.method = PaymentMethod::WalletRedirect;

        let err = orchestrator.purchase(req).await.unwrap_err();
        assert!(matches!(err, PaymentError::Validation(_)));
    }

    #[tokio::test]
    async fn test_gateway_failure_refunds_wallet() {
        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_authenticate()
            .returning(|| Ok("auth-tok".into()));
        gateway.expect_register_order().returning(|_, _, _| {
            Err(GatewayError::Order {
                status: 500,
                message: "down".into(),
            })
        });

        let orchestrator = build_orchestrator(gateway, dec!(100)).await;
        let before = balance(&orchestrator).await;

        let err = orchestrator
            .purchase(request(Some(dec!(40)), None))
            .await
            .unwrap_err();

        let PaymentError::InitiationFailed {
            payment_id,
            wallet_refunded,
            source,
        } = err
        else {
            panic!("expected initiation failure");
        };
        assert!(wallet_refunded);
        assert!(matches!(source, GatewayError::Order { .. }));
        assert_eq!(balance(&orchestrator).await, before);

        orchestrator
            .store()
            .read(|data| {
                let payment = data.payment(payment_id).unwrap();
                assert_eq!(payment.status, PaymentStatus::Failed);
                let kinds: Vec<TransactionType> = data
                    .ledger
                    .transactions(BUYER)
                    .iter()
                    .map(|t| t.kind)
                    .collect();
                assert_eq!(
                    kinds,
                    vec![
                        TransactionType::Adjustment,
                        TransactionType::PurchaseDebit,
                        TransactionType::RefundCredit
                    ]
                );
                assert!(data.ledger.is_consistent(BUYER));
            })
            .await;
    }

    #[tokio::test]
    async fn test_failed_attempt_allows_retry() {
        let orchestrator = build_orchestrator(card_gateway(), dec!(100)).await;
        orchestrator
            .store()
            .transaction(|data| {
                let failed = Payment {
                    id: Uuid::new_v4(),
                    user_id: BUYER,
                    target: PurchaseTarget::Course(COURSE),
                    amount: dec!(100),
                    status: PaymentStatus::Failed,
                    method: PaymentMethod::Card,
                    wallet_amount_used: Decimal::ZERO,
                    gateway_order_id: Some(1),
                    merchant_order_id: None,
                    coupon_id: None,
                    discount: Decimal::ZERO,
                    cashback_earned: Decimal::ZERO,
                    cashback_policy: None,
                    gateway: None,
                    created_at: Utc::now(),
                    completed_at: None,
                    failed_at: Some(Utc::now()),
                };
                data.insert_payment(failed);
                Ok(())
            })
            .await
            .unwrap();

        assert!(orchestrator.purchase(request(None, None)).await.is_ok());
    }

    #[tokio::test]
    async fn test_pending_payment_blocks_second_attempt() {
        let orchestrator = build_orchestrator(card_gateway(), dec!(100)).await;

        orchestrator.purchase(request(None, None)).await.unwrap();
        let err = orchestrator.purchase(request(None, None)).await.unwrap_err();

        assert!(matches!(err, PaymentError::PaymentAlreadyPending));
    }

    #[tokio::test]
    async fn test_already_purchased() {
        let orchestrator = build_orchestrator(MockPaymentGateway::new(), dec!(100)).await;
        orchestrator
            .store()
            .transaction(|data| {
                data.grants
                    .grant(BUYER, PurchaseTarget::Course(COURSE), Uuid::new_v4());
                Ok(())
            })
            .await
            .unwrap();

        let err = orchestrator.purchase(request(None, None)).await.unwrap_err();
        assert!(matches!(err, PaymentError::AlreadyPurchased));
    }

    #[tokio::test]
    async fn test_guardrails() {
        let orchestrator = build_orchestrator(MockPaymentGateway::new(), dec!(100)).await;

        let mut own = request(None, None);
        own.user_id = SELLER;
        assert!(matches!(
            orchestrator.purchase(own).await,
            Err(PaymentError::OwnCourse)
        ));

        let mut missing = request(None, None);
        missing.target = PurchaseTarget::Course(404);
        assert!(matches!(
            orchestrator.purchase(missing).await,
            Err(PaymentError::NotFound(_))
        ));

        assert!(matches!(
            orchestrator.purchase(request(Some(dec!(-1)), None)).await,
            Err(PaymentError::Validation(_))
        ));

        let free = build_orchestrator(MockPaymentGateway::new(), Decimal::ZERO).await;
        assert!(matches!(
            free.purchase(request(None, None)).await,
            Err(PaymentError::NoPaymentRequired)
        ));
    }

    #[tokio::test]
    async fn test_wallet_amount_checks() {
        let orchestrator = build_orchestrator(MockPaymentGateway::new(), dec!(100)).await;

        assert!(matches!(
            orchestrator
                .purchase(request(Some(dec!(90)), Some("TWENTY")))
                .await,
            Err(PaymentError::ExceedsPrice { .. })
        ));

        let rich = build_orchestrator(MockPaymentGateway::new(), dec!(500)).await;
        assert!(matches!(
            rich.purchase(request(Some(dec!(250)), None)).await,
            Err(PaymentError::InsufficientBalance { .. })
        ));

        // Nothing was debited or recorded
        assert_eq!(balance(&orchestrator).await, dec!(200));
        assert_eq!(
            orchestrator.store().read(|data| data.payment_count()).await,
            0
        );
    }

    #[tokio::test]
    async fn test_sub_cent_wallet_amount_rejected() {
        let orchestrator = build_orchestrator(MockPaymentGateway::new(), dec!(100)).await;

        let err = orchestrator
            .purchase(request(Some(dec!(99.999)), None))
            .await
            .unwrap_err();

        assert!(matches!(err, PaymentError::Validation(_)));
        assert_eq!(balance(&orchestrator).await, dec!(200));

        // Trailing zeros are fine
        let outcome = orchestrator
            .purchase(request(Some(dec!(100.000)), None))
            .await
            .unwrap();
        assert!(matches!(outcome, PurchaseOutcome::Completed { .. }));
    }

    #[tokio::test]
    async fn test_sub_cent_remainder_completes_without_gateway() {
        // No expectations: a zero-cent gateway order fails the test
        let orchestrator = build_orchestrator(MockPaymentGateway::new(), dec!(100.004)).await;

        let outcome = orchestrator
            .purchase(request(Some(dec!(100)), None))
            .await
            .unwrap();

        let PurchaseOutcome::Completed { payment } = outcome else {
            panic!("expected immediate completion");
        };
        assert_eq!(payment.status, PaymentStatus::Completed);
        assert!(payment.gateway_order_id.is_none());
    }

    #[tokio::test]
    async fn test_coupon_errors_surface() {
        let orchestrator = build_orchestrator(MockPaymentGateway::new(), dec!(100)).await;

        let err = orchestrator
            .purchase(request(None, Some("NOPE")))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PaymentError::Coupon(coupons::CouponError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_coupon_recheck_failure_compensates() {
        let orchestrator = build_orchestrator(MockPaymentGateway::new(), dec!(100)).await;
        let payment_id = Uuid::new_v4();

        // Simulate a checkout that validated the coupon but lost the race
        // for its last use.
        let payment = orchestrator
            .store()
            .transaction(|data| {
                data.ledger
                    .debit_for_purchase(BUYER, dec!(50), payment_id, "Purchase")?;
                let payment = Payment {
                    id: payment_id,
                    user_id: BUYER,
                    target: PurchaseTarget::Course(COURSE),
                    amount: dec!(80),
                    status: PaymentStatus::Pending,
                    method: PaymentMethod::Card,
                    wallet_amount_used: dec!(50),
                    gateway_order_id: None,
                    merchant_order_id: None,
                    coupon_id: Some(1),
                    discount: dec!(20),
                    cashback_earned: Decimal::ZERO,
                    cashback_policy: None,
                    gateway: None,
                    created_at: Utc::now(),
                    completed_at: None,
                    failed_at: None,
                };
                data.insert_payment(payment.clone());
                data.coupons.apply_usage(1, BUYER, None)?;
                Ok(payment)
            })
            .await
            .unwrap();

        let err = orchestrator.apply_coupon(&payment, 1).await.unwrap_err();

        assert!(matches!(
            err,
            PaymentError::Coupon(coupons::CouponError::MaxUsesPerUserExceeded(_))
        ));
        orchestrator
            .store()
            .read(|data| {
                assert_eq!(
                    data.payment(payment_id).unwrap().status,
                    PaymentStatus::Failed
                );
                assert_eq!(data.ledger.balance(BUYER), dec!(200));
                assert_eq!(data.coupons.get("TWENTY").unwrap().times_used, 1);
            })
            .await;
    }
}
