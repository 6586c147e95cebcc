//! HTTP request handlers.

use super::types::{
    HealthResponse, PurchaseResponse, ReturnResponse, ValidateCouponRequest,
    ValidateCouponResponse, WalletResponse, WebhookAck, WebhookQuery,
};
use super::AppState;
use crate::error::PaymentError;
use crate::reconciliation::ReconcileOutcome;
use crate::types::{Payment, PaymentId, PaymentStatus, PurchaseRequest, UserId};
use axum::{
    extract::{Path, Query, State},
    Json,
};
use gateway_client::WebhookEvent;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::{info, warn};

/// Health check endpoint.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let (payments, pending) = state
        .store
        .read(|data| (data.payment_count(), data.pending_count()))
        .await;

    Json(HealthResponse {
        status: "ok".to_string(),
        payments,
        pending,
    })
}

/// Start a purchase.
pub async fn create_purchase(
    State(state): State<AppState>,
    Json(request): Json<PurchaseRequest>,
) -> Result<Json<PurchaseResponse>, PaymentError> {
    info!(user_id = request.user_id, target = %request.target, "Purchase request received");

    let outcome = state.orchestrator.purchase(request).await?;
    Ok(Json(outcome.into()))
}

/// Check a coupon without using it.
pub async fn validate_coupon(
    State(state): State<AppState>,
    Json(request): Json<ValidateCouponRequest>,
) -> Result<Json<ValidateCouponResponse>, PaymentError> {
    if request.base_price < Decimal::ZERO {
        return Err(PaymentError::Validation(
            "base_price must not be negative".into(),
        ));
    }

    let result = state
        .store
        .read(|data| {
            data.coupons
                .validate(&request.code, request.base_price, request.user_id)
        })
        .await;

    let response = match result {
        Ok(quote) => ValidateCouponResponse {
            is_valid: true,
            final_amount: quote.final_amount,
            discount: quote.discount,
            error: None,
            code: None,
        },
        Err(e) => {
            let e = PaymentError::from(e);
            ValidateCouponResponse {
                is_valid: false,
                final_amount: request.base_price,
                discount: Decimal::ZERO,
                error: Some(e.to_string()),
                code: Some(e.code().to_string()),
            }
        }
    };

    Ok(Json(response))
}

/// Wallet balance and transaction history.
pub async fn get_wallet(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> Json<WalletResponse> {
    let (balance, transactions) = state
        .store
        .read(|data| {
            (
                data.ledger.balance(user_id),
                data.ledger.transactions(user_id).to_vec(),
            )
        })
        .await;

    Json(WalletResponse {
        user_id,
        balance,
        transactions,
    })
}

/// Get a payment record.
pub async fn get_payment(
    State(state): State<AppState>,
    Path(payment_id): Path<PaymentId>,
) -> Result<Json<Payment>, PaymentError> {
    state
        .store
        .read(|data| data.payment(payment_id).cloned())
        .await
        .map(Json)
        .ok_or_else(|| PaymentError::NotFound(format!("Payment {}", payment_id)))
}

/// Gateway transaction callback.
///
/// Acknowledged with 200 whenever the request was understood, including
/// unknown orders and rejected signatures, so the gateway stops retrying.
/// Storage failures return an error so the gateway delivers again.
pub async fn gateway_webhook(
    State(state): State<AppState>,
    Query(query): Query<WebhookQuery>,
    Json(event): Json<WebhookEvent>,
) -> Result<Json<WebhookAck>, PaymentError> {
    match state.reconciler.handle_webhook(&query.hmac, &event).await {
        Ok(outcome) => {
            info!(?outcome, "Webhook processed");
        }
        Err(e @ (PaymentError::SignatureInvalid | PaymentError::Validation(_))) => {
            warn!("Webhook dropped: {}", e);
        }
        Err(e) => return Err(e),
    }

    Ok(Json(WebhookAck { received: true }))
}

/// Customer browser returning from checkout.
pub async fn payment_return(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<ReturnResponse>, PaymentError> {
    let outcome = state.reconciler.handle_return(&params).await?;

    let payment = state
        .store
        .read(|data| {
            let payment = match &outcome {
                ReconcileOutcome::StillPending { gateway_order_id } => {
                    data.payment_by_gateway_order(*gateway_order_id)
                }
                other => other.payment_id().and_then(|id| data.payment(id)),
            };
            payment.map(|p| (p.id, p.status))
        })
        .await;

    let (payment_id, status) =
        payment.ok_or_else(|| PaymentError::NotFound("Payment for this order".into()))?;

    Ok(Json(ReturnResponse {
        payment_id: Some(payment_id),
        status: Some(status),
        success: status == PaymentStatus::Completed,
    }))
}
