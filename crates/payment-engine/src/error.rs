//! Error types for the payment engine.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use coupons::CouponError;
use gateway_client::GatewayError;
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;
use wallet_ledger::LedgerError;

/// Payment engine error types.
#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("You already have access to this item")]
    AlreadyPurchased,

    #[error("A payment for this item is already pending")]
    PaymentAlreadyPending,

    #[error("You cannot purchase your own course")]
    OwnCourse,

    #[error("This item is free, no payment needed")]
    NoPaymentRequired,

    #[error("Wallet amount {requested} exceeds the price {price}")]
    ExceedsPrice { requested: Decimal, price: Decimal },

    #[error("Insufficient wallet balance: required {required}, available {available}")]
    InsufficientBalance { required: Decimal, available: Decimal },

    #[error(transparent)]
    Coupon(#[from] CouponError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("Could not start payment, wallet refunded if applicable")]
    InitiationFailed {
        payment_id: Uuid,
        wallet_refunded: bool,
        #[source]
        source: GatewayError,
    },

    #[error("Invalid callback signature")]
    SignatureInvalid,

    #[error("Ledger error: {0}")]
    Ledger(LedgerError),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl PaymentError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            PaymentError::Validation(_) => "VALIDATION_ERROR",
            PaymentError::NotFound(_) => "NOT_FOUND",
            PaymentError::AlreadyPurchased => "ALREADY_PURCHASED",
            PaymentError::PaymentAlreadyPending => "PAYMENT_ALREADY_PENDING",
            PaymentError::OwnCourse => "OWN_COURSE",
            PaymentError::NoPaymentRequired => "NO_PAYMENT_REQUIRED",
            PaymentError::ExceedsPrice { .. } => "EXCEEDS_PRICE",
            PaymentError::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            PaymentError::Coupon(e) => match e {
                CouponError::NotFound(_) => "COUPON_NOT_FOUND",
                CouponError::Inactive(_) => "COUPON_INACTIVE",
                CouponError::Expired(_) => "COUPON_EXPIRED",
                CouponError::MaxUsesExceeded(_) => "COUPON_MAX_USES_EXCEEDED",
                CouponError::MaxUsesPerUserExceeded(_) => "COUPON_ALREADY_USED",
            },
            PaymentError::Gateway(e) => e.code(),
            PaymentError::InitiationFailed { .. } => "PAYMENT_INITIATION_FAILED",
            PaymentError::SignatureInvalid => "SIGNATURE_INVALID",
            PaymentError::Ledger(_) => "LEDGER_ERROR",
            PaymentError::Storage(_) => "STORAGE_ERROR",
            PaymentError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            PaymentError::Validation(_)
            | PaymentError::ExceedsPrice { .. }
            | PaymentError::InsufficientBalance { .. } => StatusCode::BAD_REQUEST,
            PaymentError::NotFound(_) => StatusCode::NOT_FOUND,
            PaymentError::AlreadyPurchased
            | PaymentError::PaymentAlreadyPending
            | PaymentError::OwnCourse => StatusCode::CONFLICT,
            PaymentError::NoPaymentRequired => StatusCode::UNPROCESSABLE_ENTITY,
            PaymentError::Coupon(e) => match e {
                CouponError::NotFound(_) => StatusCode::NOT_FOUND,
                CouponError::Inactive(_) | CouponError::Expired(_) => StatusCode::BAD_REQUEST,
                CouponError::MaxUsesExceeded(_) | CouponError::MaxUsesPerUserExceeded(_) => {
                    StatusCode::CONFLICT
                }
            },
            PaymentError::Gateway(_) | PaymentError::InitiationFailed { .. } => {
                StatusCode::BAD_GATEWAY
            }
            PaymentError::SignatureInvalid => StatusCode::UNAUTHORIZED,
            PaymentError::Ledger(_) | PaymentError::Storage(_) | PaymentError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for PaymentError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Upstream gateway responses are not echoed to callers.
        let error = match &self {
            PaymentError::Gateway(_) => "Payment gateway unavailable".to_string(),
            other => other.to_string(),
        };

        let body = ErrorResponse {
            error,
            code: self.code().to_string(),
        };

        (status, Json(body)).into_response()
    }
}

impl From<LedgerError> for PaymentError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::InsufficientBalance {
                required,
                available,
            } => PaymentError::InsufficientBalance {
                required,
                available,
            },
            other => PaymentError::Ledger(other),
        }
    }
}

impl From<std::io::Error> for PaymentError {
    fn from(e: std::io::Error) -> Self {
        PaymentError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for PaymentError {
    fn from(e: serde_json::Error) -> Self {
        PaymentError::Storage(format!("JSON serialization error: {}", e))
    }
}
