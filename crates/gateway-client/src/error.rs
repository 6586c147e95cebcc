//! Payment gateway errors.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Gateway authentication failed: {status} - {message}")]
    Auth { status: u16, message: String },

    #[error("Gateway order registration failed: {status} - {message}")]
    Order { status: u16, message: String },

    #[error("Gateway payment request failed: {status} - {message}")]
    Payment { status: u16, message: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Gateway response missing {0}")]
    MissingField(&'static str),
}

/// Which gateway step an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayStage {
    Auth,
    Order,
    Payment,
}

impl GatewayError {
    pub(crate) fn rejected(stage: GatewayStage, status: u16, message: String) -> Self {
        match stage {
            GatewayStage::Auth => GatewayError::Auth { status, message },
            GatewayStage::Order => GatewayError::Order { status, message },
            GatewayStage::Payment => GatewayError::Payment { status, message },
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::Auth { .. } => "GATEWAY_AUTH_ERROR",
            GatewayError::Order { .. } => "GATEWAY_ORDER_ERROR",
            GatewayError::Payment { .. } | GatewayError::MissingField(_) => "GATEWAY_PAYMENT_ERROR",
            GatewayError::Http(_) | GatewayError::Json(_) => "GATEWAY_UNAVAILABLE",
        }
    }
}
