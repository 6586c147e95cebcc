//! Card and mobile-wallet payment gateway client.
//!
//! Covers the three-step checkout handshake (auth token, order, payment key),
//! wallet redirects, and verification of the HMAC-SHA512 signatures the
//! gateway attaches to transaction callbacks.

mod client;
mod error;
pub mod signature;
mod types;

#[cfg(feature = "mock")]
pub use client::MockPaymentGateway;
pub use client::{GatewayClient, PaymentGateway};
pub use error::{GatewayError, GatewayStage};
pub use types::*;
