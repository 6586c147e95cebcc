//! Payment gateway HTTP client.

use crate::error::{GatewayError, GatewayStage};
use crate::signature;
use crate::types::*;
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Operations the payment engine needs from a gateway.
///
/// A checkout is three calls: authenticate, register an order for the
/// amount, then mint a payment key bound to that order and an integration.
/// Card payments finish in the hosted iframe; wallet payments need one more
/// call that yields a redirect to the wallet provider.
#[cfg_attr(feature = "mock", mockall::automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Exchange the API key for a short-lived auth token.
    async fn authenticate(&self) -> Result<String, GatewayError>;

    /// Register an order and return the gateway's order id.
    async fn register_order(
        &self,
        auth_token: &str,
        amount_cents: i64,
        merchant_order_id: &str,
    ) -> Result<i64, GatewayError>;

    /// Mint a payment key for an order.
    async fn payment_key(
        &self,
        auth_token: &str,
        amount_cents: i64,
        gateway_order_id: i64,
        billing: &BillingData,
        integration_id: i64,
    ) -> Result<String, GatewayError>;

    /// Start a mobile-wallet payment and return the provider redirect URL.
    async fn wallet_redirect_url(
        &self,
        payment_token: &str,
        wallet_number: &str,
    ) -> Result<String, GatewayError>;

    /// Check a callback signature against the transaction it covers.
    fn verify_signature(&self, signature_hex: &str, transaction: &Value) -> bool;
}

/// Gateway client.
///
/// Credentials are held as `SecretString` so they never show up in
/// debug output or traces.
#[derive(Clone)]
pub struct GatewayClient {
    client: Client,
    base_url: String,
    api_key: SecretString,
    hmac_secret: SecretString,
    currency: String,
}

impl GatewayClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: SecretString,
        hmac_secret: SecretString,
        currency: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            hmac_secret,
            currency: currency.into(),
        })
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    async fn post_json<B, T>(&self, path: &str, body: &B, stage: GatewayStage) -> Result<T, GatewayError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .json(body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            warn!(?stage, status = status.as_u16(), "Gateway rejected request");
            return Err(GatewayError::rejected(stage, status.as_u16(), text));
        }

        debug!("Gateway response: {}", truncate(&text, 200));
        serde_json::from_str(&text).map_err(GatewayError::from)
    }
}

#[async_trait]
impl PaymentGateway for GatewayClient {
    #[instrument(skip(self))]
    async fn authenticate(&self) -> Result<String, GatewayError> {
        let request = AuthRequest {
            api_key: self.api_key.expose_secret(),
        };

        let response: TokenResponse = self
            .post_json("/auth/tokens", &request, GatewayStage::Auth)
            .await?;

        response
            .token
            .filter(|t| !t.is_empty())
            .ok_or(GatewayError::MissingField("token"))
    }

    #[instrument(skip(self, auth_token))]
    async fn register_order(
        &self,
        auth_token: &str,
        amount_cents: i64,
        merchant_order_id: &str,
    ) -> Result<i64, GatewayError> {
        let request = OrderRequest {
            auth_token,
            delivery_needed: "false",
            amount_cents,
            currency: &self.currency,
            merchant_order_id,
            items: Vec::new(),
        };

        let response: OrderResponse = self
            .post_json("/ecommerce/orders", &request, GatewayStage::Order)
            .await?;

        response.id.ok_or(GatewayError::MissingField("order id"))
    }

    #[instrument(skip(self, auth_token, billing))]
    async fn payment_key(
        &self,
        auth_token: &str,
        amount_cents: i64,
        gateway_order_id: i64,
        billing: &BillingData,
        integration_id: i64,
    ) -> Result<String, GatewayError> {
        let request = PaymentKeyRequest {
            auth_token,
            amount_cents,
            expiration: PAYMENT_KEY_EXPIRATION_SECS,
            order_id: gateway_order_id,
            billing_data: billing,
            currency: &self.currency,
            integration_id,
            lock_order_when_paid: true,
        };

        let response: TokenResponse = self
            .post_json("/acceptance/payment_keys", &request, GatewayStage::Payment)
            .await?;

        response
            .token
            .filter(|t| !t.is_empty())
            .ok_or(GatewayError::MissingField("payment token"))
    }

    #[instrument(skip(self, payment_token, wallet_number))]
    async fn wallet_redirect_url(
        &self,
        payment_token: &str,
        wallet_number: &str,
    ) -> Result<String, GatewayError> {
        let request = WalletPayRequest {
            source: WalletSource {
                identifier: wallet_number,
                subtype: "WALLET",
            },
            payment_token,
        };

        let response: WalletPayResponse = self
            .post_json("/acceptance/payments/pay", &request, GatewayStage::Payment)
            .await?;

        response
            .redirect_url
            .filter(|u| !u.is_empty())
            .ok_or(GatewayError::MissingField("redirect_url"))
    }

    fn verify_signature(&self, signature_hex: &str, transaction: &Value) -> bool {
        signature::verify(
            self.hmac_secret.expose_secret().as_bytes(),
            signature_hex,
            transaction,
        )
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
