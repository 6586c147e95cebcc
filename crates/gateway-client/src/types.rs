//! Gateway wire types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Placeholder the gateway accepts for unknown billing fields.
pub const BILLING_PLACEHOLDER: &str = "NA";
/// Phone number sent when the customer has none on file.
pub const DEFAULT_BILLING_PHONE: &str = "+200000000000";
/// Country sent when the customer has none on file.
pub const DEFAULT_BILLING_COUNTRY: &str = "EG";

/// Seconds a payment key stays valid.
pub const PAYMENT_KEY_EXPIRATION_SECS: u32 = 3600;

#[derive(Debug, Serialize)]
pub(crate) struct AuthRequest<'a> {
    pub api_key: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct OrderRequest<'a> {
    pub auth_token: &'a str,
    pub delivery_needed: &'static str,
    pub amount_cents: i64,
    pub currency: &'a str,
    pub merchant_order_id: &'a str,
    pub items: Vec<Value>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OrderResponse {
    #[serde(default)]
    pub id: Option<i64>,
}

#[derive(Debug, Serialize)]
pub(crate) struct PaymentKeyRequest<'a> {
    pub auth_token: &'a str,
    pub amount_cents: i64,
    pub expiration: u32,
    pub order_id: i64,
    pub billing_data: &'a BillingData,
    pub currency: &'a str,
    pub integration_id: i64,
    pub lock_order_when_paid: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct WalletPayRequest<'a> {
    pub source: WalletSource<'a>,
    pub payment_token: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct WalletSource<'a> {
    pub identifier: &'a str,
    pub subtype: &'static str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WalletPayResponse {
    #[serde(default)]
    pub redirect_url: Option<String>,
}

/// Customer details attached to a payment key.
///
/// The gateway rejects keys with empty billing fields, so anything missing
/// from the customer's profile is filled with a placeholder rather than
/// treated as a validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingData {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone_number: String,
    pub country: String,
    pub state: String,
    pub city: String,
    pub street: String,
    pub building: String,
    pub floor: String,
    pub apartment: String,
}

impl Default for BillingData {
    fn default() -> Self {
        Self {
            first_name: BILLING_PLACEHOLDER.into(),
            last_name: BILLING_PLACEHOLDER.into(),
            email: BILLING_PLACEHOLDER.into(),
            phone_number: DEFAULT_BILLING_PHONE.into(),
            country: DEFAULT_BILLING_COUNTRY.into(),
            state: BILLING_PLACEHOLDER.into(),
            city: BILLING_PLACEHOLDER.into(),
            street: BILLING_PLACEHOLDER.into(),
            building: BILLING_PLACEHOLDER.into(),
            floor: BILLING_PLACEHOLDER.into(),
            apartment: BILLING_PLACEHOLDER.into(),
        }
    }
}

impl BillingData {
    /// Build billing data from whatever contact details are on file.
    pub fn from_contact(
        first_name: Option<&str>,
        last_name: Option<&str>,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> Self {
        let defaults = Self::default();
        Self {
            first_name: non_blank(first_name).unwrap_or(defaults.first_name),
            last_name: non_blank(last_name).unwrap_or(defaults.last_name),
            email: non_blank(email).unwrap_or(defaults.email),
            phone_number: non_blank(phone_number).unwrap_or(defaults.phone_number),
            ..defaults
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Webhook envelope posted by the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    #[serde(rename = "type")]
    pub kind: String,
    /// The transaction object the signature is computed over.
    pub obj: Value,
}

impl WebhookEvent {
    pub fn is_transaction(&self) -> bool {
        self.kind.eq_ignore_ascii_case("TRANSACTION")
    }
}

/// The parts of a transaction callback that drive reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionResult {
    pub gateway_order_id: i64,
    pub transaction_id: Option<i64>,
    pub success: bool,
    pub pending: bool,
}

impl TransactionResult {
    /// Extract the result from a webhook `obj` or a flattened return-redirect
    /// query. Returns `None` when the order id is missing or unparseable.
    pub fn from_transaction(transaction: &Value) -> Option<Self> {
        let order = transaction.get("order")?;
        let gateway_order_id = match order {
            Value::Object(_) => order.get("id").and_then(as_i64),
            other => as_i64(other),
        }?;

        Some(Self {
            gateway_order_id,
            transaction_id: transaction.get("id").and_then(as_i64),
            success: transaction.get("success").is_some_and(as_bool),
            pending: transaction.get("pending").is_some_and(as_bool),
        })
    }
}

fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

/// Card checkout URL for the hosted iframe.
pub fn iframe_url(iframe_base_url: &str, iframe_id: i64, payment_token: &str) -> String {
    format!(
        "{}/{}?payment_token={}",
        iframe_base_url.trim_end_matches('/'),
        iframe_id,
        payment_token
    )
}
