//! Transaction callback signatures.
//!
//! The gateway signs a callback by concatenating a fixed list of transaction
//! fields, in a fixed order, and computing HMAC-SHA512 over the result with
//! the merchant's HMAC secret. Both the field order and the text each value
//! renders to must match the gateway byte for byte.

use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha512;

type HmacSha512 = Hmac<Sha512>;

/// Signed fields, in signing order.
pub const SIGNED_FIELDS: [&str; 20] = [
    "amount_cents",
    "created_at",
    "currency",
    "error_occured",
    "has_parent_transaction",
    "id",
    "integration_id",
    "is_3d_secure",
    "is_auth",
    "is_capture",
    "is_refunded",
    "is_standalone_payment",
    "is_voided",
    "order.id",
    "owner",
    "pending",
    "source_data.pan",
    "source_data.sub_type",
    "source_data.type",
    "success",
];

/// Fields that render as `"false"` when absent or null.
const BOOLEAN_FIELDS: [&str; 10] = [
    "error_occured",
    "has_parent_transaction",
    "is_3d_secure",
    "is_auth",
    "is_capture",
    "is_refunded",
    "is_standalone_payment",
    "is_voided",
    "pending",
    "success",
];

/// The exact string the signature is computed over.
///
/// Accepts either the nested webhook object (`{"order": {"id": 1}}`) or the
/// flat return-redirect query (`{"order": "1", "source_data.pan": ".."}`).
pub fn signing_string(transaction: &Value) -> String {
    SIGNED_FIELDS
        .iter()
        .map(|field| render(lookup(transaction, field), BOOLEAN_FIELDS.contains(field)))
        .collect()
}

/// Hex-encoded signature for a transaction. Empty for an empty secret.
pub fn sign(secret: &[u8], transaction: &Value) -> String {
    if secret.is_empty() {
        return String::new();
    }
    let mut mac = match HmacSha512::new_from_slice(secret) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(signing_string(transaction).as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Check a hex signature against a transaction in constant time.
///
/// Malformed hex, a wrong length or an empty secret all verify as false.
pub fn verify(secret: &[u8], signature_hex: &str, transaction: &Value) -> bool {
    if secret.is_empty() {
        return false;
    }
    let Ok(expected) = hex::decode(signature_hex.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha512::new_from_slice(secret) else {
        return false;
    };
    mac.update(signing_string(transaction).as_bytes());
    mac.verify_slice(&expected).is_ok()
}

fn lookup<'a>(transaction: &'a Value, field: &str) -> Option<&'a Value> {
    // Flattened redirect queries carry dotted keys verbatim.
    if let Some(value) = transaction.get(field) {
        return Some(value);
    }

    let mut parts = field.split('.');
    let head = parts.next()?;
    let mut current = transaction.get(head)?;
    for part in parts {
        current = match current {
            Value::Object(map) => map.get(part)?,
            // `order` is a bare id in redirect queries
            scalar if field == "order.id" => return Some(scalar),
            _ => return None,
        };
    }
    Some(current)
}

fn render(value: Option<&Value>, boolean: bool) -> String {
    match value {
        None | Some(Value::Null) if boolean => "false".to_string(),
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(other) => other.to_string(),
    }
}
