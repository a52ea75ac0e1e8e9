//! Payment gateway integration
//!
//! Requests and notifications are signed with a SHA-256 token computed over
//! the sorted, flattened parameter values plus the terminal password.

mod tinkoff;

pub use tinkoff::{TinkoffClient, TinkoffConfig, DEFAULT_API_URL};

use async_trait::async_trait;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::domain::value_objects::Money;

/// Keys excluded from notification signatures.
const UNSIGNED_NOTIFICATION_KEYS: [&str; 4] = ["Token", "Receipt", "Data", "DATA"];

#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error("gateway request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("gateway rejected request: {message}")]
    Rejected { message: String },

    #[error("gateway response is missing {0}")]
    MissingField(&'static str),

    #[error("invalid gateway response: {0}")]
    InvalidResponse(String),

    #[error("payment gateway is not configured")]
    NotConfigured,
}

/// Payment initialisation request
#[derive(Clone, Debug)]
pub struct InitPayment {
    pub amount: Money,
    /// Merchant order id, the order number
    pub order_id: String,
    pub description: String,
    pub success_url: String,
    pub fail_url: String,
    pub customer_key: Option<String>,
    pub recurrent: bool,
    pub data: Option<Map<String, Value>>,
    pub receipt: Option<Value>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct InitResponse {
    pub payment_id: String,
    pub status: Option<String>,
    pub payment_url: Option<String>,
    pub raw: Value,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PaymentState {
    pub payment_id: String,
    pub status: Option<String>,
    pub raw: Value,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn init_payment(&self, request: InitPayment) -> Result<InitResponse, PaymentError>;

    /// Cancels or refunds a payment, fully when `amount` is `None`.
    async fn cancel_payment(&self, payment_id: &str, amount: Option<i64>) -> Result<Value, PaymentError>;

    async fn get_state(&self, payment_id: &str) -> Result<PaymentState, PaymentError>;

    /// Checks the `Token` of an incoming notification.
    fn verify_notification(&self, payload: &Map<String, Value>) -> bool;
}

/// Computes the request token for `params`. Any existing `Token` is ignored.
pub fn sign(params: &Map<String, Value>, password: &str) -> String {
    let mut data = params.clone();
    data.remove("Token");
    data.insert("Password".into(), Value::String(password.into()));

    let mut concatenated = String::new();
    flatten_into(&Value::Object(data), &mut concatenated);

    hex::encode(Sha256::digest(concatenated.as_bytes()))
}

/// Verifies a gateway notification; payloads without a token never verify.
pub fn verify_notification(payload: &Map<String, Value>, password: &str) -> bool {
    let Some(received) = payload.get("Token").and_then(Value::as_str) else {
        return false;
    };
    let mut data = payload.clone();
    for key in UNSIGNED_NOTIFICATION_KEYS { data.remove(key); }
    constant_time_eq(sign(&data, password).as_bytes(), received.as_bytes())
}

/// Appends scalar values in key order, descending into objects and arrays.
fn flatten_into(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for key in keys { flatten_into(&map[key.as_str()], out); }
        }
        Value::Array(items) => items.iter().for_each(|v| flatten_into(v, out)),
        Value::String(s) => out.push_str(s),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Null => {}
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() { return false; }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value { Value::Object(map) => map, _ => unreachable!() }
    }

    #[test]
    fn test_sign_concatenates_sorted_values() {
        let params = object(json!({"TerminalKey": "Term", "Amount": 1000, "OrderId": "ORD-1", "Token": "stale"}));
        // Amount, OrderId, Password, TerminalKey
        let expected = hex::encode(Sha256::digest("1000ORD-1secretTerm".as_bytes()));
        assert_eq!(sign(&params, "secret"), expected);
    }

    #[test]
    fn test_sign_flattens_nested_values() {
        let params = object(json!({"B": {"y": 2, "x": "1"}, "A": [true, null, "z"]}));
        // A: "true" "" "z"; B: x then y; then Password
        let expected = hex::encode(Sha256::digest("truez12pw".as_bytes()));
        assert_eq!(sign(&params, "pw"), expected);
    }

    #[test]
    fn test_verify_notification() {
        let mut payload = object(json!({
            "TerminalKey": "Term", "OrderId": "ORD-20250101-AB12C", "Success": true,
            "Status": "CONFIRMED", "PaymentId": 13660, "Amount": 100000,
        }));
        let token = sign(&payload, "secret");
        payload.insert("Token".into(), Value::String(token));
        payload.insert("DATA".into(), json!({"Phone": "+7900"}));
        payload.insert("Receipt".into(), json!({"Items": []}));
        assert!(verify_notification(&payload, "secret"));
        assert!(!verify_notification(&payload, "other"));

        let mut tampered = payload.clone();
        tampered.insert("Amount".into(), json!(1));
        assert!(!verify_notification(&tampered, "secret"));

        let mut unsigned = payload.clone();
        unsigned.remove("Token");
        assert!(!verify_notification(&unsigned, "secret"));
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"ab"));
    }
}
