use hmac::{Hmac, Mac};
use reqwest::Client;
use serde_json::{json, Value};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

const RZP_API_BASE: &str = "https://api.razorpay.com";

/// Create a Razorpay order for a deferred (gateway) payment.
///
/// Amounts are whole currency units; Razorpay wants the smallest
/// denomination, so rupees are converted to paise here. The `notes` map
/// travels with the order so the webhook side can see the booking context.
pub async fn create_order(
    http_client: &Client,
    key_id: &str,
    key_secret: &str,
    amount: i64,
    currency: &str,
    receipt: &str,
    notes: &Value,
) -> Result<Value, String> {
    let response = http_client
        .post(format!("{RZP_API_BASE}/v1/orders"))
        .basic_auth(key_id, Some(key_secret))
        .json(&json!({
            "amount": amount * 100,
            "currency": currency.to_uppercase(),
            "receipt": receipt,
            "notes": notes,
        }))
        .send()
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Razorpay API request failed");
            "Razorpay API request failed.".to_string()
        })?;

    let status = response.status();
    let resp_body: Value = response
        .json()
        .await
        .unwrap_or(json!({"error": "failed to parse response"}));

    if status.is_success() {
        Ok(json!({
            "order_id": resp_body.get("id").and_then(Value::as_str).unwrap_or(""),
            "amount": resp_body.get("amount"),
            "currency": resp_body.get("currency").and_then(Value::as_str).unwrap_or("INR"),
            "status": resp_body.get("status").and_then(Value::as_str).unwrap_or("created"),
        }))
    } else {
        let error_msg = resp_body
            .get("error")
            .and_then(|e| e.get("description"))
            .and_then(Value::as_str)
            .unwrap_or("Unknown Razorpay error");
        Err(format!("Razorpay API error ({status}): {error_msg}"))
    }
}

/// Verify the checkout callback signature: HMAC-SHA256 over
/// `order_id|payment_id` keyed with the API secret, hex-encoded.
/// Constant-time comparison via the MAC verifier.
pub fn verify_payment_signature(
    order_id: &str,
    payment_id: &str,
    signature: &str,
    key_secret: &str,
) -> bool {
    verify_hmac_hex(
        &format!("{order_id}|{payment_id}"),
        signature,
        key_secret,
    )
}

/// Verify a webhook delivery: HMAC-SHA256 over the raw request body keyed
/// with the webhook secret.
pub fn verify_webhook_signature(payload: &str, signature: &str, webhook_secret: &str) -> bool {
    verify_hmac_hex(payload, signature, webhook_secret)
}

fn verify_hmac_hex(message: &str, expected_hex: &str, secret: &str) -> bool {
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(message.as_bytes());

    let Ok(expected_bytes) = hex_decode(expected_hex.trim()) else {
        return false;
    };

    mac.verify_slice(&expected_bytes).is_ok()
}

/// Decode a hex string into bytes.
fn hex_decode(hex: &str) -> Result<Vec<u8>, ()> {
    if hex.len() % 2 != 0 {
        return Err(());
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| ()))
        .collect()
}

#[cfg(test)]
mod tests {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    use super::{verify_payment_signature, verify_webhook_signature};

    fn sign(message: &str, secret: &str) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(message.as_bytes());
        mac.finalize()
            .into_bytes()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }

    #[test]
    fn payment_signature_round_trips() {
        let signature = sign("order_abc|pay_xyz", "secret");
        assert!(verify_payment_signature(
            "order_abc", "pay_xyz", &signature, "secret"
        ));
    }

    #[test]
    fn tampered_fields_fail_closed() {
        let signature = sign("order_abc|pay_xyz", "secret");
        assert!(!verify_payment_signature(
            "order_abc", "pay_other", &signature, "secret"
        ));
        assert!(!verify_payment_signature(
            "order_abc", "pay_xyz", &signature, "wrong-secret"
        ));
        assert!(!verify_payment_signature(
            "order_abc", "pay_xyz", "deadbeef", "secret"
        ));
        assert!(!verify_payment_signature(
            "order_abc",
            "pay_xyz",
            "not-even-hex",
            "secret"
        ));
    }

    #[test]
    fn webhook_signature_covers_the_raw_body() {
        let body = r#"{"event":"payment.captured","payload":{}}"#;
        let signature = sign(body, "webhook-secret");
        assert!(verify_webhook_signature(body, &signature, "webhook-secret"));
        assert!(!verify_webhook_signature(
            r#"{"event":"payment.failed","payload":{}}"#,
            &signature,
            "webhook-secret"
        ));
    }
}
