use serde::Deserialize;
use serde_json::{Map, Value};
use validator::Validate;

use crate::error::AppError;

#[allow(dead_code)]
pub fn validate_input<T: Validate>(input: &T) -> Result<(), AppError> {
    input
        .validate()
        .map_err(|errors| AppError::UnprocessableEntity(format!("Validation failed: {errors}")))
}

pub fn clamp_limit_in_range(limit: i64, min: i64, max: i64) -> i64 {
    limit.clamp(min, max)
}

/// Serialize an input struct into a JSON map for the table service.
pub fn serialize_to_map<T: serde::Serialize>(input: &T) -> Map<String, Value> {
    match serde_json::to_value(input) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

/// Drop nulls so optional fields fall back to column defaults on insert.
pub fn remove_nulls(map: Map<String, Value>) -> Map<String, Value> {
    map.into_iter()
        .filter(|(_, value)| !value.is_null())
        .collect()
}

fn default_limit_100() -> i64 {
    100
}
fn default_units_one() -> i64 {
    1
}
fn default_adults_one() -> i64 {
    1
}
fn default_zero() -> i64 {
    0
}
fn default_false() -> bool {
    false
}
fn default_pay_at_hotel() -> String {
    "pay_at_hotel".to_string()
}
fn default_manual_block() -> String {
    "manual_block".to_string()
}

// ── Bookings ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct CreateBookingInput {
    pub property_id: String,
    /// Absent for inquiry-type properties (buy/plot/rent).
    pub room_type_id: Option<String>,
    pub check_in_date: Option<String>,
    pub check_out_date: Option<String>,
    #[serde(default = "default_units_one")]
    pub units: i64,
    #[serde(default = "default_adults_one")]
    pub adults: i64,
    #[serde(default = "default_zero")]
    pub children: i64,
    #[serde(default = "default_pay_at_hotel")]
    pub payment_method: String,
    pub coupon_code: Option<String>,
    /// Wallet amount to apply. For `wallet` payments it defaults to the
    /// full total; for `online` it is the pre-applied portion.
    pub wallet_deduction: Option<i64>,
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BookingsQuery {
    pub status: Option<String>,
    pub property_id: Option<String>,
    #[serde(default = "default_limit_100")]
    pub limit: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BookingPath {
    pub booking_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CancelBookingInput {
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct CheckOutInput {
    /// Allow checkout with an outstanding balance (manager override).
    #[serde(default = "default_false")]
    pub force: bool,
}

// ── Inquiries ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct InquiriesQuery {
    pub status: Option<String>,
    pub property_id: Option<String>,
    #[serde(default = "default_limit_100")]
    pub limit: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InquiryStatusInput {
    pub status: String,
    pub notes: Option<String>,
}

// ── Payments ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct VerifyPaymentInput {
    #[validate(length(min = 1))]
    pub razorpay_order_id: String,
    #[validate(length(min = 1))]
    pub razorpay_payment_id: String,
    #[validate(length(min = 1))]
    pub razorpay_signature: String,
}

// ── Wallet / withdrawals ────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct WalletTransactionsQuery {
    pub category: Option<String>,
    #[serde(default = "default_limit_100")]
    pub limit: i64,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct WithdrawInput {
    #[validate(range(min = 1))]
    pub amount: i64,
    pub bank_name: Option<String>,
    pub account_number: Option<String>,
    pub account_holder: Option<String>,
    pub ifsc_code: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WithdrawalsQuery {
    pub status: Option<String>,
    #[serde(default = "default_limit_100")]
    pub limit: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WithdrawalPath {
    pub withdrawal_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WithdrawalStatusInput {
    pub status: String,
    pub payout_ref: Option<String>,
    pub failure_reason: Option<String>,
}

// ── Availability ────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct AvailabilityQuery {
    pub room_type_id: String,
    pub start_date: String,
    pub end_date: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateHoldInput {
    pub property_id: String,
    pub room_type_id: String,
    /// walk_in, external or manual_block — platform holds belong to bookings.
    #[serde(default = "default_manual_block")]
    pub source: String,
    pub start_date: String,
    pub end_date: String,
    #[serde(default = "default_units_one")]
    pub units: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HoldPath {
    pub entry_id: String,
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::{clamp_limit_in_range, remove_nulls, serialize_to_map};

    #[test]
    fn limits_are_clamped() {
        assert_eq!(clamp_limit_in_range(0, 1, 500), 1);
        assert_eq!(clamp_limit_in_range(250, 1, 500), 250);
        assert_eq!(clamp_limit_in_range(9999, 1, 500), 500);
    }

    #[test]
    fn null_fields_are_dropped_before_insert() {
        let payload = json!({"a": 1, "b": Value::Null, "c": "x"});
        let map = remove_nulls(payload.as_object().cloned().unwrap());
        assert_eq!(map.len(), 2);
        assert!(!map.contains_key("b"));
    }

    #[test]
    fn create_booking_input_defaults() {
        let input: super::CreateBookingInput = serde_json::from_value(json!({
            "property_id": "p1"
        }))
        .unwrap();
        assert_eq!(input.units, 1);
        assert_eq!(input.adults, 1);
        assert_eq!(input.children, 0);
        assert_eq!(input.payment_method, "pay_at_hotel");

        let map = serialize_to_map(&input);
        assert_eq!(map.get("property_id"), Some(&json!("p1")));
    }
}
