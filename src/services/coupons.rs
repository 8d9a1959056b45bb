use chrono::NaiveDate;
use serde_json::{Map, Value};
use sqlx::PgPool;

use crate::{
    error::{AppError, AppResult},
    repository::table_service::{count_rows, get_row},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscountType {
    Percentage,
    Flat,
}

/// The rules attached to a coupon, separated from storage so the checks
/// stay pure.
#[derive(Debug, Clone)]
pub struct CouponTerms {
    pub is_active: bool,
    pub discount_type: DiscountType,
    pub discount_value: f64,
    /// Cap for percentage coupons; 0 means uncapped.
    pub max_discount: i64,
    pub min_booking_amount: i64,
    /// Redemptions allowed per user; 0 means unlimited.
    pub user_limit: i64,
    /// Property-type allow-list; empty means any type.
    pub allowed_property_types: Vec<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

#[derive(Debug, Clone)]
pub struct AppliedCoupon {
    pub coupon_id: String,
    pub code: String,
    pub discount: i64,
}

/// Validate the coupon terms against a booking and return the discount.
pub fn check_terms(
    terms: &CouponTerms,
    today: NaiveDate,
    property_type: &str,
    gross_amount: i64,
    prior_redemptions: i64,
) -> AppResult<i64> {
    if !terms.is_active {
        return Err(AppError::BadRequest("Coupon is not active.".to_string()));
    }
    if let Some(start) = terms.start_date {
        if today < start {
            return Err(AppError::BadRequest("Coupon is not yet valid.".to_string()));
        }
    }
    if let Some(end) = terms.end_date {
        if today > end {
            return Err(AppError::BadRequest("Coupon has expired.".to_string()));
        }
    }
    if gross_amount < terms.min_booking_amount {
        return Err(AppError::BadRequest(format!(
            "Booking amount below the coupon minimum of {}.",
            terms.min_booking_amount
        )));
    }
    if terms.user_limit > 0 && prior_redemptions >= terms.user_limit {
        return Err(AppError::BadRequest(
            "Coupon usage limit reached for this account.".to_string(),
        ));
    }
    if !terms.allowed_property_types.is_empty()
        && !terms
            .allowed_property_types
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(property_type))
    {
        return Err(AppError::BadRequest(
            "Coupon does not apply to this property type.".to_string(),
        ));
    }

    let raw = match terms.discount_type {
        DiscountType::Flat => terms.discount_value.floor() as i64,
        DiscountType::Percentage => {
            let computed = (gross_amount as f64 * terms.discount_value / 100.0).floor() as i64;
            if terms.max_discount > 0 {
                computed.min(terms.max_discount)
            } else {
                computed
            }
        }
    };

    Ok(raw.clamp(0, gross_amount))
}

/// Look up a coupon by code and resolve the discount for this booking.
pub async fn resolve_coupon(
    pool: &PgPool,
    code: &str,
    user_id: &str,
    property_type: &str,
    gross_amount: i64,
    today: NaiveDate,
) -> AppResult<AppliedCoupon> {
    let code = code.trim();
    if code.is_empty() {
        return Err(AppError::BadRequest("Coupon code is empty.".to_string()));
    }

    let row = get_row(pool, "coupons", code, "code")
        .await
        .map_err(|_| AppError::NotFound(format!("Coupon '{code}' not found.")))?;

    let coupon_id = value_str(&row, "id");
    let terms = terms_from_row(&row);

    let mut redemption_filters = Map::new();
    redemption_filters.insert("coupon_id".to_string(), Value::String(coupon_id.clone()));
    redemption_filters.insert("user_id".to_string(), Value::String(user_id.to_string()));
    let prior = count_rows(pool, "coupon_redemptions", Some(&redemption_filters)).await?;

    let discount = check_terms(&terms, today, property_type, gross_amount, prior)?;

    Ok(AppliedCoupon {
        coupon_id,
        code: code.to_string(),
        discount,
    })
}

/// Count a confirmed redemption. Best-effort: runs after the booking is
/// committed, so a failure here only loses a usage tick, never a booking.
pub async fn record_redemption(pool: &PgPool, coupon: &AppliedCoupon, user_id: &str, booking_id: &str) {
    let result = sqlx::query(
        "UPDATE coupons SET usage_count = usage_count + 1 WHERE id = $1::uuid",
    )
    .bind(&coupon.coupon_id)
    .execute(pool)
    .await;
    if let Err(error) = result {
        tracing::warn!(error = %error, coupon = %coupon.code, "failed to bump coupon usage");
    }

    let result = sqlx::query(
        "INSERT INTO coupon_redemptions (coupon_id, user_id, booking_id)
         VALUES ($1::uuid, $2::uuid, $3::uuid)",
    )
    .bind(&coupon.coupon_id)
    .bind(user_id)
    .bind(booking_id)
    .execute(pool)
    .await;
    if let Err(error) = result {
        tracing::warn!(error = %error, coupon = %coupon.code, "failed to record coupon redemption");
    }
}

fn terms_from_row(row: &Value) -> CouponTerms {
    let obj = row.as_object();
    let get = |key: &str| obj.and_then(|o| o.get(key));

    CouponTerms {
        is_active: get("is_active").and_then(Value::as_bool).unwrap_or(false),
        discount_type: match get("discount_type").and_then(Value::as_str).unwrap_or("") {
            "percentage" => DiscountType::Percentage,
            _ => DiscountType::Flat,
        },
        discount_value: get("discount_value")
            .and_then(value_as_f64)
            .unwrap_or(0.0),
        max_discount: get("max_discount").and_then(value_as_i64).unwrap_or(0),
        min_booking_amount: get("min_booking_amount")
            .and_then(value_as_i64)
            .unwrap_or(0),
        user_limit: get("user_limit").and_then(value_as_i64).unwrap_or(0),
        allowed_property_types: get("allowed_property_types")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(ToOwned::to_owned)
                    .collect()
            })
            .unwrap_or_default(),
        start_date: get("start_date")
            .and_then(Value::as_str)
            .and_then(|raw| NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()),
        end_date: get("end_date")
            .and_then(Value::as_str)
            .and_then(|raw| NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()),
    }
}

fn value_as_i64(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|v| v as i64))
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
}

fn value_as_f64(value: &Value) -> Option<f64> {
    value
        .as_f64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
}

fn value_str(row: &Value, key: &str) -> String {
    row.as_object()
        .and_then(|obj| obj.get(key))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::{check_terms, CouponTerms, DiscountType};

    fn flat_coupon(value: f64) -> CouponTerms {
        CouponTerms {
            is_active: true,
            discount_type: DiscountType::Flat,
            discount_value: value,
            max_discount: 0,
            min_booking_amount: 500,
            user_limit: 1,
            allowed_property_types: Vec::new(),
            start_date: None,
            end_date: None,
        }
    }

    fn day(raw: &str) -> NaiveDate {
        NaiveDate::parse_from_str(raw, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn flat_discount_applies_above_minimum() {
        let discount = check_terms(&flat_coupon(100.0), day("2026-03-01"), "hotel", 2000, 0);
        assert_eq!(discount.unwrap(), 100);
    }

    #[test]
    fn minimum_booking_amount_is_enforced() {
        assert!(check_terms(&flat_coupon(100.0), day("2026-03-01"), "hotel", 400, 0).is_err());
    }

    #[test]
    fn percentage_discount_respects_cap() {
        let mut terms = flat_coupon(25.0);
        terms.discount_type = DiscountType::Percentage;
        terms.max_discount = 300;
        let discount = check_terms(&terms, day("2026-03-01"), "hotel", 2000, 0).unwrap();
        assert_eq!(discount, 300);

        terms.max_discount = 0;
        let discount = check_terms(&terms, day("2026-03-01"), "hotel", 2000, 0).unwrap();
        assert_eq!(discount, 500);
    }

    #[test]
    fn date_window_is_inclusive() {
        let mut terms = flat_coupon(100.0);
        terms.start_date = Some(day("2026-03-01"));
        terms.end_date = Some(day("2026-03-31"));
        assert!(check_terms(&terms, day("2026-02-28"), "hotel", 2000, 0).is_err());
        assert!(check_terms(&terms, day("2026-03-01"), "hotel", 2000, 0).is_ok());
        assert!(check_terms(&terms, day("2026-03-31"), "hotel", 2000, 0).is_ok());
        assert!(check_terms(&terms, day("2026-04-01"), "hotel", 2000, 0).is_err());
    }

    #[test]
    fn per_user_limit_blocks_reuse() {
        assert!(check_terms(&flat_coupon(100.0), day("2026-03-01"), "hotel", 2000, 1).is_err());
    }

    #[test]
    fn property_type_allow_list_matches_case_insensitively() {
        let mut terms = flat_coupon(100.0);
        terms.allowed_property_types = vec!["pg".to_string(), "villa".to_string()];
        assert!(check_terms(&terms, day("2026-03-01"), "hotel", 2000, 0).is_err());
        assert!(check_terms(&terms, day("2026-03-01"), "Villa", 2000, 0).is_ok());
    }

    #[test]
    fn discount_never_exceeds_gross() {
        let discount = check_terms(&flat_coupon(5000.0), day("2026-03-01"), "hotel", 2000, 0);
        assert_eq!(discount.unwrap(), 2000);
    }
}
