#![allow(dead_code)]

use serde_json::Value;
use sqlx::PgPool;

use crate::{
    auth::{OwnerKind, Principal},
    error::{AppError, AppResult},
    repository::table_service::get_row,
};

pub fn require_admin(principal: &Principal) -> AppResult<()> {
    if principal.is_admin() {
        return Ok(());
    }
    Err(AppError::Forbidden(
        "Forbidden: admin access required.".to_string(),
    ))
}

/// Partner-only surface; admins pass as platform operators.
pub fn require_partner(principal: &Principal) -> AppResult<()> {
    if principal.kind == OwnerKind::Partner || principal.is_admin() {
        return Ok(());
    }
    Err(AppError::Forbidden(
        "Forbidden: partner access required.".to_string(),
    ))
}

/// The booking's guest (or an admin) may act on it.
pub fn assert_booking_owner(principal: &Principal, booking: &Value) -> AppResult<()> {
    if principal.is_admin() {
        return Ok(());
    }
    let owner = value_str(booking, "user_id");
    if owner == principal.id_string() {
        return Ok(());
    }
    Err(AppError::Forbidden(
        "Forbidden: this booking belongs to another guest.".to_string(),
    ))
}

/// The partner who owns the property (or an admin) may act on it.
/// Returns the property row so callers do not fetch it twice.
pub async fn assert_property_partner(
    pool: &PgPool,
    principal: &Principal,
    property_id: &str,
) -> AppResult<Value> {
    let property = get_row(pool, "properties", property_id, "id").await?;
    if principal.is_admin() {
        return Ok(property);
    }
    if principal.kind == OwnerKind::Partner
        && value_str(&property, "partner_id") == principal.id_string()
    {
        return Ok(property);
    }
    Err(AppError::Forbidden(
        "Forbidden: this property belongs to another partner.".to_string(),
    ))
}

/// Partner-side access to a booking goes through the property it was made on.
pub async fn assert_booking_partner(
    pool: &PgPool,
    principal: &Principal,
    booking: &Value,
) -> AppResult<Value> {
    let property_id = value_str(booking, "property_id");
    if property_id.is_empty() {
        return Err(AppError::Internal(
            "Booking has no property reference.".to_string(),
        ));
    }
    assert_property_partner(pool, principal, &property_id).await
}

/// Guest, owning partner, or admin.
pub async fn assert_booking_access(
    pool: &PgPool,
    principal: &Principal,
    booking: &Value,
) -> AppResult<()> {
    if assert_booking_owner(principal, booking).is_ok() {
        return Ok(());
    }
    assert_booking_partner(pool, principal, booking)
        .await
        .map(|_| ())
        .map_err(|_| {
            AppError::Forbidden("Forbidden: no access to this booking.".to_string())
        })
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
