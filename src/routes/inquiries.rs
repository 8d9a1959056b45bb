use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use serde_json::{json, Map, Value};

use crate::{
    auth::{require_principal, OwnerKind, Principal},
    error::{AppError, AppResult},
    ownership::assert_booking_partner,
    repository::table_service::{get_row, list_rows, update_row},
    schemas::{clamp_limit_in_range, BookingPath, InquiriesQuery, InquiryStatusInput},
    services::{audit::write_audit_log, notifications},
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/inquiries", axum::routing::get(list_inquiries))
        .route(
            "/inquiries/{booking_id}/status",
            axum::routing::put(transition_status),
        )
}

async fn list_inquiries(
    State(state): State<AppState>,
    Query(query): Query<InquiriesQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let principal = require_principal(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let mut filters = Map::new();
    filters.insert("is_inquiry".to_string(), Value::Bool(true));
    match principal.kind {
        OwnerKind::User => {
            filters.insert(
                "user_id".to_string(),
                Value::String(principal.id_string()),
            );
        }
        OwnerKind::Partner => {
            let property_ids = partner_property_ids(pool, &principal).await?;
            if property_ids.is_empty() {
                return Ok(Json(json!({ "success": true, "inquiries": [] })));
            }
            filters.insert(
                "property_id__in".to_string(),
                Value::Array(property_ids.into_iter().map(Value::String).collect()),
            );
        }
        OwnerKind::Admin => {}
    }
    if let Some(status) = query
        .status
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        filters.insert(
            "inquiry_status".to_string(),
            Value::String(status.to_string()),
        );
    }
    if let Some(property_id) = query
        .property_id
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        filters.insert(
            "property_id".to_string(),
            Value::String(property_id.to_string()),
        );
    }

    let rows = list_rows(
        pool,
        "bookings",
        Some(&filters),
        clamp_limit_in_range(query.limit, 1, 500),
        0,
        "created_at",
        false,
    )
    .await?;

    Ok(Json(json!({ "success": true, "inquiries": rows })))
}

/// Partner-driven lead lifecycle. No money moves on any inquiry transition.
async fn transition_status(
    State(state): State<AppState>,
    Path(path): Path<BookingPath>,
    headers: HeaderMap,
    Json(payload): Json<InquiryStatusInput>,
) -> AppResult<Json<Value>> {
    let principal = require_principal(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let inquiry = get_row(pool, "bookings", &path.booking_id, "id").await?;
    let is_inquiry = inquiry
        .as_object()
        .and_then(|obj| obj.get("is_inquiry"))
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if !is_inquiry {
        return Err(AppError::BadRequest(
            "This record is a booking, not an inquiry.".to_string(),
        ));
    }
    assert_booking_partner(pool, &principal, &inquiry).await?;

    let current = value_str(&inquiry, "inquiry_status");
    let next = payload.status.trim().to_ascii_lowercase();
    if !allowed_inquiry_transition(&current, &next) {
        return Err(AppError::UnprocessableEntity(format!(
            "Invalid inquiry transition: {current} -> {next}"
        )));
    }

    let mut patch = Map::new();
    patch.insert("inquiry_status".to_string(), Value::String(next.clone()));
    if let Some(notes) = payload
        .notes
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        patch.insert("notes".to_string(), Value::String(notes.to_string()));
    }

    let updated = update_row(pool, "bookings", &path.booking_id, &patch, "id").await?;

    notifications::dispatch(
        state.db_pool.as_ref(),
        &value_str(&inquiry, "user_id"),
        "Inquiry update",
        &format!("Your inquiry is now '{next}'."),
        json!({ "booking_id": path.booking_id }),
    )
    .await;
    write_audit_log(
        state.db_pool.as_ref(),
        Some(&principal.id_string()),
        "status_transition",
        "bookings",
        Some(&path.booking_id),
        Some(inquiry),
        Some(updated.clone()),
    )
    .await;

    Ok(Json(json!({ "success": true, "inquiry": updated })))
}

fn allowed_inquiry_transition(current: &str, next: &str) -> bool {
    match current {
        "new" => matches!(next, "scheduled" | "negotiating" | "dropped"),
        "scheduled" => matches!(next, "negotiating" | "closed" | "sold" | "rented" | "dropped"),
        "negotiating" => matches!(next, "closed" | "sold" | "rented" | "dropped"),
        "closed" | "sold" | "rented" | "dropped" => false,
        _ => false,
    }
}

async fn partner_property_ids(
    pool: &sqlx::PgPool,
    principal: &Principal,
) -> AppResult<Vec<String>> {
    let mut filters = Map::new();
    filters.insert(
        "partner_id".to_string(),
        Value::String(principal.id_string()),
    );
    let rows = list_rows(pool, "properties", Some(&filters), 500, 0, "created_at", true).await?;
    Ok(rows
        .iter()
        .map(|row| value_str(row, "id"))
        .filter(|id| !id.is_empty())
        .collect())
}

fn db_pool(state: &AppState) -> AppResult<&sqlx::PgPool> {
    state.db_pool.as_ref().ok_or_else(|| {
        AppError::Dependency("Database is not configured. Set DATABASE_URL.".to_string())
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

#[cfg(test)]
mod tests {
    use super::allowed_inquiry_transition;

    #[test]
    fn leads_progress_toward_an_outcome() {
        assert!(allowed_inquiry_transition("new", "scheduled"));
        assert!(allowed_inquiry_transition("new", "negotiating"));
        assert!(allowed_inquiry_transition("scheduled", "sold"));
        assert!(allowed_inquiry_transition("negotiating", "rented"));
        assert!(allowed_inquiry_transition("negotiating", "dropped"));
    }

    #[test]
    fn outcomes_are_terminal() {
        for state in ["closed", "sold", "rented", "dropped"] {
            for next in ["new", "scheduled", "negotiating", "sold"] {
                assert!(!allowed_inquiry_transition(state, next), "{state} -> {next}");
            }
        }
        assert!(!allowed_inquiry_transition("new", "sold"));
    }
}
