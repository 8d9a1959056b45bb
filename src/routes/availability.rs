use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use chrono::NaiveDate;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    auth::require_principal,
    error::{AppError, AppResult},
    ownership::assert_property_partner,
    repository::table_service::{delete_row, get_row},
    schemas::{AvailabilityQuery, CreateHoldInput, HoldPath},
    services::{
        audit::write_audit_log,
        availability::{self, HoldSource, NewHold},
    },
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/availability", axum::routing::get(get_availability))
        .route(
            "/availability/blocks",
            axum::routing::post(create_block),
        )
        .route(
            "/availability/blocks/{entry_id}",
            axum::routing::delete(delete_block),
        )
}

/// Public capacity lookup for a room type and date range.
async fn get_availability(
    State(state): State<AppState>,
    Query(query): Query<AvailabilityQuery>,
) -> AppResult<Json<Value>> {
    let pool = db_pool(&state)?;

    let start = parse_date(&query.start_date)?;
    let end = parse_date(&query.end_date)?;
    if end <= start {
        return Err(AppError::BadRequest(
            "End date must be after start date.".to_string(),
        ));
    }

    let available = availability::check_capacity(pool, &query.room_type_id, start, end).await?;

    Ok(Json(json!({
        "success": true,
        "room_type_id": query.room_type_id,
        "start_date": query.start_date,
        "end_date": query.end_date,
        "available_units": available.max(0),
    })))
}

/// Partner-managed hold: walk-in, external channel or manual block.
/// Platform holds are reserved for bookings and cannot be created here.
async fn create_block(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateHoldInput>,
) -> AppResult<impl IntoResponse> {
    let principal = require_principal(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let property = assert_property_partner(pool, &principal, &payload.property_id).await?;

    let room_type = get_row(pool, "room_types", &payload.room_type_id, "id").await?;
    if value_str(&room_type, "property_id") != value_str(&property, "id") {
        return Err(AppError::BadRequest(
            "Room type does not belong to this property.".to_string(),
        ));
    }

    let source = HoldSource::parse(&payload.source)
        .ok_or_else(|| AppError::BadRequest("Unknown hold source.".to_string()))?;
    if source == HoldSource::Platform {
        return Err(AppError::BadRequest(
            "Platform holds are created by bookings, not directly.".to_string(),
        ));
    }

    let start = parse_date(&payload.start_date)?;
    let end = parse_date(&payload.end_date)?;

    let mut tx = begin_tx(pool).await?;
    let created = availability::reserve(
        &mut tx,
        &NewHold {
            property_id: parse_uuid(&payload.property_id)?,
            room_type_id: parse_uuid(&payload.room_type_id)?,
            source,
            reference_id: None,
            start_date: start,
            end_date: end,
            units: payload.units,
        },
    )
    .await?;
    tx.commit()
        .await
        .map_err(|error| AppError::Dependency(format!("Could not commit hold: {error}")))?;

    write_audit_log(
        state.db_pool.as_ref(),
        Some(&principal.id_string()),
        "create",
        "availability_ledger",
        Some(&value_str(&created, "id")),
        None,
        Some(created.clone()),
    )
    .await;

    Ok((
        axum::http::StatusCode::CREATED,
        Json(json!({ "success": true, "hold": created })),
    ))
}

/// Remove a partner-managed hold. A platform hold can only be removed
/// through its booking's cancellation or no-show — deleting it here would
/// orphan a confirmed booking's inventory.
async fn delete_block(
    State(state): State<AppState>,
    Path(path): Path<HoldPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let principal = require_principal(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let entry = get_row(pool, "availability_ledger", &path.entry_id, "id").await?;
    assert_property_partner(pool, &principal, &value_str(&entry, "property_id")).await?;

    if value_str(&entry, "source") == "platform" {
        let reference_id = value_str(&entry, "reference_id");
        let booking_released = if reference_id.is_empty() {
            false
        } else {
            match get_row(pool, "bookings", &reference_id, "id").await {
                Ok(booking) => {
                    let status = value_str(&booking, "booking_status");
                    status == "cancelled" || status == "no_show" || status == "rejected"
                }
                Err(_) => false,
            }
        };
        if !booking_released {
            return Err(AppError::Forbidden(
                "This hold belongs to an active booking and cannot be deleted directly."
                    .to_string(),
            ));
        }
    }

    let deleted = delete_row(pool, "availability_ledger", &path.entry_id, "id").await?;

    write_audit_log(
        state.db_pool.as_ref(),
        Some(&principal.id_string()),
        "delete",
        "availability_ledger",
        Some(&path.entry_id),
        Some(deleted.clone()),
        None,
    )
    .await;

    Ok(Json(json!({ "success": true, "hold": deleted })))
}

async fn begin_tx(pool: &sqlx::PgPool) -> AppResult<sqlx::Transaction<'_, sqlx::Postgres>> {
    pool.begin().await.map_err(|error| {
        AppError::Dependency(format!("Could not open a database transaction: {error}"))
    })
}

fn db_pool(state: &AppState) -> AppResult<&sqlx::PgPool> {
    state.db_pool.as_ref().ok_or_else(|| {
        AppError::Dependency("Database is not configured. Set DATABASE_URL.".to_string())
    })
}

fn parse_date(value: &str) -> AppResult<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| AppError::BadRequest("Invalid ISO date format.".to_string()))
}

fn parse_uuid(value: &str) -> AppResult<Uuid> {
    Uuid::parse_str(value.trim())
        .map_err(|_| AppError::BadRequest(format!("Invalid UUID '{value}'.")))
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
