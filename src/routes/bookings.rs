use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use chrono::{NaiveDate, Utc};
use chrono_tz::Tz;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::{
    auth::{require_principal, OwnerKind, Principal},
    error::{AppError, AppResult},
    ownership::{assert_booking_access, assert_booking_partner},
    repository::table_service::{create_row, create_row_tx, get_row, list_rows, update_row, update_row_tx},
    schemas::{
        clamp_limit_in_range, validate_input, BookingPath, BookingsQuery, CancelBookingInput,
        CheckOutInput, CreateBookingInput,
    },
    services::{
        audit::write_audit_log,
        availability::{self, HoldSource, NewHold},
        commission::resolve_commission_percent,
        coupons::{self, AppliedCoupon},
        notifications,
        pricing::{gross_breakdown, settle_amounts, PricingResult, RoomRates},
        razorpay,
        settlement::{self, BookingMoney, PaymentMethod, PaymentStatus},
        wallet,
    },
    state::AppState,
};

/// Property types that are sold or rented, not booked nightly.
const INQUIRY_PROPERTY_TYPES: &[&str] = &["buy", "plot", "rent"];

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/bookings",
            axum::routing::get(list_bookings).post(create_booking),
        )
        .route("/bookings/{booking_id}", axum::routing::get(get_booking))
        .route(
            "/bookings/{booking_id}/cancel",
            axum::routing::post(cancel_booking),
        )
        .route(
            "/bookings/{booking_id}/no-show",
            axum::routing::put(mark_no_show),
        )
        .route(
            "/bookings/{booking_id}/check-in",
            axum::routing::put(check_in),
        )
        .route(
            "/bookings/{booking_id}/check-out",
            axum::routing::put(check_out),
        )
        .route(
            "/bookings/{booking_id}/mark-paid",
            axum::routing::put(mark_paid),
        )
}

async fn create_booking(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateBookingInput>,
) -> AppResult<impl IntoResponse> {
    let principal = require_principal(&state, &headers).await?;
    let pool = db_pool(&state)?;
    validate_input(&payload)?;

    let property = get_row(pool, "properties", &payload.property_id, "id").await?;
    let property_status = value_str(&property, "status");
    if !property_status.is_empty() && property_status != "active" {
        return Err(AppError::UnprocessableEntity(
            "Property is not open for booking.".to_string(),
        ));
    }
    let property_type = value_str(&property, "property_type");

    if INQUIRY_PROPERTY_TYPES.contains(&property_type.as_str()) {
        return create_inquiry(&state, &principal, &property, &payload).await;
    }

    let room_type_id = payload
        .room_type_id
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| AppError::BadRequest("room_type_id is required.".to_string()))?;
    let room_type = get_row(pool, "room_types", room_type_id, "id").await?;
    if value_str(&room_type, "property_id") != value_str(&property, "id") {
        return Err(AppError::BadRequest(
            "Room type does not belong to this property.".to_string(),
        ));
    }

    let check_in = parse_date(payload.check_in_date.as_deref().unwrap_or_default())?;
    let check_out = parse_date(payload.check_out_date.as_deref().unwrap_or_default())?;
    if check_out <= check_in {
        return Err(AppError::BadRequest(
            "Check-out must be after check-in.".to_string(),
        ));
    }
    let today = local_today(&state, &property);
    if check_in < today {
        return Err(AppError::BadRequest(
            "Check-in date is in the past.".to_string(),
        ));
    }
    let nights = (check_out - check_in).num_days();

    // Cheap rejection before pricing; the reserve step re-validates inside
    // the same transaction that inserts the hold.
    let available = availability::check_capacity(pool, room_type_id, check_in, check_out).await?;
    if available < payload.units {
        return Err(AppError::InsufficientCapacity(format!(
            "Only {} unit(s) available for the selected dates.",
            available.max(0)
        )));
    }

    let rates = RoomRates {
        price_per_night: value_i64(&room_type, "price_per_night"),
        extra_adult_price: value_i64(&room_type, "extra_adult_price"),
        extra_child_price: value_i64(&room_type, "extra_child_price"),
        base_occupancy: value_i64_or(&room_type, "base_occupancy", 2),
        max_guests: value_i64_or(&room_type, "max_guests", 2),
    };
    let gross = gross_breakdown(&rates, nights, payload.units, payload.adults, payload.children)?;

    let partner_id_str = value_str(&property, "partner_id");
    let partner_id = Uuid::parse_str(&partner_id_str)
        .map_err(|_| AppError::Internal("Property has no partner.".to_string()))?;
    let commission_percent = resolve_commission_percent(&state, pool, &partner_id_str).await?;

    let applied_coupon: Option<AppliedCoupon> = match payload
        .coupon_code
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        Some(code) => Some(
            coupons::resolve_coupon(
                pool,
                code,
                &principal.id_string(),
                &property_type,
                gross.gross_amount,
                today,
            )
            .await?,
        ),
        None => None,
    };
    let discount = applied_coupon.as_ref().map(|c| c.discount).unwrap_or(0);

    let pricing = settle_amounts(
        &gross,
        discount,
        commission_percent,
        state.config.tax_percent,
        state.config.min_commission_amount,
    )?;

    let method = PaymentMethod::parse(&payload.payment_method)
        .ok_or_else(|| AppError::BadRequest("Unknown payment method.".to_string()))?;

    if method == PaymentMethod::Online {
        return create_gateway_order(
            &state,
            &principal,
            &property,
            room_type_id,
            &payload,
            check_in,
            check_out,
            nights,
            &rates,
            &pricing,
            applied_coupon.as_ref(),
        )
        .await;
    }

    // Wallet and pay-at-hotel settle immediately; the treasury must exist.
    let treasury_owner = wallet::treasury_owner_id(&state)?;

    let deduction = match method {
        PaymentMethod::Wallet => payload.wallet_deduction.unwrap_or(pricing.total_amount),
        _ => 0,
    };
    if method == PaymentMethod::Wallet && (deduction <= 0 || deduction > pricing.total_amount) {
        return Err(AppError::BadRequest(
            "Wallet deduction must be positive and within the booking total.".to_string(),
        ));
    }
    let payment_status = match method {
        PaymentMethod::Wallet if deduction == pricing.total_amount => PaymentStatus::Paid,
        PaymentMethod::Wallet => PaymentStatus::Partial,
        _ => PaymentStatus::Pending,
    };

    let booking_ref = new_booking_ref();
    let mut record = booking_record(
        &booking_ref,
        &principal.id_string(),
        &value_str(&property, "id"),
        room_type_id,
        check_in,
        check_out,
        nights,
        &payload,
        &rates,
        &pricing,
        method,
        payment_status,
        deduction,
    );
    if let Some(coupon) = applied_coupon.as_ref() {
        record.insert(
            "coupon_code".to_string(),
            Value::String(coupon.code.clone()),
        );
    }

    let mut tx = begin_tx(pool).await?;
    let created = create_row_tx(&mut tx, "bookings", &record).await?;
    let booking_id = Uuid::parse_str(&value_str(&created, "id"))
        .map_err(|_| AppError::Internal("Booking row has no id.".to_string()))?;

    availability::reserve(
        &mut tx,
        &NewHold {
            property_id: parse_uuid(&value_str(&property, "id"))?,
            room_type_id: parse_uuid(room_type_id)?,
            source: HoldSource::Platform,
            reference_id: Some(booking_id),
            start_date: check_in,
            end_date: check_out,
            units: payload.units,
        },
    )
    .await?;

    let money = BookingMoney::from_row(&created, partner_id)?;
    let moves = settlement::plan_creation(&money)?;
    let wallets = settlement::resolve_party_wallets(&mut tx, &money, treasury_owner).await?;
    settlement::apply_moves(&mut tx, &wallets, &moves, &money.booking_ref).await?;

    tx.commit()
        .await
        .map_err(|error| AppError::Dependency(format!("Could not commit booking: {error}")))?;

    if let Some(coupon) = applied_coupon.as_ref() {
        coupons::record_redemption(pool, coupon, &principal.id_string(), &booking_id.to_string())
            .await;
    }
    notify_booking_parties(
        &state,
        &created,
        &partner_id_str,
        "Booking confirmed",
        &format!(
            "Booking {booking_ref} at {} is confirmed.",
            value_str(&property, "name")
        ),
    )
    .await;
    write_audit_log(
        state.db_pool.as_ref(),
        Some(&principal.id_string()),
        "create",
        "bookings",
        Some(&booking_id.to_string()),
        None,
        Some(created.clone()),
    )
    .await;

    Ok((
        axum::http::StatusCode::CREATED,
        Json(json!({ "success": true, "booking": created })),
    ))
}

/// Inquiry-type properties skip pricing and inventory entirely: a lead
/// record is created and the partner drives its status from there.
async fn create_inquiry(
    state: &AppState,
    principal: &Principal,
    property: &Value,
    payload: &CreateBookingInput,
) -> AppResult<(axum::http::StatusCode, Json<Value>)> {
    let pool = db_pool(state)?;

    let mut record = Map::new();
    record.insert(
        "booking_ref".to_string(),
        Value::String(new_inquiry_ref()),
    );
    record.insert(
        "user_id".to_string(),
        Value::String(principal.id_string()),
    );
    record.insert(
        "property_id".to_string(),
        Value::String(value_str(property, "id")),
    );
    record.insert("is_inquiry".to_string(), Value::Bool(true));
    record.insert(
        "inquiry_status".to_string(),
        Value::String("new".to_string()),
    );
    if let Some(notes) = payload
        .notes
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        record.insert("notes".to_string(), Value::String(notes.to_string()));
    }

    let created = create_row(pool, "bookings", &record).await?;
    let entity_id = value_str(&created, "id");

    notifications::dispatch(
        state.db_pool.as_ref(),
        &value_str(property, "partner_id"),
        "New inquiry",
        &format!(
            "A new inquiry arrived for {}.",
            value_str(property, "name")
        ),
        json!({ "booking_id": entity_id }),
    )
    .await;
    write_audit_log(
        state.db_pool.as_ref(),
        Some(&principal.id_string()),
        "create",
        "bookings",
        Some(&entity_id),
        None,
        Some(created.clone()),
    )
    .await;

    Ok((
        axum::http::StatusCode::CREATED,
        Json(json!({ "success": true, "booking": created })),
    ))
}

/// Online payments defer booking creation: the order's notes carry the full
/// booking payload, and the verify/webhook path materializes the booking
/// once the gateway confirms. Abandoned checkouts leave behind only an
/// order row — no inventory hold, no stale booking.
#[allow(clippy::too_many_arguments)]
async fn create_gateway_order(
    state: &AppState,
    principal: &Principal,
    property: &Value,
    room_type_id: &str,
    payload: &CreateBookingInput,
    check_in: NaiveDate,
    check_out: NaiveDate,
    nights: i64,
    rates: &RoomRates,
    pricing: &PricingResult,
    applied_coupon: Option<&AppliedCoupon>,
) -> AppResult<(axum::http::StatusCode, Json<Value>)> {
    let pool = db_pool(state)?;

    let (key_id, key_secret) = gateway_keys(state)?;

    let wallet_portion = payload.wallet_deduction.unwrap_or(0);
    if wallet_portion < 0 || wallet_portion >= pricing.total_amount {
        return Err(AppError::BadRequest(
            "Wallet portion must be smaller than the booking total.".to_string(),
        ));
    }

    let booking_ref = new_booking_ref();
    let mut notes = booking_record(
        &booking_ref,
        &principal.id_string(),
        &value_str(property, "id"),
        room_type_id,
        check_in,
        check_out,
        nights,
        payload,
        rates,
        pricing,
        PaymentMethod::Online,
        PaymentStatus::Pending,
        wallet_portion,
    );
    if let Some(coupon) = applied_coupon {
        notes.insert(
            "coupon_code".to_string(),
            Value::String(coupon.code.clone()),
        );
        notes.insert(
            "coupon_id".to_string(),
            Value::String(coupon.coupon_id.clone()),
        );
    }

    let gateway_amount = pricing.total_amount - wallet_portion;
    let order = razorpay::create_order(
        &state.http_client,
        key_id,
        key_secret,
        gateway_amount,
        &state.config.currency,
        &booking_ref,
        &Value::Object(notes.clone()),
    )
    .await
    .map_err(AppError::Dependency)?;

    let gateway_order_id = order
        .get("order_id")
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| {
            AppError::Dependency("Gateway returned an order without an id.".to_string())
        })?;

    let mut order_record = Map::new();
    order_record.insert(
        "gateway_order_id".to_string(),
        Value::String(gateway_order_id.to_string()),
    );
    order_record.insert(
        "user_id".to_string(),
        Value::String(principal.id_string()),
    );
    order_record.insert("amount".to_string(), json!(gateway_amount));
    order_record.insert(
        "currency".to_string(),
        Value::String(state.config.currency.clone()),
    );
    order_record.insert("status".to_string(), Value::String("created".to_string()));
    order_record.insert("notes".to_string(), Value::Object(notes));

    let stored = create_row(pool, "payment_orders", &order_record).await?;

    write_audit_log(
        state.db_pool.as_ref(),
        Some(&principal.id_string()),
        "create",
        "payment_orders",
        Some(&value_str(&stored, "id")),
        None,
        Some(stored),
    )
    .await;

    Ok((
        axum::http::StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "Complete the gateway payment to confirm the booking.",
            "order": order,
            "booking_ref": booking_ref,
            "pricing": pricing_json(pricing),
        })),
    ))
}

async fn list_bookings(
    State(state): State<AppState>,
    Query(query): Query<BookingsQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let principal = require_principal(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let mut filters = Map::new();
    filters.insert("is_inquiry".to_string(), Value::Bool(false));
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
                return Ok(Json(json!({ "success": true, "bookings": [] })));
            }
            filters.insert(
                "property_id__in".to_string(),
                Value::Array(property_ids.into_iter().map(Value::String).collect()),
            );
        }
        OwnerKind::Admin => {}
    }
    if let Some(status) = non_empty_opt(query.status.as_deref()) {
        filters.insert("booking_status".to_string(), Value::String(status));
    }
    if let Some(property_id) = non_empty_opt(query.property_id.as_deref()) {
        filters.insert("property_id".to_string(), Value::String(property_id));
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

    Ok(Json(json!({ "success": true, "bookings": rows })))
}

async fn get_booking(
    State(state): State<AppState>,
    Path(path): Path<BookingPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let principal = require_principal(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let booking = get_row(pool, "bookings", &path.booking_id, "id").await?;
    assert_booking_access(pool, &principal, &booking).await?;

    Ok(Json(json!({ "success": true, "booking": booking })))
}

async fn cancel_booking(
    State(state): State<AppState>,
    Path(path): Path<BookingPath>,
    headers: HeaderMap,
    payload: Option<Json<CancelBookingInput>>,
) -> AppResult<Json<Value>> {
    let principal = require_principal(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let booking = get_row(pool, "bookings", &path.booking_id, "id").await?;
    reject_inquiry(&booking)?;
    assert_booking_access(pool, &principal, &booking).await?;

    let current = value_str(&booking, "booking_status");
    if current == "cancelled" {
        return Err(AppError::Conflict(
            "Booking is already cancelled.".to_string(),
        ));
    }
    if !allowed_transition(&current, "cancelled") {
        return Err(AppError::UnprocessableEntity(format!(
            "Booking in status '{current}' can no longer be cancelled."
        )));
    }

    let money = booking_money(pool, &booking).await?;
    let moves = settlement::plan_cancellation(&money);

    let mut patch = Map::new();
    patch.insert(
        "booking_status".to_string(),
        Value::String("cancelled".to_string()),
    );
    if let Some(reason) = payload
        .as_ref()
        .and_then(|Json(p)| p.reason.as_deref())
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        patch.insert("cancel_reason".to_string(), Value::String(reason.to_string()));
    }
    if matches!(
        money.payment_status,
        PaymentStatus::Paid | PaymentStatus::Partial
    ) {
        patch.insert(
            "payment_status".to_string(),
            Value::String(PaymentStatus::Refunded.as_str().to_string()),
        );
    }

    let mut tx = begin_tx(pool).await?;
    let updated = update_row_tx(&mut tx, "bookings", &path.booking_id, &patch, "id").await?;

    if !moves.is_empty() {
        let treasury_owner = wallet::treasury_owner_id(&state)?;
        let wallets = settlement::resolve_party_wallets(&mut tx, &money, treasury_owner).await?;
        settlement::apply_moves(&mut tx, &wallets, &moves, &money.booking_ref).await?;
    }

    availability::release(&mut tx, money.booking_id).await?;

    tx.commit()
        .await
        .map_err(|error| AppError::Dependency(format!("Could not commit cancellation: {error}")))?;

    notifications::dispatch(
        state.db_pool.as_ref(),
        &value_str(&booking, "user_id"),
        "Booking cancelled",
        &format!("Booking {} has been cancelled.", money.booking_ref),
        json!({ "booking_id": path.booking_id }),
    )
    .await;
    write_audit_log(
        state.db_pool.as_ref(),
        Some(&principal.id_string()),
        "cancel",
        "bookings",
        Some(&path.booking_id),
        Some(booking),
        Some(updated.clone()),
    )
    .await;

    Ok(Json(json!({ "success": true, "booking": updated })))
}

async fn mark_no_show(
    State(state): State<AppState>,
    Path(path): Path<BookingPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let principal = require_principal(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let booking = get_row(pool, "bookings", &path.booking_id, "id").await?;
    reject_inquiry(&booking)?;
    assert_booking_partner(pool, &principal, &booking).await?;

    let current = value_str(&booking, "booking_status");
    if current == "no_show" {
        return Err(AppError::Conflict(
            "Booking is already marked as a no-show.".to_string(),
        ));
    }
    if !allowed_transition(&current, "no_show") {
        return Err(AppError::UnprocessableEntity(format!(
            "Booking in status '{current}' cannot be marked as a no-show."
        )));
    }

    let money = booking_money(pool, &booking).await?;
    let moves = settlement::plan_no_show(&money);
    let treasury_owner = wallet::treasury_owner_id(&state)?;

    let mut patch = Map::new();
    patch.insert(
        "booking_status".to_string(),
        Value::String("no_show".to_string()),
    );

    let mut tx = begin_tx(pool).await?;
    let updated = update_row_tx(&mut tx, "bookings", &path.booking_id, &patch, "id").await?;

    let wallets = settlement::resolve_party_wallets(&mut tx, &money, treasury_owner).await?;
    settlement::apply_moves(&mut tx, &wallets, &moves, &money.booking_ref).await?;
    availability::release(&mut tx, money.booking_id).await?;

    tx.commit()
        .await
        .map_err(|error| AppError::Dependency(format!("Could not commit no-show: {error}")))?;

    notifications::dispatch(
        state.db_pool.as_ref(),
        &value_str(&booking, "user_id"),
        "Booking marked as no-show",
        &format!("Booking {} was marked as a no-show.", money.booking_ref),
        json!({ "booking_id": path.booking_id }),
    )
    .await;
    write_audit_log(
        state.db_pool.as_ref(),
        Some(&principal.id_string()),
        "no_show",
        "bookings",
        Some(&path.booking_id),
        Some(booking),
        Some(updated.clone()),
    )
    .await;

    Ok(Json(json!({ "success": true, "booking": updated })))
}

async fn check_in(
    State(state): State<AppState>,
    Path(path): Path<BookingPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let principal = require_principal(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let booking = get_row(pool, "bookings", &path.booking_id, "id").await?;
    reject_inquiry(&booking)?;
    let property = assert_booking_partner(pool, &principal, &booking).await?;

    let current = value_str(&booking, "booking_status");
    if !allowed_transition(&current, "checked_in") {
        return Err(AppError::UnprocessableEntity(format!(
            "Booking in status '{current}' cannot be checked in."
        )));
    }

    let today = local_today(&state, &property);
    let stay_start = parse_date(&value_str(&booking, "check_in_date"))?;
    if today < stay_start {
        return Err(AppError::BadRequest(
            "The stay has not started yet.".to_string(),
        ));
    }

    let mut patch = Map::new();
    patch.insert(
        "booking_status".to_string(),
        Value::String("checked_in".to_string()),
    );
    patch.insert(
        "actual_check_in".to_string(),
        Value::String(Utc::now().to_rfc3339()),
    );
    let updated = update_row(pool, "bookings", &path.booking_id, &patch, "id").await?;

    write_audit_log(
        state.db_pool.as_ref(),
        Some(&principal.id_string()),
        "check_in",
        "bookings",
        Some(&path.booking_id),
        Some(booking),
        Some(updated.clone()),
    )
    .await;

    Ok(Json(json!({ "success": true, "booking": updated })))
}

async fn check_out(
    State(state): State<AppState>,
    Path(path): Path<BookingPath>,
    headers: HeaderMap,
    payload: Option<Json<CheckOutInput>>,
) -> AppResult<Json<Value>> {
    let principal = require_principal(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let booking = get_row(pool, "bookings", &path.booking_id, "id").await?;
    reject_inquiry(&booking)?;
    let property = assert_booking_partner(pool, &principal, &booking).await?;

    let current = value_str(&booking, "booking_status");
    if !allowed_transition(&current, "checked_out") {
        return Err(AppError::UnprocessableEntity(format!(
            "Booking in status '{current}' cannot be checked out."
        )));
    }

    let force = payload.map(|Json(p)| p.force).unwrap_or(false);
    let payment_status = value_str(&booking, "payment_status");
    if payment_status != "paid" && !force {
        return Err(AppError::BadRequest(
            "Booking is not fully paid. Collect payment or use force.".to_string(),
        ));
    }

    let mut patch = Map::new();
    patch.insert(
        "booking_status".to_string(),
        Value::String("checked_out".to_string()),
    );
    patch.insert(
        "actual_check_out".to_string(),
        Value::String(Utc::now().to_rfc3339()),
    );

    let booking_id = parse_uuid(&value_str(&booking, "id"))?;
    let today = local_today(&state, &property);
    let stay_end = parse_date(&value_str(&booking, "check_out_date"))?;

    let mut tx = begin_tx(pool).await?;
    let updated = update_row_tx(&mut tx, "bookings", &path.booking_id, &patch, "id").await?;
    if today < stay_end {
        // Early departure: the remaining nights go back on sale.
        availability::truncate_hold(&mut tx, booking_id, today).await?;
    }
    tx.commit()
        .await
        .map_err(|error| AppError::Dependency(format!("Could not commit check-out: {error}")))?;

    write_audit_log(
        state.db_pool.as_ref(),
        Some(&principal.id_string()),
        "check_out",
        "bookings",
        Some(&path.booking_id),
        Some(booking),
        Some(updated.clone()),
    )
    .await;

    Ok(Json(json!({ "success": true, "booking": updated })))
}

/// Pay-at-hotel (or the open remainder of a partial wallet payment) was
/// collected at the property.
async fn mark_paid(
    State(state): State<AppState>,
    Path(path): Path<BookingPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let principal = require_principal(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let booking = get_row(pool, "bookings", &path.booking_id, "id").await?;
    reject_inquiry(&booking)?;
    assert_booking_partner(pool, &principal, &booking).await?;

    let payment_status = value_str(&booking, "payment_status");
    if payment_status == "paid" {
        return Err(AppError::Conflict("Booking is already paid.".to_string()));
    }
    if payment_status != "pending" && payment_status != "partial" {
        return Err(AppError::UnprocessableEntity(format!(
            "Booking in payment status '{payment_status}' cannot be marked paid."
        )));
    }
    let current = value_str(&booking, "booking_status");
    if matches!(current.as_str(), "cancelled" | "no_show" | "rejected") {
        return Err(AppError::UnprocessableEntity(
            "A closed booking cannot be marked paid.".to_string(),
        ));
    }

    let money = booking_money(pool, &booking).await?;
    let moves = settlement::plan_mark_paid(&money);

    let mut patch = Map::new();
    patch.insert(
        "payment_status".to_string(),
        Value::String("paid".to_string()),
    );

    let mut tx = begin_tx(pool).await?;
    let updated = update_row_tx(&mut tx, "bookings", &path.booking_id, &patch, "id").await?;
    if !moves.is_empty() {
        let treasury_owner = wallet::treasury_owner_id(&state)?;
        let wallets = settlement::resolve_party_wallets(&mut tx, &money, treasury_owner).await?;
        settlement::apply_moves(&mut tx, &wallets, &moves, &money.booking_ref).await?;
    }
    tx.commit()
        .await
        .map_err(|error| AppError::Dependency(format!("Could not commit payment: {error}")))?;

    write_audit_log(
        state.db_pool.as_ref(),
        Some(&principal.id_string()),
        "mark_paid",
        "bookings",
        Some(&path.booking_id),
        Some(booking),
        Some(updated.clone()),
    )
    .await;

    Ok(Json(json!({ "success": true, "booking": updated })))
}

// ── Shared helpers ──────────────────────────────────────────────────

/// Assemble the stored booking row. The pricing fields are written once
/// here and never recomputed.
#[allow(clippy::too_many_arguments)]
fn booking_record(
    booking_ref: &str,
    user_id: &str,
    property_id: &str,
    room_type_id: &str,
    check_in: NaiveDate,
    check_out: NaiveDate,
    nights: i64,
    payload: &CreateBookingInput,
    rates: &RoomRates,
    pricing: &PricingResult,
    method: PaymentMethod,
    payment_status: PaymentStatus,
    wallet_deduction: i64,
) -> Map<String, Value> {
    let mut record = Map::new();
    record.insert(
        "booking_ref".to_string(),
        Value::String(booking_ref.to_string()),
    );
    record.insert("user_id".to_string(), Value::String(user_id.to_string()));
    record.insert(
        "property_id".to_string(),
        Value::String(property_id.to_string()),
    );
    record.insert(
        "room_type_id".to_string(),
        Value::String(room_type_id.to_string()),
    );
    record.insert(
        "check_in_date".to_string(),
        Value::String(check_in.to_string()),
    );
    record.insert(
        "check_out_date".to_string(),
        Value::String(check_out.to_string()),
    );
    record.insert("total_nights".to_string(), json!(nights));
    record.insert("units".to_string(), json!(payload.units));
    record.insert("adults".to_string(), json!(payload.adults));
    record.insert("children".to_string(), json!(payload.children));
    record.insert("price_per_night".to_string(), json!(rates.price_per_night));
    record.insert("base_amount".to_string(), json!(pricing.base_amount));
    record.insert("extra_charges".to_string(), json!(pricing.extra_charges));
    record.insert("discount".to_string(), json!(pricing.discount));
    record.insert("taxes".to_string(), json!(pricing.taxes));
    record.insert(
        "admin_commission".to_string(),
        json!(pricing.admin_commission),
    );
    record.insert("partner_payout".to_string(), json!(pricing.partner_payout));
    record.insert("total_amount".to_string(), json!(pricing.total_amount));
    record.insert(
        "payment_method".to_string(),
        Value::String(method.as_str().to_string()),
    );
    record.insert(
        "payment_status".to_string(),
        Value::String(payment_status.as_str().to_string()),
    );
    record.insert(
        "booking_status".to_string(),
        Value::String("confirmed".to_string()),
    );
    record.insert("wallet_deduction".to_string(), json!(wallet_deduction));
    record.insert("is_inquiry".to_string(), Value::Bool(false));
    if let Some(notes) = payload
        .notes
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        record.insert("notes".to_string(), Value::String(notes.to_string()));
    }
    record
}

fn pricing_json(pricing: &PricingResult) -> Value {
    json!({
        "base_amount": pricing.base_amount,
        "extra_charges": pricing.extra_charges,
        "gross_amount": pricing.gross_amount,
        "discount": pricing.discount,
        "taxes": pricing.taxes,
        "total_amount": pricing.total_amount,
        "admin_commission": pricing.admin_commission,
        "partner_payout": pricing.partner_payout,
    })
}

/// Lift the money fields plus the owning partner out of a stored booking.
async fn booking_money(pool: &sqlx::PgPool, booking: &Value) -> AppResult<BookingMoney> {
    let property_id = value_str(booking, "property_id");
    let property = get_row(pool, "properties", &property_id, "id").await?;
    let partner_id = parse_uuid(&value_str(&property, "partner_id"))?;
    BookingMoney::from_row(booking, partner_id)
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

async fn notify_booking_parties(
    state: &AppState,
    booking: &Value,
    partner_id: &str,
    title: &str,
    body: &str,
) {
    let data = json!({ "booking_id": value_str(booking, "id") });
    notifications::dispatch(
        state.db_pool.as_ref(),
        &value_str(booking, "user_id"),
        title,
        body,
        data.clone(),
    )
    .await;
    notifications::dispatch(state.db_pool.as_ref(), partner_id, title, body, data).await;
}

fn reject_inquiry(booking: &Value) -> AppResult<()> {
    let is_inquiry = booking
        .as_object()
        .and_then(|obj| obj.get("is_inquiry"))
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if is_inquiry {
        return Err(AppError::BadRequest(
            "This record is an inquiry; use the inquiry endpoints.".to_string(),
        ));
    }
    Ok(())
}

fn allowed_transition(current_status: &str, next_status: &str) -> bool {
    match current_status {
        "pending" => matches!(
            next_status,
            "confirmed" | "cancelled" | "no_show" | "rejected"
        ),
        "awaiting_payment" => matches!(next_status, "confirmed" | "cancelled"),
        "confirmed" => matches!(
            next_status,
            "checked_in" | "cancelled" | "no_show" | "rejected"
        ),
        "checked_in" => matches!(
            next_status,
            "checked_out" | "cancelled" | "no_show" | "rejected"
        ),
        "checked_out" | "cancelled" | "no_show" | "rejected" => false,
        _ => false,
    }
}

fn new_booking_ref() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "BK-{}-{}",
        Utc::now().format("%Y%m%d"),
        suffix[..6].to_uppercase()
    )
}

fn new_inquiry_ref() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "INQ-{}-{}",
        Utc::now().format("%Y%m%d"),
        suffix[..6].to_uppercase()
    )
}

fn local_today(state: &AppState, property: &Value) -> NaiveDate {
    let tz_name = value_str(property, "timezone");
    let tz: Tz = if tz_name.is_empty() {
        state.config.default_timezone.parse()
    } else {
        tz_name.parse()
    }
    .unwrap_or(chrono_tz::Asia::Kolkata);
    Utc::now().with_timezone(&tz).date_naive()
}

fn gateway_keys(state: &AppState) -> AppResult<(&str, &str)> {
    match (
        state.config.razorpay_key_id.as_deref(),
        state.config.razorpay_key_secret.as_deref(),
    ) {
        (Some(key_id), Some(key_secret)) => Ok((key_id, key_secret)),
        _ => Err(AppError::Dependency(
            "Online payments are not configured. Set RAZORPAY_KEY_ID and RAZORPAY_KEY_SECRET."
                .to_string(),
        )),
    }
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
        .map_err(|_| AppError::Internal(format!("Invalid UUID '{value}'.")))
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

fn value_i64(row: &Value, key: &str) -> i64 {
    row.as_object()
        .and_then(|obj| obj.get(key))
        .and_then(|value| {
            value
                .as_i64()
                .or_else(|| value.as_f64().map(|f| f.round() as i64))
                .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
        })
        .unwrap_or(0)
}

fn value_i64_or(row: &Value, key: &str, default: i64) -> i64 {
    let parsed = value_i64(row, key);
    if parsed > 0 {
        parsed
    } else {
        default
    }
}

fn non_empty_opt(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(ToOwned::to_owned)
}

#[cfg(test)]
mod tests {
    use super::{allowed_transition, new_booking_ref};

    #[test]
    fn lifecycle_moves_forward_only() {
        assert!(allowed_transition("pending", "confirmed"));
        assert!(allowed_transition("confirmed", "checked_in"));
        assert!(allowed_transition("checked_in", "checked_out"));
        assert!(!allowed_transition("checked_out", "checked_in"));
        assert!(!allowed_transition("confirmed", "pending"));
    }

    #[test]
    fn side_exits_are_reachable_from_active_states() {
        for state in ["pending", "confirmed", "checked_in"] {
            assert!(allowed_transition(state, "cancelled"), "{state}");
            assert!(allowed_transition(state, "no_show"), "{state}");
            assert!(allowed_transition(state, "rejected"), "{state}");
        }
    }

    #[test]
    fn terminal_states_are_final() {
        for state in ["checked_out", "cancelled", "no_show", "rejected"] {
            for next in ["confirmed", "checked_in", "cancelled", "no_show"] {
                assert!(!allowed_transition(state, next), "{state} -> {next}");
            }
        }
    }

    #[test]
    fn booking_refs_are_prefixed_and_distinct() {
        let a = new_booking_ref();
        let b = new_booking_ref();
        assert!(a.starts_with("BK-"));
        assert_ne!(a, b);
    }
}
