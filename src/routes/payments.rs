use axum::{
    extract::State,
    http::HeaderMap,
    Json,
};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::{
    auth::require_principal,
    error::{AppError, AppResult},
    repository::table_service::{create_row_tx, get_row, list_rows, update_row, update_row_tx},
    schemas::{validate_input, VerifyPaymentInput},
    services::{
        audit::write_audit_log,
        availability::{self, HoldSource, NewHold},
        coupons::{self, AppliedCoupon},
        notifications, razorpay,
        settlement::{self, BookingMoney},
        wallet,
    },
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/payments/verify", axum::routing::post(verify_payment))
        .route("/webhooks/razorpay", axum::routing::post(razorpay_webhook))
}

/// Checkout callback: the client returns from the gateway with the order,
/// payment and signature triple. On a valid signature the deferred booking
/// is materialized from the order's notes, fully paid.
async fn verify_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<VerifyPaymentInput>,
) -> AppResult<Json<Value>> {
    let principal = require_principal(&state, &headers).await?;
    let pool = db_pool(&state)?;
    validate_input(&payload)?;

    let key_secret = state.config.razorpay_key_secret.as_deref().ok_or_else(|| {
        AppError::Dependency("Online payments are not configured.".to_string())
    })?;

    if !razorpay::verify_payment_signature(
        &payload.razorpay_order_id,
        &payload.razorpay_payment_id,
        &payload.razorpay_signature,
        key_secret,
    ) {
        return Err(AppError::InvalidSignature(
            "Payment signature verification failed.".to_string(),
        ));
    }

    let order = get_row(
        pool,
        "payment_orders",
        &payload.razorpay_order_id,
        "gateway_order_id",
    )
    .await
    .map_err(|_| AppError::NotFound("Unknown payment order.".to_string()))?;

    if !principal.is_admin() && value_str(&order, "user_id") != principal.id_string() {
        return Err(AppError::Forbidden(
            "Forbidden: this payment belongs to another account.".to_string(),
        ));
    }

    let booking = materialize_order(
        &state,
        &order,
        &payload.razorpay_payment_id,
        Some(&principal.id_string()),
    )
    .await?;

    Ok(Json(json!({ "success": true, "booking": booking })))
}

/// Asynchronous gateway notifications. `payment.captured` funnels into the
/// same materialization path as the verify callback (idempotent);
/// `payment.failed` just marks the order.
async fn razorpay_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> AppResult<Json<Value>> {
    let pool = db_pool(&state)?;

    let webhook_secret = state
        .config
        .razorpay_webhook_secret
        .as_deref()
        .ok_or_else(|| {
            AppError::Dependency("Webhook secret is not configured.".to_string())
        })?;

    let signature = headers
        .get("x-razorpay-signature")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    if !razorpay::verify_webhook_signature(&body, signature, webhook_secret) {
        return Err(AppError::InvalidSignature(
            "Webhook signature verification failed.".to_string(),
        ));
    }

    let event: Value = serde_json::from_str(&body)
        .map_err(|_| AppError::BadRequest("Webhook body is not valid JSON.".to_string()))?;
    let event_type = event
        .get("event")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let payment = event
        .pointer("/payload/payment/entity")
        .cloned()
        .unwrap_or(Value::Null);
    let order_id = value_str(&payment, "order_id");
    let payment_id = value_str(&payment, "id");

    match event_type {
        "payment.captured" => {
            if order_id.is_empty() {
                return Err(AppError::BadRequest(
                    "Webhook payment has no order id.".to_string(),
                ));
            }
            let order = get_row(pool, "payment_orders", &order_id, "gateway_order_id")
                .await
                .map_err(|_| AppError::NotFound("Unknown payment order.".to_string()))?;
            materialize_order(&state, &order, &payment_id, None).await?;
        }
        "payment.failed" => {
            if !order_id.is_empty() {
                if let Ok(order) =
                    get_row(pool, "payment_orders", &order_id, "gateway_order_id").await
                {
                    if value_str(&order, "status") == "created" {
                        let mut patch = Map::new();
                        patch.insert(
                            "status".to_string(),
                            Value::String("failed".to_string()),
                        );
                        let _ = update_row(
                            pool,
                            "payment_orders",
                            &value_str(&order, "id"),
                            &patch,
                            "id",
                        )
                        .await;
                    }
                }
            }
        }
        _ => {
            tracing::debug!(event = %event_type, "ignoring razorpay webhook event");
        }
    }

    Ok(Json(json!({ "success": true })))
}

/// Turn a paid order into a confirmed booking: one transaction covering
/// the booking row, the inventory hold, the three-party settlement and the
/// order status flip. An already-paid order returns its booking unchanged.
async fn materialize_order(
    state: &AppState,
    order: &Value,
    payment_id: &str,
    actor_id: Option<&str>,
) -> AppResult<Value> {
    let pool = db_pool(state)?;
    let order_row_id = value_str(order, "id");
    let gateway_order_id = value_str(order, "gateway_order_id");

    if value_str(order, "status") == "paid" {
        let mut filters = Map::new();
        filters.insert(
            "gateway_order_id".to_string(),
            Value::String(gateway_order_id.clone()),
        );
        let existing = list_rows(pool, "bookings", Some(&filters), 1, 0, "created_at", false)
            .await?
            .into_iter()
            .next();
        return existing.ok_or_else(|| {
            AppError::Internal("Paid order has no materialized booking.".to_string())
        });
    }
    if value_str(order, "status") == "failed" {
        return Err(AppError::Gone(
            "This payment order already failed.".to_string(),
        ));
    }

    let notes = order
        .as_object()
        .and_then(|obj| obj.get("notes"))
        .and_then(Value::as_object)
        .cloned()
        .ok_or_else(|| {
            AppError::Internal("Payment order carries no booking payload.".to_string())
        })?;

    let property_id = string_field(&notes, "property_id")?;
    let property = get_row(pool, "properties", &property_id, "id").await?;
    let partner_id_str = value_str(&property, "partner_id");
    let partner_id = Uuid::parse_str(&partner_id_str)
        .map_err(|_| AppError::Internal("Property has no partner.".to_string()))?;

    let check_in = parse_date(&string_field(&notes, "check_in_date")?)?;
    let check_out = parse_date(&string_field(&notes, "check_out_date")?)?;
    let units = notes
        .get("units")
        .and_then(Value::as_i64)
        .filter(|value| *value > 0)
        .ok_or_else(|| AppError::Internal("Order payload has no unit count.".to_string()))?;

    let coupon = applied_coupon_from_notes(&notes);

    let mut record = notes.clone();
    record.remove("coupon_id");
    record.insert(
        "payment_status".to_string(),
        Value::String("paid".to_string()),
    );
    record.insert(
        "booking_status".to_string(),
        Value::String("confirmed".to_string()),
    );
    record.insert(
        "gateway_order_id".to_string(),
        Value::String(gateway_order_id.clone()),
    );
    record.insert(
        "gateway_payment_id".to_string(),
        Value::String(payment_id.to_string()),
    );

    let treasury_owner = wallet::treasury_owner_id(state)?;

    let mut tx = begin_tx(pool).await?;
    let created = create_row_tx(&mut tx, "bookings", &record).await?;
    let booking_id = Uuid::parse_str(&value_str(&created, "id"))
        .map_err(|_| AppError::Internal("Booking row has no id.".to_string()))?;

    availability::reserve(
        &mut tx,
        &NewHold {
            property_id: Uuid::parse_str(&property_id)
                .map_err(|_| AppError::Internal("Invalid property id.".to_string()))?,
            room_type_id: Uuid::parse_str(&string_field(&notes, "room_type_id")?)
                .map_err(|_| AppError::Internal("Invalid room type id.".to_string()))?,
            source: HoldSource::Platform,
            reference_id: Some(booking_id),
            start_date: check_in,
            end_date: check_out,
            units,
        },
    )
    .await?;

    let money = BookingMoney::from_row(&created, partner_id)?;
    let moves = settlement::plan_gateway_capture(&money);
    let wallets = settlement::resolve_party_wallets(&mut tx, &money, treasury_owner).await?;
    settlement::apply_moves(&mut tx, &wallets, &moves, &money.booking_ref).await?;

    let mut order_patch = Map::new();
    order_patch.insert("status".to_string(), Value::String("paid".to_string()));
    order_patch.insert(
        "gateway_payment_id".to_string(),
        Value::String(payment_id.to_string()),
    );
    update_row_tx(&mut tx, "payment_orders", &order_row_id, &order_patch, "id").await?;

    tx.commit()
        .await
        .map_err(|error| AppError::Dependency(format!("Could not commit payment: {error}")))?;

    let user_id = value_str(&created, "user_id");
    if let Some(coupon) = coupon.as_ref() {
        coupons::record_redemption(pool, coupon, &user_id, &booking_id.to_string()).await;
    }
    notifications::dispatch(
        state.db_pool.as_ref(),
        &user_id,
        "Booking confirmed",
        &format!(
            "Payment received — booking {} at {} is confirmed.",
            money.booking_ref,
            value_str(&property, "name")
        ),
        json!({ "booking_id": booking_id.to_string() }),
    )
    .await;
    notifications::dispatch(
        state.db_pool.as_ref(),
        &partner_id_str,
        "New paid booking",
        &format!("Booking {} was paid online.", money.booking_ref),
        json!({ "booking_id": booking_id.to_string() }),
    )
    .await;
    write_audit_log(
        state.db_pool.as_ref(),
        actor_id,
        "materialize",
        "bookings",
        Some(&booking_id.to_string()),
        None,
        Some(created.clone()),
    )
    .await;

    Ok(created)
}

fn applied_coupon_from_notes(notes: &Map<String, Value>) -> Option<AppliedCoupon> {
    let coupon_id = notes
        .get("coupon_id")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())?;
    let code = notes
        .get("coupon_code")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let discount = notes.get("discount").and_then(Value::as_i64).unwrap_or(0);
    Some(AppliedCoupon {
        coupon_id: coupon_id.to_string(),
        code: code.to_string(),
        discount,
    })
}

fn string_field(map: &Map<String, Value>, key: &str) -> AppResult<String> {
    map.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .ok_or_else(|| AppError::Internal(format!("Order payload is missing '{key}'.")))
}

fn parse_date(value: &str) -> AppResult<chrono::NaiveDate> {
    chrono::NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| AppError::BadRequest("Invalid ISO date format.".to_string()))
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

fn value_str(row: &Value, key: &str) -> String {
    row.as_object()
        .and_then(|obj| obj.get(key))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .unwrap_or_default()
}
