use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::{
    auth::{require_principal, OwnerKind},
    error::{AppError, AppResult},
    ownership::require_admin,
    repository::table_service::{create_row_tx, get_row, list_rows, update_row_tx},
    schemas::{
        clamp_limit_in_range, validate_input, WalletTransactionsQuery, WithdrawInput,
        WithdrawalPath, WithdrawalStatusInput, WithdrawalsQuery,
    },
    services::{
        audit::write_audit_log,
        wallet::{self, TxnCategory},
    },
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/wallet", axum::routing::get(get_wallet))
        .route(
            "/wallet/transactions",
            axum::routing::get(list_transactions),
        )
        .route("/wallet/audit", axum::routing::get(audit_wallet))
        .route("/wallet/withdraw", axum::routing::post(request_withdrawal))
        .route("/withdrawals", axum::routing::get(list_withdrawals))
        .route(
            "/withdrawals/{withdrawal_id}/status",
            axum::routing::put(update_withdrawal_status),
        )
}

/// The caller's wallet. Admins see the treasury.
async fn get_wallet(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let principal = require_principal(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let (owner_id, owner_kind) = wallet_owner(&state, &principal)?;
    let row = wallet::fetch_or_create_wallet(pool, owner_id, owner_kind).await?;

    Ok(Json(json!({ "success": true, "wallet": row })))
}

async fn list_transactions(
    State(state): State<AppState>,
    Query(query): Query<WalletTransactionsQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let principal = require_principal(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let (owner_id, owner_kind) = wallet_owner(&state, &principal)?;
    let row = wallet::fetch_or_create_wallet(pool, owner_id, owner_kind).await?;
    let wallet_id = value_str(&row, "id");

    let mut filters = Map::new();
    filters.insert("wallet_id".to_string(), Value::String(wallet_id));
    if let Some(category) = query
        .category
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        filters.insert("category".to_string(), Value::String(category.to_string()));
    }

    let rows = list_rows(
        pool,
        "wallet_transactions",
        Some(&filters),
        clamp_limit_in_range(query.limit, 1, 500),
        0,
        "created_at",
        false,
    )
    .await?;

    Ok(Json(json!({ "success": true, "transactions": rows })))
}

/// Replay the wallet's transaction log and compare it with the stored
/// balance — the append-only ledger must reproduce the balance exactly.
async fn audit_wallet(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let principal = require_principal(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let (owner_id, owner_kind) = wallet_owner(&state, &principal)?;
    let row = wallet::fetch_or_create_wallet(pool, owner_id, owner_kind).await?;
    let wallet_id = Uuid::parse_str(&value_str(&row, "id"))
        .map_err(|_| AppError::Internal("Wallet row has no id.".to_string()))?;

    let recorded = row
        .as_object()
        .and_then(|obj| obj.get("balance"))
        .and_then(Value::as_i64)
        .unwrap_or(0);
    let replayed = wallet::replayed_balance(pool, wallet_id).await?;

    if recorded != replayed {
        tracing::error!(
            wallet = %wallet_id,
            recorded,
            replayed,
            "wallet balance does not match its transaction log"
        );
    }

    Ok(Json(json!({
        "success": true,
        "wallet_id": wallet_id.to_string(),
        "recorded_balance": recorded,
        "replayed_balance": replayed,
        "consistent": recorded == replayed,
    })))
}

/// Partner payout request: the amount leaves the wallet immediately and a
/// withdrawal row tracks the payout until it completes or fails.
async fn request_withdrawal(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<WithdrawInput>,
) -> AppResult<impl IntoResponse> {
    let principal = require_principal(&state, &headers).await?;
    let pool = db_pool(&state)?;
    validate_input(&payload)?;

    if principal.kind == OwnerKind::User {
        return Err(AppError::Forbidden(
            "Forbidden: only partners can request withdrawals.".to_string(),
        ));
    }
    if payload.amount < state.config.min_withdrawal_amount {
        return Err(AppError::BadRequest(format!(
            "Minimum withdrawal amount is {}.",
            state.config.min_withdrawal_amount
        )));
    }

    let (owner_id, owner_kind) = wallet_owner(&state, &principal)?;
    let wallet_row = wallet::fetch_or_create_wallet(pool, owner_id, owner_kind).await?;
    let wallet_id = Uuid::parse_str(&value_str(&wallet_row, "id"))
        .map_err(|_| AppError::Internal("Wallet row has no id.".to_string()))?;

    let bank_name = payload
        .bank_name
        .clone()
        .or_else(|| value_str_opt(&wallet_row, "bank_name"));
    let account_number = payload
        .account_number
        .clone()
        .or_else(|| value_str_opt(&wallet_row, "bank_account_number"));
    let account_holder = payload
        .account_holder
        .clone()
        .or_else(|| value_str_opt(&wallet_row, "bank_account_holder"));
    let ifsc_code = payload
        .ifsc_code
        .clone()
        .or_else(|| value_str_opt(&wallet_row, "bank_ifsc_code"));
    if account_number.is_none() || account_holder.is_none() {
        return Err(AppError::BadRequest(
            "Bank account details are required for a withdrawal.".to_string(),
        ));
    }

    let mut tx = begin_tx(pool).await?;
    wallet::debit_tx(
        &mut tx,
        wallet_id,
        payload.amount,
        TxnCategory::Withdrawal,
        "Withdrawal request",
        "",
    )
    .await?;

    let mut record = Map::new();
    record.insert(
        "wallet_id".to_string(),
        Value::String(wallet_id.to_string()),
    );
    record.insert("amount".to_string(), json!(payload.amount));
    record.insert("status".to_string(), Value::String("pending".to_string()));
    if let Some(value) = bank_name {
        record.insert("bank_name".to_string(), Value::String(value));
    }
    if let Some(value) = account_number {
        record.insert("account_number".to_string(), Value::String(value));
    }
    if let Some(value) = account_holder {
        record.insert("account_holder".to_string(), Value::String(value));
    }
    if let Some(value) = ifsc_code {
        record.insert("ifsc_code".to_string(), Value::String(value));
    }
    let created = create_row_tx(&mut tx, "withdrawals", &record).await?;

    tx.commit()
        .await
        .map_err(|error| AppError::Dependency(format!("Could not commit withdrawal: {error}")))?;

    write_audit_log(
        state.db_pool.as_ref(),
        Some(&principal.id_string()),
        "create",
        "withdrawals",
        Some(&value_str(&created, "id")),
        None,
        Some(created.clone()),
    )
    .await;

    Ok((
        axum::http::StatusCode::CREATED,
        Json(json!({ "success": true, "withdrawal": created })),
    ))
}

async fn list_withdrawals(
    State(state): State<AppState>,
    Query(query): Query<WithdrawalsQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let principal = require_principal(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let mut filters = Map::new();
    if !principal.is_admin() {
        let (owner_id, owner_kind) = wallet_owner(&state, &principal)?;
        let wallet_row = wallet::fetch_or_create_wallet(pool, owner_id, owner_kind).await?;
        filters.insert(
            "wallet_id".to_string(),
            Value::String(value_str(&wallet_row, "id")),
        );
    }
    if let Some(status) = query
        .status
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        filters.insert("status".to_string(), Value::String(status.to_string()));
    }

    let rows = list_rows(
        pool,
        "withdrawals",
        Some(&filters),
        clamp_limit_in_range(query.limit, 1, 500),
        0,
        "created_at",
        false,
    )
    .await?;

    Ok(Json(json!({ "success": true, "withdrawals": rows })))
}

/// Admin payout processing. A failed withdrawal puts the money back in the
/// same transaction that flips the status.
async fn update_withdrawal_status(
    State(state): State<AppState>,
    Path(path): Path<WithdrawalPath>,
    headers: HeaderMap,
    Json(payload): Json<WithdrawalStatusInput>,
) -> AppResult<Json<Value>> {
    let principal = require_principal(&state, &headers).await?;
    require_admin(&principal)?;
    let pool = db_pool(&state)?;

    let withdrawal = get_row(pool, "withdrawals", &path.withdrawal_id, "id").await?;
    let current = value_str(&withdrawal, "status");
    let next = payload.status.trim().to_ascii_lowercase();

    if !allowed_withdrawal_transition(&current, &next) {
        return Err(AppError::UnprocessableEntity(format!(
            "Invalid withdrawal transition: {current} -> {next}"
        )));
    }

    let mut patch = Map::new();
    patch.insert("status".to_string(), Value::String(next.clone()));
    if let Some(payout_ref) = payload
        .payout_ref
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        patch.insert(
            "payout_ref".to_string(),
            Value::String(payout_ref.to_string()),
        );
    }
    if let Some(reason) = payload
        .failure_reason
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        patch.insert(
            "failure_reason".to_string(),
            Value::String(reason.to_string()),
        );
    }

    let mut tx = begin_tx(pool).await?;
    let updated = update_row_tx(&mut tx, "withdrawals", &path.withdrawal_id, &patch, "id").await?;

    if next == "failed" {
        let wallet_id = Uuid::parse_str(&value_str(&withdrawal, "wallet_id"))
            .map_err(|_| AppError::Internal("Withdrawal has no wallet id.".to_string()))?;
        let amount = withdrawal
            .as_object()
            .and_then(|obj| obj.get("amount"))
            .and_then(Value::as_i64)
            .unwrap_or(0);
        if amount > 0 {
            wallet::credit_tx(
                &mut tx,
                wallet_id,
                amount,
                TxnCategory::WithdrawalRefund,
                "Failed withdrawal returned",
                &path.withdrawal_id,
            )
            .await?;
        }
    }

    tx.commit().await.map_err(|error| {
        AppError::Dependency(format!("Could not commit withdrawal update: {error}"))
    })?;

    write_audit_log(
        state.db_pool.as_ref(),
        Some(&principal.id_string()),
        "status_transition",
        "withdrawals",
        Some(&path.withdrawal_id),
        Some(withdrawal),
        Some(updated.clone()),
    )
    .await;

    Ok(Json(json!({ "success": true, "withdrawal": updated })))
}

fn allowed_withdrawal_transition(current: &str, next: &str) -> bool {
    match current {
        "pending" => matches!(next, "processing" | "completed" | "failed"),
        "processing" => matches!(next, "completed" | "failed"),
        "completed" | "failed" => false,
        _ => false,
    }
}

/// Admins operate the treasury wallet; everyone else owns their own.
fn wallet_owner(
    state: &AppState,
    principal: &crate::auth::Principal,
) -> AppResult<(Uuid, OwnerKind)> {
    if principal.is_admin() {
        return Ok((wallet::treasury_owner_id(state)?, OwnerKind::Admin));
    }
    Ok((principal.id, principal.kind))
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

fn value_str_opt(row: &Value, key: &str) -> Option<String> {
    row.as_object()
        .and_then(|obj| obj.get(key))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
}

#[cfg(test)]
mod tests {
    use super::allowed_withdrawal_transition;

    #[test]
    fn payout_lifecycle_is_linear() {
        assert!(allowed_withdrawal_transition("pending", "processing"));
        assert!(allowed_withdrawal_transition("pending", "completed"));
        assert!(allowed_withdrawal_transition("pending", "failed"));
        assert!(allowed_withdrawal_transition("processing", "completed"));
        assert!(allowed_withdrawal_transition("processing", "failed"));
        assert!(!allowed_withdrawal_transition("completed", "failed"));
        assert!(!allowed_withdrawal_transition("failed", "pending"));
        assert!(!allowed_withdrawal_transition("processing", "pending"));
    }
}
