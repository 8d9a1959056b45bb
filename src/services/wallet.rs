use serde_json::{Map, Value};
use sqlx::{PgConnection, PgPool, Row};
use uuid::Uuid;

use crate::{
    auth::OwnerKind,
    error::{AppError, AppResult},
    repository::table_service::{create_row, list_rows},
    state::AppState,
};

/// Ledger categories for wallet movements. The category decides whether a
/// debit may overdraw the wallet and how the earning/withdrawal counters
/// move; the strings are what lands in `wallet_transactions.category`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnCategory {
    /// Guest pays for a stay / partner receives their payout.
    BookingPayment,
    /// Partial wallet deduction parked with the treasury until checkout.
    BookingAdvance,
    /// Platform commission + tax arriving at the treasury.
    Commission,
    /// Partner fronts the platform cut (pay-at-hotel); may overdraw.
    CommissionDeduction,
    /// The front returned when a stay falls through.
    CommissionRefund,
    /// Guest refund on cancellation.
    Refund,
    /// Clawing back an already-paid amount on cancellation; may overdraw.
    RefundDeduction,
    /// No-show penalty moving the payout to the treasury; may overdraw.
    NoShowPenalty,
    Topup,
    Withdrawal,
    /// A failed withdrawal returning to the wallet.
    WithdrawalRefund,
}

impl TxnCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BookingPayment => "booking_payment",
            Self::BookingAdvance => "booking_advance",
            Self::Commission => "commission",
            Self::CommissionDeduction => "commission_deduction",
            Self::CommissionRefund => "commission_refund",
            Self::Refund => "refund",
            Self::RefundDeduction => "refund_deduction",
            Self::NoShowPenalty => "no_show_penalty",
            Self::Topup => "topup",
            Self::Withdrawal => "withdrawal",
            Self::WithdrawalRefund => "withdrawal_refund",
        }
    }

    /// Debits that represent the platform reclaiming money it already
    /// advanced are allowed to push a wallet negative.
    pub fn allows_overdraft(self) -> bool {
        matches!(
            self,
            Self::CommissionDeduction | Self::RefundDeduction | Self::NoShowPenalty
        )
    }

    /// Whether a credit in this category counts as genuine earnings.
    pub fn counts_as_earning(self) -> bool {
        matches!(
            self,
            Self::BookingPayment | Self::Commission | Self::NoShowPenalty
        )
    }

    /// Whether a debit in this category undoes previously counted earnings.
    pub fn reverses_earning(self) -> bool {
        matches!(self, Self::RefundDeduction | Self::NoShowPenalty)
    }
}

/// Find or create the wallet for `(owner_id, owner_kind)` and return its id.
/// The composite key makes one wallet per role-scope; the unique constraint
/// keeps concurrent first-touches from creating duplicates.
pub async fn ensure_wallet_tx(
    conn: &mut PgConnection,
    owner_id: Uuid,
    owner_kind: OwnerKind,
) -> AppResult<Uuid> {
    sqlx::query(
        "INSERT INTO wallets (owner_id, owner_kind)
         VALUES ($1, $2)
         ON CONFLICT (owner_id, owner_kind) DO NOTHING",
    )
    .bind(owner_id)
    .bind(owner_kind.as_str())
    .execute(&mut *conn)
    .await
    .map_err(map_wallet_error)?;

    let row = sqlx::query(
        "SELECT id FROM wallets WHERE owner_id = $1 AND owner_kind = $2 LIMIT 1",
    )
    .bind(owner_id)
    .bind(owner_kind.as_str())
    .fetch_one(&mut *conn)
    .await
    .map_err(map_wallet_error)?;

    row.try_get::<Uuid, _>("id")
        .map_err(|_| AppError::Internal("Wallet row is missing an id.".to_string()))
}

/// Credit a wallet and append the matching transaction row.
///
/// The balance mutation is a single conditional UPDATE so concurrent
/// movements on the same wallet serialize at the database row; the
/// transaction insert rides the same connection, so both land or neither.
pub async fn credit_tx(
    conn: &mut PgConnection,
    wallet_id: Uuid,
    amount: i64,
    category: TxnCategory,
    description: &str,
    reference: &str,
) -> AppResult<i64> {
    if amount <= 0 {
        return Err(AppError::BadRequest(
            "Credit amount must be positive.".to_string(),
        ));
    }

    let row = sqlx::query(
        "UPDATE wallets
         SET balance = balance + $2,
             total_earnings = total_earnings + CASE WHEN $3 THEN $2 ELSE 0 END,
             updated_at = now()
         WHERE id = $1
         RETURNING balance::bigint AS balance",
    )
    .bind(wallet_id)
    .bind(amount)
    .bind(category.counts_as_earning())
    .fetch_optional(&mut *conn)
    .await
    .map_err(map_wallet_error)?
    .ok_or_else(|| AppError::NotFound("Wallet not found.".to_string()))?;

    let balance_after = row.try_get::<i64, _>("balance").unwrap_or_default();
    append_transaction(
        conn,
        wallet_id,
        "credit",
        category,
        amount,
        balance_after,
        description,
        reference,
    )
    .await?;
    Ok(balance_after)
}

/// Debit a wallet and append the matching transaction row.
///
/// Fails with `InsufficientCapacity` when the balance cannot cover the
/// amount, unless the category is on the overdraft allow-list. The
/// check-and-decrement is one conditional UPDATE — no read-then-write.
pub async fn debit_tx(
    conn: &mut PgConnection,
    wallet_id: Uuid,
    amount: i64,
    category: TxnCategory,
    description: &str,
    reference: &str,
) -> AppResult<i64> {
    if amount <= 0 {
        return Err(AppError::BadRequest(
            "Debit amount must be positive.".to_string(),
        ));
    }

    let row = sqlx::query(
        "UPDATE wallets
         SET balance = balance - $2,
             total_withdrawals = total_withdrawals + CASE WHEN $3 THEN $2 ELSE 0 END,
             total_earnings = total_earnings - CASE WHEN $4 THEN $2 ELSE 0 END,
             updated_at = now()
         WHERE id = $1 AND (balance >= $2 OR $5)
         RETURNING balance::bigint AS balance",
    )
    .bind(wallet_id)
    .bind(amount)
    .bind(category == TxnCategory::Withdrawal)
    .bind(category.reverses_earning())
    .bind(category.allows_overdraft())
    .fetch_optional(&mut *conn)
    .await
    .map_err(map_wallet_error)?;

    let Some(row) = row else {
        // Distinguish a missing wallet from an underfunded one.
        let exists = sqlx::query("SELECT 1 FROM wallets WHERE id = $1")
            .bind(wallet_id)
            .fetch_optional(&mut *conn)
            .await
            .map_err(map_wallet_error)?
            .is_some();
        if exists {
            return Err(AppError::InsufficientCapacity(
                "Insufficient wallet balance.".to_string(),
            ));
        }
        return Err(AppError::NotFound("Wallet not found.".to_string()));
    };

    let balance_after = row.try_get::<i64, _>("balance").unwrap_or_default();
    append_transaction(
        conn,
        wallet_id,
        "debit",
        category,
        amount,
        balance_after,
        description,
        reference,
    )
    .await?;
    Ok(balance_after)
}

#[allow(clippy::too_many_arguments)]
async fn append_transaction(
    conn: &mut PgConnection,
    wallet_id: Uuid,
    txn_type: &str,
    category: TxnCategory,
    amount: i64,
    balance_after: i64,
    description: &str,
    reference: &str,
) -> AppResult<()> {
    sqlx::query(
        "INSERT INTO wallet_transactions
             (wallet_id, txn_type, category, amount, balance_after, description, reference, status)
         VALUES ($1, $2, $3, $4, $5, $6, $7, 'completed')",
    )
    .bind(wallet_id)
    .bind(txn_type)
    .bind(category.as_str())
    .bind(amount)
    .bind(balance_after)
    .bind(description)
    .bind(reference)
    .execute(&mut *conn)
    .await
    .map_err(map_wallet_error)?;
    Ok(())
}

/// Read (or lazily create) the wallet row for an owner.
pub async fn fetch_or_create_wallet(
    pool: &PgPool,
    owner_id: Uuid,
    owner_kind: OwnerKind,
) -> AppResult<Value> {
    let mut filters = Map::new();
    filters.insert("owner_id".to_string(), Value::String(owner_id.to_string()));
    filters.insert(
        "owner_kind".to_string(),
        Value::String(owner_kind.as_str().to_string()),
    );
    let existing = list_rows(pool, "wallets", Some(&filters), 1, 0, "created_at", true).await?;
    if let Some(wallet) = existing.into_iter().next() {
        return Ok(wallet);
    }

    let mut payload = Map::new();
    payload.insert("owner_id".to_string(), Value::String(owner_id.to_string()));
    payload.insert(
        "owner_kind".to_string(),
        Value::String(owner_kind.as_str().to_string()),
    );
    match create_row(pool, "wallets", &payload).await {
        Ok(created) => Ok(created),
        // Lost a create race; the winner's row is the wallet.
        Err(AppError::Conflict(_)) => {
            let rows =
                list_rows(pool, "wallets", Some(&filters), 1, 0, "created_at", true).await?;
            rows.into_iter()
                .next()
                .ok_or_else(|| AppError::Internal("Wallet creation race lost twice.".to_string()))
        }
        Err(error) => Err(error),
    }
}

/// The platform treasury is provisioned from configuration at bootstrap,
/// never discovered by querying for an arbitrary admin account.
pub async fn bootstrap_treasury(state: &AppState) -> AppResult<Option<Uuid>> {
    let Some(pool) = state.db_pool.as_ref() else {
        return Ok(None);
    };
    let Some(raw_owner) = state.config.treasury_owner_id.as_deref() else {
        tracing::warn!("TREASURY_OWNER_ID is not set — bookings cannot settle until it is");
        return Ok(None);
    };
    let owner_id = Uuid::parse_str(raw_owner).map_err(|_| {
        AppError::Internal("TREASURY_OWNER_ID is not a valid UUID.".to_string())
    })?;

    let mut conn = pool
        .acquire()
        .await
        .map_err(|error| AppError::Dependency(format!("Database unavailable: {error}")))?;
    let wallet_id = ensure_wallet_tx(&mut conn, owner_id, OwnerKind::Admin).await?;
    tracing::info!(treasury_wallet = %wallet_id, "treasury wallet ready");
    Ok(Some(wallet_id))
}

pub fn treasury_owner_id(state: &AppState) -> AppResult<Uuid> {
    let raw = state.config.treasury_owner_id.as_deref().ok_or_else(|| {
        AppError::Dependency(
            "Treasury is not configured. Set TREASURY_OWNER_ID.".to_string(),
        )
    })?;
    Uuid::parse_str(raw)
        .map_err(|_| AppError::Internal("TREASURY_OWNER_ID is not a valid UUID.".to_string()))
}

/// Replay the append-only transaction log. Because every movement goes
/// through `credit_tx`/`debit_tx`, the signed sum must reproduce the
/// stored balance exactly; a mismatch means the ledger was tampered with
/// or a write bypassed the wallet store.
pub async fn replayed_balance(pool: &PgPool, wallet_id: Uuid) -> AppResult<i64> {
    let row = sqlx::query(
        "SELECT COALESCE(SUM(CASE WHEN txn_type = 'credit' THEN amount ELSE -amount END), 0)::bigint
             AS replayed
         FROM wallet_transactions
         WHERE wallet_id = $1",
    )
    .bind(wallet_id)
    .fetch_one(pool)
    .await
    .map_err(map_wallet_error)?;
    Ok(row.try_get::<i64, _>("replayed").unwrap_or(0))
}

fn map_wallet_error(error: sqlx::Error) -> AppError {
    tracing::error!(db_error = %error, "wallet operation failed");
    AppError::Dependency("Wallet operation failed.".to_string())
}

#[cfg(test)]
mod tests {
    use super::TxnCategory;

    #[test]
    fn overdraft_is_limited_to_clawback_categories() {
        assert!(TxnCategory::CommissionDeduction.allows_overdraft());
        assert!(TxnCategory::RefundDeduction.allows_overdraft());
        assert!(TxnCategory::NoShowPenalty.allows_overdraft());
        assert!(!TxnCategory::BookingPayment.allows_overdraft());
        assert!(!TxnCategory::Withdrawal.allows_overdraft());
        assert!(!TxnCategory::Topup.allows_overdraft());
    }

    #[test]
    fn earning_counters_exclude_returns() {
        assert!(TxnCategory::BookingPayment.counts_as_earning());
        assert!(TxnCategory::Commission.counts_as_earning());
        assert!(!TxnCategory::Topup.counts_as_earning());
        assert!(!TxnCategory::Refund.counts_as_earning());
        assert!(!TxnCategory::CommissionRefund.counts_as_earning());
        assert!(!TxnCategory::BookingAdvance.counts_as_earning());
    }

    #[test]
    fn earning_reversal_matches_reversal_debits() {
        assert!(TxnCategory::RefundDeduction.reverses_earning());
        assert!(TxnCategory::NoShowPenalty.reverses_earning());
        assert!(!TxnCategory::Withdrawal.reverses_earning());
        assert!(!TxnCategory::CommissionDeduction.reverses_earning());
    }

    #[test]
    fn category_strings_are_stable() {
        assert_eq!(TxnCategory::BookingPayment.as_str(), "booking_payment");
        assert_eq!(TxnCategory::NoShowPenalty.as_str(), "no_show_penalty");
        assert_eq!(TxnCategory::CommissionRefund.as_str(), "commission_refund");
    }
}
