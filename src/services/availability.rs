use chrono::NaiveDate;
use serde_json::{json, Map, Value};
use sqlx::{PgConnection, PgPool, Row};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    repository::table_service::create_row_tx,
};

/// Where an inventory hold came from. Platform holds are owned by a
/// booking; the rest are partner-managed blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldSource {
    Platform,
    WalkIn,
    External,
    ManualBlock,
}

impl HoldSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Platform => "platform",
            Self::WalkIn => "walk_in",
            Self::External => "external",
            Self::ManualBlock => "manual_block",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "platform" => Some(Self::Platform),
            "walk_in" => Some(Self::WalkIn),
            "external" => Some(Self::External),
            "manual_block" => Some(Self::ManualBlock),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewHold {
    pub property_id: Uuid,
    pub room_type_id: Uuid,
    pub source: HoldSource,
    pub reference_id: Option<Uuid>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub units: i64,
}

/// Half-open interval overlap: `[a_start, a_end)` vs `[b_start, b_end)`.
/// A checkout day never collides with the same day's check-in.
pub fn overlaps(
    a_start: NaiveDate,
    a_end: NaiveDate,
    b_start: NaiveDate,
    b_end: NaiveDate,
) -> bool {
    a_start < b_end && a_end > b_start
}

/// Units still free for the range: total inventory minus every hold that
/// intersects it.
pub async fn check_capacity(
    pool: &PgPool,
    room_type_id: &str,
    start: NaiveDate,
    end: NaiveDate,
) -> AppResult<i64> {
    let row = sqlx::query(
        "SELECT rt.total_inventory::bigint
                - COALESCE((SELECT SUM(l.units)
                            FROM availability_ledger l
                            WHERE l.room_type_id = rt.id
                              AND l.start_date < $3
                              AND l.end_date > $2), 0)::bigint AS available
         FROM room_types rt
         WHERE rt.id = $1::uuid",
    )
    .bind(room_type_id)
    .bind(start)
    .bind(end)
    .fetch_optional(pool)
    .await
    .map_err(map_ledger_error)?
    .ok_or_else(|| AppError::NotFound("Room type not found.".to_string()))?;

    Ok(row.try_get::<i64, _>("available").unwrap_or(0))
}

/// Insert a hold after re-validating capacity inside the caller's
/// transaction. The `FOR UPDATE` lock on the room type serializes
/// concurrent reserves for the same room, so two requests can no longer
/// both observe free capacity and both insert.
pub async fn reserve(conn: &mut PgConnection, hold: &NewHold) -> AppResult<Value> {
    if hold.units <= 0 {
        return Err(AppError::BadRequest(
            "A hold must cover at least one unit.".to_string(),
        ));
    }
    if hold.end_date <= hold.start_date {
        return Err(AppError::BadRequest(
            "Hold end date must be after the start date.".to_string(),
        ));
    }

    let total_row = sqlx::query(
        "SELECT total_inventory::bigint AS total FROM room_types WHERE id = $1 FOR UPDATE",
    )
    .bind(hold.room_type_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(map_ledger_error)?
    .ok_or_else(|| AppError::NotFound("Room type not found.".to_string()))?;
    let total = total_row.try_get::<i64, _>("total").unwrap_or(0);

    let held_row = sqlx::query(
        "SELECT COALESCE(SUM(units), 0)::bigint AS held
         FROM availability_ledger
         WHERE room_type_id = $1 AND start_date < $3 AND end_date > $2",
    )
    .bind(hold.room_type_id)
    .bind(hold.start_date)
    .bind(hold.end_date)
    .fetch_one(&mut *conn)
    .await
    .map_err(map_ledger_error)?;
    let held = held_row.try_get::<i64, _>("held").unwrap_or(0);

    if total - held < hold.units {
        return Err(AppError::InsufficientCapacity(format!(
            "Only {} unit(s) available for the selected dates.",
            (total - held).max(0)
        )));
    }

    let mut payload = Map::new();
    payload.insert(
        "property_id".to_string(),
        Value::String(hold.property_id.to_string()),
    );
    payload.insert(
        "room_type_id".to_string(),
        Value::String(hold.room_type_id.to_string()),
    );
    payload.insert(
        "source".to_string(),
        Value::String(hold.source.as_str().to_string()),
    );
    if let Some(reference) = hold.reference_id {
        payload.insert(
            "reference_id".to_string(),
            Value::String(reference.to_string()),
        );
    }
    payload.insert(
        "start_date".to_string(),
        Value::String(hold.start_date.to_string()),
    );
    payload.insert(
        "end_date".to_string(),
        Value::String(hold.end_date.to_string()),
    );
    payload.insert("units".to_string(), json!(hold.units));

    create_row_tx(conn, "availability_ledger", &payload).await
}

/// Drop every hold a booking owns. Used on cancellation and no-show.
pub async fn release(conn: &mut PgConnection, reference_id: Uuid) -> AppResult<u64> {
    let result = sqlx::query("DELETE FROM availability_ledger WHERE reference_id = $1")
        .bind(reference_id)
        .execute(&mut *conn)
        .await
        .map_err(map_ledger_error)?;
    Ok(result.rows_affected())
}

/// Early checkout: shorten the hold so the remaining nights go back on
/// sale. Holds already ending by `new_end` are left untouched.
pub async fn truncate_hold(
    conn: &mut PgConnection,
    reference_id: Uuid,
    new_end: NaiveDate,
) -> AppResult<u64> {
    let result = sqlx::query(
        "UPDATE availability_ledger
         SET end_date = GREATEST($2, start_date)
         WHERE reference_id = $1 AND end_date > $2",
    )
    .bind(reference_id)
    .bind(new_end)
    .execute(&mut *conn)
    .await
    .map_err(map_ledger_error)?;
    Ok(result.rows_affected())
}

fn map_ledger_error(error: sqlx::Error) -> AppError {
    tracing::error!(db_error = %error, "availability ledger operation failed");
    AppError::Dependency("Availability ledger operation failed.".to_string())
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::{overlaps, HoldSource};

    fn day(raw: &str) -> NaiveDate {
        NaiveDate::parse_from_str(raw, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn half_open_overlap_semantics() {
        // Back-to-back stays share a turnover day without colliding.
        assert!(!overlaps(
            day("2026-03-01"),
            day("2026-03-05"),
            day("2026-03-05"),
            day("2026-03-08")
        ));
        assert!(overlaps(
            day("2026-03-01"),
            day("2026-03-05"),
            day("2026-03-04"),
            day("2026-03-08")
        ));
        assert!(overlaps(
            day("2026-03-02"),
            day("2026-03-03"),
            day("2026-03-01"),
            day("2026-03-10")
        ));
        assert!(!overlaps(
            day("2026-03-01"),
            day("2026-03-02"),
            day("2026-03-02"),
            day("2026-03-03")
        ));
    }

    #[test]
    fn hold_sources_round_trip() {
        for source in [
            HoldSource::Platform,
            HoldSource::WalkIn,
            HoldSource::External,
            HoldSource::ManualBlock,
        ] {
            assert_eq!(HoldSource::parse(source.as_str()), Some(source));
        }
        assert_eq!(HoldSource::parse("ota"), None);
    }
}
