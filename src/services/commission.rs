use sqlx::{PgPool, Row};

use crate::{error::AppResult, state::AppState};

/// Resolve the commission percentage for a partner at booking time.
///
/// An active, unexpired subscription plan overrides the platform default.
/// The result is looked up per booking (cached briefly), never stored on
/// the partner, so plan changes do not rewrite historical bookings.
pub async fn resolve_commission_percent(
    state: &AppState,
    pool: &PgPool,
    partner_id: &str,
) -> AppResult<f64> {
    let cache_key = partner_id.to_string();
    if let Some(percent) = state.commission_cache.get(&cache_key).await {
        return Ok(percent);
    }

    let percent = subscription_commission(pool, partner_id)
        .await?
        .unwrap_or(state.config.platform_commission_percent);

    state.commission_cache.insert(cache_key, percent).await;
    Ok(percent)
}

async fn subscription_commission(pool: &PgPool, partner_id: &str) -> AppResult<Option<f64>> {
    let row = sqlx::query(
        "SELECT p.commission_percentage::float8 AS commission_percentage
         FROM partner_subscriptions s
         JOIN subscription_plans p ON p.id = s.plan_id
         WHERE s.partner_id = $1::uuid
           AND s.status = 'active'
           AND s.expires_at > now()
         ORDER BY s.expires_at DESC
         LIMIT 1",
    )
    .bind(partner_id)
    .fetch_optional(pool)
    .await
    .map_err(|error| {
        crate::error::AppError::Dependency(format!("Subscription lookup failed: {error}"))
    })?;

    Ok(row.and_then(|r| r.try_get::<f64, _>("commission_percentage").ok()))
}
