use serde_json::{Map, Value};
use sqlx::PgPool;

use crate::repository::table_service::create_row;

/// Queue a notification for out-of-band delivery. The enqueue is
/// synchronous but best-effort: a booking must never fail (or block)
/// because the notification outbox is unhappy, so every error ends here
/// as a log line.
pub async fn dispatch(
    pool: Option<&PgPool>,
    target_user_id: &str,
    title: &str,
    body: &str,
    data: Value,
) {
    let Some(pool) = pool else {
        return;
    };
    if target_user_id.trim().is_empty() {
        return;
    }

    let mut payload = Map::new();
    payload.insert(
        "target_user_id".to_string(),
        Value::String(target_user_id.to_string()),
    );
    payload.insert("title".to_string(), Value::String(title.to_string()));
    payload.insert("body".to_string(), Value::String(body.to_string()));
    payload.insert("data".to_string(), data);
    payload.insert("status".to_string(), Value::String("queued".to_string()));

    if let Err(error) = create_row(pool, "notification_events", &payload).await {
        tracing::warn!(error = %error, target = %target_user_id, "failed to queue notification");
    }
}
