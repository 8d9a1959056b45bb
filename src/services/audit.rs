use serde_json::{Map, Value};
use sqlx::PgPool;

use crate::repository::table_service::create_row;

/// Record who changed what. Fire-and-forget: audit must never fail the
/// request it describes.
#[allow(clippy::too_many_arguments)]
pub async fn write_audit_log(
    pool: Option<&PgPool>,
    actor_id: Option<&str>,
    action: &str,
    table_name: &str,
    entity_id: Option<&str>,
    before: Option<Value>,
    after: Option<Value>,
) {
    let Some(pool) = pool else {
        return;
    };

    let mut payload = Map::new();
    if let Some(actor) = actor_id.map(str::trim).filter(|v| !v.is_empty()) {
        payload.insert("actor_id".to_string(), Value::String(actor.to_string()));
    }
    payload.insert("action".to_string(), Value::String(action.to_string()));
    payload.insert(
        "table_name".to_string(),
        Value::String(table_name.to_string()),
    );
    if let Some(entity) = entity_id.map(str::trim).filter(|v| !v.is_empty()) {
        payload.insert("entity_id".to_string(), Value::String(entity.to_string()));
    }
    if let Some(before) = before {
        payload.insert("before".to_string(), before);
    }
    if let Some(after) = after {
        payload.insert("after".to_string(), after);
    }

    if let Err(error) = create_row(pool, "audit_logs", &payload).await {
        tracing::warn!(error = %error, table = %table_name, "failed to write audit log");
    }
}
