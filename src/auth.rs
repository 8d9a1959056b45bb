use axum::http::HeaderMap;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use sqlx::Row;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    state::AppState,
};

/// Which collection an account (and therefore a wallet owner) belongs to.
/// Resolved once at the request boundary; business logic matches on the
/// typed variant instead of re-dispatching on role strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnerKind {
    User,
    Partner,
    Admin,
}

impl OwnerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Partner => "partner",
            Self::Admin => "admin",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "user" => Some(Self::User),
            "partner" => Some(Self::Partner),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }
}

/// The authenticated caller.
#[derive(Debug, Clone, Copy)]
pub struct Principal {
    pub id: Uuid,
    pub kind: OwnerKind,
}

impl Principal {
    pub fn is_admin(&self) -> bool {
        self.kind == OwnerKind::Admin
    }

    pub fn id_string(&self) -> String {
        self.id.to_string()
    }
}

#[derive(Debug, Deserialize)]
struct AuthClaims {
    sub: String,
    #[allow(dead_code)]
    exp: usize,
}

pub async fn require_principal(state: &AppState, headers: &HeaderMap) -> AppResult<Principal> {
    if state.config.auth_dev_overrides_enabled() {
        if let Some(principal) = dev_override_principal(headers)? {
            return Ok(principal);
        }
    }

    let token = bearer_token(headers).ok_or_else(|| {
        AppError::Unauthorized("Unauthorized: missing bearer token.".to_string())
    })?;

    let secret = state.config.jwt_secret.as_deref().ok_or_else(|| {
        AppError::Dependency("Authentication is not configured. Set JWT_SECRET.".to_string())
    })?;

    let claims = decode::<AuthClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )
    .map_err(|_| AppError::Unauthorized("Unauthorized: invalid token.".to_string()))?
    .claims;

    let user_id = Uuid::parse_str(claims.sub.trim())
        .map_err(|_| AppError::Unauthorized("Unauthorized: invalid subject.".to_string()))?;

    let kind = resolve_account_kind(state, user_id).await?;
    Ok(Principal { id: user_id, kind })
}

/// The account row is the source of truth for the role, not the token.
async fn resolve_account_kind(state: &AppState, user_id: Uuid) -> AppResult<OwnerKind> {
    let cache_key = user_id.to_string();
    if let Some(role) = state.principal_cache.get(&cache_key).await {
        return OwnerKind::parse(&role)
            .ok_or_else(|| AppError::Internal("Unknown account role.".to_string()));
    }

    let pool = state.db_pool.as_ref().ok_or_else(|| {
        AppError::Dependency("Database is not configured. Set DATABASE_URL.".to_string())
    })?;

    let row = sqlx::query(
        "SELECT role::text AS role, is_active FROM app_users WHERE id = $1 LIMIT 1",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await
    .map_err(|error| AppError::Dependency(format!("Account lookup failed: {error}")))?
    .ok_or_else(|| AppError::Unauthorized("Unauthorized: unknown account.".to_string()))?;

    let is_active = row.try_get::<bool, _>("is_active").unwrap_or(false);
    if !is_active {
        return Err(AppError::Forbidden(
            "Forbidden: account is deactivated.".to_string(),
        ));
    }

    let role = row.try_get::<String, _>("role").unwrap_or_default();
    let kind = OwnerKind::parse(&role)
        .ok_or_else(|| AppError::Internal(format!("Unknown account role '{role}'.")))?;

    state.principal_cache.insert(cache_key, role).await;
    Ok(kind)
}

fn dev_override_principal(headers: &HeaderMap) -> AppResult<Option<Principal>> {
    let Some(raw_id) = headers
        .get("x-user-id")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
    else {
        return Ok(None);
    };

    let id = Uuid::parse_str(raw_id)
        .map_err(|_| AppError::Unauthorized("Unauthorized: invalid x-user-id.".to_string()))?;

    let kind = headers
        .get("x-user-role")
        .and_then(|value| value.to_str().ok())
        .and_then(OwnerKind::parse)
        .unwrap_or(OwnerKind::User);

    Ok(Some(Principal { id, kind }))
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::OwnerKind;

    #[test]
    fn owner_kind_round_trips() {
        for kind in [OwnerKind::User, OwnerKind::Partner, OwnerKind::Admin] {
            assert_eq!(OwnerKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(OwnerKind::parse(" Partner "), Some(OwnerKind::Partner));
        assert_eq!(OwnerKind::parse("moderator"), None);
    }
}
