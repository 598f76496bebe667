use axum::http::HeaderMap;
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Resident,
    Operator,
}

impl Role {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "resident" => Some(Self::Resident),
            "operator" | "admin" => Some(Self::Operator),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub role: Role,
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
    role: String,
}

/// Resolve the acting identity from the request headers.
///
/// Session issuance lives in a separate auth service; this backend only
/// verifies the HS256 bearer token it minted. In non-production, header
/// overrides (`x-user-id`, `x-user-role`) can stand in for a token.
pub fn require_user(state: &AppState, headers: &HeaderMap) -> AppResult<AuthUser> {
    if state.config.auth_dev_overrides_enabled() {
        if let Some(user) = dev_override_user(headers) {
            return Ok(user);
        }
    }

    let token = bearer_token(headers)
        .ok_or_else(|| AppError::Unauthorized("Missing bearer token.".to_string()))?;

    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(state.config.jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| AppError::Unauthorized(format!("Invalid token: {e}")))?;

    let user_id = Uuid::parse_str(&data.claims.sub)
        .map_err(|_| AppError::Unauthorized("Token subject is not a valid id.".to_string()))?;
    let role = Role::parse(&data.claims.role)
        .ok_or_else(|| AppError::Unauthorized("Unknown role in token.".to_string()))?;

    Ok(AuthUser { user_id, role })
}

pub fn require_operator(state: &AppState, headers: &HeaderMap) -> AppResult<AuthUser> {
    let user = require_user(state, headers)?;
    if user.role != Role::Operator {
        return Err(AppError::Forbidden(
            "Operator role required for this action.".to_string(),
        ));
    }
    Ok(user)
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

fn dev_override_user(headers: &HeaderMap) -> Option<AuthUser> {
    let user_id = headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Uuid::parse_str(v.trim()).ok())?;
    let role = headers
        .get("x-user-role")
        .and_then(|v| v.to_str().ok())
        .and_then(Role::parse)
        .unwrap_or(Role::Resident);
    Some(AuthUser { user_id, role })
}

#[cfg(test)]
mod tests {
    use super::Role;

    #[test]
    fn parses_roles() {
        assert_eq!(Role::parse("resident"), Some(Role::Resident));
        assert_eq!(Role::parse("Operator"), Some(Role::Operator));
        assert_eq!(Role::parse("admin"), Some(Role::Operator));
        assert_eq!(Role::parse("guest"), None);
    }
}
