//! Access layer: resolves the bearer token on each request into a `Caller`.
//!
//! Token issuance lives with the external auth provider; this module only
//! looks tokens up. Every handler receives the resolved caller explicitly.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use uuid::Uuid;

use crate::error::AppError;
use crate::AppState;

/// An authenticated principal. Staff callers may act on any cart or item
/// and manage the catalog; owners are confined to their own cart.
#[derive(Debug, Clone, Copy, sqlx::FromRow)]
pub struct Caller {
    pub id: Uuid,
    pub is_staff: bool,
}

impl Caller {
    pub fn require_staff(&self) -> Result<(), AppError> {
        if self.is_staff {
            Ok(())
        } else {
            Err(AppError::Forbidden(
                "You do not have permission to perform this action.".into(),
            ))
        }
    }
}

pub(crate) fn bearer_token(header: &str) -> Option<&str> {
    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

#[async_trait]
impl FromRequestParts<AppState> for Caller {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(AppError::Unauthorized)?;
        let token = bearer_token(header).ok_or(AppError::Unauthorized)?;

        sqlx::query_as::<_, Caller>(
            "SELECT u.id, u.is_staff FROM auth_tokens t \
             JOIN users u ON u.id = t.user_id WHERE t.token = $1",
        )
        .bind(token)
        .fetch_optional(&state.db)
        .await?
        .ok_or(AppError::Unauthorized)
    }
}
