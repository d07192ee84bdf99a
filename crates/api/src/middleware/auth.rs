//! JWT-based authentication extractor for Axum handlers.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use catchpy_core::error::CoreError;
use catchpy_core::validate::{self, Operation, ADMIN_GROUP_ID};
use serde_json::Value;

use crate::auth::jwt::validate_token;
use crate::error::AppError;
use crate::state::AppState;

/// Authenticated caller extracted from a JWT Bearer token in the
/// `Authorization` header.
///
/// Use this as an extractor parameter in any handler that requires
/// authentication:
///
/// ```ignore
/// async fn my_handler(user: AuthUser) -> AppResult<Json<()>> {
///     tracing::info!(user_id = %user.user_id, "handling request");
///     Ok(Json(()))
/// }
/// ```
#[derive(Debug, Clone)]
pub struct AuthUser {
    /// The caller's user id on the consuming platform (from `claims.sub`).
    pub user_id: String,
    /// API consumer key the token was issued under.
    pub consumer: String,
    /// Operation overrides; `None` marks a legacy token granted all
    /// operations unconditionally.
    pub overrides: Option<Vec<String>>,
}

impl AuthUser {
    /// Whether this caller may perform `op` on the given annotation
    /// document.
    pub fn may(&self, doc: &Value, op: Operation) -> bool {
        validate::has_permission(doc, op, &self.user_id, self.overrides.as_deref())
    }

    /// Whether this caller short-circuits every permission check: the
    /// reserved admin group, or a token override for the operation.
    pub fn is_privileged(&self, op: Operation) -> bool {
        if self.user_id == ADMIN_GROUP_ID {
            return true;
        }
        match &self.overrides {
            None => true,
            Some(overrides) => overrides.iter().any(|o| o == op.override_token()),
        }
    }
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                AppError::Core(CoreError::Unauthorized(
                    "Missing Authorization header".into(),
                ))
            })?;

        let token = auth_header.strip_prefix("Bearer ").ok_or_else(|| {
            AppError::Core(CoreError::Unauthorized(
                "Invalid Authorization format. Expected: Bearer <token>".into(),
            ))
        })?;

        let claims = validate_token(token, &state.config.jwt).map_err(|_| {
            AppError::Core(CoreError::Unauthorized("Invalid or expired token".into()))
        })?;

        Ok(AuthUser {
            user_id: claims.sub,
            consumer: claims.consumer,
            overrides: claims.overrides,
        })
    }
}
