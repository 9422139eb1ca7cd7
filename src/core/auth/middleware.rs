//! Authorization extractors
//!
//! Handlers name the identity they need in their signature:
//!
//! ```rust,ignore
//! async fn handler(AuthUser(user_id): AuthUser) -> impl IntoResponse { ... }
//! async fn admin_only(RequireAdmin(admin): RequireAdmin) -> impl IntoResponse { ... }
//! ```
//!
//! Only access tokens authenticate a request. Refresh, reset and verify tokens
//! are rejected here even when their signature is valid.

use axum::{
    extract::{FromRequestParts, Path},
    http::{HeaderMap, header::AUTHORIZATION, request::Parts},
};
use uuid::Uuid;

use crate::app::AppState;
use crate::core::db::models::User;
use crate::core::error::AppError;

/// Pull the token out of an `Authorization: Bearer <token>` header
pub fn extract_bearer_token(headers: &HeaderMap) -> Result<&str, AppError> {
    let value = headers
        .get(AUTHORIZATION)
        .ok_or_else(AppError::unauthorized)?
        .to_str()
        .map_err(|_| AppError::unauthorized())?;

    match value.strip_prefix("Bearer ") {
        Some(token) if !token.is_empty() && !token.contains(' ') => Ok(token),
        _ => Err(AppError::unauthorized()),
    }
}

/// Subject of a valid access token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser(pub Uuid);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = extract_bearer_token(&parts.headers)?;
        let claims = state
            .tokens
            .verify_access(token)
            .map_err(|_| AppError::unauthorized())?;

        Ok(AuthUser(claims.sub))
    }
}

/// Load the authenticated user. A subject that no longer exists is treated
/// as unauthenticated.
async fn load_caller(parts: &mut Parts, state: &AppState) -> Result<User, AppError> {
    let AuthUser(user_id) = AuthUser::from_request_parts(parts, state).await?;

    state
        .users
        .find_user(user_id)
        .await?
        .ok_or_else(AppError::unauthorized)
}

/// Authenticated user holding the `admin` role
#[derive(Debug, Clone)]
pub struct RequireAdmin(pub User);

impl FromRequestParts<AppState> for RequireAdmin {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let user = load_caller(parts, state).await?;
        if !user.is_admin() {
            tracing::debug!(user_id = %user.id, "admin route refused");
            return Err(AppError::forbidden());
        }
        Ok(RequireAdmin(user))
    }
}

/// Caller acting on `/{id}`: either the user themselves or an admin
#[derive(Debug, Clone, Copy)]
pub struct RequireAdminOrSelf {
    pub caller: Uuid,
    pub target: Uuid,
}

impl FromRequestParts<AppState> for RequireAdminOrSelf {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let AuthUser(caller) = AuthUser::from_request_parts(parts, state).await?;
        let Path(target) = Path::<Uuid>::from_request_parts(parts, state)
            .await
            .map_err(|_| AppError::validation("Invalid user id"))?;

        if caller != target {
            let user = state
                .users
                .find_user(caller)
                .await?
                .ok_or_else(AppError::unauthorized)?;
            if !user.is_admin() {
                return Err(AppError::forbidden());
            }
        }

        Ok(RequireAdminOrSelf { caller, target })
    }
}
