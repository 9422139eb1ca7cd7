//! Auth API endpoints
//!
//! - POST /v1/auth/register - Register a new user
//! - POST /v1/auth/login - Login and get tokens
//! - POST /v1/auth/logout - Invalidate a refresh token
//! - POST /v1/auth/refresh-tokens - Rotate a refresh token
//! - POST /v1/auth/forgot-password - Mail a reset token
//! - POST /v1/auth/reset-password?token= - Set a new password
//! - POST /v1/auth/send-verification-email - Mail a verification token
//! - POST /v1/auth/verify-email?token= - Mark the email verified

use axum::{Json, Router, extract::State, http::StatusCode, routing::post};
use serde::Deserialize;

use crate::app::AppState;
use crate::core::auth::middleware::AuthUser;
use crate::core::auth::service::{
    AuthResponse, ForgotPasswordRequest, LoginRequest, RefreshTokenRequest, RegisterRequest,
    ResetPasswordRequest,
};
use crate::core::auth::tokens::AuthTokens;
use crate::core::error::AppError;
use crate::core::extract::{JsonBody, QueryParams};

/// `?token=` on the single-use endpoints
#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    pub token: String,
}

pub fn auth_router() -> Router<AppState> {
    Router::new()
        .route("/v1/auth/register", post(register_handler))
        .route("/v1/auth/login", post(login_handler))
        .route("/v1/auth/logout", post(logout_handler))
        .route("/v1/auth/refresh-tokens", post(refresh_tokens_handler))
        .route("/v1/auth/forgot-password", post(forgot_password_handler))
        .route("/v1/auth/reset-password", post(reset_password_handler))
        .route(
            "/v1/auth/send-verification-email",
            post(send_verification_email_handler),
        )
        .route("/v1/auth/verify-email", post(verify_email_handler))
}

/// POST /v1/auth/register
async fn register_handler(
    State(state): State<AppState>,
    JsonBody(request): JsonBody<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), AppError> {
    let response = state.auth.register(request).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// POST /v1/auth/login
async fn login_handler(
    State(state): State<AppState>,
    JsonBody(request): JsonBody<LoginRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    Ok(Json(state.auth.login(request).await?))
}

/// POST /v1/auth/logout
async fn logout_handler(
    State(state): State<AppState>,
    JsonBody(request): JsonBody<RefreshTokenRequest>,
) -> Result<StatusCode, AppError> {
    state.auth.logout(&request.refresh_token).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /v1/auth/refresh-tokens
async fn refresh_tokens_handler(
    State(state): State<AppState>,
    JsonBody(request): JsonBody<RefreshTokenRequest>,
) -> Result<Json<AuthTokens>, AppError> {
    Ok(Json(state.auth.refresh(&request.refresh_token).await?))
}

/// POST /v1/auth/forgot-password
///
/// 204 whether or not the address is registered.
async fn forgot_password_handler(
    State(state): State<AppState>,
    JsonBody(request): JsonBody<ForgotPasswordRequest>,
) -> Result<StatusCode, AppError> {
    state.auth.forgot_password(&request.email).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /v1/auth/reset-password?token=
async fn reset_password_handler(
    State(state): State<AppState>,
    QueryParams(query): QueryParams<TokenQuery>,
    JsonBody(request): JsonBody<ResetPasswordRequest>,
) -> Result<StatusCode, AppError> {
    state
        .auth
        .reset_password(&query.token, &request.password)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /v1/auth/send-verification-email
async fn send_verification_email_handler(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<StatusCode, AppError> {
    state.auth.send_verification_email(user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /v1/auth/verify-email?token=
async fn verify_email_handler(
    State(state): State<AppState>,
    QueryParams(query): QueryParams<TokenQuery>,
) -> Result<StatusCode, AppError> {
    state.auth.verify_email(&query.token).await?;
    Ok(StatusCode::NO_CONTENT)
}
