//! Authentication service
//!
//! Registration, login, logout, refresh, password reset and email
//! verification. Coordinates the user store, the token lifecycle and the
//! mailer.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use uuid::Uuid;

use crate::core::auth::jwt::TokenKind;
use crate::core::auth::password::{PasswordError, PasswordHasher};
use crate::core::auth::tokens::{AuthTokens, TokenError, TokenService};
use crate::core::db::models::{CreateUser, Role, UpdateUser, User, UserResponse};
use crate::core::db::repositories::{RepositoryError, UserStore};
use crate::core::email::{EmailError, Mailer};
use crate::core::error::AppError;

/// Authentication service error types
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("{0}")]
    Validation(String),

    #[error("Email already taken")]
    EmailTaken,

    /// Unknown email and wrong password alike
    #[error("Incorrect email or password")]
    InvalidCredentials,

    #[error("Not found")]
    TokenNotFound,

    #[error("Please authenticate")]
    InvalidRefreshToken,

    #[error("Password reset failed")]
    ResetFailed,

    #[error("Email verification failed")]
    VerifyFailed,

    #[error("User not found")]
    UserNotFound,

    #[error("Failed to send email: {0}")]
    Email(#[from] EmailError),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<RepositoryError> for AuthError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::EmailAlreadyExists => AuthError::EmailTaken,
            RepositoryError::NotFound => AuthError::UserNotFound,
            _ => AuthError::InternalError(err.to_string()),
        }
    }
}

impl From<PasswordError> for AuthError {
    fn from(err: PasswordError) -> Self {
        AuthError::InternalError(err.to_string())
    }
}

/// `invalid` replaces `TokenError::Invalid`; the rest are internal
fn token_failure(err: TokenError, invalid: AuthError) -> AuthError {
    match err {
        TokenError::Invalid => invalid,
        other => AuthError::InternalError(other.to_string()),
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Validation(message) => AppError::Validation(message),
            AuthError::EmailTaken => AppError::Conflict(err.to_string()),
            AuthError::InvalidCredentials
            | AuthError::InvalidRefreshToken
            | AuthError::ResetFailed
            | AuthError::VerifyFailed => AppError::Unauthorized(err.to_string()),
            AuthError::TokenNotFound | AuthError::UserNotFound => {
                AppError::NotFound(err.to_string())
            }
            AuthError::Email(_) | AuthError::InternalError(_) => AppError::internal(err),
        }
    }
}

// ============================================================================
// Input validation
// ============================================================================

pub const MIN_PASSWORD_LEN: usize = 8;

/// Shape check only: one `@`, non-empty local part, dotted domain
pub fn validate_email(email: &str) -> Result<(), String> {
    let invalid = || "Invalid email".to_string();

    let (local, domain) = email.split_once('@').ok_or_else(invalid)?;
    if local.is_empty() || domain.contains('@') || email.chars().any(char::is_whitespace) {
        return Err(invalid());
    }
    if !domain.contains('.') || domain.split('.').any(str::is_empty) {
        return Err(invalid());
    }

    Ok(())
}

/// At least 8 characters with one letter and one digit
pub fn validate_password(password: &str) -> Result<(), String> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        ));
    }

    let has_letter = password.chars().any(|c| c.is_alphabetic());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    if !has_letter || !has_digit {
        return Err("Password must contain at least one letter and one number".to_string());
    }

    Ok(())
}

pub fn validate_name(name: &str) -> Result<(), String> {
    if name.trim().is_empty() {
        return Err("Name is required".to_string());
    }
    if name.chars().count() > 255 {
        return Err("Name is too long".to_string());
    }
    Ok(())
}

/// Emails are stored trimmed and lowercased
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

// ============================================================================
// Requests and responses
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Body of logout and refresh-tokens
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshTokenRequest {
    pub refresh_token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResetPasswordRequest {
    pub password: String,
}

/// User plus a fresh session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResponse {
    pub user: UserResponse,
    pub tokens: AuthTokens,
}

// ============================================================================
// Service
// ============================================================================

#[derive(Clone)]
pub struct AuthService {
    users: Arc<dyn UserStore>,
    tokens: TokenService,
    hasher: PasswordHasher,
    mailer: Mailer,
    /// Hashed at the configured cost on first use, so unknown emails cost a
    /// bcrypt verify like known ones
    dummy_hash: Arc<OnceCell<String>>,
}

impl AuthService {
    pub fn new(
        users: Arc<dyn UserStore>,
        tokens: TokenService,
        hasher: PasswordHasher,
        mailer: Mailer,
    ) -> Self {
        Self {
            users,
            tokens,
            hasher,
            mailer,
            dummy_hash: Arc::new(OnceCell::new()),
        }
    }

    async fn session_for(&self, user: User) -> Result<AuthResponse, AuthError> {
        let tokens = self
            .tokens
            .issue_session_pair(user.id)
            .await
            .map_err(|e| AuthError::InternalError(e.to_string()))?;

        Ok(AuthResponse {
            user: user.into(),
            tokens,
        })
    }

    /// Register a new user with role `user` and start a session
    pub async fn register(&self, request: RegisterRequest) -> Result<AuthResponse, AuthError> {
        validate_name(&request.name).map_err(AuthError::Validation)?;
        validate_email(request.email.trim()).map_err(AuthError::Validation)?;
        validate_password(&request.password).map_err(AuthError::Validation)?;

        let email = normalize_email(&request.email);
        if self.users.find_by_email(&email).await?.is_some() {
            return Err(AuthError::EmailTaken);
        }

        let password_hash = self.hasher.hash(&request.password).await?;
        let user = self
            .users
            .create(CreateUser {
                name: request.name.trim().to_string(),
                email,
                password_hash,
                role: Role::User,
            })
            .await?;

        tracing::info!(user_id = %user.id, "user registered");
        self.session_for(user).await
    }

    /// Check credentials and start a session
    pub async fn login(&self, request: LoginRequest) -> Result<AuthResponse, AuthError> {
        let Some(user) = self
            .users
            .find_by_email(&normalize_email(&request.email))
            .await?
        else {
            let dummy = self
                .dummy_hash
                .get_or_try_init(|| self.hasher.hash("warden-dummy-password"))
                .await?;
            self.hasher.verify(&request.password, dummy).await?;
            return Err(AuthError::InvalidCredentials);
        };

        if !self
            .hasher
            .verify(&request.password, &user.password_hash)
            .await?
        {
            tracing::debug!(user_id = %user.id, "login rejected");
            return Err(AuthError::InvalidCredentials);
        }

        tracing::info!(user_id = %user.id, "user logged in");
        self.session_for(user).await
    }

    /// Spend a refresh token without replacing it
    pub async fn logout(&self, refresh_token: &str) -> Result<(), AuthError> {
        let user_id = self
            .tokens
            .revoke_refresh(refresh_token)
            .await
            .map_err(|e| token_failure(e, AuthError::TokenNotFound))?;

        tracing::info!(user_id = %user_id, "user logged out");
        Ok(())
    }

    /// Rotate a refresh token into a new pair. The spent token is unusable
    /// afterwards, and no pair is minted for a user who no longer exists.
    pub async fn refresh(&self, refresh_token: &str) -> Result<AuthTokens, AuthError> {
        let spent = self
            .tokens
            .consume(refresh_token, TokenKind::Refresh)
            .await
            .map_err(|e| token_failure(e, AuthError::InvalidRefreshToken))?;

        if self.users.find_by_id(spent.user_id).await?.is_none() {
            tracing::debug!(user_id = %spent.user_id, "refresh rejected for missing user");
            return Err(AuthError::InvalidRefreshToken);
        }

        let tokens = self
            .tokens
            .issue_session_pair(spent.user_id)
            .await
            .map_err(|e| AuthError::InternalError(e.to_string()))?;

        tracing::debug!(user_id = %spent.user_id, "refresh token rotated");
        Ok(tokens)
    }

    /// Mail a reset token. Unknown addresses succeed without doing anything.
    pub async fn forgot_password(&self, email: &str) -> Result<(), AuthError> {
        validate_email(email.trim()).map_err(AuthError::Validation)?;

        let Some(user) = self.users.find_by_email(&normalize_email(email)).await? else {
            tracing::debug!("password reset requested for unknown email");
            return Ok(());
        };

        let reset = self
            .tokens
            .issue_single_use(user.id, TokenKind::ResetPassword)
            .await
            .map_err(|e| AuthError::InternalError(e.to_string()))?;
        self.mailer
            .send_reset_password(&user.email, &reset.token)
            .await?;

        tracing::info!(user_id = %user.id, "password reset email sent");
        Ok(())
    }

    /// Spend a reset token and set a new password.
    ///
    /// Every other reset token of the user is deleted and every refresh token
    /// is blacklisted, so existing sessions end.
    pub async fn reset_password(&self, token: &str, password: &str) -> Result<(), AuthError> {
        validate_password(password).map_err(AuthError::Validation)?;

        let claimed = self
            .tokens
            .consume(token, TokenKind::ResetPassword)
            .await
            .map_err(|e| token_failure(e, AuthError::ResetFailed))?;

        let user = self
            .users
            .find_by_id(claimed.user_id)
            .await?
            .ok_or(AuthError::ResetFailed)?;

        let password_hash = self.hasher.hash(password).await?;
        self.users
            .update(
                user.id,
                UpdateUser {
                    password_hash: Some(password_hash),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| match e {
                RepositoryError::NotFound => AuthError::ResetFailed,
                other => other.into(),
            })?;

        self.tokens
            .invalidate(user.id, TokenKind::ResetPassword)
            .await
            .map_err(|e| AuthError::InternalError(e.to_string()))?;
        let revoked = self
            .tokens
            .revoke_sessions(user.id)
            .await
            .map_err(|e| AuthError::InternalError(e.to_string()))?;

        tracing::info!(user_id = %user.id, revoked_sessions = revoked, "password reset");
        Ok(())
    }

    /// Mail a verification token to the user
    pub async fn send_verification_email(&self, user_id: Uuid) -> Result<(), AuthError> {
        let user = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or(AuthError::UserNotFound)?;

        let verify = self
            .tokens
            .issue_single_use(user.id, TokenKind::VerifyEmail)
            .await
            .map_err(|e| AuthError::InternalError(e.to_string()))?;
        self.mailer
            .send_verification(&user.email, &verify.token)
            .await?;

        tracing::info!(user_id = %user.id, "verification email sent");
        Ok(())
    }

    /// Spend a verification token and mark the email verified
    pub async fn verify_email(&self, token: &str) -> Result<(), AuthError> {
        let claimed = self
            .tokens
            .consume(token, TokenKind::VerifyEmail)
            .await
            .map_err(|e| token_failure(e, AuthError::VerifyFailed))?;

        self.users
            .update(
                claimed.user_id,
                UpdateUser {
                    is_email_verified: Some(true),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| match e {
                RepositoryError::NotFound => AuthError::VerifyFailed,
                other => other.into(),
            })?;

        self.tokens
            .invalidate(claimed.user_id, TokenKind::VerifyEmail)
            .await
            .map_err(|e| AuthError::InternalError(e.to_string()))?;

        tracing::info!(user_id = %claimed.user_id, "email verified");
        Ok(())
    }
}
