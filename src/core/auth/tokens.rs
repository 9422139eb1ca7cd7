//! Token lifecycle
//!
//! Mints access/refresh pairs and single-use tokens, and consumes them. Access
//! tokens live only in the JWT; every other kind is also persisted so it can be
//! revoked. Consumption is an atomic claim on the store: the record is removed
//! in the same step that finds it, so a token cannot be used twice even by
//! concurrent requests.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::auth::jwt::{Claims, IssuedToken, JwtError, JwtService, TokenKind};
use crate::core::db::models::{CreateToken, Token};
use crate::core::db::repositories::{RepositoryError, TokenStore};

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    /// Bad signature, expired, wrong kind, unknown, consumed or blacklisted.
    /// Callers never learn which.
    #[error("Invalid or expired token")]
    Invalid,

    #[error("Token signing failed: {0}")]
    Signing(JwtError),

    #[error("Token storage failed: {0}")]
    Storage(#[from] RepositoryError),
}

/// Lifetimes per token kind
#[derive(Debug, Clone, Copy)]
pub struct TokenLifetimes {
    pub access: Duration,
    pub refresh: Duration,
    pub reset_password: Duration,
    pub verify_email: Duration,
}

impl Default for TokenLifetimes {
    fn default() -> Self {
        Self {
            access: Duration::minutes(30),
            refresh: Duration::days(30),
            reset_password: Duration::minutes(10),
            verify_email: Duration::minutes(10),
        }
    }
}

impl TokenLifetimes {
    pub fn for_kind(&self, kind: TokenKind) -> Duration {
        match kind {
            TokenKind::Access => self.access,
            TokenKind::Refresh => self.refresh,
            TokenKind::ResetPassword => self.reset_password,
            TokenKind::VerifyEmail => self.verify_email,
        }
    }
}

/// A token as returned to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenGrant {
    pub token: String,
    pub expires: DateTime<Utc>,
}

impl From<IssuedToken> for TokenGrant {
    fn from(issued: IssuedToken) -> Self {
        Self {
            token: issued.token,
            expires: issued.expires_at,
        }
    }
}

/// Access/refresh pair for one session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthTokens {
    pub access: TokenGrant,
    pub refresh: TokenGrant,
}

/// Token lifecycle manager
#[derive(Clone)]
pub struct TokenService {
    jwt: JwtService,
    store: Arc<dyn TokenStore>,
    lifetimes: TokenLifetimes,
}

impl TokenService {
    pub fn new(jwt: JwtService, store: Arc<dyn TokenStore>, lifetimes: TokenLifetimes) -> Self {
        Self {
            jwt,
            store,
            lifetimes,
        }
    }

    pub fn codec(&self) -> &JwtService {
        &self.jwt
    }

    fn sign(&self, user_id: Uuid, kind: TokenKind) -> Result<IssuedToken, TokenError> {
        self.jwt
            .issue(user_id, kind, self.lifetimes.for_kind(kind))
            .map_err(TokenError::Signing)
    }

    /// Mint an access token and a persisted refresh token. Either both are
    /// returned or neither.
    pub async fn issue_session_pair(&self, user_id: Uuid) -> Result<AuthTokens, TokenError> {
        let access = self.sign(user_id, TokenKind::Access)?;
        let refresh = self.sign(user_id, TokenKind::Refresh)?;

        self.store
            .create(CreateToken {
                value: refresh.token.clone(),
                user_id,
                kind: TokenKind::Refresh,
                expires_at: refresh.expires_at,
            })
            .await?;

        Ok(AuthTokens {
            access: access.into(),
            refresh: refresh.into(),
        })
    }

    /// Mint and persist a reset-password or verify-email token
    pub async fn issue_single_use(
        &self,
        user_id: Uuid,
        kind: TokenKind,
    ) -> Result<IssuedToken, TokenError> {
        debug_assert!(matches!(
            kind,
            TokenKind::ResetPassword | TokenKind::VerifyEmail
        ));

        let issued = self.sign(user_id, kind)?;
        self.persist_single_use_token(&issued.token, user_id, issued.expires_at, kind)
            .await?;
        Ok(issued)
    }

    pub async fn persist_single_use_token(
        &self,
        value: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
        kind: TokenKind,
    ) -> Result<Token, TokenError> {
        let token = self
            .store
            .create(CreateToken {
                value: value.to_string(),
                user_id,
                kind,
                expires_at,
            })
            .await?;
        Ok(token)
    }

    /// Verify a persisted token and remove it in one step.
    ///
    /// The signature, the kind and the stored record must all agree. A claimed
    /// record that turns out to be expired is gone afterwards as well.
    pub async fn consume(&self, value: &str, kind: TokenKind) -> Result<Token, TokenError> {
        let claims = self.jwt.verify_kind(value, kind).map_err(|e| {
            tracing::debug!(error = %e, %kind, "token rejected by codec");
            TokenError::Invalid
        })?;

        let token = self
            .store
            .claim(value, kind)
            .await?
            .ok_or(TokenError::Invalid)?;

        if !token.is_valid_at(kind, Utc::now()) || token.user_id != claims.sub {
            tracing::debug!(token_id = %token.id, %kind, "claimed token failed validation");
            return Err(TokenError::Invalid);
        }

        Ok(token)
    }

    /// Logout: spend the refresh token without replacing it
    pub async fn revoke_refresh(&self, value: &str) -> Result<Uuid, TokenError> {
        self.consume(value, TokenKind::Refresh)
            .await
            .map(|token| token.user_id)
    }

    /// Check an access token. Other kinds are rejected.
    pub fn verify_access(&self, value: &str) -> Result<Claims, TokenError> {
        self.jwt.verify_kind(value, TokenKind::Access).map_err(|e| {
            tracing::debug!(error = %e, "access token rejected");
            TokenError::Invalid
        })
    }

    /// Delete every token of `kind` held by a user
    pub async fn invalidate(&self, user_id: Uuid, kind: TokenKind) -> Result<u64, TokenError> {
        Ok(self.store.delete_by_user_and_kind(user_id, kind).await?)
    }

    /// Blacklist every refresh token of a user, ending their sessions
    pub async fn revoke_sessions(&self, user_id: Uuid) -> Result<u64, TokenError> {
        Ok(self
            .store
            .blacklist_by_user_and_kind(user_id, TokenKind::Refresh)
            .await?)
    }

    pub async fn delete_all_for_user(&self, user_id: Uuid) -> Result<u64, TokenError> {
        Ok(self.store.delete_all_for_user(user_id).await?)
    }

    /// Drop expired records
    pub async fn purge_expired(&self) -> Result<u64, TokenError> {
        Ok(self.store.delete_expired(Utc::now()).await?)
    }
}
