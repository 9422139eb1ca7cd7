//! PostgreSQL token repository
//!
//! Tokens are stored as SHA-256 hashes; the raw value only ever lives with the client.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use uuid::Uuid;

use super::{RepositoryError, TokenStore};
use crate::core::auth::jwt::TokenKind;
use crate::core::db::models::{CreateToken, Token, TokenRow};

const TOKEN_COLUMNS: &str =
    "id, token_hash, user_id, kind, expires_at, blacklisted, created_at, updated_at";

/// Hash a token using SHA-256
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

fn into_token(row: TokenRow) -> Result<Token, RepositoryError> {
    Token::try_from(row).map_err(RepositoryError::Corrupt)
}

/// Token repository for database operations
#[derive(Clone)]
pub struct TokenRepository {
    pool: PgPool,
}

impl TokenRepository {
    /// Create a new token repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TokenStore for TokenRepository {
    async fn create(&self, token: CreateToken) -> Result<Token, RepositoryError> {
        let row = sqlx::query_as::<_, TokenRow>(&format!(
            r#"
            INSERT INTO tokens (token_hash, user_id, kind, expires_at)
            VALUES ($1, $2, $3, $4)
            RETURNING {TOKEN_COLUMNS}
            "#
        ))
        .bind(hash_token(&token.value))
        .bind(token.user_id)
        .bind(token.kind.as_str())
        .bind(token.expires_at)
        .fetch_one(&self.pool)
        .await?;

        into_token(row)
    }

    async fn find_by_value_and_kind(
        &self,
        value: &str,
        kind: TokenKind,
    ) -> Result<Option<Token>, RepositoryError> {
        let row = sqlx::query_as::<_, TokenRow>(&format!(
            r#"
            SELECT {TOKEN_COLUMNS}
            FROM tokens
            WHERE token_hash = $1 AND kind = $2 AND blacklisted = FALSE
            "#
        ))
        .bind(hash_token(value))
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(into_token).transpose()
    }

    async fn claim(&self, value: &str, kind: TokenKind) -> Result<Option<Token>, RepositoryError> {
        // A single DELETE ... RETURNING: concurrent claims serialize on the row lock
        let row = sqlx::query_as::<_, TokenRow>(&format!(
            r#"
            DELETE FROM tokens
            WHERE token_hash = $1 AND kind = $2 AND blacklisted = FALSE
            RETURNING {TOKEN_COLUMNS}
            "#
        ))
        .bind(hash_token(value))
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(into_token).transpose()
    }

    async fn delete(&self, id: Uuid) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM tokens WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_by_user_and_kind(
        &self,
        user_id: Uuid,
        kind: TokenKind,
    ) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM tokens WHERE user_id = $1 AND kind = $2")
            .bind(user_id)
            .bind(kind.as_str())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn blacklist_by_user_and_kind(
        &self,
        user_id: Uuid,
        kind: TokenKind,
    ) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE tokens
            SET blacklisted = TRUE, updated_at = NOW()
            WHERE user_id = $1 AND kind = $2 AND blacklisted = FALSE
            "#,
        )
        .bind(user_id)
        .bind(kind.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn delete_all_for_user(&self, user_id: Uuid) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM tokens WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM tokens WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
