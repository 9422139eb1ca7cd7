//! Repositories for users and persisted tokens
//!
//! The services only see the [`UserStore`] and [`TokenStore`] traits. Two
//! backends implement them: PostgreSQL through SQLx, and an in-memory one
//! backed by `DashMap` for development and tests.

pub mod memory;
pub mod token;
pub mod user;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::core::auth::jwt::TokenKind;
use crate::core::db::models::{
    CreateToken, CreateUser, Token, UpdateUser, User, UserFilter, UserSort,
};
use crate::core::pagination::PageRequest;

pub use memory::{MemoryTokenStore, MemoryUserStore};
pub use token::{TokenRepository, hash_token};
pub use user::UserRepository;

/// Repository error types
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Record not found")]
    NotFound,

    #[error("Email already exists")]
    EmailAlreadyExists,

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
}

/// User registry storage
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Insert a user; fails with `EmailAlreadyExists` on a duplicate email
    async fn create(&self, user: CreateUser) -> Result<User, RepositoryError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, RepositoryError>;

    /// Case-insensitive lookup
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError>;

    /// One page of users matching `filter`, plus the total match count
    async fn list(
        &self,
        filter: &UserFilter,
        sort: UserSort,
        page: PageRequest,
    ) -> Result<(Vec<User>, u64), RepositoryError>;

    /// Apply the set fields of `changes`; `NotFound` if the user is absent
    async fn update(&self, id: Uuid, changes: UpdateUser) -> Result<User, RepositoryError>;

    /// Remove a user. Returns whether a row was removed. Tokens are only
    /// dropped where the backend cascades; callers clear them explicitly.
    async fn delete(&self, id: Uuid) -> Result<bool, RepositoryError>;

    async fn count(&self) -> Result<u64, RepositoryError>;
}

/// Persisted credential storage. Lookups are by the raw token value, which
/// implementations hash before touching storage.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn create(&self, token: CreateToken) -> Result<Token, RepositoryError>;

    /// Non-blacklisted token with this value and kind. Blacklisted and absent
    /// tokens are both `None`.
    async fn find_by_value_and_kind(
        &self,
        value: &str,
        kind: TokenKind,
    ) -> Result<Option<Token>, RepositoryError>;

    /// Atomically delete a non-blacklisted token with this value and kind and
    /// return it. Of two concurrent claims at most one sees `Some`.
    async fn claim(&self, value: &str, kind: TokenKind) -> Result<Option<Token>, RepositoryError>;

    async fn delete(&self, id: Uuid) -> Result<bool, RepositoryError>;

    async fn delete_by_user_and_kind(
        &self,
        user_id: Uuid,
        kind: TokenKind,
    ) -> Result<u64, RepositoryError>;

    async fn blacklist_by_user_and_kind(
        &self,
        user_id: Uuid,
        kind: TokenKind,
    ) -> Result<u64, RepositoryError>;

    async fn delete_all_for_user(&self, user_id: Uuid) -> Result<u64, RepositoryError>;

    /// Remove every token that expired at or before `now`
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError>;
}
