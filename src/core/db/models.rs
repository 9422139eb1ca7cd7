//! Database models
//!
//! Entity structs for the `users` and `tokens` tables plus the DTOs the
//! services pass to the stores.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::core::auth::jwt::TokenKind;

// ============================================================================
// User Model
// ============================================================================

/// Registry roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "user" => Some(Role::User),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User entity. The password is only ever held as a bcrypt hash.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: Role,
    pub is_email_verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Raw `users` row; `role` is stored as text
#[derive(Debug, Clone, FromRow)]
pub struct UserRow {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub role: String,
    pub is_email_verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            email: row.email,
            password_hash: row.password_hash,
            role: Role::parse(&row.role).unwrap_or_default(),
            is_email_verified: row.is_email_verified,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// User data for creation (password already hashed)
#[derive(Debug, Clone)]
pub struct CreateUser {
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
}

/// User data for updates; `None` leaves a column untouched
#[derive(Debug, Clone, Default)]
pub struct UpdateUser {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password_hash: Option<String>,
    pub role: Option<Role>,
    pub is_email_verified: Option<bool>,
}

/// User without sensitive data (for API responses)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub is_email_verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            name: user.name,
            email: user.email,
            role: user.role,
            is_email_verified: user.is_email_verified,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

/// Columns the user list may be ordered by
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserSortField {
    Id,
    Name,
    Email,
    Role,
    CreatedAt,
}

impl UserSortField {
    pub fn column(&self) -> &'static str {
        match self {
            UserSortField::Id => "id",
            UserSortField::Name => "name",
            UserSortField::Email => "email",
            UserSortField::Role => "role",
            UserSortField::CreatedAt => "created_at",
        }
    }
}

/// Ordering for the user list, parsed from `field:asc|desc`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserSort {
    pub field: UserSortField,
    pub descending: bool,
}

impl Default for UserSort {
    fn default() -> Self {
        Self {
            field: UserSortField::CreatedAt,
            descending: true,
        }
    }
}

impl UserSort {
    /// Parse `field[:direction]`. Unknown fields fall back to the default order.
    pub fn parse(value: &str) -> Self {
        let mut parts = value.splitn(2, ':');
        let field = match parts.next().unwrap_or_default() {
            "id" => UserSortField::Id,
            "name" => UserSortField::Name,
            "email" => UserSortField::Email,
            "role" => UserSortField::Role,
            "created_at" => UserSortField::CreatedAt,
            _ => return Self::default(),
        };
        let descending = parts
            .next()
            .map(|dir| dir.eq_ignore_ascii_case("desc"))
            .unwrap_or(false);

        Self { field, descending }
    }
}

/// Which columns a search term is matched against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchScope {
    Name,
    Email,
    Id,
    #[default]
    All,
}

impl SearchScope {
    pub fn parse(value: &str) -> Self {
        match value {
            "name" => SearchScope::Name,
            "email" => SearchScope::Email,
            "id" => SearchScope::Id,
            _ => SearchScope::All,
        }
    }
}

/// Filters for listing users
#[derive(Debug, Clone, Default)]
pub struct UserFilter {
    pub search: Option<String>,
    pub scope: SearchScope,
    pub role: Option<Role>,
}

// ============================================================================
// Token Model
// ============================================================================

/// Persisted credential (refresh, reset-password, verify-email).
/// `token_hash` is the SHA-256 hex digest of the issued value.
#[derive(Debug, Clone)]
pub struct Token {
    pub id: Uuid,
    pub token_hash: String,
    pub user_id: Uuid,
    pub kind: TokenKind,
    pub expires_at: DateTime<Utc>,
    pub blacklisted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Token {
    /// Valid iff not blacklisted, unexpired and of the expected kind
    pub fn is_valid_at(&self, kind: TokenKind, now: DateTime<Utc>) -> bool {
        !self.blacklisted && now < self.expires_at && self.kind == kind
    }
}

/// Raw `tokens` row; `kind` is stored as text
#[derive(Debug, Clone, FromRow)]
pub struct TokenRow {
    pub id: Uuid,
    pub token_hash: String,
    pub user_id: Uuid,
    pub kind: String,
    pub expires_at: DateTime<Utc>,
    pub blacklisted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<TokenRow> for Token {
    type Error = String;

    fn try_from(row: TokenRow) -> Result<Self, Self::Error> {
        let kind = TokenKind::parse(&row.kind)
            .ok_or_else(|| format!("unknown token kind '{}'", row.kind))?;

        Ok(Self {
            id: row.id,
            token_hash: row.token_hash,
            user_id: row.user_id,
            kind,
            expires_at: row.expires_at,
            blacklisted: row.blacklisted,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Token data for creation; `value` is the raw issued string
#[derive(Debug, Clone)]
pub struct CreateToken {
    pub value: String,
    pub user_id: Uuid,
    pub kind: TokenKind,
    pub expires_at: DateTime<Utc>,
}
