//! User registry operations

use std::sync::Arc;

use serde::Deserialize;
use uuid::Uuid;

use crate::core::auth::password::{PasswordError, PasswordHasher};
use crate::core::auth::service::{
    normalize_email, validate_email, validate_name, validate_password,
};
use crate::core::auth::tokens::{TokenError, TokenService};
use crate::core::db::models::{
    CreateUser, Role, SearchScope, UpdateUser, User, UserFilter, UserResponse, UserSort,
};
use crate::core::db::repositories::{RepositoryError, UserStore};
use crate::core::error::AppError;
use crate::core::pagination::{Page, PageRequest};

#[derive(Debug, thiserror::Error)]
pub enum UserError {
    #[error("{0}")]
    Validation(String),

    #[error("Email already taken")]
    EmailTaken,

    #[error("User not found")]
    NotFound,

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<RepositoryError> for UserError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::EmailAlreadyExists => UserError::EmailTaken,
            RepositoryError::NotFound => UserError::NotFound,
            _ => UserError::InternalError(err.to_string()),
        }
    }
}

impl From<PasswordError> for UserError {
    fn from(err: PasswordError) -> Self {
        UserError::InternalError(err.to_string())
    }
}

impl From<TokenError> for UserError {
    fn from(err: TokenError) -> Self {
        UserError::InternalError(err.to_string())
    }
}

impl From<UserError> for AppError {
    fn from(err: UserError) -> Self {
        match err {
            UserError::Validation(message) => AppError::Validation(message),
            UserError::EmailTaken => AppError::Conflict(err.to_string()),
            UserError::NotFound => AppError::NotFound(err.to_string()),
            UserError::InternalError(_) => AppError::internal(err),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateUserRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub role: Role,
}

/// Absent fields are left unchanged
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateUserRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

/// Query string of `GET /v1/users`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListUsersQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    /// `field:asc` or `field:desc`
    pub sort_by: Option<String>,
    pub search: Option<String>,
    /// `name`, `email`, `id` or `all`
    pub scope: Option<String>,
    pub role: Option<String>,
}

impl ListUsersQuery {
    fn filter(&self) -> Result<UserFilter, UserError> {
        let role = match self.role.as_deref().filter(|r| !r.is_empty()) {
            Some(role) => Some(
                Role::parse(role)
                    .ok_or_else(|| UserError::Validation("Invalid role".to_string()))?,
            ),
            None => None,
        };

        Ok(UserFilter {
            search: self
                .search
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            scope: self
                .scope
                .as_deref()
                .map(SearchScope::parse)
                .unwrap_or_default(),
            role,
        })
    }
}

#[derive(Clone)]
pub struct UserService {
    users: Arc<dyn UserStore>,
    tokens: TokenService,
    hasher: PasswordHasher,
}

impl UserService {
    pub fn new(users: Arc<dyn UserStore>, tokens: TokenService, hasher: PasswordHasher) -> Self {
        Self {
            users,
            tokens,
            hasher,
        }
    }

    pub async fn find_user(&self, id: Uuid) -> Result<Option<User>, UserError> {
        Ok(self.users.find_by_id(id).await?)
    }

    pub async fn get_user(&self, id: Uuid) -> Result<UserResponse, UserError> {
        self.find_user(id)
            .await?
            .map(Into::into)
            .ok_or(UserError::NotFound)
    }

    pub async fn create_user(&self, request: CreateUserRequest) -> Result<UserResponse, UserError> {
        validate_name(&request.name).map_err(UserError::Validation)?;
        validate_email(request.email.trim()).map_err(UserError::Validation)?;
        validate_password(&request.password).map_err(UserError::Validation)?;

        let email = normalize_email(&request.email);
        if self.users.find_by_email(&email).await?.is_some() {
            return Err(UserError::EmailTaken);
        }

        let user = self
            .users
            .create(CreateUser {
                name: request.name.trim().to_string(),
                email,
                password_hash: self.hasher.hash(&request.password).await?,
                role: request.role,
            })
            .await?;

        tracing::info!(user_id = %user.id, role = %user.role, "user created");
        Ok(user.into())
    }

    pub async fn list_users(&self, query: &ListUsersQuery) -> Result<Page<UserResponse>, UserError> {
        let filter = query.filter()?;
        let sort = query
            .sort_by
            .as_deref()
            .map(UserSort::parse)
            .unwrap_or_default();
        let page = PageRequest::new(query.page, query.limit);

        let (users, total) = self.users.list(&filter, sort, page).await?;
        Ok(Page::new(users, total, page).map(UserResponse::from))
    }

    /// A password change also ends the user's sessions
    pub async fn update_user(
        &self,
        id: Uuid,
        request: UpdateUserRequest,
    ) -> Result<UserResponse, UserError> {
        let mut changes = UpdateUser::default();

        if let Some(name) = request.name {
            validate_name(&name).map_err(UserError::Validation)?;
            changes.name = Some(name.trim().to_string());
        }
        if let Some(email) = request.email {
            validate_email(email.trim()).map_err(UserError::Validation)?;
            let email = normalize_email(&email);
            if let Some(existing) = self.users.find_by_email(&email).await?
                && existing.id != id
            {
                return Err(UserError::EmailTaken);
            }
            changes.email = Some(email);
        }
        let password_changed = match request.password {
            Some(password) => {
                validate_password(&password).map_err(UserError::Validation)?;
                changes.password_hash = Some(self.hasher.hash(&password).await?);
                true
            }
            None => false,
        };

        let user = self.users.update(id, changes).await?;
        if password_changed {
            self.tokens.revoke_sessions(id).await?;
        }

        tracing::info!(user_id = %id, "user updated");
        Ok(user.into())
    }

    /// Remove a user together with every token it holds
    pub async fn delete_user(&self, id: Uuid) -> Result<(), UserError> {
        if self.users.find_by_id(id).await?.is_none() {
            return Err(UserError::NotFound);
        }

        self.tokens.delete_all_for_user(id).await?;
        if !self.users.delete(id).await? {
            return Err(UserError::NotFound);
        }

        tracing::info!(user_id = %id, "user deleted");
        Ok(())
    }

    /// Seed an admin account unless the email is already registered.
    /// Returns whether an account was created.
    pub async fn ensure_admin(
        &self,
        name: &str,
        email: &str,
        password: &str,
    ) -> Result<bool, UserError> {
        if self.users.find_by_email(&normalize_email(email)).await?.is_some() {
            return Ok(false);
        }

        let admin = self
            .create_user(CreateUserRequest {
                name: name.to_string(),
                email: email.to_string(),
                password: password.to_string(),
                role: Role::Admin,
            })
            .await?;
        self.users
            .update(
                admin.id,
                UpdateUser {
                    is_email_verified: Some(true),
                    ..Default::default()
                },
            )
            .await?;

        Ok(true)
    }
}
