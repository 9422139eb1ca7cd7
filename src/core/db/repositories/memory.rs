//! In-memory stores backed by `DashMap`
//!
//! Same contract as the PostgreSQL repositories. Used for the `memory` driver
//! and throughout the test suite.

use std::cmp::Ordering;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::{DashMap, mapref::entry::Entry};
use uuid::Uuid;

use super::{RepositoryError, TokenStore, UserStore, hash_token};
use crate::core::auth::jwt::TokenKind;
use crate::core::db::models::{
    CreateToken, CreateUser, SearchScope, Token, UpdateUser, User, UserFilter, UserSort,
    UserSortField,
};
use crate::core::pagination::PageRequest;

/// Users keyed by id, with a lowercase email index for uniqueness
#[derive(Default)]
pub struct MemoryUserStore {
    users: DashMap<Uuid, User>,
    emails: DashMap<String, Uuid>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn email_key(email: &str) -> String {
    email.trim().to_lowercase()
}

fn matches_filter(user: &User, filter: &UserFilter) -> bool {
    if let Some(role) = filter.role
        && user.role != role
    {
        return false;
    }

    let Some(search) = filter.search.as_deref().filter(|s| !s.is_empty()) else {
        return true;
    };
    let needle = search.to_lowercase();
    let id_match = Uuid::parse_str(search).map(|id| id == user.id).ok();

    match filter.scope {
        SearchScope::Name => user.name.to_lowercase().contains(&needle),
        SearchScope::Email => user.email.to_lowercase().contains(&needle),
        SearchScope::Id => id_match.unwrap_or(false),
        SearchScope::All => {
            user.name.to_lowercase().contains(&needle)
                || user.email.to_lowercase().contains(&needle)
                || id_match.unwrap_or(false)
        }
    }
}

fn compare_users(a: &User, b: &User, sort: UserSort) -> Ordering {
    let ordering = match sort.field {
        UserSortField::Id => a.id.cmp(&b.id),
        UserSortField::Name => a.name.cmp(&b.name),
        UserSortField::Email => a.email.cmp(&b.email),
        UserSortField::Role => a.role.as_str().cmp(b.role.as_str()),
        UserSortField::CreatedAt => a.created_at.cmp(&b.created_at),
    };
    let ordering = if sort.descending {
        ordering.reverse()
    } else {
        ordering
    };
    ordering.then_with(|| a.id.cmp(&b.id))
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn create(&self, user: CreateUser) -> Result<User, RepositoryError> {
        match self.emails.entry(email_key(&user.email)) {
            Entry::Occupied(_) => Err(RepositoryError::EmailAlreadyExists),
            Entry::Vacant(slot) => {
                let now = Utc::now();
                let user = User {
                    id: Uuid::new_v4(),
                    name: user.name,
                    email: user.email,
                    password_hash: user.password_hash,
                    role: user.role,
                    is_email_verified: false,
                    created_at: now,
                    updated_at: now,
                };
                self.users.insert(user.id, user.clone());
                slot.insert(user.id);
                Ok(user)
            }
        }
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, RepositoryError> {
        Ok(self.users.get(&id).map(|u| u.clone()))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError> {
        let Some(id) = self.emails.get(&email_key(email)).map(|id| *id) else {
            return Ok(None);
        };
        self.find_by_id(id).await
    }

    async fn list(
        &self,
        filter: &UserFilter,
        sort: UserSort,
        page: PageRequest,
    ) -> Result<(Vec<User>, u64), RepositoryError> {
        let mut matched: Vec<User> = self
            .users
            .iter()
            .filter(|entry| matches_filter(entry.value(), filter))
            .map(|entry| entry.value().clone())
            .collect();
        matched.sort_by(|a, b| compare_users(a, b, sort));

        let total = matched.len() as u64;
        let results = matched
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.limit as usize)
            .collect();

        Ok((results, total))
    }

    async fn update(&self, id: Uuid, changes: UpdateUser) -> Result<User, RepositoryError> {
        let current_email = match self.users.get(&id) {
            Some(user) => email_key(&user.email),
            None => return Err(RepositoryError::NotFound),
        };

        if let Some(ref email) = changes.email {
            let new_key = email_key(email);
            if new_key != current_email {
                match self.emails.entry(new_key) {
                    Entry::Occupied(slot) if *slot.get() != id => {
                        return Err(RepositoryError::EmailAlreadyExists);
                    }
                    Entry::Occupied(_) => {}
                    Entry::Vacant(slot) => {
                        slot.insert(id);
                    }
                }
                self.emails.remove(&current_email);
            }
        }

        let mut user = self.users.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        if let Some(name) = changes.name {
            user.name = name;
        }
        if let Some(email) = changes.email {
            user.email = email;
        }
        if let Some(password_hash) = changes.password_hash {
            user.password_hash = password_hash;
        }
        if let Some(role) = changes.role {
            user.role = role;
        }
        if let Some(verified) = changes.is_email_verified {
            user.is_email_verified = verified;
        }
        user.updated_at = Utc::now();

        Ok(user.clone())
    }

    async fn delete(&self, id: Uuid) -> Result<bool, RepositoryError> {
        match self.users.remove(&id) {
            Some((_, user)) => {
                self.emails.remove(&email_key(&user.email));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn count(&self) -> Result<u64, RepositoryError> {
        Ok(self.users.len() as u64)
    }
}

/// Tokens keyed by (value hash, kind)
#[derive(Default)]
pub struct MemoryTokenStore {
    tokens: DashMap<(String, TokenKind), Token>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored tokens, blacklisted included
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    fn remove_where(&self, mut predicate: impl FnMut(&Token) -> bool) -> u64 {
        let mut removed = 0;
        self.tokens.retain(|_, token| {
            let remove = predicate(token);
            if remove {
                removed += 1;
            }
            !remove
        });
        removed
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn create(&self, token: CreateToken) -> Result<Token, RepositoryError> {
        let now = Utc::now();
        let token = Token {
            id: Uuid::new_v4(),
            token_hash: hash_token(&token.value),
            user_id: token.user_id,
            kind: token.kind,
            expires_at: token.expires_at,
            blacklisted: false,
            created_at: now,
            updated_at: now,
        };
        self.tokens
            .insert((token.token_hash.clone(), token.kind), token.clone());
        Ok(token)
    }

    async fn find_by_value_and_kind(
        &self,
        value: &str,
        kind: TokenKind,
    ) -> Result<Option<Token>, RepositoryError> {
        Ok(self
            .tokens
            .get(&(hash_token(value), kind))
            .filter(|token| !token.blacklisted)
            .map(|token| token.clone()))
    }

    async fn claim(&self, value: &str, kind: TokenKind) -> Result<Option<Token>, RepositoryError> {
        Ok(self
            .tokens
            .remove_if(&(hash_token(value), kind), |_, token| !token.blacklisted)
            .map(|(_, token)| token))
    }

    async fn delete(&self, id: Uuid) -> Result<bool, RepositoryError> {
        Ok(self.remove_where(|token| token.id == id) > 0)
    }

    async fn delete_by_user_and_kind(
        &self,
        user_id: Uuid,
        kind: TokenKind,
    ) -> Result<u64, RepositoryError> {
        Ok(self.remove_where(|token| token.user_id == user_id && token.kind == kind))
    }

    async fn blacklist_by_user_and_kind(
        &self,
        user_id: Uuid,
        kind: TokenKind,
    ) -> Result<u64, RepositoryError> {
        let now = Utc::now();
        let mut count = 0;
        for mut token in self.tokens.iter_mut() {
            if token.user_id == user_id && token.kind == kind && !token.blacklisted {
                token.blacklisted = true;
                token.updated_at = now;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn delete_all_for_user(&self, user_id: Uuid) -> Result<u64, RepositoryError> {
        Ok(self.remove_where(|token| token.user_id == user_id))
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        Ok(self.remove_where(|token| token.expires_at <= now))
    }
}
