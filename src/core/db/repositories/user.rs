//! PostgreSQL user repository

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use super::{RepositoryError, UserStore};
use crate::core::db::models::{
    CreateUser, SearchScope, UpdateUser, User, UserFilter, UserRow, UserSort,
};
use crate::core::pagination::PageRequest;

const USER_COLUMNS: &str =
    "id, name, email, password_hash, role, is_email_verified, created_at, updated_at";

/// Postgres SQLSTATE for unique_violation
const UNIQUE_VIOLATION: &str = "23505";

fn map_unique_violation(err: sqlx::Error) -> RepositoryError {
    match &err {
        sqlx::Error::Database(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION) => {
            RepositoryError::EmailAlreadyExists
        }
        _ => RepositoryError::DatabaseError(err),
    }
}

/// Append ORDER BY for `sort`, with id as tie-breaker so pages are stable.
/// Column names come from a fixed whitelist.
fn push_order(qb: &mut QueryBuilder<'_, Postgres>, sort: UserSort) {
    qb.push(" ORDER BY ")
        .push(sort.field.column())
        .push(if sort.descending { " DESC" } else { " ASC" })
        .push(", id ASC");
}

/// Append the WHERE clause for `filter`
fn push_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &UserFilter) {
    qb.push(" WHERE TRUE");

    if let Some(role) = filter.role {
        qb.push(" AND role = ").push_bind(role.as_str());
    }

    let Some(search) = filter.search.as_deref().filter(|s| !s.is_empty()) else {
        return;
    };
    let pattern = format!("%{}%", search.to_lowercase());
    let id = Uuid::parse_str(search).ok();

    match filter.scope {
        SearchScope::Name => {
            qb.push(" AND lower(name) LIKE ").push_bind(pattern);
        }
        SearchScope::Email => {
            qb.push(" AND lower(email) LIKE ").push_bind(pattern);
        }
        SearchScope::Id => match id {
            Some(id) => {
                qb.push(" AND id = ").push_bind(id);
            }
            None => {
                qb.push(" AND FALSE");
            }
        },
        SearchScope::All => {
            qb.push(" AND (lower(name) LIKE ")
                .push_bind(pattern.clone())
                .push(" OR lower(email) LIKE ")
                .push_bind(pattern);
            if let Some(id) = id {
                qb.push(" OR id = ").push_bind(id);
            }
            qb.push(")");
        }
    }
}

/// User repository for database operations
#[derive(Clone)]
pub struct UserRepository {
    pool: PgPool,
}

impl UserRepository {
    /// Create a new user repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserStore for UserRepository {
    async fn create(&self, user: CreateUser) -> Result<User, RepositoryError> {
        if self.find_by_email(&user.email).await?.is_some() {
            return Err(RepositoryError::EmailAlreadyExists);
        }

        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            INSERT INTO users (name, email, password_hash, role)
            VALUES ($1, $2, $3, $4)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.role.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(map_unique_violation)?;

        Ok(row.into())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, RepositoryError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE lower(email) = lower($1)"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn list(
        &self,
        filter: &UserFilter,
        sort: UserSort,
        page: PageRequest,
    ) -> Result<(Vec<User>, u64), RepositoryError> {
        let mut count_query = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM users");
        push_filter(&mut count_query, filter);
        let total: i64 = count_query
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await?;

        let mut select = QueryBuilder::<Postgres>::new(format!("SELECT {USER_COLUMNS} FROM users"));
        push_filter(&mut select, filter);
        push_order(&mut select, sort);
        select
            .push(" LIMIT ")
            .push_bind(page.limit as i64)
            .push(" OFFSET ")
            .push_bind(page.offset() as i64);

        let rows: Vec<UserRow> = select.build_query_as().fetch_all(&self.pool).await?;

        Ok((rows.into_iter().map(Into::into).collect(), total.max(0) as u64))
    }

    async fn update(&self, id: Uuid, changes: UpdateUser) -> Result<User, RepositoryError> {
        if let Some(ref email) = changes.email
            && let Some(existing) = self.find_by_email(email).await?
            && existing.id != id
        {
            return Err(RepositoryError::EmailAlreadyExists);
        }

        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            UPDATE users
            SET
                name = COALESCE($2, name),
                email = COALESCE($3, email),
                password_hash = COALESCE($4, password_hash),
                role = COALESCE($5, role),
                is_email_verified = COALESCE($6, is_email_verified),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(&changes.name)
        .bind(&changes.email)
        .bind(&changes.password_hash)
        .bind(changes.role.map(|r| r.as_str()))
        .bind(changes.is_email_verified)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_unique_violation)?;

        row.map(Into::into).ok_or(RepositoryError::NotFound)
    }

    async fn delete(&self, id: Uuid) -> Result<bool, RepositoryError> {
        // tokens.user_id is ON DELETE CASCADE
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn count(&self) -> Result<u64, RepositoryError> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?;

        Ok(count.0.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::db::models::Role;
    use crate::core::db::pool::{DbConfig, create_pool_with_migrations};

    #[test]
    fn test_push_filter_role_and_name() {
        let filter = UserFilter {
            search: Some("Ada".to_string()),
            scope: SearchScope::Name,
            role: Some(Role::Admin),
        };
        let mut qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM users");
        push_filter(&mut qb, &filter);

        assert_eq!(
            qb.sql(),
            "SELECT COUNT(*) FROM users WHERE TRUE AND role = $1 AND lower(name) LIKE $2"
        );
    }

    #[test]
    fn test_push_filter_invalid_id_matches_nothing() {
        let filter = UserFilter {
            search: Some("not-a-uuid".to_string()),
            scope: SearchScope::Id,
            role: None,
        };
        let mut qb = QueryBuilder::<Postgres>::new("SELECT 1 FROM users");
        push_filter(&mut qb, &filter);

        assert!(qb.sql().ends_with("AND FALSE"));
    }

    #[test]
    fn test_push_filter_all_scope_with_uuid() {
        let filter = UserFilter {
            search: Some(Uuid::new_v4().to_string()),
            scope: SearchScope::All,
            role: None,
        };
        let mut qb = QueryBuilder::<Postgres>::new("SELECT 1 FROM users");
        push_filter(&mut qb, &filter);

        assert!(qb.sql().contains("OR id = $3"));
    }

    #[test]
    fn test_push_order_breaks_ties_by_id() {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT 1 FROM users");
        push_order(&mut qb, UserSort::parse("role:asc"));
        assert_eq!(qb.sql(), "SELECT 1 FROM users ORDER BY role ASC, id ASC");

        let mut qb = QueryBuilder::<Postgres>::new("SELECT 1 FROM users");
        push_order(&mut qb, UserSort::default());
        assert!(qb.sql().ends_with(" DESC, id ASC"));
    }

    // ========================================================================
    // Integration Tests (require database)
    // ========================================================================

    async fn create_test_repo() -> UserRepository {
        let config = DbConfig::from_env().expect("DATABASE_URL must be set for tests");
        let pool = create_pool_with_migrations(&config)
            .await
            .expect("Failed to create test pool");
        UserRepository::new(pool)
    }

    fn new_user(email: &str) -> CreateUser {
        CreateUser {
            name: "Integration".to_string(),
            email: email.to_string(),
            password_hash: "test_hash".to_string(),
            role: Role::User,
        }
    }

    #[tokio::test]
    #[ignore = "requires running PostgreSQL database"]
    async fn test_create_and_find_case_insensitive() {
        let repo = create_test_repo().await;
        let email = format!("pg_{}@example.com", Uuid::new_v4());

        let user = repo.create(new_user(&email)).await.unwrap();
        let found = repo
            .find_by_email(&email.to_uppercase())
            .await
            .unwrap()
            .expect("user should be found");

        assert_eq!(found.id, user.id);
        repo.delete(user.id).await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires running PostgreSQL database"]
    async fn test_duplicate_email_rejected() {
        let repo = create_test_repo().await;
        let email = format!("dup_{}@example.com", Uuid::new_v4());

        let user = repo.create(new_user(&email)).await.unwrap();
        let result = repo.create(new_user(&email)).await;
        assert!(matches!(result, Err(RepositoryError::EmailAlreadyExists)));

        repo.delete(user.id).await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires running PostgreSQL database"]
    async fn test_update_marks_verified() {
        let repo = create_test_repo().await;
        let email = format!("upd_{}@example.com", Uuid::new_v4());
        let user = repo.create(new_user(&email)).await.unwrap();

        let updated = repo
            .update(
                user.id,
                UpdateUser {
                    is_email_verified: Some(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert!(updated.is_email_verified);
        assert_eq!(updated.name, user.name);
        repo.delete(user.id).await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires running PostgreSQL database"]
    async fn test_pages_with_equal_sort_keys_do_not_overlap() {
        let repo = create_test_repo().await;
        let marker = format!("paging{}", Uuid::new_v4().simple());

        let mut created = Vec::new();
        for i in 0..10 {
            let user = repo
                .create(CreateUser {
                    name: marker.clone(),
                    email: format!("{marker}_{i}@example.com"),
                    password_hash: "test_hash".to_string(),
                    role: Role::User,
                })
                .await
                .unwrap();
            created.push(user.id);
        }

        let filter = UserFilter {
            search: Some(marker.clone()),
            scope: SearchScope::Name,
            role: Some(Role::User),
        };
        let mut seen = std::collections::HashSet::new();
        for page in 1..=3 {
            let (users, total) = repo
                .list(
                    &filter,
                    UserSort::parse("role:asc"),
                    PageRequest::new(Some(page), Some(4)),
                )
                .await
                .unwrap();
            assert_eq!(total, 10);
            for user in users {
                assert!(seen.insert(user.id), "user repeated across pages");
            }
        }
        assert_eq!(seen.len(), 10);

        for id in created {
            repo.delete(id).await.unwrap();
        }
    }
}
