//! Persistence: models, the PostgreSQL pool and the user/token repositories

pub mod models;
pub mod pool;
pub mod repositories;

pub use models::*;
pub use pool::{DbConfig, DbError, DbParts, create_pool, create_pool_with_migrations};
pub use repositories::{
    MemoryTokenStore, MemoryUserStore, RepositoryError, TokenRepository, TokenStore,
    UserRepository, UserStore, hash_token,
};

pub use sqlx::PgPool;
