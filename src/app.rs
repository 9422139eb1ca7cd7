//! Shared state and the HTTP router

use std::sync::Arc;

use axum::{Router, middleware};
use sqlx::PgPool;
use tower_http::trace::TraceLayer;

use crate::core::auth::{AuthService, JwtService, PasswordHasher, TokenService, auth_router};
use crate::core::config::Config;
use crate::core::db::repositories::{
    MemoryTokenStore, MemoryUserStore, TokenRepository, TokenStore, UserRepository, UserStore,
};
use crate::core::email::{EmailSender, Mailer};
use crate::core::error::AppError;
use crate::core::health::health_router;
use crate::core::rate_limit::{IpRateLimiter, rate_limit_middleware};
use crate::core::users::{UserService, users_router};

/// Storage backends behind the services
#[derive(Clone)]
pub struct Stores {
    pub users: Arc<dyn UserStore>,
    pub tokens: Arc<dyn TokenStore>,
    /// Present with the postgres driver, for health checks
    pub db: Option<PgPool>,
}

impl Stores {
    pub fn memory() -> Self {
        Self {
            users: Arc::new(MemoryUserStore::new()),
            tokens: Arc::new(MemoryTokenStore::new()),
            db: None,
        }
    }

    pub fn postgres(pool: PgPool) -> Self {
        Self {
            users: Arc::new(UserRepository::new(pool.clone())),
            tokens: Arc::new(TokenRepository::new(pool.clone())),
            db: Some(pool),
        }
    }
}

/// State shared by every handler
#[derive(Clone)]
pub struct AppState {
    pub auth: AuthService,
    pub users: UserService,
    pub tokens: TokenService,
    pub db: Option<PgPool>,
    pub rate_limiter: Option<Arc<IpRateLimiter>>,
}

impl AppState {
    pub fn from_config(config: &Config, stores: Stores, sender: Arc<dyn EmailSender>) -> Self {
        let tokens = TokenService::new(
            JwtService::new(config.jwt_secret.expose()),
            stores.tokens,
            config.token_lifetimes,
        );
        let hasher = PasswordHasher::new(config.bcrypt_cost);
        let mailer = Mailer::new(sender, &config.email.from, &config.email.frontend_url);

        let rate_limiter = config
            .rate_limit
            .enabled
            .then(|| Arc::new(IpRateLimiter::new(config.rate_limit)));

        Self {
            auth: AuthService::new(stores.users.clone(), tokens.clone(), hasher, mailer),
            users: UserService::new(stores.users, tokens.clone(), hasher),
            tokens,
            db: stores.db,
            rate_limiter,
        }
    }
}

async fn not_found() -> AppError {
    AppError::NotFound("Not found".to_string())
}

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    let rate_limiter = state.rate_limiter.clone();

    let mut router = Router::new()
        .merge(auth_router())
        .merge(users_router())
        .merge(health_router())
        .fallback(not_found)
        .with_state(state);

    if let Some(limiter) = rate_limiter {
        router = router.layer(middleware::from_fn_with_state(limiter, rate_limit_middleware));
    }

    router.layer(TraceLayer::new_for_http())
}
