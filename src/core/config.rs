//! Application configuration from environment variables.
//!
//! Load configuration using `Config::from_env()` after calling `dotenvy::dotenv()`.
//! `Config::from_lookup` reads the same keys from any source, which keeps tests
//! away from the process environment.

use std::fmt;
use std::time::Duration;

use crate::core::auth::password;
use crate::core::auth::tokens::TokenLifetimes;
use crate::core::db::pool::{DbConfig, DbParts};
use crate::core::rate_limit::RateLimitConfig;

/// Signing secret used outside production when `JWT_SECRET` is unset
const DEV_JWT_SECRET: &str = "warden_dev_secret_key_not_for_production_32chars";

/// Upper bound for any configured token lifetime
const MAX_TOKEN_LIFETIME_DAYS: i64 = 3650;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },

    #[error("JWT_SECRET must be set in production")]
    MissingSecret,

    #[error("DATABASE_URL or DB_HOST must be set for the postgres driver")]
    MissingDatabase,

    #[error("BCRYPT_COST must be between 4 and 31, got {0}")]
    BcryptCostOutOfRange(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Development,
    Production,
    Test,
}

impl Environment {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "development" | "dev" => Some(Environment::Development),
            "production" | "prod" => Some(Environment::Production),
            "test" => Some(Environment::Test),
            _ => None,
        }
    }

    pub fn is_production(&self) -> bool {
        *self == Environment::Production
    }
}

/// Storage backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DbDriver {
    #[default]
    Memory,
    Postgres,
}

impl DbDriver {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "memory" => Some(DbDriver::Memory),
            "postgres" | "postgresql" => Some(DbDriver::Postgres),
            _ => None,
        }
    }
}

/// String that never shows up in debug output
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

#[derive(Debug, Clone)]
pub struct EmailConfig {
    /// HTTP relay; `None` means messages are only logged
    pub relay_url: Option<String>,
    pub from: String,
    /// Base of the links placed in emails
    pub frontend_url: String,
}

/// Admin account created at startup if missing
#[derive(Debug, Clone)]
pub struct AdminSeed {
    pub name: String,
    pub email: String,
    pub password: Secret,
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub environment: Environment,
    pub db_driver: DbDriver,
    /// Set for the postgres driver
    pub database: Option<DbConfig>,
    pub jwt_secret: Secret,
    /// True when the development fallback secret is in use
    pub using_dev_secret: bool,
    pub token_lifetimes: TokenLifetimes,
    pub bcrypt_cost: u32,
    pub email: EmailConfig,
    pub rate_limit: RateLimitConfig,
    pub admin: Option<AdminSeed>,
    pub token_cleanup_interval: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Call `dotenvy::dotenv()` before this to load from `.env` file.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let number = |key: &str, default: i64| {
            get(key)
                .and_then(|v| v.parse::<i64>().ok())
                .filter(|v| *v > 0)
                .unwrap_or(default)
        };

        let environment = match get("APP_ENV") {
            Some(value) => Environment::parse(&value).ok_or(ConfigError::InvalidValue {
                key: "APP_ENV",
                value,
            })?,
            None => Environment::default(),
        };

        let db_driver = match get("DB_DRIVER") {
            Some(value) => DbDriver::parse(&value).ok_or(ConfigError::InvalidValue {
                key: "DB_DRIVER",
                value,
            })?,
            None => DbDriver::default(),
        };

        let database = match db_driver {
            DbDriver::Memory => None,
            DbDriver::Postgres => Some(match (get("DATABASE_URL"), get("DB_HOST")) {
                (Some(url), _) => DbConfig::from_url(url),
                (None, Some(host)) => DbConfig::from_parts(&DbParts {
                    host,
                    port: number("DB_PORT", 5432).clamp(1, u16::MAX as i64) as u16,
                    user: get("DB_USER").unwrap_or_else(|| "postgres".to_string()),
                    password: get("DB_PASSWORD").unwrap_or_default(),
                    name: get("DB_NAME").unwrap_or_else(|| "postgres".to_string()),
                    sslmode: get("DB_SSLMODE"),
                }),
                (None, None) => return Err(ConfigError::MissingDatabase),
            }),
        };

        let (jwt_secret, using_dev_secret) = match get("JWT_SECRET") {
            Some(secret) => (Secret::new(secret), false),
            None if environment.is_production() => return Err(ConfigError::MissingSecret),
            None => (Secret::new(DEV_JWT_SECRET), true),
        };

        let max_lifetime = chrono::Duration::days(MAX_TOKEN_LIFETIME_DAYS);
        let lifetime = |key: &'static str, default: i64, unit: fn(i64) -> Option<chrono::Duration>| {
            let value = number(key, default);
            unit(value)
                .filter(|d| *d <= max_lifetime)
                .ok_or_else(|| ConfigError::InvalidValue {
                    key,
                    value: value.to_string(),
                })
        };

        let token_lifetimes = TokenLifetimes {
            access: lifetime(
                "JWT_ACCESS_EXPIRATION_MINUTES",
                30,
                chrono::Duration::try_minutes,
            )?,
            refresh: lifetime("JWT_REFRESH_EXPIRATION_DAYS", 30, chrono::Duration::try_days)?,
            reset_password: lifetime(
                "JWT_RESET_PASSWORD_EXPIRATION_MINUTES",
                10,
                chrono::Duration::try_minutes,
            )?,
            verify_email: lifetime(
                "JWT_VERIFY_EMAIL_EXPIRATION_MINUTES",
                10,
                chrono::Duration::try_minutes,
            )?,
        };

        let bcrypt_cost = number("BCRYPT_COST", password::DEFAULT_COST as i64)
            .min(u32::MAX as i64) as u32;
        if !(4..=31).contains(&bcrypt_cost) {
            return Err(ConfigError::BcryptCostOutOfRange(bcrypt_cost));
        }

        let rate_limit = RateLimitConfig {
            enabled: match get("RATE_LIMIT_ENABLED") {
                Some(value) => parse_bool(&value).ok_or(ConfigError::InvalidValue {
                    key: "RATE_LIMIT_ENABLED",
                    value,
                })?,
                None => environment.is_production(),
            },
            per_second: number("RATE_LIMIT_PER_SECOND", 5) as f64,
            burst: number("RATE_LIMIT_BURST", 20).min(u32::MAX as i64) as u32,
            max_clients: number("RATE_LIMIT_MAX_CLIENTS", 10_000) as u64,
            idle: Duration::from_secs(number("RATE_LIMIT_IDLE_SECS", 600) as u64),
        };

        let admin = match (get("ADMIN_EMAIL"), get("ADMIN_PASSWORD")) {
            (Some(email), Some(password)) => Some(AdminSeed {
                name: get("ADMIN_NAME").unwrap_or_else(|| "Admin".to_string()),
                email,
                password: Secret::new(password),
            }),
            _ => None,
        };

        Ok(Self {
            host: get("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: number("PORT", 8080).clamp(1, u16::MAX as i64) as u16,
            environment,
            db_driver,
            database,
            jwt_secret,
            using_dev_secret,
            token_lifetimes,
            bcrypt_cost,
            email: EmailConfig {
                relay_url: get("MAIL_RELAY_URL"),
                from: get("EMAIL_FROM").unwrap_or_else(|| "noreply@localhost".to_string()),
                frontend_url: get("FRONTEND_URL")
                    .unwrap_or_else(|| "http://localhost:3000".to_string()),
            },
            rate_limit,
            admin,
            token_cleanup_interval: Duration::from_secs(
                number("TOKEN_CLEANUP_INTERVAL_SECS", 3600) as u64,
            ),
        })
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
