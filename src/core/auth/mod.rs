//! Authentication and authorization
//!
//! - `jwt`: signed, time-bounded bearer tokens
//! - `password`: bcrypt hashing
//! - `tokens`: issuance, rotation and single-use consumption
//! - `service`: credential flows (register, login, reset, verify)
//! - `middleware`: request extractors enforcing authentication and roles
//! - `api`: HTTP handlers under `/v1/auth`

pub mod api;
pub mod jwt;
pub mod middleware;
pub mod password;
pub mod service;
pub mod tokens;

pub use api::auth_router;
pub use jwt::{Claims, JwtError, JwtService, TokenKind};
pub use middleware::{AuthUser, RequireAdmin, RequireAdminOrSelf};
pub use password::PasswordHasher;
pub use service::{AuthError, AuthResponse, AuthService};
pub use tokens::{AuthTokens, TokenLifetimes, TokenService};
