//! warden - identity and session service
//!
//! Users authenticate with email and password and receive a short-lived
//! access token plus a rotating refresh token. Password reset and email
//! verification use single-use tokens. An admin role gates the user registry.

pub mod app;
pub mod core;
