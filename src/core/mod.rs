//! Services, storage and HTTP handlers

pub mod auth;
pub mod config;
pub mod db;
pub mod email;
pub mod error;
pub mod extract;
pub mod health;
pub mod pagination;
pub mod rate_limit;
pub mod users;

#[cfg(test)]
mod tests;
