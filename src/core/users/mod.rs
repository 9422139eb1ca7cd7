//! User registry: service and HTTP handlers

pub mod api;
pub mod service;

pub use api::users_router;
pub use service::{UserError, UserService};
