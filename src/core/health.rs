//! Health endpoint
//!
//! `GET /v1/health` answers 200 while the process runs. With the postgres
//! driver the database is pinged too; a failed ping answers 503.

use axum::{Json, Router, extract::State, http::StatusCode, routing::get};
use serde::Serialize;

use crate::app::AppState;
use crate::core::db::pool;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub message: &'static str,
}

pub fn health_router() -> Router<AppState> {
    Router::new().route("/v1/health", get(health_handler))
}

async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    if let Some(db) = &state.db
        && let Err(e) = pool::health_check(db).await
    {
        tracing::error!(error = %e, "database health check failed");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: "unhealthy",
                message: "Database unavailable",
            }),
        );
    }

    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy",
            message: "Server is running",
        }),
    )
}
