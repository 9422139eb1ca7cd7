//! User registry endpoints
//!
//! Admin only, except `GET /v1/users/{id}` which users may call on themselves.

use axum::{Json, Router, extract::State, http::StatusCode, routing::get};
use uuid::Uuid;

use crate::app::AppState;
use crate::core::auth::middleware::{RequireAdmin, RequireAdminOrSelf};
use crate::core::db::models::UserResponse;
use crate::core::error::AppError;
use crate::core::extract::{JsonBody, PathParam, QueryParams};
use crate::core::pagination::Page;
use crate::core::users::service::{CreateUserRequest, ListUsersQuery, UpdateUserRequest};

pub fn users_router() -> Router<AppState> {
    Router::new()
        .route("/v1/users", get(list_users_handler).post(create_user_handler))
        .route(
            "/v1/users/{id}",
            get(get_user_handler)
                .patch(update_user_handler)
                .delete(delete_user_handler),
        )
}

/// POST /v1/users
async fn create_user_handler(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    JsonBody(request): JsonBody<CreateUserRequest>,
) -> Result<(StatusCode, Json<UserResponse>), AppError> {
    let user = state.users.create_user(request).await?;
    tracing::debug!(admin_id = %admin.id, user_id = %user.id, "admin created user");
    Ok((StatusCode::CREATED, Json(user)))
}

/// GET /v1/users?page=&limit=&sortBy=&search=&scope=&role=
async fn list_users_handler(
    State(state): State<AppState>,
    RequireAdmin(_): RequireAdmin,
    QueryParams(query): QueryParams<ListUsersQuery>,
) -> Result<Json<Page<UserResponse>>, AppError> {
    Ok(Json(state.users.list_users(&query).await?))
}

/// GET /v1/users/{id}
async fn get_user_handler(
    State(state): State<AppState>,
    access: RequireAdminOrSelf,
) -> Result<Json<UserResponse>, AppError> {
    Ok(Json(state.users.get_user(access.target).await?))
}

/// PATCH /v1/users/{id}
async fn update_user_handler(
    State(state): State<AppState>,
    RequireAdmin(_): RequireAdmin,
    PathParam(id): PathParam<Uuid>,
    JsonBody(request): JsonBody<UpdateUserRequest>,
) -> Result<Json<UserResponse>, AppError> {
    Ok(Json(state.users.update_user(id, request).await?))
}

/// DELETE /v1/users/{id}
async fn delete_user_handler(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    PathParam(id): PathParam<Uuid>,
) -> Result<StatusCode, AppError> {
    state.users.delete_user(id).await?;
    tracing::info!(admin_id = %admin.id, user_id = %id, "admin deleted user");
    Ok(StatusCode::NO_CONTENT)
}
