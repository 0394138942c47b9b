//! User administration handlers, ADMIN only

use axum::extract::State;
use tracing::debug;

use crate::handlers::extract::{JsonBody, PathParams, QueryParams};
use crate::models::{UpdateUserRequest, User};
use crate::services::auth::CurrentUser;
use crate::services::user::{AdminCreateUser, UserListQuery};
use crate::state::AppState;
use crate::utils::errors::{ActionResult, Result};
use crate::utils::helpers::Page;

/// GET /api/admin/users
pub async fn list_users(
    State(state): State<AppState>,
    admin: CurrentUser,
    QueryParams(query): QueryParams<UserListQuery>,
) -> Result<ActionResult<Page<User>>> {
    debug!(admin_id = admin.id, search = ?query.search, "Listing users");
    let page = state.services.user_service.list(&query).await?;
    Ok(ActionResult::ok(page))
}

/// POST /api/admin/users
pub async fn create_user(
    State(state): State<AppState>,
    admin: CurrentUser,
    JsonBody(request): JsonBody<AdminCreateUser>,
) -> Result<ActionResult<User>> {
    let user = state.services.user_service.create(&admin, request).await?;
    Ok(ActionResult::ok(user).with_message("User created"))
}

/// GET /api/admin/users/:id
pub async fn get_user(
    State(state): State<AppState>,
    _admin: CurrentUser,
    PathParams(user_id): PathParams<i64>,
) -> Result<ActionResult<User>> {
    let user = state.services.user_service.get(user_id).await?;
    Ok(ActionResult::ok(user))
}

/// PATCH /api/admin/users/:id
pub async fn update_user(
    State(state): State<AppState>,
    admin: CurrentUser,
    PathParams(user_id): PathParams<i64>,
    JsonBody(request): JsonBody<UpdateUserRequest>,
) -> Result<ActionResult<User>> {
    let user = state.services.user_service.update(&admin, user_id, request).await?;
    Ok(ActionResult::ok(user).with_message("User updated"))
}

/// DELETE /api/admin/users/:id
pub async fn delete_user(
    State(state): State<AppState>,
    admin: CurrentUser,
    PathParams(user_id): PathParams<i64>,
) -> Result<ActionResult<()>> {
    state.services.user_service.delete(&admin, user_id).await?;
    Ok(ActionResult::message("User deleted"))
}
