//! Signup, login, logout and session handlers

use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, State},
    http::HeaderMap,
};
use axum_extra::extract::cookie::CookieJar;
use tracing::info;

use crate::handlers::extract::JsonBody;
use crate::middleware::client_info;
use crate::models::User;
use crate::services::auth::{ClientInfo, CurrentUser, LoginRequest, SignupRequest};
use crate::state::AppState;
use crate::utils::errors::{ActionResult, EventBuddyError, Result};

fn client(headers: &HeaderMap, connect: Option<ConnectInfo<SocketAddr>>) -> ClientInfo {
    client_info(headers, connect.map(|ConnectInfo(addr)| addr))
}

/// POST /api/auth/signup
pub async fn signup(
    State(state): State<AppState>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    jar: CookieJar,
    JsonBody(request): JsonBody<SignupRequest>,
) -> Result<(CookieJar, ActionResult<User>)> {
    if !state.settings.features.public_signup {
        return Err(EventBuddyError::PermissionDenied("Signup is disabled".to_string()));
    }

    let auth = &state.services.auth_service;
    let (user, cookie) = auth.signup(request, &client(&headers, connect)).await?;
    info!(user_id = user.id, "Account created");
    Ok((
        jar.add(auth.session_cookie(cookie)),
        ActionResult::ok(user).with_message("Welcome to EventBuddy"),
    ))
}

/// POST /api/auth/login
pub async fn login(
    State(state): State<AppState>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    jar: CookieJar,
    JsonBody(request): JsonBody<LoginRequest>,
) -> Result<(CookieJar, ActionResult<User>)> {
    let auth = &state.services.auth_service;
    let (user, cookie) = auth.login(request, &client(&headers, connect)).await?;
    Ok((jar.add(auth.session_cookie(cookie)), ActionResult::ok(user)))
}

/// POST /api/auth/logout
pub async fn logout(State(state): State<AppState>, jar: CookieJar) -> Result<(CookieJar, ActionResult<()>)> {
    let auth = &state.services.auth_service;
    if let Some(cookie) = jar.get(auth.cookie_name()) {
        auth.logout(cookie.value()).await?;
    }
    Ok((jar.remove(auth.removal_cookie()), ActionResult::message("Logged out")))
}

/// GET /api/auth/session
pub async fn session(user: Option<CurrentUser>) -> Result<ActionResult<CurrentUser>> {
    user.map(ActionResult::ok)
        .ok_or_else(|| EventBuddyError::Authentication("Not logged in".to_string()))
}
