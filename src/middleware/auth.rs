//! Session and role middleware
//!
//! Every request passes through [`session_middleware`]: a valid session
//! cookie puts a [`CurrentUser`] into the request extensions, and the route
//! guard table decides which role a path needs.

use std::net::SocketAddr;

use axum::{
    async_trait,
    extract::{ConnectInfo, FromRequestParts, Request, State},
    http::{request::Parts, HeaderMap, Method},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::CookieJar;
use tracing::debug;

use crate::models::Role;
use crate::services::auth::{ClientInfo, CurrentUser};
use crate::state::AppState;
use crate::utils::errors::EventBuddyError;

/// Minimum role for a route; `None` means public
pub fn required_role(method: &Method, path: &str) -> Option<Role> {
    let segments: Vec<&str> = path.trim_matches('/').split('/').filter(|s| !s.is_empty()).collect();

    match segments.as_slice() {
        ["health"] => None,
        ["api", "auth", ..] | ["api", "invitations", ..] | ["api", "tickets", ..] => None,
        ["api", "admin", ..] => Some(Role::Admin),
        ["api", "me", ..] | ["api", "registrations", ..] => Some(Role::User),
        ["api", "events"] | ["api", "events", _] if *method == Method::GET => None,
        ["api", "events", _, "register"] => Some(Role::User),
        ["api", "events", ..] => Some(Role::Organizer),
        ["api", ..] => Some(Role::User),
        _ => None,
    }
}

/// Client details used for the device fingerprint and logging
pub fn client_info(headers: &HeaderMap, peer: Option<SocketAddr>) -> ClientInfo {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string())
    };

    let forwarded = header("x-forwarded-for")
        .and_then(|value| value.split(',').next().map(|ip| ip.trim().to_string()))
        .filter(|ip| !ip.is_empty());

    ClientInfo {
        user_agent: header("user-agent"),
        accept_language: header("accept-language"),
        ip_address: forwarded.or_else(|| peer.map(|addr| addr.ip().to_string())),
    }
}

/// Client details of a request
pub fn request_client(request: &Request) -> ClientInfo {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    client_info(request.headers(), peer)
}

/// Authenticate the session cookie, enforce the route's role, and refresh the
/// cookie when the access token was renewed
pub async fn session_middleware(
    State(state): State<AppState>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    let auth = &state.services.auth_service;
    let required = required_role(request.method(), request.uri().path());
    let client = request_client(&request);

    let mut refreshed = None;
    let mut clear_cookie = false;
    let mut rejection = None;

    if let Some(cookie) = jar.get(auth.cookie_name()) {
        match auth.authenticate(cookie.value(), &client).await {
            Ok(authenticated) => {
                refreshed = authenticated.refreshed_cookie;
                request.extensions_mut().insert(authenticated.user);
            }
            Err(e) => {
                debug!(error = %e, path = %request.uri().path(), "Session rejected");
                clear_cookie = true;
                rejection = Some(e);
            }
        }
    }

    if let Some(role) = required {
        let denied = match request.extensions().get::<CurrentUser>() {
            None => Some(rejection.unwrap_or_else(|| EventBuddyError::Authentication("Login required".to_string()))),
            Some(user) if !user.role.at_least(role) => Some(EventBuddyError::PermissionDenied(format!(
                "{} role required",
                role
            ))),
            Some(_) => None,
        };
        if let Some(e) = denied {
            let jar = if clear_cookie { jar.remove(auth.removal_cookie()) } else { jar };
            return (jar, e).into_response();
        }
    }

    let response = next.run(request).await;
    match (refreshed, clear_cookie) {
        (Some(value), _) => (jar.add(auth.session_cookie(value)), response).into_response(),
        (None, true) => (jar.remove(auth.removal_cookie()), response).into_response(),
        (None, false) => response,
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = EventBuddyError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .cloned()
            .ok_or_else(|| EventBuddyError::Authentication("Login required".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_public_routes() {
        assert_eq!(required_role(&Method::GET, "/health"), None);
        assert_eq!(required_role(&Method::POST, "/api/auth/login"), None);
        assert_eq!(required_role(&Method::GET, "/api/invitations/abc"), None);
        assert_eq!(required_role(&Method::GET, "/api/tickets/abc/verify"), None);
        assert_eq!(required_role(&Method::GET, "/api/events"), None);
        assert_eq!(required_role(&Method::GET, "/api/events/12"), None);
    }

    #[test]
    fn test_event_routes() {
        assert_eq!(required_role(&Method::POST, "/api/events"), Some(Role::Organizer));
        assert_eq!(required_role(&Method::PATCH, "/api/events/12"), Some(Role::Organizer));
        assert_eq!(required_role(&Method::GET, "/api/events/12/export"), Some(Role::Organizer));
        assert_eq!(required_role(&Method::GET, "/api/events/12/registrations"), Some(Role::Organizer));
        assert_eq!(required_role(&Method::POST, "/api/events/12/register"), Some(Role::User));
    }

    #[test]
    fn test_user_and_admin_routes() {
        assert_eq!(required_role(&Method::GET, "/api/me"), Some(Role::User));
        assert_eq!(required_role(&Method::POST, "/api/registrations/4/cancel"), Some(Role::User));
        assert_eq!(required_role(&Method::GET, "/api/admin/users"), Some(Role::Admin));
        assert_eq!(required_role(&Method::DELETE, "/api/admin/users/3"), Some(Role::Admin));
    }

    #[test]
    fn test_client_info_prefers_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert("user-agent", HeaderValue::from_static("Firefox"));
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7, 10.0.0.1"));
        let peer: SocketAddr = "127.0.0.1:5000".parse().unwrap();

        let client = client_info(&headers, Some(peer));
        assert_eq!(client.ip_address.as_deref(), Some("203.0.113.7"));
        assert_eq!(client.user_agent.as_deref(), Some("Firefox"));
        assert_eq!(client.accept_language, None);

        let client = client_info(&HeaderMap::new(), Some(peer));
        assert_eq!(client.ip_address.as_deref(), Some("127.0.0.1"));
    }
}
