//! HTTP handlers
//!
//! JSON API handlers grouped by area, and [`build_router`] which wires them
//! together with the session, rate limiting and tracing layers.

pub mod admin;
pub mod auth;
pub mod events;
pub mod extract;
pub mod health;
pub mod registrations;

use axum::{
    middleware::from_fn_with_state,
    routing::{get, post, put},
    Router,
};

use crate::middleware::{login_rate_limit, session_middleware, trace_layer};
use crate::state::AppState;

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    let login = post(auth::login).route_layer(from_fn_with_state(state.clone(), login_rate_limit));

    Router::new()
        .route("/health", get(health::health))
        .route("/api/auth/signup", post(auth::signup))
        .route("/api/auth/login", login)
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/auth/session", get(auth::session))
        .route("/api/events", get(events::list).post(events::create))
        .route(
            "/api/events/:id",
            get(events::detail).patch(events::update).delete(events::delete),
        )
        .route("/api/events/:id/cancel", post(events::cancel))
        .route("/api/events/:id/form", put(events::replace_form))
        .route("/api/events/:id/register", post(events::register))
        .route("/api/events/:id/registrations", get(events::registrations))
        .route("/api/events/:id/invitations", post(events::invite))
        .route("/api/events/:id/registrations/:rid/revoke", post(events::revoke))
        .route("/api/events/:id/registrations/:rid/resend", post(events::resend))
        .route("/api/events/:id/check-in", post(events::check_in))
        .route("/api/events/:id/stats", get(events::stats))
        .route("/api/events/:id/export", get(events::export))
        .route("/api/me", get(registrations::me))
        .route("/api/registrations/:id/ticket", get(registrations::ticket))
        .route("/api/registrations/:id/cancel", post(registrations::cancel))
        .route("/api/invitations/:token", get(registrations::invitation))
        .route("/api/invitations/:token/accept", post(registrations::accept_invitation))
        .route("/api/invitations/:token/decline", post(registrations::decline_invitation))
        .route("/api/tickets/:code/verify", get(registrations::verify_ticket))
        .route("/api/admin/users", get(admin::list_users).post(admin::create_user))
        .route(
            "/api/admin/users/:id",
            get(admin::get_user).patch(admin::update_user).delete(admin::delete_user),
        )
        .layer(from_fn_with_state(state.clone(), session_middleware))
        .layer(trace_layer())
        .with_state(state)
}
