//! Attendee handlers
//!
//! The caller's own registrations and tickets, invitation links and the
//! public ticket verification used by QR scanners.

use axum::{
    extract::State,
    http::header,
    response::{IntoResponse, Response},
};

use crate::handlers::extract::{JsonOrDefault, PathParams};
use crate::models::Registration;
use crate::services::auth::CurrentUser;
use crate::services::registration::{AnswersRequest, InvitationView, TicketVerification};
use crate::services::user::Profile;
use crate::state::AppState;
use crate::utils::errors::{ActionResult, Result};

const SVG_CONTENT_TYPE: &str = "image/svg+xml";

/// GET /api/me
pub async fn me(State(state): State<AppState>, user: CurrentUser) -> Result<ActionResult<Profile>> {
    let profile = state.services.user_service.profile(&user).await?;
    Ok(ActionResult::ok(profile))
}

/// GET /api/registrations/:id/ticket
pub async fn ticket(
    State(state): State<AppState>,
    user: CurrentUser,
    PathParams(registration_id): PathParams<i64>,
) -> Result<Response> {
    let svg = state.services.registration_service.ticket_svg(&user, registration_id).await?;
    Ok(([(header::CONTENT_TYPE, SVG_CONTENT_TYPE)], svg).into_response())
}

/// POST /api/registrations/:id/cancel
pub async fn cancel(
    State(state): State<AppState>,
    user: CurrentUser,
    PathParams(registration_id): PathParams<i64>,
) -> Result<ActionResult<Registration>> {
    let registration = state.services.registration_service.cancel(&user, registration_id).await?;
    Ok(ActionResult::ok(registration).with_message("Registration cancelled"))
}

/// GET /api/invitations/:token
pub async fn invitation(
    State(state): State<AppState>,
    PathParams(token): PathParams<String>,
) -> Result<ActionResult<InvitationView>> {
    let view = state.services.registration_service.invitation(&token).await?;
    Ok(ActionResult::ok(view))
}

/// POST /api/invitations/:token/accept
pub async fn accept_invitation(
    State(state): State<AppState>,
    PathParams(token): PathParams<String>,
    JsonOrDefault(request): JsonOrDefault<AnswersRequest>,
) -> Result<ActionResult<Registration>> {
    let registration = state
        .services
        .registration_service
        .accept_invitation(&token, request)
        .await?;
    Ok(ActionResult::ok(registration).with_message("Invitation accepted; your ticket is on its way"))
}

/// POST /api/invitations/:token/decline
pub async fn decline_invitation(
    State(state): State<AppState>,
    PathParams(token): PathParams<String>,
) -> Result<ActionResult<Registration>> {
    let registration = state.services.registration_service.decline_invitation(&token).await?;
    Ok(ActionResult::ok(registration).with_message("Invitation declined"))
}

/// GET /api/tickets/:code/verify
pub async fn verify_ticket(
    State(state): State<AppState>,
    PathParams(code): PathParams<String>,
) -> Result<ActionResult<TicketVerification>> {
    let verification = state.services.registration_service.verify(&code).await?;
    Ok(ActionResult::ok(verification))
}
