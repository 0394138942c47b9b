//! Event handlers
//!
//! Organizer routes under `/api/events`. The role is enforced by the session
//! middleware; ownership by the services.

use axum::{
    extract::State,
    http::header,
    response::{IntoResponse, Response},
};
use tracing::debug;

use crate::handlers::extract::{JsonBody, JsonOrDefault, PathParams, QueryParams};
use crate::models::{Event, FormInput, FormWithFields, InvitationReport, Registration, RegistrationWithUser, UpdateEventRequest};
use crate::services::auth::CurrentUser;
use crate::services::event::{CancelledEvent, EventDetail, EventListQuery, NewEvent};
use crate::services::export::XLSX_CONTENT_TYPE;
use crate::services::registration::{
    AnswersRequest, CheckInRequest, CheckInResult, EventStats, InviteRequest, RegistrationFilter,
};
use crate::state::AppState;
use crate::utils::errors::{ActionResult, Result};
use crate::utils::helpers::Page;

/// GET /api/events
pub async fn list(
    State(state): State<AppState>,
    user: Option<CurrentUser>,
    QueryParams(query): QueryParams<EventListQuery>,
) -> Result<ActionResult<Page<Event>>> {
    let page = state.services.event_service.list(user.as_ref(), &query).await?;
    Ok(ActionResult::ok(page))
}

/// POST /api/events
pub async fn create(
    State(state): State<AppState>,
    user: CurrentUser,
    JsonBody(request): JsonBody<NewEvent>,
) -> Result<ActionResult<EventDetail>> {
    let detail = state.services.event_service.create(&user, request).await?;
    Ok(ActionResult::ok(detail).with_message("Event created"))
}

/// GET /api/events/:id
pub async fn detail(
    State(state): State<AppState>,
    user: Option<CurrentUser>,
    PathParams(event_id): PathParams<i64>,
) -> Result<ActionResult<EventDetail>> {
    let detail = state.services.event_service.detail(user.as_ref(), event_id).await?;
    Ok(ActionResult::ok(detail))
}

/// PATCH /api/events/:id
pub async fn update(
    State(state): State<AppState>,
    user: CurrentUser,
    PathParams(event_id): PathParams<i64>,
    JsonBody(request): JsonBody<UpdateEventRequest>,
) -> Result<ActionResult<Event>> {
    let event = state.services.event_service.update(&user, event_id, request).await?;
    Ok(ActionResult::ok(event).with_message("Event updated"))
}

/// DELETE /api/events/:id
pub async fn delete(
    State(state): State<AppState>,
    user: CurrentUser,
    PathParams(event_id): PathParams<i64>,
) -> Result<ActionResult<()>> {
    state.services.event_service.delete(&user, event_id).await?;
    Ok(ActionResult::message("Event deleted"))
}

/// POST /api/events/:id/cancel
pub async fn cancel(
    State(state): State<AppState>,
    user: CurrentUser,
    PathParams(event_id): PathParams<i64>,
) -> Result<ActionResult<CancelledEvent>> {
    let cancelled = state.services.event_service.cancel(&user, event_id).await?;
    Ok(ActionResult::ok(cancelled).with_message("Event cancelled"))
}

/// PUT /api/events/:id/form
pub async fn replace_form(
    State(state): State<AppState>,
    user: CurrentUser,
    PathParams(event_id): PathParams<i64>,
    JsonBody(input): JsonBody<FormInput>,
) -> Result<ActionResult<FormWithFields>> {
    let form = state.services.event_service.replace_form(&user, event_id, input).await?;
    Ok(ActionResult::ok(form).with_message("Form saved"))
}

/// POST /api/events/:id/register
pub async fn register(
    State(state): State<AppState>,
    user: CurrentUser,
    PathParams(event_id): PathParams<i64>,
    JsonOrDefault(request): JsonOrDefault<AnswersRequest>,
) -> Result<ActionResult<Registration>> {
    let registration = state.services.registration_service.register(&user, event_id, request).await?;
    Ok(ActionResult::ok(registration).with_message("You are registered; your ticket is on its way"))
}

/// GET /api/events/:id/registrations
pub async fn registrations(
    State(state): State<AppState>,
    user: CurrentUser,
    PathParams(event_id): PathParams<i64>,
    QueryParams(filter): QueryParams<RegistrationFilter>,
) -> Result<ActionResult<Vec<RegistrationWithUser>>> {
    let registrations = state
        .services
        .registration_service
        .list_for_event(&user, event_id, &filter)
        .await?;
    debug!(event_id, count = registrations.len(), "Registrations listed");
    Ok(ActionResult::ok(registrations))
}

/// POST /api/events/:id/invitations
pub async fn invite(
    State(state): State<AppState>,
    user: CurrentUser,
    PathParams(event_id): PathParams<i64>,
    JsonBody(request): JsonBody<InviteRequest>,
) -> Result<ActionResult<Vec<InvitationReport>>> {
    let reports = state.services.registration_service.invite(&user, event_id, request).await?;
    Ok(ActionResult::ok(reports))
}

/// POST /api/events/:id/registrations/:rid/revoke
pub async fn revoke(
    State(state): State<AppState>,
    user: CurrentUser,
    PathParams((event_id, registration_id)): PathParams<(i64, i64)>,
) -> Result<ActionResult<Registration>> {
    let registration = state
        .services
        .registration_service
        .revoke(&user, event_id, registration_id)
        .await?;
    Ok(ActionResult::ok(registration).with_message("Registration revoked"))
}

/// POST /api/events/:id/registrations/:rid/resend
pub async fn resend(
    State(state): State<AppState>,
    user: CurrentUser,
    PathParams((event_id, registration_id)): PathParams<(i64, i64)>,
) -> Result<ActionResult<Registration>> {
    let registration = state
        .services
        .registration_service
        .resend(&user, event_id, registration_id)
        .await?;
    Ok(ActionResult::ok(registration).with_message("Invitation sent again"))
}

/// POST /api/events/:id/check-in
pub async fn check_in(
    State(state): State<AppState>,
    user: CurrentUser,
    PathParams(event_id): PathParams<i64>,
    JsonBody(request): JsonBody<CheckInRequest>,
) -> Result<ActionResult<CheckInResult>> {
    let result = state.services.registration_service.check_in(&user, event_id, request).await?;
    let message = format!("{} checked in", result.attendee_name);
    Ok(ActionResult::ok(result).with_message(message))
}

/// GET /api/events/:id/stats
pub async fn stats(
    State(state): State<AppState>,
    user: CurrentUser,
    PathParams(event_id): PathParams<i64>,
) -> Result<ActionResult<EventStats>> {
    let stats = state.services.registration_service.stats(&user, event_id).await?;
    Ok(ActionResult::ok(stats))
}

/// GET /api/events/:id/export
pub async fn export(
    State(state): State<AppState>,
    user: CurrentUser,
    PathParams(event_id): PathParams<i64>,
) -> Result<Response> {
    let file = state.services.export_service.export_event(&user, event_id).await?;
    Ok((
        [
            (header::CONTENT_TYPE, XLSX_CONTENT_TYPE.to_string()),
            (header::CONTENT_DISPOSITION, format!("attachment; filename=\"{}\"", file.filename)),
        ],
        file.bytes,
    )
        .into_response())
}
