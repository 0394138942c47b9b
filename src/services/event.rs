//! Event service implementation
//!
//! Event lifecycle for organizers: creation with an optional registration
//! form, partial updates, cancellation, deletion and listings. Ownership is
//! checked here; the route guard only checks the caller's role.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::database::DatabaseService;
use crate::models::{
    Capacity, CreateEventRequest, Event, EventStatus, FormInput, FormWithFields, RegistrationCounts, Role,
    UpdateEventRequest,
};
use crate::services::auth::CurrentUser;
use crate::services::forms::{diff_fields, validate_definitions};
use crate::services::notification::NotificationService;
use crate::utils::errors::{EventBuddyError, FieldErrors, Result};
use crate::utils::helpers::{Page, PageQuery};
use crate::utils::logging::log_event_action;

const MAX_TITLE_LENGTH: usize = 200;

/// Body of `POST /api/events`
#[derive(Debug, Clone, Deserialize)]
pub struct NewEvent {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    #[serde(default)]
    pub capacity: Option<i32>,
    #[serde(default = "default_public")]
    pub is_public: bool,
    #[serde(default)]
    pub form: Option<FormInput>,
}

fn default_public() -> bool {
    true
}

/// Which events a listing shows
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventScope {
    #[default]
    Public,
    Mine,
    All,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventListQuery {
    #[serde(default)]
    pub scope: EventScope,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

impl EventListQuery {
    pub fn paging(&self) -> PageQuery {
        PageQuery { page: self.page, page_size: self.page_size }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EventDetail {
    pub event: Event,
    pub form: Option<FormWithFields>,
    /// Only shown to the organizer and administrators
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counts: Option<RegistrationCounts>,
}

/// Outcome of a cancellation
#[derive(Debug, Clone, Serialize)]
pub struct CancelledEvent {
    pub event: Event,
    pub registrations_cancelled: usize,
    pub notifications_failed: usize,
}

/// Caller may manage `event`
pub fn ensure_owner(user: &CurrentUser, event: &Event) -> Result<()> {
    if user.is_admin() || event.organizer_id == user.id {
        Ok(())
    } else {
        Err(EventBuddyError::PermissionDenied("Only the organizer can manage this event".to_string()))
    }
}

fn check_event_fields(
    title: &str,
    start_date: DateTime<Utc>,
    end_date: DateTime<Utc>,
    errors: &mut FieldErrors,
) {
    let title = title.trim();
    if title.is_empty() {
        errors.entry("title".to_string()).or_default().push("Title is required".to_string());
    } else if title.chars().count() > MAX_TITLE_LENGTH {
        errors
            .entry("title".to_string())
            .or_default()
            .push(format!("Title can be at most {} characters", MAX_TITLE_LENGTH));
    }
    if end_date <= start_date {
        errors
            .entry("end_date".to_string())
            .or_default()
            .push("End date must be after the start date".to_string());
    }
}

fn check_future_end(end_date: DateTime<Utc>, now: DateTime<Utc>, errors: &mut FieldErrors) {
    if end_date <= now {
        errors
            .entry("end_date".to_string())
            .or_default()
            .push("End date must be in the future".to_string());
    }
}

fn blank_to_none(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn form_title(input: &FormInput, event_title: &str) -> FormInput {
    let title = input.title.trim();
    FormInput {
        title: if title.is_empty() { event_title.trim().to_string() } else { title.to_string() },
        description: blank_to_none(input.description.clone()),
        fields: input.fields.clone(),
    }
}

/// Apply a partial update to an event, re-deriving its seat count and, when
/// the dates move, its status
pub fn apply_update(event: &mut Event, update: UpdateEventRequest, now: DateTime<Utc>) -> Result<()> {
    if event.status.is_terminal() {
        return Err(EventBuddyError::Conflict(format!("Event is {}", event.status)));
    }

    let title = update.title.unwrap_or_else(|| event.title.clone());
    let start_date = update.start_date.unwrap_or(event.start_date);
    let end_date = update.end_date.unwrap_or(event.end_date);

    let rescheduled = start_date != event.start_date || end_date != event.end_date;

    let mut errors = FieldErrors::new();
    check_event_fields(&title, start_date, end_date, &mut errors);
    if rescheduled {
        check_future_end(end_date, now, &mut errors);
    }
    let capacity = match update.capacity {
        Some(total) => match event.capacity().resize(total) {
            Ok(capacity) => Some(capacity),
            Err(EventBuddyError::Validation(capacity_errors)) => {
                errors.extend(capacity_errors);
                None
            }
            Err(e) => return Err(e),
        },
        None => None,
    };
    if !errors.is_empty() {
        return Err(EventBuddyError::Validation(errors));
    }

    event.title = title.trim().to_string();
    event.start_date = start_date;
    event.end_date = end_date;
    if rescheduled {
        event.status = EventStatus::scheduled_for(start_date, end_date, now);
    }
    if update.description.is_some() {
        event.description = blank_to_none(update.description);
    }
    if update.location.is_some() {
        event.location = blank_to_none(update.location);
    }
    if let Some(is_public) = update.is_public {
        event.is_public = is_public;
    }
    if let Some(capacity) = capacity {
        let (total, remaining) = capacity.columns();
        event.capacity = total;
        event.remaining_capacity = remaining;
    }
    Ok(())
}

/// Event service for organizer operations
#[derive(Clone)]
pub struct EventService {
    db: DatabaseService,
    notifications: NotificationService,
}

impl EventService {
    /// Create a new EventService instance
    pub fn new(db: DatabaseService, notifications: NotificationService) -> Self {
        Self { db, notifications }
    }

    /// Load an event or fail with not found
    pub async fn get(&self, event_id: i64) -> Result<Event> {
        self.db
            .events
            .find_by_id(event_id)
            .await?
            .ok_or(EventBuddyError::EventNotFound { event_id })
    }

    /// Load an event the caller manages
    pub async fn get_owned(&self, user: &CurrentUser, event_id: i64) -> Result<Event> {
        let event = self.get(event_id).await?;
        ensure_owner(user, &event)?;
        Ok(event)
    }

    pub async fn create(&self, user: &CurrentUser, request: NewEvent) -> Result<EventDetail> {
        let now = Utc::now();
        let mut errors = FieldErrors::new();
        check_event_fields(&request.title, request.start_date, request.end_date, &mut errors);
        check_future_end(request.end_date, now, &mut errors);
        if let Err(EventBuddyError::Validation(capacity_errors)) = Capacity::new(request.capacity) {
            errors.extend(capacity_errors);
        }
        if !errors.is_empty() {
            return Err(EventBuddyError::Validation(errors));
        }

        let form = match &request.form {
            Some(input) => {
                validate_definitions(&input.fields)?;
                let diff = diff_fields(&[], &input.fields)?;
                Some((form_title(input, &request.title), diff))
            }
            None => None,
        };

        let status = EventStatus::scheduled_for(request.start_date, request.end_date, now);
        let (event, form) = self
            .db
            .create_event_with_form(
                CreateEventRequest {
                    organizer_id: user.id,
                    title: request.title.trim().to_string(),
                    description: blank_to_none(request.description),
                    location: blank_to_none(request.location),
                    start_date: request.start_date,
                    end_date: request.end_date,
                    capacity: request.capacity,
                    is_public: request.is_public,
                },
                status,
                form,
            )
            .await?;

        log_event_action(event.id, "create", user.id, Some(event.status.as_str()));
        Ok(EventDetail {
            event,
            form,
            counts: Some(RegistrationCounts::default()),
        })
    }

    pub async fn update(&self, user: &CurrentUser, event_id: i64, update: UpdateEventRequest) -> Result<Event> {
        self.get_owned(user, event_id).await?;
        let event = self
            .db
            .update_event(event_id, |event| apply_update(event, update, Utc::now()))
            .await?;
        log_event_action(event.id, "update", user.id, None);
        Ok(event)
    }

    /// Replace the registration form of an event
    pub async fn replace_form(&self, user: &CurrentUser, event_id: i64, input: FormInput) -> Result<FormWithFields> {
        let event = self.get_owned(user, event_id).await?;
        if event.status.is_terminal() {
            return Err(EventBuddyError::Conflict(format!("Event is {}", event.status)));
        }
        validate_definitions(&input.fields)?;

        let input = form_title(&input, &event.title);
        let form = self
            .db
            .replace_form(event_id, &input, |current| diff_fields(current, &input.fields))
            .await?;
        log_event_action(event_id, "replace_form", user.id, Some(&format!("{} fields", form.fields.len())));
        Ok(form)
    }

    /// Cancel an event and its open registrations, then tell the attendees
    pub async fn cancel(&self, user: &CurrentUser, event_id: i64) -> Result<CancelledEvent> {
        self.get_owned(user, event_id).await?;
        let (event, cancelled) = self.db.cancel_event(event_id).await?;
        log_event_action(event.id, "cancel", user.id, Some(&format!("{} registrations", cancelled.len())));

        let mut mails = Vec::with_capacity(cancelled.len());
        for registration in &cancelled {
            match self.notifications.cancellation_mail(&registration.user_name, &registration.user_email, &event) {
                Ok(mail) => mails.push(mail),
                Err(e) => warn!(registration_id = registration.id, error = %e, "Cancellation mail not built"),
            }
        }
        let skipped = cancelled.len() - mails.len();
        let results = self.notifications.send_bulk("event_cancelled", mails).await;
        let notifications_failed = skipped + results.iter().filter(|(_, result)| result.is_err()).count();

        Ok(CancelledEvent {
            event,
            registrations_cancelled: cancelled.len(),
            notifications_failed,
        })
    }

    /// Delete an event. Organizers may only delete events nobody holds a seat for.
    pub async fn delete(&self, user: &CurrentUser, event_id: i64) -> Result<()> {
        self.get_owned(user, event_id).await?;
        if !user.is_admin() {
            let holders = self.db.registrations.count_seat_holders(event_id).await?;
            if holders > 0 {
                return Err(EventBuddyError::Conflict(format!(
                    "{} attendees hold a seat; cancel the event instead",
                    holders
                )));
            }
        }

        if !self.db.events.delete(event_id).await? {
            return Err(EventBuddyError::EventNotFound { event_id });
        }
        log_event_action(event_id, "delete", user.id, None);
        info!(event_id, "Event deleted");
        Ok(())
    }

    pub async fn list(&self, user: Option<&CurrentUser>, query: &EventListQuery) -> Result<Page<Event>> {
        let paging = query.paging();
        let (limit, offset) = (paging.page_size(), paging.offset());

        let events = match (query.scope, user) {
            (EventScope::Public, _) => self.db.events.list_public_upcoming(limit, offset).await?,
            (EventScope::Mine, Some(user)) => self.db.events.list_by_organizer(user.id, limit, offset).await?,
            (EventScope::All, Some(user)) if user.role == Role::Admin => self.db.events.list_all(limit, offset).await?,
            (EventScope::All, Some(_)) => {
                return Err(EventBuddyError::PermissionDenied("Only administrators can list all events".to_string()));
            }
            (_, None) => return Err(EventBuddyError::Authentication("Login required".to_string())),
        };

        debug!(scope = ?query.scope, count = events.len(), "Events listed");
        Ok(Page::new(events, &paging, None))
    }

    /// Event with its form; counts are added for the organizer.
    /// Private events are hidden from everybody else.
    pub async fn detail(&self, user: Option<&CurrentUser>, event_id: i64) -> Result<EventDetail> {
        let event = self.get(event_id).await?;
        let manages = user.map(|u| ensure_owner(u, &event).is_ok()).unwrap_or(false);

        if !event.is_public && !manages {
            let invited = match user {
                Some(u) => self
                    .db
                    .registrations
                    .list_by_user(u.id)
                    .await?
                    .iter()
                    .any(|r| r.event_id == event_id),
                None => false,
            };
            if !invited {
                return Err(EventBuddyError::EventNotFound { event_id });
            }
        }

        let form = self.db.form_with_fields(event_id).await?;
        let counts = if manages {
            Some(self.db.events.registration_counts(event_id).await?)
        } else {
            None
        };
        Ok(EventDetail { event, form, counts })
    }
}
