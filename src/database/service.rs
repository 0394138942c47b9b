//! Database service layer
//!
//! This module provides a high-level interface to database operations. Every
//! operation that touches more than one row runs in a single transaction here.

use serde_json::Value;
use tracing::debug;

use crate::database::{DatabasePool, UserRepository, EventRepository, FormRepository, RegistrationRepository, SessionRepository};
use crate::models::*;
use crate::utils::errors::{EventBuddyError, Result};

/// Answers to persist with a registration
#[derive(Debug, Clone)]
pub struct FormAnswers {
    pub form_id: i64,
    pub values: Vec<(i64, Value)>,
}

/// Answers a registration held before a write replaced them
#[derive(Debug, Clone, Default)]
pub enum ReplacedAnswers {
    /// The write stored no answers
    #[default]
    Untouched,
    /// The write stored answers where there were none
    Empty,
    Stored(FormAnswers),
}

/// A registration written by a transaction, with the row and answers it
/// replaced. Used to undo the write when a follow-up step fails.
#[derive(Debug, Clone)]
pub struct RegistrationChange {
    pub registration: Registration,
    pub previous: Option<Registration>,
    pub replaced_answers: ReplacedAnswers,
}

/// Result of the database half of an invitation batch
#[derive(Debug, Clone)]
pub struct PreparedInvitation {
    pub email: String,
    pub outcome: InvitationOutcome,
    /// Set when a mail must go out
    pub invitee: Option<(Registration, User)>,
}

#[derive(Debug, Clone)]
pub struct DatabaseService {
    pool: DatabasePool,
    pub users: UserRepository,
    pub events: EventRepository,
    pub forms: FormRepository,
    pub registrations: RegistrationRepository,
    pub sessions: SessionRepository,
}

impl DatabaseService {
    pub fn new(pool: DatabasePool) -> Self {
        Self {
            users: UserRepository::new(pool.clone()),
            events: EventRepository::new(pool.clone()),
            forms: FormRepository::new(pool.clone()),
            registrations: RegistrationRepository::new(pool.clone()),
            sessions: SessionRepository::new(pool.clone()),
            pool,
        }
    }

    pub fn pool(&self) -> &DatabasePool {
        &self.pool
    }

    /// Create an event and, optionally, its form with fields in one transaction
    pub async fn create_event_with_form(
        &self,
        request: CreateEventRequest,
        status: EventStatus,
        form: Option<(FormInput, FieldDiff)>,
    ) -> Result<(Event, Option<FormWithFields>)> {
        let mut tx = self.pool.begin().await?;

        let event = EventRepository::create_tx(&mut *tx, request, status).await?;
        let form = match form {
            Some((input, diff)) => {
                let form = FormRepository::create_form_tx(&mut *tx, event.id, &input.title, input.description.as_deref()).await?;
                FormRepository::apply_diff_tx(&mut *tx, form.id, &diff).await?;
                let fields = FormRepository::fields_tx(&mut *tx, form.id).await?;
                Some(FormWithFields { form, fields })
            }
            None => None,
        };

        tx.commit().await?;
        debug!(event_id = event.id, with_form = form.is_some(), "Event created");
        Ok((event, form))
    }

    /// Load an event under lock, let `apply` edit it, then save it
    pub async fn update_event<F>(&self, event_id: i64, apply: F) -> Result<Event>
    where
        F: FnOnce(&mut Event) -> Result<()>,
    {
        let mut tx = self.pool.begin().await?;

        let mut event = EventRepository::lock_tx(&mut *tx, event_id).await?;
        apply(&mut event)?;
        let event = EventRepository::save_tx(&mut *tx, &event).await?;

        tx.commit().await?;
        Ok(event)
    }

    /// Replace the form of an event. `plan` turns the stored fields into a diff.
    pub async fn replace_form<F>(&self, event_id: i64, input: &FormInput, plan: F) -> Result<FormWithFields>
    where
        F: FnOnce(&[FormField]) -> Result<FieldDiff>,
    {
        let mut tx = self.pool.begin().await?;

        EventRepository::lock_tx(&mut *tx, event_id).await?;
        let form = match FormRepository::find_by_event_tx(&mut *tx, event_id).await? {
            Some(form) => FormRepository::update_form_tx(&mut *tx, form.id, &input.title, input.description.as_deref()).await?,
            None => FormRepository::create_form_tx(&mut *tx, event_id, &input.title, input.description.as_deref()).await?,
        };

        let current = FormRepository::fields_tx(&mut *tx, form.id).await?;
        let diff = plan(&current)?;
        FormRepository::apply_diff_tx(&mut *tx, form.id, &diff).await?;
        let fields = FormRepository::fields_tx(&mut *tx, form.id).await?;

        tx.commit().await?;
        debug!(
            event_id,
            created = diff.create.len(),
            updated = diff.update.len(),
            deleted = diff.delete.len(),
            reordered = diff.reorder.len(),
            "Form updated"
        );
        Ok(FormWithFields { form, fields })
    }

    /// Load a form with its fields
    pub async fn form_with_fields(&self, event_id: i64) -> Result<Option<FormWithFields>> {
        match self.forms.find_by_event(event_id).await? {
            Some(form) => {
                let fields = self.forms.fields(form.id).await?;
                Ok(Some(FormWithFields { form, fields }))
            }
            None => Ok(None),
        }
    }

    /// Register a user for an event: reserve a seat, create or reopen the
    /// registration as REGISTERED and store the answers.
    pub async fn register_attendee(
        &self,
        event_id: i64,
        user_id: i64,
        answers: Option<FormAnswers>,
    ) -> Result<RegistrationChange> {
        let mut tx = self.pool.begin().await?;

        let event = EventRepository::lock_tx(&mut *tx, event_id).await?;
        if !event.status.accepts_attendees() {
            return Err(EventBuddyError::Conflict(format!("Event is {}", event.status)));
        }

        let previous = RegistrationRepository::find_by_event_user_tx(&mut *tx, event_id, user_id).await?;
        let registration = match &previous {
            Some(existing) => {
                existing.status.transition(RegistrationStatus::Registered).map_err(|_| {
                    EventBuddyError::Conflict(format!("Already {} for this event", existing.status))
                })?;
                reserve_seat(&mut tx, event_id).await?;
                if existing.status == RegistrationStatus::Pending {
                    RegistrationRepository::update_status_tx(&mut *tx, existing.id, RegistrationStatus::Registered).await?
                } else {
                    RegistrationRepository::reopen_tx(&mut *tx, existing.id, RegistrationStatus::Registered, None).await?
                }
            }
            None => {
                reserve_seat(&mut tx, event_id).await?;
                RegistrationRepository::create_tx(&mut *tx, CreateRegistrationRequest {
                    event_id,
                    user_id,
                    status: RegistrationStatus::Registered,
                    invited_by: None,
                }).await?
            }
        };

        let replaced_answers = save_answers(&mut tx, registration.id, answers).await?;

        tx.commit().await?;
        Ok(RegistrationChange { registration, previous, replaced_answers })
    }

    /// Accept a pending invitation: reserve a seat, move to REGISTERED and store the answers
    pub async fn accept_invitation(&self, registration_id: i64, answers: Option<FormAnswers>) -> Result<RegistrationChange> {
        let mut tx = self.pool.begin().await?;

        let previous = RegistrationRepository::lock_tx(&mut *tx, registration_id).await?;
        if previous.status != RegistrationStatus::Pending {
            return Err(EventBuddyError::InvalidStateTransition {
                from: previous.status.to_string(),
                to: RegistrationStatus::Registered.to_string(),
            });
        }

        let event = EventRepository::lock_tx(&mut *tx, previous.event_id).await?;
        if !event.status.accepts_attendees() {
            return Err(EventBuddyError::Conflict(format!("Event is {}", event.status)));
        }

        reserve_seat(&mut tx, event.id).await?;
        let registration = RegistrationRepository::update_status_tx(&mut *tx, registration_id, RegistrationStatus::Registered).await?;
        let replaced_answers = save_answers(&mut tx, registration.id, answers).await?;

        tx.commit().await?;
        Ok(RegistrationChange {
            registration,
            previous: Some(previous),
            replaced_answers,
        })
    }

    /// Undo a registration write: delete a fresh row or restore the replaced one
    /// with its answers, and give back the seat it took.
    pub async fn undo_registration(&self, change: &RegistrationChange) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let registration_id = change.registration.id;
        match &change.replaced_answers {
            ReplacedAnswers::Untouched => {}
            ReplacedAnswers::Empty => FormRepository::delete_response_tx(&mut *tx, registration_id).await?,
            ReplacedAnswers::Stored(answers) => {
                FormRepository::save_response_tx(&mut *tx, registration_id, answers.form_id, &answers.values).await?;
            }
        }

        match &change.previous {
            Some(previous) => RegistrationRepository::restore_tx(&mut *tx, previous).await?,
            None => RegistrationRepository::delete_tx(&mut *tx, change.registration.id).await?,
        }

        let previously_held = change.previous.as_ref().map(|p| p.status.holds_seat()).unwrap_or(false);
        if change.registration.status.holds_seat() && !previously_held {
            EventRepository::release_seat_tx(&mut *tx, change.registration.event_id).await?;
        }

        tx.commit().await?;
        debug!(registration_id = change.registration.id, "Registration rolled back");
        Ok(())
    }

    /// Move a registration to `next`, releasing its seat when it stops holding one
    pub async fn transition_registration(&self, registration_id: i64, next: RegistrationStatus) -> Result<RegistrationChange> {
        let mut tx = self.pool.begin().await?;

        let previous = RegistrationRepository::lock_tx(&mut *tx, registration_id).await?;
        previous.status.transition(next)?;
        let registration = RegistrationRepository::update_status_tx(&mut *tx, registration_id, next).await?;
        if previous.status.holds_seat() && !next.holds_seat() {
            EventRepository::release_seat_tx(&mut *tx, previous.event_id).await?;
        }

        tx.commit().await?;
        Ok(RegistrationChange {
            registration,
            previous: Some(previous),
            replaced_answers: ReplacedAnswers::Untouched,
        })
    }

    /// Check a ticket in at the door of `event_id`
    pub async fn check_in(&self, event_id: i64, registration_id: i64) -> Result<Registration> {
        let mut tx = self.pool.begin().await?;

        let event = EventRepository::lock_tx(&mut *tx, event_id).await?;
        let registration = RegistrationRepository::lock_tx(&mut *tx, registration_id).await?;
        if registration.event_id != event.id {
            return Err(EventBuddyError::TicketNotFound);
        }
        if !event.status.accepts_attendees() {
            return Err(EventBuddyError::Conflict(format!("Event is {}", event.status)));
        }
        if let (RegistrationStatus::CheckedIn, Some(at)) = (registration.status, registration.checked_in_at) {
            return Err(EventBuddyError::Conflict(format!("Already checked in at {}", at.to_rfc3339())));
        }
        registration.status.transition(RegistrationStatus::CheckedIn)?;

        let registration = RegistrationRepository::update_status_tx(&mut *tx, registration_id, RegistrationStatus::CheckedIn).await?;
        tx.commit().await?;
        Ok(registration)
    }

    /// Database half of a bulk invitation: find or create accounts and create or
    /// reopen PENDING registrations. Mail goes out after this commits.
    pub async fn prepare_invitations(
        &self,
        event_id: i64,
        inviter_id: i64,
        emails: &[String],
    ) -> Result<Vec<PreparedInvitation>> {
        let mut tx = self.pool.begin().await?;

        let event = EventRepository::lock_tx(&mut *tx, event_id).await?;
        if !event.status.accepts_attendees() {
            return Err(EventBuddyError::Conflict(format!("Event is {}", event.status)));
        }

        let mut prepared = Vec::with_capacity(emails.len());
        for email in emails {
            let (user, _) = UserRepository::find_or_create_placeholder_tx(&mut *tx, email).await?;
            if user.id == event.organizer_id {
                prepared.push(PreparedInvitation {
                    email: email.clone(),
                    outcome: InvitationOutcome::Skipped { reason: "organizer of the event".to_string() },
                    invitee: None,
                });
                continue;
            }

            let existing = RegistrationRepository::find_by_event_user_tx(&mut *tx, event_id, user.id).await?;
            let registration = match existing {
                Some(existing) if !existing.status.is_closed() => {
                    prepared.push(PreparedInvitation {
                        email: email.clone(),
                        outcome: InvitationOutcome::Skipped {
                            reason: format!("already {}", existing.status.as_str().to_lowercase()),
                        },
                        invitee: None,
                    });
                    continue;
                }
                Some(existing) => {
                    RegistrationRepository::reopen_tx(&mut *tx, existing.id, RegistrationStatus::Pending, Some(inviter_id)).await?
                }
                None => {
                    RegistrationRepository::create_tx(&mut *tx, CreateRegistrationRequest {
                        event_id,
                        user_id: user.id,
                        status: RegistrationStatus::Pending,
                        invited_by: Some(inviter_id),
                    }).await?
                }
            };

            prepared.push(PreparedInvitation {
                email: email.clone(),
                outcome: InvitationOutcome::Invited { registration_id: registration.id },
                invitee: Some((registration, user)),
            });
        }

        tx.commit().await?;
        Ok(prepared)
    }

    /// Cancel an event together with its open registrations. Returns the
    /// event and the registrations that were cancelled.
    pub async fn cancel_event(&self, event_id: i64) -> Result<(Event, Vec<RegistrationWithUser>)> {
        let mut tx = self.pool.begin().await?;

        let event = EventRepository::lock_tx(&mut *tx, event_id).await?;
        event.status.transition(EventStatus::Cancelled)?;

        let registered_before: Vec<i64> = sqlx::query_as::<_, (i64,)>(
            "SELECT id FROM registrations WHERE event_id = $1 AND status = 'REGISTERED'"
        )
        .bind(event_id)
        .fetch_all(&mut *tx)
        .await?
        .into_iter()
        .map(|(id,)| id)
        .collect();

        let cancelled = RegistrationRepository::cancel_open_for_event_tx(&mut *tx, event_id).await?;
        for _ in &registered_before {
            EventRepository::release_seat_tx(&mut *tx, event_id).await?;
        }
        let event = EventRepository::update_status_tx(&mut *tx, event_id, EventStatus::Cancelled).await?;

        tx.commit().await?;
        Ok((event, cancelled))
    }
}

/// Store `answers` for a registration, returning what they replaced
async fn save_answers(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    registration_id: i64,
    answers: Option<FormAnswers>,
) -> Result<ReplacedAnswers> {
    let Some(answers) = answers else {
        return Ok(ReplacedAnswers::Untouched);
    };

    let replaced = match FormRepository::response_tx(&mut **tx, registration_id).await? {
        Some((form_id, values)) => ReplacedAnswers::Stored(FormAnswers { form_id, values }),
        None => ReplacedAnswers::Empty,
    };
    FormRepository::save_response_tx(&mut **tx, registration_id, answers.form_id, &answers.values).await?;
    Ok(replaced)
}

async fn reserve_seat(tx: &mut sqlx::Transaction<'_, sqlx::Postgres>, event_id: i64) -> Result<()> {
    if EventRepository::reserve_seat_tx(&mut **tx, event_id).await? {
        Ok(())
    } else {
        Err(EventBuddyError::CapacityFull)
    }
}
