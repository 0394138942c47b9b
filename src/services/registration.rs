//! Registration service implementation
//!
//! Self-registration, invitations, cancellation and revocation, tickets and
//! check-in. A registration whose confirmation mail cannot be delivered is
//! rolled back so that nobody holds a seat without having received a ticket.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::FeaturesConfig;
use crate::database::{DatabaseService, FormAnswers, RegistrationChange};
use crate::models::{
    Event, FormWithFields, InvitationOutcome, InvitationReport, Registration, RegistrationCounts,
    RegistrationStatus, RegistrationWithUser, User,
};
use crate::services::auth::CurrentUser;
use crate::services::event::ensure_owner;
use crate::services::forms::validate_response;
use crate::services::notification::NotificationService;
use crate::services::ticket::TicketService;
use crate::utils::errors::{EventBuddyError, FieldErrors, Result};
use crate::utils::helpers::{is_valid_email, normalize_email};
use crate::utils::logging::{log_event_action, log_registration_transition, log_user_action};

/// Largest number of addresses accepted in one invitation request
pub const MAX_INVITATIONS: usize = 200;

/// Form answers keyed by field id
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnswersRequest {
    #[serde(default)]
    pub answers: HashMap<i64, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InviteRequest {
    pub emails: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckInRequest {
    /// Ticket code or the full verification URL from the QR code
    pub ticket: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegistrationFilter {
    pub status: Option<RegistrationStatus>,
}

/// What an invitee sees when opening the invitation link
#[derive(Debug, Clone, Serialize)]
pub struct InvitationView {
    pub registration_id: i64,
    pub status: RegistrationStatus,
    pub invitee_name: String,
    pub event: Event,
    pub form: Option<FormWithFields>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckInResult {
    pub registration_id: i64,
    pub attendee_name: String,
    pub attendee_email: String,
    pub checked_in_at: Option<DateTime<Utc>>,
}

/// Public answer to a ticket scan
#[derive(Debug, Clone, Serialize)]
pub struct TicketVerification {
    pub ticket_code: Uuid,
    pub valid: bool,
    pub status: RegistrationStatus,
    pub attendee_name: String,
    pub event_id: i64,
    pub event_title: String,
    pub event_start: DateTime<Utc>,
    pub checked_in_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventStats {
    pub event_id: i64,
    pub counts: RegistrationCounts,
    pub attending: i64,
    pub check_in_rate: f64,
    pub capacity: Option<i32>,
    pub remaining_capacity: Option<i32>,
}

/// Normalise, validate and deduplicate invitation addresses, keeping the
/// order they were given in
pub fn prepare_emails(emails: &[String]) -> Result<Vec<String>> {
    let mut errors = FieldErrors::new();
    if emails.is_empty() {
        errors.entry("emails".to_string()).or_default().push("At least one email address is required".to_string());
    }

    let mut seen = HashSet::new();
    let mut unique = Vec::new();
    for (index, raw) in emails.iter().enumerate() {
        let email = normalize_email(raw);
        if !is_valid_email(&email) {
            errors
                .entry(format!("emails[{}]", index))
                .or_default()
                .push(format!("'{}' is not a valid email address", raw.trim()));
            continue;
        }
        if seen.insert(email.clone()) {
            unique.push(email);
        }
    }

    if unique.len() > MAX_INVITATIONS {
        errors
            .entry("emails".to_string())
            .or_default()
            .push(format!("At most {} addresses can be invited at once", MAX_INVITATIONS));
    }

    if errors.is_empty() {
        Ok(unique)
    } else {
        Err(EventBuddyError::Validation(errors))
    }
}

/// Validate answers against the event form. Events without a form accept no answers.
pub fn collect_answers(form: Option<&FormWithFields>, answers: &HashMap<i64, Value>) -> Result<Option<FormAnswers>> {
    match form {
        Some(form) => Ok(Some(FormAnswers {
            form_id: form.form.id,
            values: validate_response(&form.fields, answers)?,
        })),
        None if answers.is_empty() => Ok(None),
        None => Err(EventBuddyError::field("answers", "This event has no registration form")),
    }
}

/// Registration service for attendee operations
#[derive(Clone)]
pub struct RegistrationService {
    db: DatabaseService,
    tickets: TicketService,
    notifications: NotificationService,
    features: FeaturesConfig,
}

impl RegistrationService {
    /// Create a new RegistrationService instance
    pub fn new(
        db: DatabaseService,
        tickets: TicketService,
        notifications: NotificationService,
        features: FeaturesConfig,
    ) -> Self {
        Self {
            db,
            tickets,
            notifications,
            features,
        }
    }

    async fn event(&self, event_id: i64) -> Result<Event> {
        self.db
            .events
            .find_by_id(event_id)
            .await?
            .ok_or(EventBuddyError::EventNotFound { event_id })
    }

    async fn owned_event(&self, user: &CurrentUser, event_id: i64) -> Result<Event> {
        let event = self.event(event_id).await?;
        ensure_owner(user, &event)?;
        Ok(event)
    }

    async fn registration(&self, registration_id: i64) -> Result<Registration> {
        self.db
            .registrations
            .find_by_id(registration_id)
            .await?
            .ok_or(EventBuddyError::RegistrationNotFound { registration_id })
    }

    /// A registration of `event_id`, managed by the caller
    async fn managed_registration(&self, user: &CurrentUser, event_id: i64, registration_id: i64) -> Result<(Event, Registration)> {
        let event = self.owned_event(user, event_id).await?;
        let registration = self.registration(registration_id).await?;
        if registration.event_id != event_id {
            return Err(EventBuddyError::RegistrationNotFound { registration_id });
        }
        Ok((event, registration))
    }

    async fn user(&self, user_id: i64) -> Result<User> {
        self.db
            .users
            .find_by_id(user_id)
            .await?
            .ok_or(EventBuddyError::UserNotFound { user_id })
    }

    /// Send the ticket for a fresh registration, undoing the registration when
    /// the mail cannot be delivered
    async fn confirm(&self, change: RegistrationChange, event: &Event) -> Result<Registration> {
        let delivered = async {
            let user = self.user(change.registration.user_id).await?;
            let code = change.registration.ticket_code;
            let qr = self.tickets.qr_svg(code)?;
            let mail = self
                .notifications
                .confirmation_mail(&user, event, &self.tickets.verification_url(code), &qr)?;
            self.notifications.send("confirmation", mail).await?;
            Ok::<(), EventBuddyError>(())
        }
        .await;

        match delivered {
            Ok(()) => Ok(change.registration),
            Err(e) => {
                warn!(registration_id = change.registration.id, error = %e, "Confirmation failed, rolling back registration");
                if let Err(undo_error) = self.db.undo_registration(&change).await {
                    error!(
                        registration_id = change.registration.id,
                        error = %undo_error,
                        "Registration rollback failed"
                    );
                }
                Err(e)
            }
        }
    }

    /// Register the caller for a public event
    pub async fn register(&self, user: &CurrentUser, event_id: i64, request: AnswersRequest) -> Result<Registration> {
        if !self.features.self_registration {
            return Err(EventBuddyError::PermissionDenied("Self-registration is disabled".to_string()));
        }

        let event = self.event(event_id).await?;
        if !event.is_public {
            return Err(EventBuddyError::PermissionDenied("This event is open by invitation only".to_string()));
        }
        if event.organizer_id == user.id {
            return Err(EventBuddyError::Conflict("Organizers cannot register for their own event".to_string()));
        }
        if !event.status.accepts_attendees() {
            return Err(EventBuddyError::Conflict(format!("Event is {}", event.status)));
        }
        if event.is_full() {
            return Err(EventBuddyError::CapacityFull);
        }

        let form = self.db.form_with_fields(event_id).await?;
        let answers = collect_answers(form.as_ref(), &request.answers)?;

        let change = self.db.register_attendee(event_id, user.id, answers).await?;
        let registration = self.confirm(change, &event).await?;

        log_registration_transition(registration.id, event_id, "NONE", registration.status.as_str());
        log_user_action(user.id, "register", Some(&event_id.to_string()));
        Ok(registration)
    }

    /// Invite a list of addresses; accounts are created for unknown addresses
    pub async fn invite(&self, user: &CurrentUser, event_id: i64, request: InviteRequest) -> Result<Vec<InvitationReport>> {
        let event = self.owned_event(user, event_id).await?;
        let emails = prepare_emails(&request.emails)?;

        let prepared = self.db.prepare_invitations(event_id, user.id, &emails).await?;
        let mut reports = Vec::with_capacity(prepared.len());
        for invitation in prepared {
            let outcome = match invitation.invitee {
                Some((registration, invitee)) => match self.send_invitation(&registration, &invitee, &event).await {
                    Ok(()) => invitation.outcome,
                    Err(e) => InvitationOutcome::Failed { reason: e.user_message() },
                },
                None => invitation.outcome,
            };
            reports.push(InvitationReport {
                email: invitation.email,
                outcome,
            });
        }

        let invited = reports
            .iter()
            .filter(|r| matches!(r.outcome, InvitationOutcome::Invited { .. }))
            .count();
        log_event_action(event_id, "invite", user.id, Some(&format!("{}/{} invited", invited, reports.len())));
        Ok(reports)
    }

    async fn send_invitation(&self, registration: &Registration, invitee: &User, event: &Event) -> Result<()> {
        let token = self.tickets.issue_invitation_token(registration.id, event.end_date)?;
        let mail = self
            .notifications
            .invitation_mail(invitee, event, &self.tickets.invitation_link(&token))?;
        self.notifications.send("invitation", mail).await?;
        self.db.registrations.mark_invitation_sent(registration.id).await?;
        Ok(())
    }

    /// Send the invitation of a PENDING registration again
    pub async fn resend(&self, user: &CurrentUser, event_id: i64, registration_id: i64) -> Result<Registration> {
        let (event, registration) = self.managed_registration(user, event_id, registration_id).await?;
        if registration.status != RegistrationStatus::Pending {
            return Err(EventBuddyError::Conflict(format!(
                "Only pending invitations can be resent; this one is {}",
                registration.status
            )));
        }
        if !event.status.accepts_attendees() {
            return Err(EventBuddyError::Conflict(format!("Event is {}", event.status)));
        }

        let invitee = self.user(registration.user_id).await?;
        self.send_invitation(&registration, &invitee, &event).await?;
        log_event_action(event_id, "resend_invitation", user.id, Some(&registration_id.to_string()));
        self.registration(registration_id).await
    }

    /// Details behind an invitation link
    pub async fn invitation(&self, token: &str) -> Result<InvitationView> {
        let registration = self.registration(self.tickets.verify_invitation_token(token)?).await?;
        let event = self.event(registration.event_id).await?;
        let invitee = self.user(registration.user_id).await?;
        let form = self.db.form_with_fields(event.id).await?;

        Ok(InvitationView {
            registration_id: registration.id,
            status: registration.status,
            invitee_name: invitee.name,
            event,
            form,
        })
    }

    /// Accept an invitation with the form answers
    pub async fn accept_invitation(&self, token: &str, request: AnswersRequest) -> Result<Registration> {
        let registration = self.registration(self.tickets.verify_invitation_token(token)?).await?;
        let event = self.event(registration.event_id).await?;
        let form = self.db.form_with_fields(event.id).await?;
        let answers = collect_answers(form.as_ref(), &request.answers)?;

        let change = self.db.accept_invitation(registration.id, answers).await?;
        let accepted = self.confirm(change, &event).await?;

        log_registration_transition(accepted.id, event.id, registration.status.as_str(), accepted.status.as_str());
        Ok(accepted)
    }

    pub async fn decline_invitation(&self, token: &str) -> Result<Registration> {
        let registration_id = self.tickets.verify_invitation_token(token)?;
        let change = self
            .db
            .transition_registration(registration_id, RegistrationStatus::Declined)
            .await?;
        self.log_change(&change);
        Ok(change.registration)
    }

    /// Attendee cancels their own registration
    pub async fn cancel(&self, user: &CurrentUser, registration_id: i64) -> Result<Registration> {
        let registration = self.registration(registration_id).await?;
        if registration.user_id != user.id {
            return Err(EventBuddyError::RegistrationNotFound { registration_id });
        }

        let change = self
            .db
            .transition_registration(registration_id, RegistrationStatus::Cancelled)
            .await?;
        self.log_change(&change);
        Ok(change.registration)
    }

    /// Organizer withdraws a registration and tells the attendee
    pub async fn revoke(&self, user: &CurrentUser, event_id: i64, registration_id: i64) -> Result<Registration> {
        let (event, _) = self.managed_registration(user, event_id, registration_id).await?;
        let change = self
            .db
            .transition_registration(registration_id, RegistrationStatus::Cancelled)
            .await?;
        self.log_change(&change);
        log_event_action(event_id, "revoke", user.id, Some(&registration_id.to_string()));

        let attendee = self.user(change.registration.user_id).await?;
        match self.notifications.revocation_mail(&attendee.name, &attendee.email, &event) {
            Ok(mail) => {
                if let Err(e) = self.notifications.send("revocation", mail).await {
                    warn!(registration_id, error = %e, "Revocation mail not delivered");
                }
            }
            Err(e) => warn!(registration_id, error = %e, "Revocation mail not built"),
        }

        Ok(change.registration)
    }

    fn log_change(&self, change: &RegistrationChange) {
        let from = change.previous.as_ref().map(|p| p.status.as_str()).unwrap_or("NONE");
        log_registration_transition(change.registration.id, change.registration.event_id, from, change.registration.status.as_str());
    }

    /// Check in a scanned ticket at the door of `event_id`
    pub async fn check_in(&self, user: &CurrentUser, event_id: i64, request: CheckInRequest) -> Result<CheckInResult> {
        self.owned_event(user, event_id).await?;
        let code = self.tickets.parse_ticket_reference(&request.ticket)?;
        let registration = self
            .db
            .registrations
            .find_by_ticket(code)
            .await?
            .ok_or(EventBuddyError::TicketNotFound)?;

        let checked_in = self.db.check_in(event_id, registration.id).await?;
        let attendee = self.user(checked_in.user_id).await?;

        log_registration_transition(checked_in.id, event_id, registration.status.as_str(), checked_in.status.as_str());
        info!(event_id, registration_id = checked_in.id, "Ticket checked in");
        Ok(CheckInResult {
            registration_id: checked_in.id,
            attendee_name: attendee.name,
            attendee_email: attendee.email,
            checked_in_at: checked_in.checked_in_at,
        })
    }

    /// Public ticket lookup; never changes anything
    pub async fn verify(&self, ticket_code: &str) -> Result<TicketVerification> {
        let code = Uuid::parse_str(ticket_code.trim()).map_err(|_| EventBuddyError::TicketNotFound)?;
        let registration = self
            .db
            .registrations
            .find_by_ticket(code)
            .await?
            .ok_or(EventBuddyError::TicketNotFound)?;
        let event = self.event(registration.event_id).await?;
        let attendee = self.user(registration.user_id).await?;

        debug!(registration_id = registration.id, "Ticket verified");
        Ok(TicketVerification {
            ticket_code: code,
            valid: registration.status.holds_seat() && event.status.accepts_attendees(),
            status: registration.status,
            attendee_name: attendee.name,
            event_id: event.id,
            event_title: event.title,
            event_start: event.start_date,
            checked_in_at: registration.checked_in_at,
        })
    }

    pub async fn stats(&self, user: &CurrentUser, event_id: i64) -> Result<EventStats> {
        let event = self.owned_event(user, event_id).await?;
        let counts = self.db.events.registration_counts(event_id).await?;
        Ok(EventStats {
            event_id,
            attending: counts.attending(),
            check_in_rate: counts.check_in_rate(),
            counts,
            capacity: event.capacity,
            remaining_capacity: event.remaining_capacity,
        })
    }

    pub async fn list_for_event(
        &self,
        user: &CurrentUser,
        event_id: i64,
        filter: &RegistrationFilter,
    ) -> Result<Vec<RegistrationWithUser>> {
        self.owned_event(user, event_id).await?;
        self.db.registrations.list_by_event(event_id, filter.status).await
    }

    /// QR ticket of a registration as SVG. Visible to the attendee and to the
    /// event's organizer.
    pub async fn ticket_svg(&self, user: &CurrentUser, registration_id: i64) -> Result<String> {
        let registration = self.registration(registration_id).await?;
        if registration.user_id != user.id {
            let event = self.event(registration.event_id).await?;
            if ensure_owner(user, &event).is_err() {
                return Err(EventBuddyError::RegistrationNotFound { registration_id });
            }
        }
        if !registration.status.holds_seat() {
            return Err(EventBuddyError::Conflict(format!(
                "No ticket for a {} registration",
                registration.status.as_str().to_lowercase()
            )));
        }
        self.tickets.qr_svg(registration.ticket_code)
    }
}
