//! Registration model

use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use crate::utils::errors::{EventBuddyError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "registration_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RegistrationStatus {
    Pending,
    Registered,
    CheckedIn,
    Cancelled,
    Declined,
}

impl RegistrationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegistrationStatus::Pending => "PENDING",
            RegistrationStatus::Registered => "REGISTERED",
            RegistrationStatus::CheckedIn => "CHECKED_IN",
            RegistrationStatus::Cancelled => "CANCELLED",
            RegistrationStatus::Declined => "DECLINED",
        }
    }

    /// Statuses that occupy a seat
    pub fn holds_seat(&self) -> bool {
        matches!(self, RegistrationStatus::Registered | RegistrationStatus::CheckedIn)
    }

    /// Closed registrations may be reopened by a new invitation or registration
    pub fn is_closed(&self) -> bool {
        matches!(self, RegistrationStatus::Cancelled | RegistrationStatus::Declined)
    }

    pub fn can_transition_to(&self, next: RegistrationStatus) -> bool {
        use RegistrationStatus::*;
        matches!(
            (self, next),
            (Pending, Registered)
                | (Pending, Declined)
                | (Pending, Cancelled)
                | (Registered, CheckedIn)
                | (Registered, Cancelled)
                | (Cancelled, Pending)
                | (Cancelled, Registered)
                | (Declined, Pending)
                | (Declined, Registered)
        )
    }

    pub fn transition(self, next: RegistrationStatus) -> Result<RegistrationStatus> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(EventBuddyError::InvalidStateTransition {
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }
}

impl std::fmt::Display for RegistrationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RegistrationStatus {
    type Err = EventBuddyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(RegistrationStatus::Pending),
            "REGISTERED" => Ok(RegistrationStatus::Registered),
            "CHECKED_IN" => Ok(RegistrationStatus::CheckedIn),
            "CANCELLED" => Ok(RegistrationStatus::Cancelled),
            "DECLINED" => Ok(RegistrationStatus::Declined),
            other => Err(EventBuddyError::InvalidInput(format!("Unknown registration status: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Registration {
    pub id: i64,
    pub event_id: i64,
    pub user_id: i64,
    pub status: RegistrationStatus,
    pub ticket_code: Uuid,
    pub invited_by: Option<i64>,
    pub invitation_sent_at: Option<DateTime<Utc>>,
    pub reminder_sent_at: Option<DateTime<Utc>>,
    pub checked_in_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Registration joined with the attendee's identity, for listings and exports
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RegistrationWithUser {
    pub id: i64,
    pub event_id: i64,
    pub user_id: i64,
    pub status: RegistrationStatus,
    pub ticket_code: Uuid,
    pub checked_in_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub user_name: String,
    pub user_email: String,
}

/// A registration due for its reminder mail, with what the mail needs
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ReminderDue {
    pub registration_id: i64,
    pub ticket_code: Uuid,
    pub user_name: String,
    pub user_email: String,
    pub event_id: i64,
    pub event_title: String,
    pub event_location: Option<String>,
    pub event_start: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRegistrationRequest {
    pub event_id: i64,
    pub user_id: i64,
    pub status: RegistrationStatus,
    pub invited_by: Option<i64>,
}

/// Outcome of one address in a bulk invitation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum InvitationOutcome {
    Invited { registration_id: i64 },
    Skipped { reason: String },
    Failed { reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvitationReport {
    pub email: String,
    #[serde(flatten)]
    pub outcome: InvitationOutcome,
}

#[cfg(test)]
mod tests {
    use super::*;
    use RegistrationStatus::*;

    #[test]
    fn test_forward_transitions() {
        assert_eq!(Pending.transition(Registered).unwrap(), Registered);
        assert_eq!(Registered.transition(CheckedIn).unwrap(), CheckedIn);
        assert_eq!(Pending.transition(Declined).unwrap(), Declined);
        assert_eq!(Registered.transition(Cancelled).unwrap(), Cancelled);
    }

    #[test]
    fn test_checked_in_is_terminal() {
        for next in [Pending, Registered, Cancelled, Declined, CheckedIn] {
            assert!(CheckedIn.transition(next).is_err());
        }
    }

    #[test]
    fn test_check_in_requires_registered() {
        assert!(Pending.transition(CheckedIn).is_err());
        assert!(Cancelled.transition(CheckedIn).is_err());
        assert!(Declined.transition(CheckedIn).is_err());
    }

    #[test]
    fn test_closed_registrations_can_reopen() {
        assert!(Cancelled.can_transition_to(Pending));
        assert!(Declined.can_transition_to(Registered));
        assert!(!Registered.can_transition_to(Pending));
        assert!(!Declined.can_transition_to(Cancelled));
    }

    #[test]
    fn test_seat_holding() {
        assert!(Registered.holds_seat());
        assert!(CheckedIn.holds_seat());
        assert!(!Pending.holds_seat());
        assert!(!Cancelled.holds_seat());
    }

    #[test]
    fn test_parse_status() {
        assert_eq!("checked_in".parse::<RegistrationStatus>().unwrap(), CheckedIn);
        assert!("waitlisted".parse::<RegistrationStatus>().is_err());
    }

    #[test]
    fn test_invitation_report_serialization() {
        let report = InvitationReport {
            email: "ada@example.org".to_string(),
            outcome: InvitationOutcome::Skipped { reason: "already registered".to_string() },
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["outcome"], "skipped");
        assert_eq!(json["reason"], "already registered");
        assert_eq!(json["email"], "ada@example.org");
    }
}
