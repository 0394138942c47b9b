//! Event model

use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use sqlx::FromRow;

use crate::utils::errors::{EventBuddyError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "event_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventStatus {
    Upcoming,
    Ongoing,
    Ended,
    Cancelled,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Upcoming => "UPCOMING",
            EventStatus::Ongoing => "ONGOING",
            EventStatus::Ended => "ENDED",
            EventStatus::Cancelled => "CANCELLED",
        }
    }

    /// Status an event should have at `now` judging by its dates alone
    pub fn scheduled_for(start: DateTime<Utc>, end: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        if now >= end {
            EventStatus::Ended
        } else if now >= start {
            EventStatus::Ongoing
        } else {
            EventStatus::Upcoming
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, EventStatus::Ended | EventStatus::Cancelled)
    }

    pub fn can_transition_to(&self, next: EventStatus) -> bool {
        use EventStatus::*;
        matches!(
            (self, next),
            (Upcoming, Ongoing) | (Upcoming, Ended) | (Upcoming, Cancelled) | (Ongoing, Ended) | (Ongoing, Cancelled)
        )
    }

    pub fn transition(self, next: EventStatus) -> Result<EventStatus> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(EventBuddyError::InvalidStateTransition {
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }

    /// Whether attendees may still register or check in
    pub fn accepts_attendees(&self) -> bool {
        matches!(self, EventStatus::Upcoming | EventStatus::Ongoing)
    }
}

impl std::fmt::Display for EventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Event {
    pub id: i64,
    pub organizer_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub capacity: Option<i32>,
    pub remaining_capacity: Option<i32>,
    pub status: EventStatus,
    pub is_public: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Event {
    pub fn capacity(&self) -> Capacity {
        match (self.capacity, self.remaining_capacity) {
            (Some(total), Some(remaining)) => Capacity::Limited { total, remaining },
            (Some(total), None) => Capacity::Limited { total, remaining: total },
            _ => Capacity::Unlimited,
        }
    }

    pub fn is_full(&self) -> bool {
        !self.capacity().has_room()
    }
}

/// Seat accounting for an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Capacity {
    Unlimited,
    Limited { total: i32, remaining: i32 },
}

impl Capacity {
    pub fn new(total: Option<i32>) -> Result<Self> {
        match total {
            None => Ok(Capacity::Unlimited),
            Some(total) if total > 0 => Ok(Capacity::Limited { total, remaining: total }),
            Some(_) => Err(EventBuddyError::field("capacity", "Capacity must be greater than zero")),
        }
    }

    pub fn has_room(&self) -> bool {
        match self {
            Capacity::Unlimited => true,
            Capacity::Limited { remaining, .. } => *remaining > 0,
        }
    }

    pub fn taken(&self) -> i32 {
        match self {
            Capacity::Unlimited => 0,
            Capacity::Limited { total, remaining } => total - remaining,
        }
    }

    /// Take one seat
    pub fn reserve(self) -> Result<Self> {
        match self {
            Capacity::Unlimited => Ok(self),
            Capacity::Limited { total, remaining } if remaining > 0 => Ok(Capacity::Limited {
                total,
                remaining: remaining - 1,
            }),
            Capacity::Limited { .. } => Err(EventBuddyError::CapacityFull),
        }
    }

    /// Give one seat back; never exceeds the total
    pub fn release(self) -> Self {
        match self {
            Capacity::Unlimited => self,
            Capacity::Limited { total, remaining } => Capacity::Limited {
                total,
                remaining: (remaining + 1).min(total),
            },
        }
    }

    /// Change the total while keeping the seats already taken
    pub fn resize(self, new_total: Option<i32>) -> Result<Self> {
        let taken = self.taken();
        match new_total {
            None => Ok(Capacity::Unlimited),
            Some(total) if total <= 0 => {
                Err(EventBuddyError::field("capacity", "Capacity must be greater than zero"))
            }
            Some(total) if total < taken => Err(EventBuddyError::field(
                "capacity",
                format!("Capacity cannot be lower than the {} seats already taken", taken),
            )),
            Some(total) => Ok(Capacity::Limited { total, remaining: total - taken }),
        }
    }

    /// Column values for `(capacity, remaining_capacity)`
    pub fn columns(&self) -> (Option<i32>, Option<i32>) {
        match self {
            Capacity::Unlimited => (None, None),
            Capacity::Limited { total, remaining } => (Some(*total), Some(*remaining)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateEventRequest {
    pub organizer_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub capacity: Option<i32>,
    pub is_public: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateEventRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    /// `Some(None)` removes the limit
    #[serde(default, with = "double_option")]
    pub capacity: Option<Option<i32>>,
    pub is_public: Option<bool>,
}

/// Distinguishes an absent field from an explicit `null`
mod double_option {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S, T>(value: &Option<Option<T>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        T: Serialize,
    {
        match value {
            Some(inner) => inner.serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de>,
    {
        Option::<T>::deserialize(deserializer).map(Some)
    }
}

/// Registration counts of an event grouped by status
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegistrationCounts {
    pub pending: i64,
    pub registered: i64,
    pub checked_in: i64,
    pub cancelled: i64,
    pub declined: i64,
}

impl RegistrationCounts {
    pub fn attending(&self) -> i64 {
        self.registered + self.checked_in
    }

    /// Share of attending registrations that have checked in, 0.0 to 1.0
    pub fn check_in_rate(&self) -> f64 {
        let attending = self.attending();
        if attending == 0 {
            0.0
        } else {
            self.checked_in as f64 / attending as f64
        }
    }
}
