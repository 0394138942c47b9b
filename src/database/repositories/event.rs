//! Event repository implementation

use sqlx::{PgConnection, PgPool};
use chrono::{DateTime, Utc};
use crate::models::event::{Event, EventStatus, Capacity, CreateEventRequest, RegistrationCounts};
use crate::models::registration::RegistrationStatus;
use crate::utils::errors::EventBuddyError;

const EVENT_COLUMNS: &str = "id, organizer_id, title, description, location, start_date, end_date, capacity, remaining_capacity, status, is_public, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct EventRepository {
    pool: PgPool,
}

impl EventRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a new event with its initial status and full capacity
    pub async fn create_tx(
        conn: &mut PgConnection,
        request: CreateEventRequest,
        status: EventStatus,
    ) -> Result<Event, EventBuddyError> {
        let (capacity, remaining) = Capacity::new(request.capacity)?.columns();

        let event = sqlx::query_as::<_, Event>(&format!(
            r#"
            INSERT INTO events (organizer_id, title, description, location, start_date, end_date, capacity, remaining_capacity, status, is_public, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING {}
            "#,
            EVENT_COLUMNS
        ))
        .bind(request.organizer_id)
        .bind(request.title)
        .bind(request.description)
        .bind(request.location)
        .bind(request.start_date)
        .bind(request.end_date)
        .bind(capacity)
        .bind(remaining)
        .bind(status)
        .bind(request.is_public)
        .bind(Utc::now())
        .bind(Utc::now())
        .fetch_one(conn)
        .await?;

        Ok(event)
    }

    /// Find event by ID
    pub async fn find_by_id(&self, id: i64) -> Result<Option<Event>, EventBuddyError> {
        let event = sqlx::query_as::<_, Event>(&format!("SELECT {} FROM events WHERE id = $1", EVENT_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(event)
    }

    /// Load an event and lock its row until the transaction ends
    pub async fn lock_tx(conn: &mut PgConnection, id: i64) -> Result<Event, EventBuddyError> {
        sqlx::query_as::<_, Event>(&format!("SELECT {} FROM events WHERE id = $1 FOR UPDATE", EVENT_COLUMNS))
            .bind(id)
            .fetch_optional(conn)
            .await?
            .ok_or(EventBuddyError::EventNotFound { event_id: id })
    }

    /// Write back every editable column of an event
    pub async fn save_tx(conn: &mut PgConnection, event: &Event) -> Result<Event, EventBuddyError> {
        let event = sqlx::query_as::<_, Event>(&format!(
            r#"
            UPDATE events
            SET title = $2,
                description = $3,
                location = $4,
                start_date = $5,
                end_date = $6,
                capacity = $7,
                remaining_capacity = $8,
                status = $9,
                is_public = $10,
                updated_at = $11
            WHERE id = $1
            RETURNING {}
            "#,
            EVENT_COLUMNS
        ))
        .bind(event.id)
        .bind(&event.title)
        .bind(&event.description)
        .bind(&event.location)
        .bind(event.start_date)
        .bind(event.end_date)
        .bind(event.capacity)
        .bind(event.remaining_capacity)
        .bind(event.status)
        .bind(event.is_public)
        .bind(Utc::now())
        .fetch_optional(conn)
        .await?
        .ok_or(EventBuddyError::EventNotFound { event_id: event.id })?;

        Ok(event)
    }

    /// Set the status of an event
    pub async fn update_status_tx(conn: &mut PgConnection, id: i64, status: EventStatus) -> Result<Event, EventBuddyError> {
        sqlx::query_as::<_, Event>(&format!(
            "UPDATE events SET status = $2, updated_at = $3 WHERE id = $1 RETURNING {}",
            EVENT_COLUMNS
        ))
        .bind(id)
        .bind(status)
        .bind(Utc::now())
        .fetch_optional(conn)
        .await?
        .ok_or(EventBuddyError::EventNotFound { event_id: id })
    }

    /// Delete event; forms, registrations and responses cascade
    pub async fn delete(&self, id: i64) -> Result<bool, EventBuddyError> {
        let result = sqlx::query("DELETE FROM events WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Public events still open to attendees, soonest first
    pub async fn list_public_upcoming(&self, limit: i64, offset: i64) -> Result<Vec<Event>, EventBuddyError> {
        let events = sqlx::query_as::<_, Event>(&format!(
            r#"
            SELECT {} FROM events
            WHERE is_public = true AND status IN ('UPCOMING', 'ONGOING')
            ORDER BY start_date ASC
            LIMIT $1 OFFSET $2
            "#,
            EVENT_COLUMNS
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(events)
    }

    /// Events owned by an organizer, newest first
    pub async fn list_by_organizer(&self, organizer_id: i64, limit: i64, offset: i64) -> Result<Vec<Event>, EventBuddyError> {
        let events = sqlx::query_as::<_, Event>(&format!(
            "SELECT {} FROM events WHERE organizer_id = $1 ORDER BY start_date DESC LIMIT $2 OFFSET $3",
            EVENT_COLUMNS
        ))
        .bind(organizer_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(events)
    }

    /// List all events with pagination
    pub async fn list_all(&self, limit: i64, offset: i64) -> Result<Vec<Event>, EventBuddyError> {
        let events = sqlx::query_as::<_, Event>(&format!(
            "SELECT {} FROM events ORDER BY start_date DESC LIMIT $1 OFFSET $2",
            EVENT_COLUMNS
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(events)
    }

    /// Take one seat if any is left. Returns false when the event is full.
    pub async fn reserve_seat_tx(conn: &mut PgConnection, id: i64) -> Result<bool, EventBuddyError> {
        let reserved: Option<(i64,)> = sqlx::query_as(
            r#"
            UPDATE events
            SET remaining_capacity = CASE WHEN capacity IS NULL THEN NULL ELSE remaining_capacity - 1 END,
                updated_at = $2
            WHERE id = $1 AND (capacity IS NULL OR remaining_capacity > 0)
            RETURNING id
            "#
        )
        .bind(id)
        .bind(Utc::now())
        .fetch_optional(conn)
        .await?;

        Ok(reserved.is_some())
    }

    /// Give one seat back, never above the total
    pub async fn release_seat_tx(conn: &mut PgConnection, id: i64) -> Result<(), EventBuddyError> {
        sqlx::query(
            r#"
            UPDATE events
            SET remaining_capacity = LEAST(remaining_capacity + 1, capacity),
                updated_at = $2
            WHERE id = $1 AND capacity IS NOT NULL
            "#
        )
        .bind(id)
        .bind(Utc::now())
        .execute(conn)
        .await?;

        Ok(())
    }

    /// Move upcoming events whose start has passed to ONGOING
    pub async fn start_due_events(&self, now: DateTime<Utc>) -> Result<Vec<Event>, EventBuddyError> {
        let events = sqlx::query_as::<_, Event>(&format!(
            r#"
            UPDATE events SET status = 'ONGOING', updated_at = $1
            WHERE status = 'UPCOMING' AND start_date <= $1 AND end_date > $1
            RETURNING {}
            "#,
            EVENT_COLUMNS
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(events)
    }

    /// Move upcoming or ongoing events whose end has passed to ENDED
    pub async fn end_due_events(&self, now: DateTime<Utc>) -> Result<Vec<Event>, EventBuddyError> {
        let events = sqlx::query_as::<_, Event>(&format!(
            r#"
            UPDATE events SET status = 'ENDED', updated_at = $1
            WHERE status IN ('UPCOMING', 'ONGOING') AND end_date <= $1
            RETURNING {}
            "#,
            EVENT_COLUMNS
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(events)
    }

    /// Registration counts of an event grouped by status
    pub async fn registration_counts(&self, event_id: i64) -> Result<RegistrationCounts, EventBuddyError> {
        let rows: Vec<(RegistrationStatus, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM registrations WHERE event_id = $1 GROUP BY status"
        )
        .bind(event_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(counts_from_rows(rows))
    }
}

fn counts_from_rows(rows: Vec<(RegistrationStatus, i64)>) -> RegistrationCounts {
    rows.into_iter().fold(RegistrationCounts::default(), |mut counts, (status, count)| {
        match status {
            RegistrationStatus::Pending => counts.pending = count,
            RegistrationStatus::Registered => counts.registered = count,
            RegistrationStatus::CheckedIn => counts.checked_in = count,
            RegistrationStatus::Cancelled => counts.cancelled = count,
            RegistrationStatus::Declined => counts.declined = count,
        }
        counts
    })
}
