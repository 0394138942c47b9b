//! Registration repository implementation

use sqlx::{PgConnection, PgPool};
use chrono::{DateTime, Utc};
use uuid::Uuid;
use crate::models::registration::{
    Registration, RegistrationStatus, RegistrationWithUser, CreateRegistrationRequest, ReminderDue,
};
use crate::utils::errors::EventBuddyError;

const REGISTRATION_COLUMNS: &str = "id, event_id, user_id, status, ticket_code, invited_by, invitation_sent_at, reminder_sent_at, checked_in_at, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct RegistrationRepository {
    pool: PgPool,
}

impl RegistrationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a registration with a fresh ticket code
    pub async fn create_tx(conn: &mut PgConnection, request: CreateRegistrationRequest) -> Result<Registration, EventBuddyError> {
        let registration = sqlx::query_as::<_, Registration>(&format!(
            r#"
            INSERT INTO registrations (event_id, user_id, status, ticket_code, invited_by, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {}
            "#,
            REGISTRATION_COLUMNS
        ))
        .bind(request.event_id)
        .bind(request.user_id)
        .bind(request.status)
        .bind(Uuid::new_v4())
        .bind(request.invited_by)
        .bind(Utc::now())
        .bind(Utc::now())
        .fetch_one(conn)
        .await?;

        Ok(registration)
    }

    /// Find registration by ID
    pub async fn find_by_id(&self, id: i64) -> Result<Option<Registration>, EventBuddyError> {
        let registration = sqlx::query_as::<_, Registration>(&format!(
            "SELECT {} FROM registrations WHERE id = $1",
            REGISTRATION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(registration)
    }

    /// Load a registration and lock its row until the transaction ends
    pub async fn lock_tx(conn: &mut PgConnection, id: i64) -> Result<Registration, EventBuddyError> {
        sqlx::query_as::<_, Registration>(&format!(
            "SELECT {} FROM registrations WHERE id = $1 FOR UPDATE",
            REGISTRATION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(conn)
        .await?
        .ok_or(EventBuddyError::RegistrationNotFound { registration_id: id })
    }

    /// Find registration by its ticket code
    pub async fn find_by_ticket(&self, ticket_code: Uuid) -> Result<Option<Registration>, EventBuddyError> {
        let registration = sqlx::query_as::<_, Registration>(&format!(
            "SELECT {} FROM registrations WHERE ticket_code = $1",
            REGISTRATION_COLUMNS
        ))
        .bind(ticket_code)
        .fetch_optional(&self.pool)
        .await?;

        Ok(registration)
    }

    /// Find (and lock) the registration of a user for an event
    pub async fn find_by_event_user_tx(
        conn: &mut PgConnection,
        event_id: i64,
        user_id: i64,
    ) -> Result<Option<Registration>, EventBuddyError> {
        let registration = sqlx::query_as::<_, Registration>(&format!(
            "SELECT {} FROM registrations WHERE event_id = $1 AND user_id = $2 FOR UPDATE",
            REGISTRATION_COLUMNS
        ))
        .bind(event_id)
        .bind(user_id)
        .fetch_optional(conn)
        .await?;

        Ok(registration)
    }

    /// Change the status of a registration. Entering CHECKED_IN stamps `checked_in_at`.
    pub async fn update_status_tx(
        conn: &mut PgConnection,
        id: i64,
        status: RegistrationStatus,
    ) -> Result<Registration, EventBuddyError> {
        sqlx::query_as::<_, Registration>(&format!(
            r#"
            UPDATE registrations
            SET status = $2,
                checked_in_at = CASE WHEN $2 = 'CHECKED_IN'::registration_status THEN $3 ELSE checked_in_at END,
                updated_at = $3
            WHERE id = $1
            RETURNING {}
            "#,
            REGISTRATION_COLUMNS
        ))
        .bind(id)
        .bind(status)
        .bind(Utc::now())
        .fetch_optional(conn)
        .await?
        .ok_or(EventBuddyError::RegistrationNotFound { registration_id: id })
    }

    /// Reopen a cancelled or declined registration under a new status
    pub async fn reopen_tx(
        conn: &mut PgConnection,
        id: i64,
        status: RegistrationStatus,
        invited_by: Option<i64>,
    ) -> Result<Registration, EventBuddyError> {
        sqlx::query_as::<_, Registration>(&format!(
            r#"
            UPDATE registrations
            SET status = $2,
                invited_by = COALESCE($3, invited_by),
                invitation_sent_at = NULL,
                reminder_sent_at = NULL,
                checked_in_at = NULL,
                updated_at = $4
            WHERE id = $1
            RETURNING {}
            "#,
            REGISTRATION_COLUMNS
        ))
        .bind(id)
        .bind(status)
        .bind(invited_by)
        .bind(Utc::now())
        .fetch_optional(conn)
        .await?
        .ok_or(EventBuddyError::RegistrationNotFound { registration_id: id })
    }

    /// Put a registration back exactly as it was
    pub async fn restore_tx(conn: &mut PgConnection, previous: &Registration) -> Result<(), EventBuddyError> {
        sqlx::query(
            r#"
            UPDATE registrations
            SET status = $2, invited_by = $3, invitation_sent_at = $4,
                reminder_sent_at = $5, checked_in_at = $6, updated_at = $7
            WHERE id = $1
            "#
        )
        .bind(previous.id)
        .bind(previous.status)
        .bind(previous.invited_by)
        .bind(previous.invitation_sent_at)
        .bind(previous.reminder_sent_at)
        .bind(previous.checked_in_at)
        .bind(previous.updated_at)
        .execute(conn)
        .await?;

        Ok(())
    }

    /// Delete registration; its answers cascade
    pub async fn delete_tx(conn: &mut PgConnection, id: i64) -> Result<(), EventBuddyError> {
        sqlx::query("DELETE FROM registrations WHERE id = $1")
            .bind(id)
            .execute(conn)
            .await?;

        Ok(())
    }

    /// Registrations of an event with attendee identity, optionally filtered by status
    pub async fn list_by_event(
        &self,
        event_id: i64,
        status: Option<RegistrationStatus>,
    ) -> Result<Vec<RegistrationWithUser>, EventBuddyError> {
        let registrations = sqlx::query_as::<_, RegistrationWithUser>(
            r#"
            SELECT r.id, r.event_id, r.user_id, r.status, r.ticket_code, r.checked_in_at, r.created_at,
                   u.name AS user_name, u.email AS user_email
            FROM registrations r
            JOIN users u ON u.id = r.user_id
            WHERE r.event_id = $1 AND ($2::registration_status IS NULL OR r.status = $2)
            ORDER BY r.created_at ASC
            "#
        )
        .bind(event_id)
        .bind(status)
        .fetch_all(&self.pool)
        .await?;

        Ok(registrations)
    }

    /// Registrations of a user, newest first
    pub async fn list_by_user(&self, user_id: i64) -> Result<Vec<Registration>, EventBuddyError> {
        let registrations = sqlx::query_as::<_, Registration>(&format!(
            "SELECT {} FROM registrations WHERE user_id = $1 ORDER BY created_at DESC",
            REGISTRATION_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(registrations)
    }

    /// Cancel every pending or registered registration of an event
    pub async fn cancel_open_for_event_tx(
        conn: &mut PgConnection,
        event_id: i64,
    ) -> Result<Vec<RegistrationWithUser>, EventBuddyError> {
        let cancelled = sqlx::query_as::<_, RegistrationWithUser>(
            r#"
            WITH cancelled AS (
                UPDATE registrations
                SET status = 'CANCELLED', updated_at = $2
                WHERE event_id = $1 AND status IN ('PENDING', 'REGISTERED')
                RETURNING id, event_id, user_id, status, ticket_code, checked_in_at, created_at
            )
            SELECT c.id, c.event_id, c.user_id, c.status, c.ticket_code, c.checked_in_at, c.created_at,
                   u.name AS user_name, u.email AS user_email
            FROM cancelled c
            JOIN users u ON u.id = c.user_id
            "#
        )
        .bind(event_id)
        .bind(Utc::now())
        .fetch_all(conn)
        .await?;

        Ok(cancelled)
    }

    /// Number of registrations currently holding a seat
    pub async fn count_seat_holders(&self, event_id: i64) -> Result<i64, EventBuddyError> {
        let count: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM registrations WHERE event_id = $1 AND status IN ('REGISTERED', 'CHECKED_IN')"
        )
        .bind(event_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count.0)
    }

    /// Stamp the time an invitation mail went out
    pub async fn mark_invitation_sent(&self, id: i64) -> Result<(), EventBuddyError> {
        sqlx::query("UPDATE registrations SET invitation_sent_at = $2, updated_at = $2 WHERE id = $1")
            .bind(id)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Stamp the time a reminder mail went out
    pub async fn mark_reminder_sent(&self, id: i64) -> Result<(), EventBuddyError> {
        sqlx::query("UPDATE registrations SET reminder_sent_at = $2, updated_at = $2 WHERE id = $1")
            .bind(id)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Registered attendees of events starting between `now` and `until` that have not been reminded
    pub async fn due_reminders(&self, now: DateTime<Utc>, until: DateTime<Utc>) -> Result<Vec<ReminderDue>, EventBuddyError> {
        let due = sqlx::query_as::<_, ReminderDue>(
            r#"
            SELECT r.id AS registration_id, r.ticket_code,
                   u.name AS user_name, u.email AS user_email,
                   e.id AS event_id, e.title AS event_title, e.location AS event_location, e.start_date AS event_start
            FROM registrations r
            JOIN users u ON u.id = r.user_id
            JOIN events e ON e.id = r.event_id
            WHERE r.status = 'REGISTERED'
              AND r.reminder_sent_at IS NULL
              AND e.status IN ('UPCOMING', 'ONGOING')
              AND e.start_date > $1 AND e.start_date <= $2
            ORDER BY e.start_date ASC, r.id ASC
            "#
        )
        .bind(now)
        .bind(until)
        .fetch_all(&self.pool)
        .await?;

        Ok(due)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registration_columns_cover_model() {
        for column in ["ticket_code", "invitation_sent_at", "reminder_sent_at", "checked_in_at"] {
            assert!(REGISTRATION_COLUMNS.contains(column));
        }
    }
}
